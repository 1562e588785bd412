//! End-to-end corpus scenarios
//!
//! Drives the sync pipeline through its batch entry point with literal
//! RFC 822 fixtures and asserts on the resulting filesystem — the corpus
//! layout is the contract downstream programs depend on.

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use maildeck::config::{AccountState, SyncState};
use maildeck::fsio::read_jsonl;
use maildeck::imap::FetchedMessage;
use maildeck::paths::Corpus;
use maildeck::storage::StorageWriter;
use maildeck::sync::process_batch;

const ACCOUNT: &str = "me@gmail.com";

fn setup() -> (tempfile::TempDir, Corpus, StorageWriter) {
    let dir = tempfile::tempdir().expect("tempdir");
    let corpus = Corpus::new(dir.path());
    let storage = StorageWriter::new(corpus.clone(), ACCOUNT);
    storage.ensure_account_tree().expect("account tree");
    (dir, corpus, storage)
}

fn message(uid: u32, headers: &str, body: &str) -> FetchedMessage {
    FetchedMessage {
        uid,
        raw: format!("{headers}\r\n\r\n{body}").into_bytes(),
        flags: vec!["Seen".to_owned()],
    }
}

#[test]
fn empty_full_sync_initializes_a_quiet_corpus() {
    let (_dir, corpus, storage) = setup();

    let report = process_batch(&storage, Vec::new(), &CancellationToken::new()).expect("sync");
    let mut state = AccountState::load(&corpus, ACCOUNT).expect("state");
    state.record_success(report.last_uid, Utc::now());
    state.save(&corpus).expect("save");

    assert!(corpus.outbox_dir(ACCOUNT).is_dir());
    assert!(corpus.threads_dir(ACCOUNT).is_dir());
    assert!(
        !corpus.threads_index(ACCOUNT).exists(),
        "no threads means no index file"
    );

    let reloaded = AccountState::load(&corpus, ACCOUNT).expect("reload");
    assert_eq!(reloaded.last_uid, None, "empty sync leaves the mark at zero");
    assert_eq!(reloaded.sync_state, SyncState::Idle);
    assert!(reloaded.last_sync.is_some());
}

#[test]
fn quote_chains_are_stripped_from_stored_messages() {
    let (_dir, corpus, storage) = setup();

    let body = "That sounds reasonable. Let's go with the revised numbers.\r\n\r\nCan we schedule a call Thursday to finalize?\r\n\r\nOn Mon, Feb 17, 2026 at 9:30 AM You <you@gmail.com> wrote:\r\n> How about we split the implementation into two phases?\r\n> Phase 1 at $8K and Phase 2 at $5K?\r\n";
    let batch = vec![message(
        7,
        "Message-ID: <reply@x>\r\nFrom: Client <client@example.com>\r\nTo: me@gmail.com\r\nSubject: Re: Proposal\r\nDate: Tue, 17 Feb 2026 14:00:00 +0000",
        body,
    )];
    process_batch(&storage, batch, &CancellationToken::new()).expect("sync");

    let threads: Vec<_> = std::fs::read_dir(corpus.threads_dir(ACCOUNT))
        .expect("threads dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(threads.len(), 1);
    let messages_dir = threads[0].join("messages");
    let message_file = std::fs::read_dir(&messages_dir)
        .expect("messages dir")
        .next()
        .expect("one message")
        .expect("entry")
        .path();

    let text = std::fs::read_to_string(&message_file).expect("read message");
    assert!(text.contains("That sounds reasonable"));
    assert!(text.contains("schedule a call Thursday"));
    assert!(!text.contains("How about we split"));
}

#[test]
fn incremental_resume_advances_and_holds_the_mark() {
    let (_dir, corpus, storage) = setup();
    let mut state = AccountState::load(&corpus, ACCOUNT).expect("state");
    state.record_success(100, Utc::now());
    state.save(&corpus).expect("save");

    let batch = vec![
        message(
            101,
            "Message-ID: <a@x>\r\nFrom: a@example.com\r\nSubject: One\r\nDate: Tue, 10 Feb 2026 09:00:00 +0000",
            "first",
        ),
        message(
            102,
            "Message-ID: <b@x>\r\nFrom: b@example.com\r\nSubject: Two\r\nDate: Tue, 10 Feb 2026 10:00:00 +0000",
            "second",
        ),
        message(
            103,
            "Message-ID: <c@x>\r\nIn-Reply-To: <b@x>\r\nFrom: c@example.com\r\nSubject: Re: Two\r\nDate: Tue, 10 Feb 2026 11:00:00 +0000",
            "third",
        ),
    ];
    let report = process_batch(&storage, batch, &CancellationToken::new()).expect("sync");
    assert!(report.threads_touched >= 1 && report.threads_touched <= 3);
    assert_eq!(report.last_uid, 103);

    let mut state = AccountState::load(&corpus, ACCOUNT).expect("state");
    state.record_success(report.last_uid, Utc::now());
    state.save(&corpus).expect("save");
    assert_eq!(
        AccountState::load(&corpus, ACCOUNT).expect("reload").last_uid,
        Some(103)
    );

    // No new mail: the mark holds.
    let report = process_batch(&storage, Vec::new(), &CancellationToken::new()).expect("resync");
    let mut state = AccountState::load(&corpus, ACCOUNT).expect("state");
    state.record_success(report.last_uid, Utc::now());
    state.save(&corpus).expect("save");
    assert_eq!(
        AccountState::load(&corpus, ACCOUNT).expect("reload").last_uid,
        Some(103)
    );
}

#[test]
fn oversize_attachment_is_skipped_but_recorded() {
    let (_dir, corpus, storage) = setup();

    // 12 MiB payload against the 10 MiB bound, plus a small sibling that
    // must persist normally.
    let big = "A".repeat(12 * 1024 * 1024);
    let raw = format!(
        "Message-ID: <att@x>\r\nFrom: sender@example.com\r\nSubject: Files\r\nDate: Tue, 10 Feb 2026 09:00:00 +0000\r\nMIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"sep\"\r\n\r\n--sep\r\nContent-Type: text/plain\r\n\r\nsee attached\r\n--sep\r\nContent-Type: application/octet-stream; name=\"big.bin\"\r\nContent-Disposition: attachment; filename=\"big.bin\"\r\n\r\n{big}\r\n--sep\r\nContent-Type: text/plain; name=\"small.txt\"\r\nContent-Disposition: attachment; filename=\"small.txt\"\r\n\r\ntiny payload\r\n--sep--\r\n"
    );
    let batch = vec![FetchedMessage {
        uid: 9,
        raw: raw.into_bytes(),
        flags: vec![],
    }];
    process_batch(&storage, batch, &CancellationToken::new()).expect("sync");

    let threads: Vec<_> = std::fs::read_dir(corpus.threads_dir(ACCOUNT))
        .expect("threads dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(threads.len(), 1);

    let meta: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(threads[0].join("thread.json")).expect("thread.json"),
    )
    .expect("parse meta");
    assert_eq!(meta["has_attachments"], true);
    let attachments = meta["attachments"].as_array().expect("attachments array");
    let big_rec = attachments
        .iter()
        .find(|a| a["filename"] == "big.bin")
        .expect("big.bin recorded");
    assert_eq!(big_rec["skipped"], true);
    let small_rec = attachments
        .iter()
        .find(|a| a["filename"] == "small.txt")
        .expect("small.txt recorded");
    assert!(small_rec.get("skipped").is_none() || small_rec["skipped"] == false);

    let att_dir = threads[0].join("attachments");
    assert!(!att_dir.join("big.bin").exists(), "oversize bytes withheld");
    assert_eq!(
        std::fs::read_to_string(att_dir.join("small.txt")).expect("small.txt"),
        "tiny payload"
    );
}

#[test]
fn reprocessing_a_batch_is_byte_identical() {
    let (_dir, corpus, storage) = setup();
    let batch = || {
        vec![message(
            42,
            "Message-ID: <idem@x>\r\nFrom: a@example.com\r\nTo: me@gmail.com\r\nSubject: Stable\r\nDate: Tue, 10 Feb 2026 09:30:00 +0000",
            "the same body every time",
        )]
    };

    process_batch(&storage, batch(), &CancellationToken::new()).expect("first");
    let threads: Vec<_> = std::fs::read_dir(corpus.threads_dir(ACCOUNT))
        .expect("threads dir")
        .map(|e| e.expect("entry").path())
        .collect();
    let messages_dir = threads[0].join("messages");
    let file = std::fs::read_dir(&messages_dir)
        .expect("messages")
        .next()
        .expect("one")
        .expect("entry")
        .path();
    let first = std::fs::read(&file).expect("read");

    process_batch(&storage, batch(), &CancellationToken::new()).expect("second");
    let second = std::fs::read(&file).expect("read again");
    assert_eq!(first, second);

    let names: Vec<_> = std::fs::read_dir(&messages_dir)
        .expect("messages")
        .map(|e| e.expect("entry").file_name())
        .collect();
    assert_eq!(names.len(), 1, "same filename, no duplicates");
}

#[test]
fn every_thread_directory_has_meta_and_exactly_one_index_entry() {
    let (_dir, corpus, storage) = setup();
    let batch = vec![
        message(
            1,
            "Message-ID: <t1@x>\r\nFrom: a@example.com\r\nSubject: Alpha\r\nDate: Tue, 10 Feb 2026 09:00:00 +0000",
            "alpha body",
        ),
        message(
            2,
            "Message-ID: <t2@x>\r\nFrom: b@example.com\r\nSubject: Beta\r\nDate: Wed, 11 Feb 2026 09:00:00 +0000",
            "beta body",
        ),
        message(
            3,
            "Message-ID: <t1b@x>\r\nIn-Reply-To: <t1@x>\r\nFrom: c@example.com\r\nSubject: Re: Alpha\r\nDate: Thu, 12 Feb 2026 09:00:00 +0000",
            "alpha reply",
        ),
    ];
    process_batch(&storage, batch, &CancellationToken::new()).expect("sync");

    let mut on_disk: Vec<String> = std::fs::read_dir(corpus.threads_dir(ACCOUNT))
        .expect("threads dir")
        .map(|e| {
            let path = e.expect("entry").path();
            assert!(path.join("thread.json").exists(), "thread.json missing");
            path.file_name().unwrap().to_str().unwrap().to_owned()
        })
        .collect();
    on_disk.sort();
    assert_eq!(on_disk.len(), 2);

    let records = read_jsonl(&corpus.threads_index(ACCOUNT)).expect("index");
    let mut indexed: Vec<String> = records
        .iter()
        .map(|r| r["id"].as_str().expect("id").to_owned())
        .collect();
    indexed.sort();
    assert_eq!(indexed, on_disk, "index and directories correspond 1:1");

    // Sorted by last_date descending at rest.
    let dates: Vec<&str> = records
        .iter()
        .map(|r| r["last_date"].as_str().expect("last_date"))
        .collect();
    let mut sorted = dates.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(dates, sorted);
}

#[test]
fn later_batches_merge_into_the_thread_and_keep_its_subject() {
    let (_dir, corpus, storage) = setup();

    let first = vec![message(
        10,
        "Message-ID: <m1@x>\r\nFrom: jane@example.com\r\nTo: me@gmail.com\r\nSubject: Quarterly numbers\r\nDate: Tue, 10 Feb 2026 09:00:00 +0000",
        "first round",
    )];
    process_batch(&storage, first, &CancellationToken::new()).expect("first batch");

    let second = vec![message(
        11,
        "Message-ID: <m2@x>\r\nFrom: bob@example.com\r\nTo: me@gmail.com\r\nSubject: Re: Re: Quarterly numbers\r\nDate: Wed, 11 Feb 2026 09:00:00 +0000",
        "second round",
    )];
    process_batch(&storage, second, &CancellationToken::new()).expect("second batch");

    let threads: Vec<_> = std::fs::read_dir(corpus.threads_dir(ACCOUNT))
        .expect("threads dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(threads.len(), 1, "subject hash joins the batches");

    let meta: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(threads[0].join("thread.json")).expect("thread.json"),
    )
    .expect("parse meta");
    assert_eq!(meta["subject"], "Quarterly numbers", "first title sticks");
    assert_eq!(meta["message_count"], 2);
    assert_eq!(meta["first_date"], "2026-02-10T09:00:00Z");
    assert_eq!(meta["last_date"], "2026-02-11T09:00:00Z");
    let participant_emails: Vec<&str> = meta["participants"]
        .as_array()
        .expect("participants")
        .iter()
        .map(|p| p["email"].as_str().expect("email"))
        .collect();
    assert!(participant_emails.contains(&"jane@example.com"));
    assert!(participant_emails.contains(&"bob@example.com"));

    let records = read_jsonl(&corpus.threads_index(ACCOUNT)).expect("index");
    assert_eq!(records.len(), 1, "still exactly one index entry");
    assert_eq!(records[0]["msg_count"], 2);
    assert_eq!(records[0]["snippet"], "second round");
}

#[test]
fn message_filenames_agree_with_frontmatter_and_sort_chronologically() {
    let (_dir, corpus, storage) = setup();
    let batch = vec![
        message(
            2,
            "Message-ID: <late@x>\r\nFrom: a@example.com\r\nSubject: Order\r\nDate: Wed, 11 Feb 2026 17:45:09 +0000",
            "later",
        ),
        message(
            1,
            "Message-ID: <early@x>\r\nIn-Reply-To: <late@x>\r\nFrom: b@example.com\r\nSubject: Re: Order\r\nDate: Tue, 10 Feb 2026 08:05:31 +0000",
            "earlier",
        ),
    ];
    process_batch(&storage, batch, &CancellationToken::new()).expect("sync");

    let threads: Vec<_> = std::fs::read_dir(corpus.threads_dir(ACCOUNT))
        .expect("threads dir")
        .map(|e| e.expect("entry").path())
        .collect();
    let mut names: Vec<String> = std::fs::read_dir(threads[0].join("messages"))
        .expect("messages")
        .map(|e| e.expect("entry").file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "20260210T080531Z__msg1.md".to_owned(),
            "20260211T174509Z__msg2.md".to_owned(),
        ],
        "plain lexical sort is chronological"
    );

    for name in &names {
        let text =
            std::fs::read_to_string(threads[0].join("messages").join(name)).expect("message");
        let ts = name.split("__msg").next().expect("timestamp prefix");
        let date_line = text
            .lines()
            .find(|l| l.starts_with("date:"))
            .expect("date in frontmatter");
        let compact: String = date_line
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        let prefix_digits: String = ts.chars().filter(|c| c.is_ascii_digit()).collect();
        assert_eq!(compact, prefix_digits, "prefix matches frontmatter date to the second");
    }
}

#[test]
fn contacts_accumulate_for_external_senders_only() {
    let (_dir, corpus, storage) = setup();
    let batch = vec![
        message(
            1,
            "Message-ID: <c1@x>\r\nFrom: Jane <jane@example.com>\r\nTo: me@gmail.com\r\nSubject: Hello\r\nDate: Tue, 10 Feb 2026 09:00:00 +0000",
            "hi",
        ),
        message(
            2,
            "Message-ID: <c2@x>\r\nFrom: me@gmail.com\r\nTo: jane@example.com\r\nSubject: Re: Hello\r\nDate: Tue, 10 Feb 2026 10:00:00 +0000",
            "hi back",
        ),
    ];
    process_batch(&storage, batch, &CancellationToken::new()).expect("sync");

    let contacts = read_jsonl(&corpus.contacts_index(ACCOUNT)).expect("contacts");
    assert_eq!(contacts.len(), 1, "own address is not a contact");
    assert_eq!(contacts[0]["email"], "jane@example.com");
    assert_eq!(contacts[0]["name"], "Jane");
    assert_eq!(contacts[0]["msg_count"], 1);
}
