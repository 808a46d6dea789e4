use pretty_assertions::assert_eq;
use tempfile::TempDir;

use tagmail::domain::Addr;
use tagmail::mail::parse::{ParsedEmail, sha256_hex};
use tagmail::query;
use tagmail::store::{ImportEmail, MailStore, SqliteStore};

fn open_store(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(&dir.path().join("mail.db")).expect("open store")
}

fn parsed(msgid: &str, refs: &[&str], subject: &str, from: &str, date: i64, raw: &[u8]) -> ParsedEmail {
    ParsedEmail {
        msgid: msgid.to_string(),
        refs: refs.iter().map(|r| r.to_string()).collect(),
        subject: subject.to_string(),
        from: vec![Addr::new(from.to_uppercase(), format!("{}@example.com", from))],
        date_epoch: date,
        snippet: format!("snippet of {}", subject),
        files: Vec::new(),
        sha256: sha256_hex(raw),
    }
}

fn import(
    store: &mut SqliteStore,
    msgid: &str,
    refs: &[&str],
    subject: &str,
    from: &str,
    date: i64,
    flags: &[&str],
) -> u32 {
    let raw = format!("raw message {}", msgid).into_bytes();
    let p = parsed(msgid, refs, subject, from, date, &raw);
    let msg = ImportEmail {
        raw: &raw,
        parsed: &p,
        origin_uid: date as u32,
        origin_folder: "INBOX".to_string(),
        flags: flags.iter().map(|f| f.to_string()).collect(),
    };
    store.import(&msg).expect("import").expect("not a duplicate")
}

#[test]
fn import_dedups_by_sha256() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let raw = b"raw message one";
    let p = parsed("one@x", &[], "Hello", "alice", 100, raw);
    let msg = ImportEmail {
        raw,
        parsed: &p,
        origin_uid: 1,
        origin_folder: "INBOX".to_string(),
        flags: vec!["#inbox".to_string()],
    };
    assert!(store.import(&msg).unwrap().is_some());
    assert!(store.import(&msg).unwrap().is_none());
    assert!(store.contains_sha(&p.sha256).unwrap());
}

#[test]
fn replies_join_the_thread_of_their_reference() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let a = import(&mut store, "a@x", &[], "Topic", "alice", 100, &["#inbox"]);
    let b = import(&mut store, "b@x", &["a@x"], "Re: Topic", "bob", 200, &["#inbox"]);
    let c = import(&mut store, "c@x", &["a@x", "b@x"], "Re: Topic", "carol", 300, &["#inbox"]);
    let lone = import(&mut store, "d@x", &["missing@x"], "Other", "dave", 400, &["#inbox"]);

    assert_eq!(store.thread_uids(a).unwrap(), vec![a, b, c]);
    assert_eq!(store.thread_uids(c).unwrap(), vec![a, b, c]);
    // unknown references root a new thread
    assert_eq!(store.thread_uids(lone).unwrap(), vec![lone]);
}

#[test]
fn search_hides_trash_and_spam_by_default() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let inbox = import(&mut store, "a@x", &[], "Hello", "alice", 100, &["#inbox"]);
    let _trash = import(&mut store, "b@x", &[], "Old", "bob", 200, &["#trash"]);

    let uids = store.search_msgs(&query::parse("")).unwrap();
    assert_eq!(uids, vec![inbox]);

    let uids = store.search_msgs(&query::parse("tag:#trash")).unwrap();
    assert_eq!(uids.len(), 1);
    assert_ne!(uids[0], inbox);
}

#[test]
fn search_by_text_from_and_date() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    // 2026-03-15 and 2026-07-01
    let spring = import(&mut store, "a@x", &[], "Quarterly report", "alice", 1773532800, &["#inbox"]);
    let summer = import(&mut store, "b@x", &[], "Summer plans", "bob", 1782864000, &["#inbox"]);

    let uids = store.search_msgs(&query::parse("quarterly")).unwrap();
    assert_eq!(uids, vec![spring]);

    let uids = store.search_msgs(&query::parse("from:bob@example.com")).unwrap();
    assert_eq!(uids, vec![summer]);

    let uids = store.search_msgs(&query::parse("date:2026-03")).unwrap();
    assert_eq!(uids, vec![spring]);

    let uids = store.search_msgs(&query::parse("date:2026")).unwrap();
    assert_eq!(uids, vec![summer, spring]);
}

#[test]
fn search_by_flags_and_uid() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let seen = import(&mut store, "a@x", &[], "Read one", "alice", 100, &["#inbox", "\\Seen"]);
    let unseen = import(&mut store, "b@x", &[], "New one", "bob", 200, &["#inbox"]);

    assert_eq!(store.search_msgs(&query::parse(":unread")).unwrap(), vec![unseen]);
    assert_eq!(store.search_msgs(&query::parse(":read")).unwrap(), vec![seen]);
    assert_eq!(
        store.search_msgs(&query::parse(&format!("uid:{}", seen))).unwrap(),
        vec![seen]
    );
    assert_eq!(
        store.search_msgs(&query::parse(":raw Seen")).unwrap(),
        vec![seen]
    );
}

#[test]
fn search_threads_returns_one_uid_per_thread() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let _a = import(&mut store, "a@x", &[], "Topic", "alice", 100, &["#inbox"]);
    let b = import(&mut store, "b@x", &["a@x"], "Re: Topic", "bob", 200, &["#inbox"]);
    let other = import(&mut store, "c@x", &[], "Other", "carol", 300, &["#inbox"]);

    let uids = store.search_thrs(&query::parse("")).unwrap();
    assert_eq!(uids, vec![other, b]);
}

#[test]
fn flag_updates_are_journaled() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let uid = import(&mut store, "a@x", &[], "Hello", "alice", 100, &["#inbox"]);
    store
        .msgs_flag(&[uid], &[], &["\\Seen".to_string(), "work".to_string()])
        .unwrap();

    let info = store.msgs_info(&[uid]).unwrap();
    assert!(!info[0].is_unread());
    assert!(info[0].flags.contains(&"work".to_string()));

    assert_eq!(store.flag_journal().unwrap(), vec![uid]);
    // the journal survives until explicitly cleared after a push
    assert_eq!(store.flag_journal().unwrap(), vec![uid]);
    store.clear_flag_journal(&[uid]).unwrap();
    assert!(store.flag_journal().unwrap().is_empty());

    store
        .msgs_flag(&[uid], &["\\Seen".to_string()], &[])
        .unwrap();
    let info = store.msgs_info(&[uid]).unwrap();
    assert!(info[0].is_unread());
}

#[test]
fn remote_flag_changes_apply_without_journaling() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let uid = import(&mut store, "a@x", &[], "Hello", "alice", 100, &["#inbox"]);

    // remote marked it read and starred
    store
        .apply_remote_flags(
            uid,
            &["#inbox".to_string(), "\\Seen".to_string(), "\\Flagged".to_string()],
        )
        .unwrap();
    let info = store.msgs_info(&[uid]).unwrap();
    assert!(!info[0].is_unread());
    assert!(info[0].is_pinned());
    assert!(store.flag_journal().unwrap().is_empty());

    // unchanged state is a no-op
    store
        .apply_remote_flags(
            uid,
            &["#inbox".to_string(), "\\Seen".to_string(), "\\Flagged".to_string()],
        )
        .unwrap();
    let again = store.msgs_info(&[uid]).unwrap();
    assert_eq!(again[0].flags, info[0].flags);

    // non-synced remote keywords do not leak into local flags
    store
        .apply_remote_flags(uid, &["#inbox".to_string(), "\\Answered".to_string()])
        .unwrap();
    let info = store.msgs_info(&[uid]).unwrap();
    assert!(!info[0].flags.contains(&"\\Answered".to_string()));
    // ...but the \Seen removal on the remote is honored
    assert!(info[0].is_unread());
}

#[test]
fn link_threads_merges_and_sticks() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let a = import(&mut store, "a@x", &[], "Topic", "alice", 100, &["#inbox"]);
    let b = import(&mut store, "b@x", &[], "Fwd: Topic", "bob", 200, &["#inbox"]);
    assert_eq!(store.thread_uids(a).unwrap(), vec![a]);

    store.link_threads(&[a, b]).unwrap();
    assert_eq!(store.thread_uids(a).unwrap(), vec![a, b]);

    // a reply to the merged thread joins it
    let c = import(&mut store, "c@x", &["b@x"], "Re: Topic", "carol", 300, &["#inbox"]);
    assert_eq!(store.thread_uids(a).unwrap(), vec![a, b, c]);
}

#[test]
fn tags_info_counts_unread_and_pinned() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    import(&mut store, "a@x", &[], "One", "alice", 100, &["#inbox"]);
    import(&mut store, "b@x", &[], "Two", "bob", 200, &["#inbox", "\\Seen", "\\Flagged"]);
    import(&mut store, "c@x", &[], "Three", "carol", 300, &["work"]);

    let tags = store.tags_info().unwrap();
    let inbox = tags.iter().find(|t| t.id == "#inbox").unwrap();
    assert_eq!(inbox.unread, 1);
    assert_eq!(inbox.pinned, 1);
    let work = tags.iter().find(|t| t.id == "work").unwrap();
    assert_eq!(work.unread, 1);
    // builtin tags are present even when empty
    assert!(tags.iter().any(|t| t.id == "#trash"));
}

#[test]
fn get_tag_creates_user_tags_once() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let t = store.get_tag("Mailing Lists").unwrap();
    assert_eq!(t.id, "mailing-lists");
    assert_eq!(t.name, "Mailing Lists");

    // same id, original display name kept
    let again = store.get_tag("mailing lists").unwrap();
    assert_eq!(again.id, "mailing-lists");
    assert_eq!(again.name, "Mailing Lists");

    let builtin = store.get_tag("#inbox").unwrap();
    assert_eq!(builtin.name, "Inbox");
}

#[test]
fn raw_round_trip_and_origin_lookup() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    let uid = import(&mut store, "a@x", &[], "Hello", "alice", 100, &["#inbox"]);
    let raw = store.raw_msg(uid).unwrap().unwrap();
    assert_eq!(raw, b"raw message a@x");

    assert_eq!(store.uid_by_origin("INBOX", 100).unwrap(), Some(uid));
    assert_eq!(store.uid_by_origin("INBOX", 9999).unwrap(), None);

    assert!(store.raw_msg(9999).unwrap().is_none());
}

#[test]
fn meta_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);

    assert!(store.get_meta("cursor/x").unwrap().is_none());
    store.set_meta("cursor/x", "5 100").unwrap();
    assert_eq!(store.get_meta("cursor/x").unwrap().as_deref(), Some("5 100"));
    store.set_meta("cursor/x", "5 200").unwrap();
    assert_eq!(store.get_meta("cursor/x").unwrap().as_deref(), Some("5 200"));
}
