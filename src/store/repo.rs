use anyhow::Result;

use crate::domain::{MessageMeta, Tag, TagInfo, ThreadInfo, Uid};
use crate::mail::parse::ParsedEmail;
use crate::query::Query;

/// Flags that round-trip between the local store and the remote account.
/// Everything else (user tags) stays local.
pub const SYNCED_FLAGS: &[&str] = &["\\Seen", "\\Flagged", "#inbox", "#spam", "#trash"];

/// One message ready for import: raw bytes, parsed metadata and the
/// local flags mapped from its remote state.
pub struct ImportEmail<'a> {
    pub raw: &'a [u8],
    pub parsed: &'a ParsedEmail,
    pub origin_uid: u32,
    pub origin_folder: String,
    pub flags: Vec<String>,
}

pub trait MailStore: Send {
    /// Import a message. Returns None when the raw bytes were already
    /// imported (sha256 dedup).
    fn import(&mut self, msg: &ImportEmail) -> Result<Option<Uid>>;
    fn contains_sha(&self, sha256: &str) -> Result<bool>;

    /// Matching message uids, newest first.
    fn search_msgs(&self, q: &Query) -> Result<Vec<Uid>>;
    /// One representative uid (the newest match) per matching thread,
    /// newest first.
    fn search_thrs(&self, q: &Query) -> Result<Vec<Uid>>;
    /// All uids of the thread containing `uid`, oldest first.
    fn thread_uids(&self, uid: Uid) -> Result<Vec<Uid>>;

    fn msgs_info(&self, uids: &[Uid]) -> Result<Vec<MessageMeta>>;
    fn thrs_info(&self, uids: &[Uid]) -> Result<Vec<ThreadInfo>>;
    fn raw_msg(&self, uid: Uid) -> Result<Option<Vec<u8>>>;

    /// Remove `old` flags and add `new` flags on each uid, recording the
    /// edit in the journal for the next remote push.
    fn msgs_flag(&mut self, uids: &[Uid], old: &[String], new: &[String]) -> Result<()>;
    /// Merge the threads containing the given uids; returns the surviving
    /// thread id.
    fn link_threads(&mut self, uids: &[Uid]) -> Result<Uid>;

    fn tags_info(&self) -> Result<Vec<TagInfo>>;
    /// Look up a tag by display name, creating user tags on first use.
    fn get_tag(&mut self, name: &str) -> Result<Tag>;

    fn get_meta(&self, key: &str) -> Result<Option<String>>;
    fn set_meta(&mut self, key: &str, value: &str) -> Result<()>;

    /// Apply the flag state observed on the remote: diff against the
    /// stored snapshot, apply the synced subset locally (without
    /// journaling), refresh the snapshot.
    fn apply_remote_flags(&mut self, uid: Uid, remote: &[String]) -> Result<()>;

    /// Last flag state seen on the remote, used to detect remote edits.
    fn remote_flags(&self, uid: Uid) -> Result<Option<String>>;
    fn set_remote_flags(&mut self, uid: Uid, flags: &str) -> Result<()>;
    fn uid_by_origin(&self, folder: &str, origin_uid: u32) -> Result<Option<Uid>>;

    /// Locally edited uids pending a remote push.
    fn flag_journal(&self) -> Result<Vec<Uid>>;
    /// Remove uids from the journal once their flags were pushed.
    fn clear_flag_journal(&mut self, uids: &[Uid]) -> Result<()>;
}
