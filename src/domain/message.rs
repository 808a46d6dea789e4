use serde::{Deserialize, Serialize};

pub type Uid = u32;

/// One mailbox participant, as parsed from From/To/Cc headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addr {
    pub name: String,
    pub addr: String,
}

impl Addr {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }

    pub fn display(&self) -> &str {
        if self.name.is_empty() {
            &self.addr
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime: String,
    pub size: usize,
    /// MIME part path inside the raw message, e.g. "2" or "2.1"
    pub path: String,
}

/// Everything the list and thread views need about one message.
/// Flags mix IMAP system flags (`\Seen`) and tags (`#inbox`, user tags)
/// in a single space-separated namespace.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub uid: Uid,
    pub msgid: String,
    pub thrid: Uid,
    pub origin_uid: u32,
    pub origin_folder: String,
    pub subject: String,
    pub snippet: String,
    pub date_epoch: i64,
    pub addrs: Vec<Addr>,
    pub flags: Vec<String>,
    pub parent: Option<String>,
    pub files: Vec<Attachment>,
}

impl MessageMeta {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_unread(&self) -> bool {
        !self.has_flag("\\Seen")
    }

    pub fn is_pinned(&self) -> bool {
        self.has_flag("\\Flagged")
    }

    pub fn is_draft(&self) -> bool {
        self.has_flag("\\Draft")
    }
}

/// Aggregated view of one thread, keyed by its latest message.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub latest: MessageMeta,
    pub count: usize,
    /// union of flags across the thread
    pub flags: Vec<String>,
    /// all senders across the thread, oldest first
    pub addrs: Vec<Addr>,
}
