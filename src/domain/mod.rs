pub mod message;
pub mod tag;

pub use message::{Addr, Attachment, MessageMeta, ThreadInfo, Uid};
pub use tag::{Tag, TagInfo};
