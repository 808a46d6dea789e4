use anyhow::Result;
use log::{debug, info, warn};

use crate::config::Config;
use crate::domain::tag::tag_id;
use crate::mail::parse::parse_email;
use crate::remote::{RemoteSession, SyncFolder, connect, sync_folders};
use crate::store::{ImportEmail, MailStore};

const FETCH_CHUNK: usize = 50;

/// Full sync pass: import new messages from every sync folder, pull
/// remote flag edits, push journaled local edits.
pub fn sync(store: &mut dyn MailStore, cfg: &Config) -> Result<()> {
    let mut session = connect(cfg)?;
    let folders = sync_folders(&mut session)?;

    // capture pending local edits first: on a message changed on both
    // sides, the local edit wins
    let journal = store.flag_journal()?;

    for folder in &folders {
        match fetch_folder(store, &mut session, cfg, folder) {
            Ok(n) if n > 0 => info!("{}: imported {} messages", folder.mailbox, n),
            Ok(_) => debug!("{}: nothing new", folder.mailbox),
            Err(e) => warn!("{}: fetch failed: {}", folder.mailbox, e),
        }
        if let Err(e) = pull_flags(store, &mut session, cfg, folder, &journal) {
            warn!("{}: flag pull failed: {}", folder.mailbox, e);
        }
    }

    push_flags(store, &mut session, &journal)?;
    store.clear_flag_journal(&journal)?;

    let _ = session.logout();
    Ok(())
}

/// Import messages above the saved uidnext cursor for one folder.
/// The cursor is only advanced after a successful import pass.
fn fetch_folder(
    store: &mut dyn MailStore,
    session: &mut RemoteSession,
    cfg: &Config,
    folder: &SyncFolder,
) -> Result<usize> {
    let mailbox = session.select(&folder.mailbox)?;
    let uidvalidity = mailbox.uid_validity.unwrap_or(0);

    let key = cursor_key(cfg, &folder.mailbox);
    let saved = store.get_meta(&key)?.and_then(|s| parse_cursor(&s));
    let mut uidnext = match saved {
        Some((v, n)) if v == uidvalidity => n,
        Some((v, _)) => {
            info!(
                "{}: uidvalidity changed {} -> {}, refetching",
                folder.mailbox, v, uidvalidity
            );
            1
        }
        None => 1,
    };
    if uidnext == 0 {
        uidnext = 1;
    }
    info!(
        "{}: saved uidnext={} remote uidnext={:?}",
        folder.mailbox, uidnext, mailbox.uid_next
    );

    let mut uids: Vec<u32> = session
        .uid_search(format!("UID {}:*", uidnext))?
        .into_iter()
        .filter(|u| *u >= uidnext)
        .collect();
    uids.sort_unstable();

    let mut imported = 0;
    for chunk in uids.chunks(FETCH_CHUNK) {
        let seq = chunk
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let fetches = session.uid_fetch(seq, "(UID INTERNALDATE FLAGS BODY.PEEK[])")?;
        for f in fetches.iter() {
            let Some(origin_uid) = f.uid else { continue };
            let Some(raw) = f.body() else {
                warn!("{}: uid {} has no body, skipped", folder.mailbox, origin_uid);
                continue;
            };

            let remote: Vec<String> = f.flags().iter().filter_map(flag_str).collect();
            let flags = local_flags(&remote, folder.tag.as_deref(), cfg.is_gmail());
            if flags.iter().any(|f| f == "\\Draft") {
                // drafts never import; the editor surface is out of scope
                continue;
            }

            let mut parsed = parse_email(raw)?;
            if parsed.date_epoch == 0 {
                parsed.date_epoch = f.internal_date().map(|d| d.timestamp()).unwrap_or(0);
            }

            let import = ImportEmail {
                raw,
                parsed: &parsed,
                origin_uid,
                origin_folder: folder.mailbox.clone(),
                flags,
            };
            if store.import(&import)?.is_some() {
                imported += 1;
            }
        }
    }

    let new_next = mailbox
        .uid_next
        .unwrap_or_else(|| uids.last().map(|u| u + 1).unwrap_or(uidnext));
    store.set_meta(&key, &format_cursor(uidvalidity, new_next))?;

    Ok(imported)
}

/// Compare remote flag state against the stored snapshot and apply the
/// synced subset locally. Assumes `folder` is the selected mailbox.
fn pull_flags(
    store: &mut dyn MailStore,
    session: &mut RemoteSession,
    cfg: &Config,
    folder: &SyncFolder,
    skip: &[crate::domain::Uid],
) -> Result<()> {
    if session.uid_search("ALL")?.is_empty() {
        return Ok(());
    }
    let fetches = session.uid_fetch("1:*", "(UID FLAGS)")?;
    for f in fetches.iter() {
        let Some(origin_uid) = f.uid else { continue };
        let Some(uid) = store.uid_by_origin(&folder.mailbox, origin_uid)? else {
            continue;
        };
        if skip.contains(&uid) {
            continue;
        }
        let remote: Vec<String> = f.flags().iter().filter_map(flag_str).collect();
        let mapped = local_flags(&remote, folder.tag.as_deref(), cfg.is_gmail());
        store.apply_remote_flags(uid, &mapped)?;
    }
    Ok(())
}

/// Push journaled local flag edits to the remote: \Seen and \Flagged are
/// set absolutely, matching the local state. Tags stay local.
fn push_flags(
    store: &mut dyn MailStore,
    session: &mut RemoteSession,
    uids: &[crate::domain::Uid],
) -> Result<()> {
    if uids.is_empty() {
        return Ok(());
    }
    info!("pushing flags for {} messages", uids.len());

    let metas = store.msgs_info(uids)?;
    let mut by_folder: std::collections::HashMap<String, Vec<&crate::domain::MessageMeta>> =
        std::collections::HashMap::new();
    for m in &metas {
        by_folder.entry(m.origin_folder.clone()).or_default().push(m);
    }

    for (folder, items) in by_folder {
        session.select(&folder)?;
        for m in items {
            for (flag, present) in [("\\Seen", !m.is_unread()), ("\\Flagged", m.is_pinned())] {
                let mark = if present { "+" } else { "-" };
                session.uid_store(
                    m.origin_uid.to_string(),
                    format!("{}FLAGS.SILENT ({})", mark, flag),
                )?;
            }

            // snapshot now reflects what we pushed
            let snapshot = store.remote_flags(m.uid)?.unwrap_or_default();
            let mut snap: Vec<String> = snapshot
                .split_whitespace()
                .filter(|f| *f != "\\Seen" && *f != "\\Flagged")
                .map(|s| s.to_string())
                .collect();
            if !m.is_unread() {
                snap.push("\\Seen".to_string());
            }
            if m.is_pinned() {
                snap.push("\\Flagged".to_string());
            }
            store.set_remote_flags(m.uid, &snap.join(" "))?;
        }
    }
    Ok(())
}

fn cursor_key(cfg: &Config, mailbox: &str) -> String {
    format!("cursor/{}:{}:{}", cfg.imap_host, cfg.username, mailbox)
}

fn parse_cursor(s: &str) -> Option<(u32, u32)> {
    let mut it = s.split_whitespace();
    let v = it.next()?.parse().ok()?;
    let n = it.next()?.parse().ok()?;
    Some((v, n))
}

fn format_cursor(uidvalidity: u32, uidnext: u32) -> String {
    format!("{} {}", uidvalidity, uidnext)
}

fn flag_str(f: &imap::types::Flag) -> Option<String> {
    use imap::types::Flag;
    match f {
        Flag::Seen => Some("\\Seen".to_string()),
        Flag::Answered => Some("\\Answered".to_string()),
        Flag::Flagged => Some("\\Flagged".to_string()),
        Flag::Deleted => Some("\\Deleted".to_string()),
        Flag::Draft => Some("\\Draft".to_string()),
        Flag::Recent => None,
        Flag::MayCreate => None,
        Flag::Custom(s) => Some(s.to_string()),
    }
}

/// Map remote flags and keywords onto the local flag namespace, adding
/// the folder tag.
pub fn local_flags(remote: &[String], folder_tag: Option<&str>, gmail: bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for f in remote {
        let mapped = if let Some(rest) = f.strip_prefix('\\') {
            match rest {
                "Seen" | "Answered" | "Flagged" | "Deleted" | "Draft" => Some(f.clone()),
                _ if gmail => gmail_label_tag(f),
                _ => None,
            }
        } else if gmail {
            gmail_label_tag(f)
        } else {
            // Dovecot-style keyword, keep as a user tag
            Some(tag_id(f))
        };
        if let Some(m) = mapped {
            if !m.is_empty() && !out.contains(&m) {
                out.push(m);
            }
        }
    }
    if let Some(tag) = folder_tag {
        if !out.iter().any(|f| f == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Gmail label → local flag, the subset gmail exposes as labels.
/// None drops the label entirely.
fn gmail_label_tag(label: &str) -> Option<String> {
    let label = label.trim_matches('"');
    match label {
        "\\Draft" | "\\Drafts" => Some("\\Draft".to_string()),
        "\\Starred" => Some("\\Flagged".to_string()),
        "\\Inbox" => Some("#inbox".to_string()),
        "\\Junk" | "\\Spam" => Some("#spam".to_string()),
        "\\Trash" => Some("#trash".to_string()),
        "\\Sent" => Some("#sent".to_string()),
        "\\Chats" => Some("#chats".to_string()),
        "\\Important" => None,
        other if other.starts_with('\\') => None,
        other => Some(tag_id(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn system_flags_pass_through() {
        let flags = local_flags(
            &["\\Seen".to_string(), "\\Recent".to_string()],
            Some("#inbox"),
            false,
        );
        assert_eq!(flags, vec!["\\Seen", "#inbox"]);
    }

    #[test]
    fn keywords_become_user_tags() {
        let flags = local_flags(&["Invoices".to_string()], None, false);
        assert_eq!(flags, vec!["invoices"]);
    }

    #[test]
    fn gmail_labels_map_to_local_vocabulary() {
        let remote = vec![
            "\\Starred".to_string(),
            "\\Important".to_string(),
            "\\Inbox".to_string(),
            "Receipts".to_string(),
        ];
        let flags = local_flags(&remote, None, true);
        assert_eq!(flags, vec!["\\Flagged", "#inbox", "receipts"]);
    }

    #[test]
    fn folder_tag_is_not_duplicated() {
        let flags = local_flags(&["\\Inbox".to_string()], Some("#inbox"), true);
        assert_eq!(flags, vec!["#inbox"]);
    }

    #[test]
    fn cursor_round_trip() {
        let s = format_cursor(123, 456);
        assert_eq!(parse_cursor(&s), Some((123, 456)));
        assert_eq!(parse_cursor("garbage"), None);
    }
}
