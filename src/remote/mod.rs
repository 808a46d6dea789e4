pub mod sync;

use anyhow::{Result, anyhow};
use native_tls::TlsConnector;

use crate::config::Config;

pub type RemoteSession = imap::Session<native_tls::TlsStream<std::net::TcpStream>>;

/// Connect and authenticate against the remote IMAP account.
pub fn connect(cfg: &Config) -> Result<RemoteSession> {
    let password = cfg.password()?;
    login(cfg, &cfg.username, &password)
}

/// Connect with explicit credentials; used both by sync and to verify
/// web logins against the mail server.
pub fn login(cfg: &Config, username: &str, password: &str) -> Result<RemoteSession> {
    let tls = TlsConnector::builder().build()?;
    let client = imap::connect(
        (cfg.imap_host.as_str(), cfg.imap_port()),
        cfg.imap_host.as_str(),
        &tls,
    )?;
    client
        .login(username, password)
        .map_err(|(e, _client)| anyhow!("IMAP login failed for {}: {}", username, e))
}

/// A remote mailbox scheduled for sync, with the tag its messages get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFolder {
    pub mailbox: String,
    pub tag: Option<String>,
}

/// Decide which remote mailboxes to sync. Prefers a special-use \All
/// mailbox (plus Junk/Trash so their tags arrive); otherwise falls back
/// to INBOX and the Sent mailbox.
pub fn sync_folders(session: &mut RemoteSession) -> Result<Vec<SyncFolder>> {
    let names = session.list(Some(""), Some("*"))?;

    let mut all = None;
    let mut sent = None;
    let mut junk = None;
    let mut trash = None;

    for name in names.iter() {
        for attr in name.attributes() {
            if let imap::types::NameAttribute::Custom(a) = attr {
                match a.as_ref() {
                    "\\All" => all = Some(name.name().to_string()),
                    "\\Sent" => sent = Some(name.name().to_string()),
                    "\\Junk" => junk = Some(name.name().to_string()),
                    "\\Trash" => trash = Some(name.name().to_string()),
                    _ => {}
                }
            }
        }
    }

    let mut folders = Vec::new();
    if let Some(all) = all {
        folders.push(SyncFolder {
            mailbox: all,
            tag: None,
        });
        if let Some(junk) = junk {
            folders.push(SyncFolder {
                mailbox: junk,
                tag: Some("#spam".to_string()),
            });
        }
        if let Some(trash) = trash {
            folders.push(SyncFolder {
                mailbox: trash,
                tag: Some("#trash".to_string()),
            });
        }
    } else {
        folders.push(SyncFolder {
            mailbox: "INBOX".to_string(),
            tag: Some("#inbox".to_string()),
        });
        if let Some(sent) = sent {
            folders.push(SyncFolder {
                mailbox: sent,
                tag: Some("#sent".to_string()),
            });
        }
    }
    Ok(folders)
}
