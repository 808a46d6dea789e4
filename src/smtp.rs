use anyhow::{Result, anyhow};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::info;

use crate::config::Config;

/// Submit a plain-text message through the account's SMTP server
/// (STARTTLS on the submission port).
pub fn send_mail(
    cfg: &Config,
    from: &str,
    to: &[String],
    subject: &str,
    text: &str,
) -> Result<()> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| anyhow!("bad from address {}: {}", from, e))?;

    let mut builder = Message::builder().from(from).subject(subject);
    for rcpt in to {
        let mbox: Mailbox = rcpt
            .parse()
            .map_err(|e| anyhow!("bad recipient {}: {}", rcpt, e))?;
        builder = builder.to(mbox);
    }
    let msg = builder.body(text.to_string())?;

    let creds = Credentials::new(cfg.username.clone(), cfg.password()?);
    let transport = SmtpTransport::starttls_relay(&cfg.smtp_host)?
        .port(cfg.smtp_port())
        .credentials(creds)
        .build();

    transport.send(&msg)?;
    info!("sent message to {} recipient(s)", to.len());
    Ok(())
}
