use anyhow::Result;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use sha2::{Digest, Sha256};

use crate::domain::{Addr, Attachment};
use crate::mail::decoders::{normalize_msgid, normalize_snippet};

const SNIPPET_CHARS: usize = 140;

/// Everything the store needs to import one raw message.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    pub msgid: String,
    /// referenced message ids, oldest first; In-Reply-To last
    pub refs: Vec<String>,
    pub subject: String,
    pub from: Vec<Addr>,
    pub date_epoch: i64,
    pub snippet: String,
    pub files: Vec<Attachment>,
    pub sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub fn parse_email(raw: &[u8]) -> Result<ParsedEmail> {
    let pm = mailparse::parse_mail(raw)?;
    let sha256 = sha256_hex(raw);

    let msgid = pm
        .headers
        .get_first_value("Message-ID")
        .map(|v| normalize_msgid(&v))
        .filter(|v| !v.is_empty())
        // some senders omit the header; synthesize a stable one
        .unwrap_or_else(|| format!("{}@tagmail.local", &sha256[..16]));

    let mut refs: Vec<String> = pm
        .headers
        .get_first_value("References")
        .map(|v| v.split_whitespace().map(normalize_msgid).collect())
        .unwrap_or_default();
    if let Some(irt) = pm.headers.get_first_value("In-Reply-To") {
        let irt = normalize_msgid(&irt);
        if !irt.is_empty() && refs.last() != Some(&irt) {
            refs.push(irt);
        }
    }

    let subject = pm
        .headers
        .get_first_value("Subject")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "(no subject)".to_string());

    let from = pm
        .headers
        .get_first_header("From")
        .and_then(|h| mailparse::addrparse_header(h).ok())
        .map(|list| addrs_from_list(&list))
        .unwrap_or_default();

    let date_epoch = pm
        .headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .unwrap_or(0);

    let snippet = normalize_snippet(&body_text(&pm), SNIPPET_CHARS);
    let files = collect_attachments(&pm);

    Ok(ParsedEmail {
        msgid,
        refs,
        subject,
        from,
        date_epoch,
        snippet,
        files,
        sha256,
    })
}

/// Render the display body of a raw message: best text/plain part,
/// falling back to text/html converted to text.
pub fn render_body(raw: &[u8]) -> Result<String> {
    let pm = mailparse::parse_mail(raw)?;
    Ok(body_text(&pm))
}

/// Extract a single MIME part by IMAP-style part path ("2", "1.3", ...).
/// Returns the decoded bytes and the content type.
pub fn raw_part(raw: &[u8], path: &str) -> Result<Option<(Vec<u8>, String)>> {
    let pm = mailparse::parse_mail(raw)?;
    // a non-multipart message is its own part "1"
    if pm.subparts.is_empty() {
        if path == "1" {
            let bytes = pm.get_body_raw()?;
            return Ok(Some((bytes, pm.ctype.mimetype.clone())));
        }
        return Ok(None);
    }
    let mut part = &pm;
    for idx in path.split('.') {
        let idx: usize = match idx.parse() {
            Ok(n) if n >= 1 => n,
            _ => return Ok(None),
        };
        part = match part.subparts.get(idx - 1) {
            Some(p) => p,
            None => return Ok(None),
        };
    }
    let bytes = part.get_body_raw()?;
    Ok(Some((bytes, part.ctype.mimetype.clone())))
}

fn addrs_from_list(list: &mailparse::MailAddrList) -> Vec<Addr> {
    let mut out = Vec::new();
    for a in list.iter() {
        match a {
            mailparse::MailAddr::Single(s) => {
                out.push(Addr::new(
                    s.display_name.clone().unwrap_or_default(),
                    s.addr.clone(),
                ));
            }
            mailparse::MailAddr::Group(g) => {
                for s in &g.addrs {
                    out.push(Addr::new(
                        s.display_name.clone().unwrap_or_default(),
                        s.addr.clone(),
                    ));
                }
            }
        }
    }
    out
}

fn body_text(pm: &ParsedMail) -> String {
    if let Some(t) = find_text_part(pm, "text/plain") {
        return t;
    }
    if let Some(html) = find_html_part(pm) {
        return html2text::from_read(html.as_bytes(), 80)
            .unwrap_or_else(|_| strip_tags(&html));
    }
    String::new()
}

fn find_text_part(p: &ParsedMail, mime: &str) -> Option<String> {
    if p.ctype.mimetype.eq_ignore_ascii_case(mime) && !is_attachment(p) {
        return p.get_body().ok();
    }
    for sp in &p.subparts {
        if let Some(t) = find_text_part(sp, mime) {
            return Some(t);
        }
    }
    None
}

fn find_html_part(p: &ParsedMail) -> Option<String> {
    find_text_part(p, "text/html")
}

fn is_attachment(p: &ParsedMail) -> bool {
    let cd = p.get_content_disposition();
    cd.disposition == DispositionType::Attachment
}

fn collect_attachments(pm: &ParsedMail) -> Vec<Attachment> {
    let mut out = Vec::new();
    walk_parts(pm, String::new(), &mut out);
    out
}

fn walk_parts(p: &ParsedMail, path: String, out: &mut Vec<Attachment>) {
    if p.subparts.is_empty() {
        let cd = p.get_content_disposition();
        let filename = cd
            .params
            .get("filename")
            .cloned()
            .or_else(|| p.ctype.params.get("name").cloned());
        let keep = cd.disposition == DispositionType::Attachment || filename.is_some();
        if keep && !p.ctype.mimetype.starts_with("multipart/") {
            let size = p.get_body_raw().map(|b| b.len()).unwrap_or(0);
            out.push(Attachment {
                filename: filename.unwrap_or_else(|| "attachment.bin".to_string()),
                mime: p.ctype.mimetype.clone(),
                size,
                path: if path.is_empty() { "1".to_string() } else { path },
            });
        }
        return;
    }
    for (i, sp) in p.subparts.iter().enumerate() {
        let child = if path.is_empty() {
            format!("{}", i + 1)
        } else {
            format!("{}.{}", path, i + 1)
        };
        walk_parts(sp, child, out);
    }
}

fn strip_tags(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SIMPLE: &[u8] = b"Message-ID: <one@example.com>\r\n\
From: Alice Smith <alice@example.com>\r\n\
Subject: Hello\r\n\
Date: Mon, 3 Aug 2026 10:00:00 +0000\r\n\
\r\n\
Hi Bob,\r\nhow are you?\r\n";

    #[test]
    fn parses_basic_fields() {
        let e = parse_email(SIMPLE).unwrap();
        assert_eq!(e.msgid, "one@example.com");
        assert_eq!(e.subject, "Hello");
        assert_eq!(e.from.len(), 1);
        assert_eq!(e.from[0].addr, "alice@example.com");
        assert_eq!(e.from[0].name, "Alice Smith");
        assert_eq!(e.snippet, "Hi Bob, how are you?");
        assert!(e.date_epoch > 0);
        assert!(e.refs.is_empty());
        assert!(e.files.is_empty());
    }

    #[test]
    fn synthesizes_msgid_when_missing() {
        let raw = b"Subject: x\r\n\r\nbody\r\n";
        let e = parse_email(raw).unwrap();
        assert!(e.msgid.ends_with("@tagmail.local"));
    }

    #[test]
    fn references_chain_includes_in_reply_to() {
        let raw = b"Message-ID: <c@x>\r\n\
References: <a@x> <b@x>\r\n\
In-Reply-To: <b@x>\r\n\
Subject: re\r\n\r\nok\r\n";
        let e = parse_email(raw).unwrap();
        assert_eq!(e.refs, vec!["a@x".to_string(), "b@x".to_string()]);
    }

    #[test]
    fn finds_attachments_with_part_paths() {
        let raw = b"Message-ID: <m@x>\r\n\
Subject: files\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
see attached\r\n\
--b1\r\n\
Content-Type: application/pdf; name=\"doc.pdf\"\r\n\
Content-Disposition: attachment; filename=\"doc.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
aGVsbG8=\r\n\
--b1--\r\n";
        let e = parse_email(raw).unwrap();
        assert_eq!(e.files.len(), 1);
        assert_eq!(e.files[0].filename, "doc.pdf");
        assert_eq!(e.files[0].mime, "application/pdf");
        assert_eq!(e.files[0].path, "2");
        assert_eq!(e.snippet, "see attached");

        let (bytes, mime) = raw_part(raw, "2").unwrap().unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(mime, "application/pdf");
    }

    #[test]
    fn part_path_out_of_range_is_none() {
        assert!(raw_part(SIMPLE, "3").unwrap().is_none());
        // a single-part message is its own part "1"
        let (bytes, _) = raw_part(SIMPLE, "1").unwrap().unwrap();
        assert!(!bytes.is_empty());
    }
}
