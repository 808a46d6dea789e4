use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use crate::domain::Uid;

/// One parsed search criterion. The store compiles these to SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Tag(String),
    From(String),
    Subject(String),
    Msgid(String),
    Reference(String),
    Uid(Uid),
    /// half-open range [since, before) in epoch seconds; open-ended when
    /// `before` is None
    Date { since: i64, before: Option<i64> },
    Seen(bool),
    Flagged(bool),
    Draft,
    /// `:raw Name` — match the system flag `\Name` verbatim
    Flag(String),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// group results by thread
    pub threads: bool,
    /// assemble one full thread
    pub thread: Option<Uid>,
    /// tags explicitly asked for; drives trash/spam visibility and the
    /// hide list when rendering
    pub tags: Vec<String>,
    pub terms: Vec<Term>,
    /// tags filtered out of the result set
    pub exclude: Vec<String>,
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$").expect("date regex"))
}

/// Parse the user-facing query language into a `Query`.
///
/// Recognized forms: `tag:X` (also `in:` / `has:`), `from:addr`,
/// `subj:".."` / `subject:..`, `mid:<id>` / `message_id:<id>`, `ref:<id>`,
/// `uid:N`, `thread:N` / `thr:N`, `date:YYYY[-MM[-DD]]`, `:threads`,
/// `:read` / `:seen`, `:unread` / `:unseen`, `:pinned` / `:flagged`,
/// `:unpinned` / `:unflagged`, `:draft`, `:raw <flag>`. Everything else is
/// full-text.
pub fn parse(input: &str) -> Query {
    let mut q = Query::default();
    let mut text_words: Vec<String> = Vec::new();

    let tokens = split_tokens(input);
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i].as_str();
        i += 1;
        let lower = tok.to_lowercase();

        if lower == ":raw" {
            // everything after :raw is one verbatim flag name
            let rest: Vec<&str> = tokens[i..].iter().map(|s| s.as_str()).collect();
            if !rest.is_empty() {
                q.terms.push(Term::Flag(format!("\\{}", rest.join(" "))));
            }
            break;
        }

        match lower.as_str() {
            ":threads" => {
                q.threads = true;
                continue;
            }
            ":read" | ":seen" => {
                q.terms.push(Term::Seen(true));
                continue;
            }
            ":unread" | ":unseen" => {
                q.terms.push(Term::Seen(false));
                continue;
            }
            ":pinned" | ":flagged" => {
                q.terms.push(Term::Flagged(true));
                continue;
            }
            ":unpinned" | ":unflagged" => {
                q.terms.push(Term::Flagged(false));
                continue;
            }
            ":draft" => {
                q.terms.push(Term::Draft);
                continue;
            }
            _ => {}
        }

        if let Some((prefix, value)) = tok.split_once(':') {
            let value = value.trim_matches('"');
            if value.is_empty() {
                text_words.push(tok.to_string());
                continue;
            }
            match prefix.to_lowercase().as_str() {
                "tag" | "in" | "has" => {
                    let tag = value.to_lowercase();
                    q.tags.push(tag.clone());
                    q.terms.push(Term::Tag(tag));
                    continue;
                }
                "from" => {
                    q.terms.push(Term::From(value.to_lowercase()));
                    continue;
                }
                "subj" | "subject" => {
                    q.terms.push(Term::Subject(value.to_string()));
                    continue;
                }
                "mid" | "message_id" => {
                    q.terms
                        .push(Term::Msgid(crate::mail::decoders::normalize_msgid(value)));
                    continue;
                }
                "ref" => {
                    q.terms.push(Term::Reference(
                        crate::mail::decoders::normalize_msgid(value),
                    ));
                    continue;
                }
                "uid" => {
                    if let Ok(uid) = value.parse::<Uid>() {
                        q.terms.push(Term::Uid(uid));
                        continue;
                    }
                }
                "thread" | "thr" => {
                    if let Ok(uid) = value.parse::<Uid>() {
                        q.thread = Some(uid);
                        continue;
                    }
                }
                "date" => {
                    if let Some(term) = parse_date(value) {
                        q.terms.push(term);
                        continue;
                    }
                }
                _ => {}
            }
            text_words.push(tok.to_string());
        } else {
            text_words.push(tok.to_string());
        }
    }

    if !text_words.is_empty() {
        q.terms.push(Term::Text(text_words.join(" ")));
    }

    // linked-away duplicates never show; trash and spam stay hidden
    // unless asked for by tag
    q.exclude.push("#link".to_string());
    let has_trash = q.tags.iter().any(|t| t == "#trash");
    let has_spam = q.tags.iter().any(|t| t == "#spam");
    if !has_trash {
        q.exclude.push("#trash".to_string());
    }
    if !has_spam && !has_trash {
        q.exclude.push("#spam".to_string());
    }

    q
}

/// Whitespace splitter that keeps `prefix:"quoted values"` together.
fn split_tokens(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                cur.push(ch);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn parse_date(value: &str) -> Option<Term> {
    let caps = date_re().captures(value)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let day: Option<u32> = caps.get(3).and_then(|m| m.as_str().parse().ok());

    let (start, end) = match (month, day) {
        (None, _) => (
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        ),
        (Some(m), None) => {
            let start = NaiveDate::from_ymd_opt(year, m, 1)?;
            let end = if m == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)?
            } else {
                NaiveDate::from_ymd_opt(year, m + 1, 1)?
            };
            (start, end)
        }
        (Some(m), Some(d)) => {
            let start = NaiveDate::from_ymd_opt(year, m, d)?;
            (start, start.succ_opt()?)
        }
    };

    let since = start.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    let before = end.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    Some(Term::Date {
        since,
        before: Some(before),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_query_still_hides_trash_and_spam() {
        let q = parse("");
        assert!(q.terms.is_empty());
        assert_eq!(q.exclude, vec!["#link", "#trash", "#spam"]);
    }

    #[test]
    fn tag_query_is_collected() {
        let q = parse(":threads tag:invoices");
        assert!(q.threads);
        assert_eq!(q.tags, vec!["invoices"]);
        assert_eq!(q.terms, vec![Term::Tag("invoices".to_string())]);
    }

    #[test]
    fn trash_tag_unhides_trash_and_spam() {
        let q = parse("tag:#trash");
        assert_eq!(q.exclude, vec!["#link"]);
        let q = parse("in:#spam");
        assert_eq!(q.exclude, vec!["#link", "#trash"]);
    }

    #[test]
    fn quoted_subject_stays_together() {
        let q = parse("subj:\"two words\" extra");
        assert_eq!(
            q.terms,
            vec![
                Term::Subject("two words".to_string()),
                Term::Text("extra".to_string()),
            ]
        );
    }

    #[test]
    fn flag_shortcuts() {
        let q = parse(":unread :pinned :draft");
        assert_eq!(
            q.terms,
            vec![Term::Seen(false), Term::Flagged(true), Term::Draft]
        );
    }

    #[test]
    fn thread_and_uid() {
        let q = parse("thread:42");
        assert_eq!(q.thread, Some(42));
        let q = parse("uid:7");
        assert_eq!(q.terms, vec![Term::Uid(7)]);
    }

    #[test]
    fn raw_consumes_rest() {
        let q = parse(":raw Answered");
        assert_eq!(q.terms, vec![Term::Flag("\\Answered".to_string())]);
    }

    #[test]
    fn date_year_expands_to_range() {
        let q = parse("date:2026");
        match &q.terms[0] {
            Term::Date { since, before } => {
                assert_eq!(*since, 1767225600); // 2026-01-01
                assert_eq!(*before, Some(1798761600)); // 2027-01-01
            }
            t => panic!("unexpected term {:?}", t),
        }
    }

    #[test]
    fn date_december_rolls_over() {
        let q = parse("date:2026-12");
        match &q.terms[0] {
            Term::Date { since, before } => {
                assert!(before.unwrap() > *since);
            }
            t => panic!("unexpected term {:?}", t),
        }
    }

    #[test]
    fn free_text_joins_words() {
        let q = parse("hello from:alice@x.com world");
        assert_eq!(
            q.terms,
            vec![
                Term::From("alice@x.com".to_string()),
                Term::Text("hello world".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_prefix_falls_back_to_text() {
        let q = parse("uid:abc");
        assert_eq!(q.terms, vec![Term::Text("uid:abc".to_string())]);
    }
}
