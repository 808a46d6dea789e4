use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde_json::{Value, json};

use crate::domain::{Addr, MessageMeta, TagInfo, ThreadInfo};
use crate::mail::parse::sha256_hex;

const SHORT_TAG_CHARS: usize = 14;

/// Tags a user never sees in lists: system flags plus bookkeeping tags.
pub fn clean_tags(tags: &[String], whitelist: &[String], blacklist: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .filter(|t| {
            if whitelist.iter().any(|w| w == *t) {
                return true;
            }
            if t.starts_with('\\') {
                return false;
            }
            if ["#sent", "#latest", "#link"].contains(&t.as_str()) {
                return false;
            }
            !blacklist.iter().any(|b| b == *t)
        })
        .cloned()
        .collect();
    out.sort();
    out.dedup();
    out
}

fn localize(epoch: i64, tz_offset_min: i32) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(tz_offset_min * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("utc offset"));
    offset.timestamp_opt(epoch, 0).single().unwrap_or_else(|| {
        offset
            .timestamp_opt(0, 0)
            .single()
            .expect("epoch zero is valid")
    })
}

/// Exact timestamp for tooltips: `Mon, 03 Aug, 2026 at 10:00`.
pub fn format_dt(epoch: i64, tz_offset_min: i32) -> String {
    localize(epoch, tz_offset_min)
        .format("%a, %d %b, %Y at %H:%M")
        .to_string()
}

/// Compact list timestamp: time of day within the last 12 hours, month
/// and day within the year, full date otherwise.
pub fn humanize_dt(epoch: i64, now_epoch: i64, tz_offset_min: i32) -> String {
    let val = localize(epoch, tz_offset_min);
    let now = localize(now_epoch, tz_offset_min);
    let fmt = if (now_epoch - epoch).abs() < 12 * 60 * 60 {
        "%H:%M"
    } else if now.format("%Y").to_string() == val.format("%Y").to_string() {
        "%b %d"
    } else {
        "%b %d, %Y"
    };
    val.format(fmt).to_string()
}

pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

/// Gravatar identity hash: sha256 of the trimmed, lowercased address.
pub fn gravatar_hash(addr: &str) -> String {
    sha256_hex(addr.trim().to_lowercase().as_bytes())
}

fn wrap_addr(a: &Addr) -> Value {
    json!({
        "name": a.display(),
        "addr": a.addr,
        "hash": gravatar_hash(&a.addr),
        "query": format!(":threads from:{}", a.addr),
    })
}

/// Collapse a sender list for display. Input is oldest first; output
/// keeps each address once (latest occurrence wins), capped at `max`
/// entries with an `{"expander": N}` placeholder for the hidden rest.
/// The most recent sender always stays visible at the end.
pub fn wrap_addresses(addrs: &[Addr], max: usize) -> Vec<Value> {
    let mut uniq: Vec<&Addr> = Vec::new();
    for a in addrs.iter().rev() {
        if a.addr.is_empty() || uniq.iter().any(|u| u.addr == a.addr) {
            continue;
        }
        uniq.push(a);
    }
    uniq.reverse();

    if uniq.len() <= max {
        return uniq.iter().map(|a| wrap_addr(a)).collect();
    }

    let end = addrs.last().expect("non-empty list");
    // keep the latest sender in final position
    if uniq.last().map(|a| a.addr.as_str()) != Some(end.addr.as_str()) {
        uniq.retain(|a| a.addr != end.addr);
        uniq.push(end);
    }

    let (expander_index, mut few): (usize, Vec<&Addr>) =
        if end.addr == addrs.first().expect("non-empty list").addr {
            (0, uniq[uniq.len() - (max - 1)..].to_vec())
        } else {
            let mut v = vec![uniq[0]];
            v.extend_from_slice(&uniq[uniq.len() - (max - 2)..]);
            (1, v)
        };

    let hidden = uniq.len() - few.len();
    let mut out: Vec<Value> = Vec::with_capacity(few.len() + 1);
    for (i, a) in few.drain(..).enumerate() {
        if i == expander_index {
            out.push(json!({ "expander": hidden }));
        }
        out.push(wrap_addr(a));
    }
    if expander_index >= out.len() {
        out.push(json!({ "expander": hidden }));
    }
    out
}

fn base_query(hide_tags: &[String]) -> String {
    if hide_tags.iter().any(|t| t == "#trash") {
        "tag:#trash ".to_string()
    } else if hide_tags.iter().any(|t| t == "#spam") {
        "tag:#spam ".to_string()
    } else {
        String::new()
    }
}

/// One message as the list/thread views consume it.
pub fn wrap_msg(m: &MessageMeta, hide_tags: &[String], tz_offset_min: i32, now: i64) -> Value {
    wrap_msg_inner(m, None, hide_tags, tz_offset_min, now)
}

/// One thread row: the latest message annotated with thread-wide
/// senders, tags and count.
pub fn wrap_thread(t: &ThreadInfo, hide_tags: &[String], tz_offset_min: i32, now: i64) -> Value {
    wrap_msg_inner(&t.latest, Some(t), hide_tags, tz_offset_min, now)
}

fn wrap_msg_inner(
    m: &MessageMeta,
    thread: Option<&ThreadInfo>,
    hide_tags: &[String],
    tz_offset_min: i32,
    now: i64,
) -> Value {
    let base_q = base_query(hide_tags);
    let flags = thread.map(|t| &t.flags).unwrap_or(&m.flags);
    let addrs = thread.map(|t| &t.addrs).unwrap_or(&m.addrs);
    let count = thread.map(|t| t.count).unwrap_or(addrs.len());
    let url_raw = format!("/raw/{}", m.uid);

    let files: Vec<Value> = m
        .files
        .iter()
        .map(|f| {
            json!({
                "filename": f.filename,
                "mime": f.mime,
                "size": f.size,
                "url": format!("{}/{}/{}", url_raw, f.path, f.filename),
            })
        })
        .collect();

    json!({
        "uid": m.uid,
        "thrid": m.thrid,
        "subject": m.subject,
        "snippet": m.snippet,
        "msgid": m.msgid,
        "parent": m.parent,
        "count": count,
        "tags": clean_tags(flags, &[], hide_tags),
        "from": m.addrs.first().map(wrap_addr),
        "from_list": wrap_addresses(addrs, 3),
        "query_thread": format!("{}thread:{}", base_q, m.uid),
        "query_subject": format!("{}:threads subj:\"{}\"", base_q, m.subject),
        "query_msgid": format!("{}ref:{}", base_q, m.msgid),
        "url_raw": url_raw,
        "time_human": humanize_dt(m.date_epoch, now, tz_offset_min),
        "time_title": format_dt(m.date_epoch, tz_offset_min),
        "is_unread": m.is_unread(),
        "is_pinned": m.is_pinned(),
        "is_draft": m.is_draft(),
        "files": files,
    })
}

pub fn tag_query(id: &str) -> String {
    let q = if id.starts_with('\\') {
        match id {
            "\\Draft" => ":draft".to_string(),
            "\\Flagged" => ":pinned".to_string(),
            other => format!(":raw {}", other.trim_start_matches('\\')),
        }
    } else {
        format!("tag:{}", id)
    };
    format!(":threads {}", q)
}

fn truncate_tag(name: &str) -> String {
    if name.chars().count() > SHORT_TAG_CHARS {
        let mut s: String = name.chars().take(SHORT_TAG_CHARS).collect();
        s.push('…');
        s
    } else {
        name.to_string()
    }
}

/// Tag listing for the sidebar: ids sorted with active tags first, plus
/// a per-tag info map with prebuilt queries.
pub fn wrap_tags(tags: &[TagInfo]) -> Value {
    let visible: Vec<&TagInfo> = tags
        .iter()
        .filter(|t| {
            clean_tags(&[t.id.clone()], &["#spam".to_string(), "#trash".to_string()], &[]).len()
                == 1
        })
        .collect();

    let mut ids: Vec<&TagInfo> = visible.clone();
    ids.sort_by_key(|t| {
        let active =
            !["#spam", "#trash"].contains(&t.id.as_str()) && (t.unread > 0 || t.pinned > 0);
        (if active { 0 } else { 1 }, t.name.clone())
    });
    let ids: Vec<String> = ids.iter().map(|t| t.id.clone()).collect();

    let mut info = serde_json::Map::new();
    for t in visible {
        info.insert(
            t.id.clone(),
            json!({
                "id": t.id,
                "name": t.name,
                "short_name": truncate_tag(&t.name),
                "unread": t.unread,
                "pinned": t.pinned,
                "query": tag_query(&t.id),
            }),
        );
    }

    json!({ "ids": ids, "info": info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(n: &str) -> Addr {
        Addr::new(n.to_uppercase(), format!("{}@example.com", n))
    }

    #[test]
    fn clean_tags_hides_system_and_bookkeeping() {
        let tags = vec![
            "\\Seen".to_string(),
            "#inbox".to_string(),
            "#sent".to_string(),
            "#link".to_string(),
            "work".to_string(),
        ];
        assert_eq!(clean_tags(&tags, &[], &[]), vec!["#inbox", "work"]);
    }

    #[test]
    fn clean_tags_whitelist_wins() {
        let tags = vec!["#sent".to_string()];
        assert_eq!(
            clean_tags(&tags, &["#sent".to_string()], &[]),
            vec!["#sent"]
        );
    }

    #[test]
    fn clean_tags_blacklist_hides() {
        let tags = vec!["#inbox".to_string(), "#trash".to_string()];
        assert_eq!(
            clean_tags(&tags, &[], &["#trash".to_string()]),
            vec!["#inbox"]
        );
    }

    #[test]
    fn humanize_recent_shows_time() {
        let now = 1754388000; // 2025-08-05 ~10:00 UTC
        let s = humanize_dt(now - 3600, now, 0);
        assert!(s.contains(':'), "expected HH:MM, got {}", s);
    }

    #[test]
    fn humanize_same_year_shows_month_day() {
        let now = 1754388000;
        let s = humanize_dt(now - 40 * 24 * 3600, now, 0);
        assert!(!s.contains(':'));
        assert!(!s.contains(','), "no year expected, got {}", s);
    }

    #[test]
    fn humanize_other_year_shows_full_date() {
        let now = 1754388000;
        let s = humanize_dt(now - 400 * 24 * 3600, now, 0);
        assert!(s.contains(", 20"), "year expected, got {}", s);
    }

    #[test]
    fn gravatar_hash_normalizes() {
        assert_eq!(
            gravatar_hash(" Alice@Example.COM "),
            gravatar_hash("alice@example.com")
        );
    }

    #[test]
    fn short_address_lists_pass_through() {
        let addrs = vec![addr("a"), addr("b")];
        let out = wrap_addresses(&addrs, 4);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["addr"], "a@example.com");
    }

    #[test]
    fn duplicate_addresses_keep_last_occurrence() {
        let addrs = vec![addr("a"), addr("b"), addr("a")];
        let out = wrap_addresses(&addrs, 4);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["addr"], "b@example.com");
        assert_eq!(out[1]["addr"], "a@example.com");
    }

    #[test]
    fn long_lists_collapse_with_expander() {
        let addrs: Vec<Addr> = ["a", "b", "c", "d", "e", "f"].iter().map(|n| addr(n)).collect();
        let out = wrap_addresses(&addrs, 4);
        assert_eq!(out.len(), 4);
        // first sender kept, expander second
        assert_eq!(out[0]["addr"], "a@example.com");
        assert_eq!(out[1]["expander"], 3);
        assert_eq!(out[3]["addr"], "f@example.com");
    }

    #[test]
    fn collapse_when_first_is_also_latest() {
        let addrs: Vec<Addr> = ["a", "b", "c", "d", "e", "a"].iter().map(|n| addr(n)).collect();
        let out = wrap_addresses(&addrs, 4);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0]["expander"], 2);
        assert_eq!(out[3]["addr"], "a@example.com");
    }

    #[test]
    fn tag_queries() {
        assert_eq!(tag_query("work"), ":threads tag:work");
        assert_eq!(tag_query("\\Flagged"), ":threads :pinned");
        assert_eq!(tag_query("\\Answered"), ":threads :raw Answered");
    }
}
