use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::HashMap;

use crate::domain::{Addr, Attachment, MessageMeta, Tag, TagInfo, ThreadInfo, Uid, tag::tag_id};
use crate::query::{Query, Term};
use crate::store::repo::{ImportEmail, MailStore};

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS msgs (
                uid           INTEGER PRIMARY KEY AUTOINCREMENT,
                msgid         TEXT NOT NULL,
                thrid         INTEGER NOT NULL DEFAULT 0,
                sha256        TEXT NOT NULL UNIQUE,
                origin_uid    INTEGER NOT NULL,
                origin_folder TEXT NOT NULL,
                subject       TEXT NOT NULL,
                snippet       TEXT NOT NULL,
                date_epoch    INTEGER NOT NULL,
                addrs_json    TEXT NOT NULL,
                flags         TEXT NOT NULL DEFAULT '',
                parent        TEXT,
                refs_json     TEXT NOT NULL DEFAULT '[]',
                files_json    TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_msgs_thrid ON msgs(thrid, date_epoch);
            CREATE INDEX IF NOT EXISTS idx_msgs_date  ON msgs(date_epoch DESC);
            CREATE INDEX IF NOT EXISTS idx_msgs_msgid ON msgs(msgid);
            CREATE INDEX IF NOT EXISTS idx_msgs_origin
                ON msgs(origin_folder, origin_uid);

            CREATE TABLE IF NOT EXISTS raw (
                uid   INTEGER PRIMARY KEY,
                body  BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id    TEXT PRIMARY KEY,
                name  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS remote_flags (
                uid   INTEGER PRIMARY KEY,
                flags TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS flag_journal (
                uid   INTEGER PRIMARY KEY
            );
            "#,
        )?;
        Ok(())
    }

    fn row_to_meta(r: &rusqlite::Row) -> rusqlite::Result<MessageMeta> {
        let addrs_json: String = r.get(8)?;
        let flags: String = r.get(9)?;
        let files_json: String = r.get(11)?;
        Ok(MessageMeta {
            uid: r.get::<_, i64>(0)? as Uid,
            msgid: r.get(1)?,
            thrid: r.get::<_, i64>(2)? as Uid,
            origin_uid: r.get::<_, i64>(3)? as u32,
            origin_folder: r.get(4)?,
            subject: r.get(5)?,
            snippet: r.get(6)?,
            date_epoch: r.get(7)?,
            addrs: serde_json::from_str::<Vec<Addr>>(&addrs_json).unwrap_or_default(),
            flags: split_flags(&flags),
            parent: r.get(10)?,
            files: serde_json::from_str::<Vec<Attachment>>(&files_json).unwrap_or_default(),
        })
    }

    fn meta_by_uid(&self, uid: Uid) -> Result<Option<MessageMeta>> {
        let mut stmt = self.conn.prepare(SELECT_META_SQL_ONE)?;
        Ok(stmt
            .query_row(params![uid as i64], Self::row_to_meta)
            .optional()?)
    }

    fn thrid_of(&self, uid: Uid) -> Result<Option<Uid>> {
        let v: Option<i64> = self
            .conn
            .query_row(
                "SELECT thrid FROM msgs WHERE uid=?1",
                params![uid as i64],
                |r| r.get(0),
            )
            .optional()?;
        Ok(v.map(|t| t as Uid))
    }
}

const SELECT_META_SQL_ONE: &str = "SELECT uid, msgid, thrid, origin_uid, origin_folder, \
     subject, snippet, date_epoch, addrs_json, flags, parent, files_json \
     FROM msgs WHERE uid=?1";

fn split_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(|s| s.to_string()).collect()
}

fn join_flags(flags: &[String]) -> String {
    flags.join(" ")
}

/// SQL fragment matching one token inside the space-separated flags column.
fn flag_cond(params: &mut Vec<String>, flag: &str, present: bool) -> String {
    params.push(format!(" {} ", flag));
    if present {
        format!("instr(' '||flags||' ', ?{}) > 0", params.len())
    } else {
        format!("instr(' '||flags||' ', ?{}) = 0", params.len())
    }
}

fn like_cond(params: &mut Vec<String>, column: &str, needle: &str) -> String {
    params.push(format!("%{}%", needle.to_lowercase()));
    format!("lower({}) LIKE ?{}", column, params.len())
}

/// Compile a structured query into a WHERE clause over `msgs`.
fn query_conditions(q: &Query) -> (String, Vec<String>) {
    let mut conds: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    for term in &q.terms {
        let c = match term {
            Term::Tag(t) | Term::Flag(t) => flag_cond(&mut params, t, true),
            Term::From(a) => like_cond(&mut params, "addrs_json", a),
            Term::Subject(s) => like_cond(&mut params, "subject", s),
            Term::Msgid(m) => {
                params.push(m.clone());
                format!("msgid = ?{}", params.len())
            }
            Term::Reference(m) => {
                params.push(m.clone());
                let eq = format!("msgid = ?{}", params.len());
                params.push(format!("%\"{}\"%", m));
                format!("({} OR refs_json LIKE ?{})", eq, params.len())
            }
            Term::Uid(u) => {
                params.push(u.to_string());
                format!("uid = ?{}", params.len())
            }
            Term::Date { since, before } => {
                params.push(since.to_string());
                let mut c = format!("date_epoch >= ?{}", params.len());
                if let Some(b) = before {
                    params.push(b.to_string());
                    c = format!("{} AND date_epoch < ?{}", c, params.len());
                }
                c
            }
            Term::Seen(present) => flag_cond(&mut params, "\\Seen", *present),
            Term::Flagged(present) => flag_cond(&mut params, "\\Flagged", *present),
            Term::Draft => flag_cond(&mut params, "\\Draft", true),
            Term::Text(t) => {
                let a = like_cond(&mut params, "subject", t);
                let b = like_cond(&mut params, "snippet", t);
                let c = like_cond(&mut params, "addrs_json", t);
                format!("({} OR {} OR {})", a, b, c)
            }
        };
        conds.push(c);
    }

    for tag in &q.exclude {
        conds.push(flag_cond(&mut params, tag, false));
    }

    if conds.is_empty() {
        ("1=1".to_string(), params)
    } else {
        (conds.join(" AND "), params)
    }
}

impl MailStore for SqliteStore {
    fn import(&mut self, msg: &ImportEmail) -> Result<Option<Uid>> {
        if self.contains_sha(&msg.parsed.sha256)? {
            return Ok(None);
        }

        let tx = self.conn.transaction()?;

        let addrs_json = serde_json::to_string(&msg.parsed.from)?;
        let refs_json = serde_json::to_string(&msg.parsed.refs)?;
        let files_json = serde_json::to_string(&msg.parsed.files)?;
        let flags = join_flags(&msg.flags);
        let parent = msg.parsed.refs.last().cloned();

        tx.execute(
            r#"
            INSERT INTO msgs (msgid, thrid, sha256, origin_uid, origin_folder,
                              subject, snippet, date_epoch, addrs_json, flags,
                              parent, refs_json, files_json)
            VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                msg.parsed.msgid,
                msg.parsed.sha256,
                msg.origin_uid as i64,
                msg.origin_folder,
                msg.parsed.subject,
                msg.parsed.snippet,
                msg.parsed.date_epoch,
                addrs_json,
                flags,
                parent,
                refs_json,
                files_json,
            ],
        )?;
        let uid = tx.last_insert_rowid();

        // join the thread of the newest known referenced message
        let mut thrid = uid;
        for r in msg.parsed.refs.iter().rev() {
            let found: Option<i64> = tx
                .query_row(
                    "SELECT thrid FROM msgs WHERE msgid=?1 AND uid != ?2 ORDER BY uid LIMIT 1",
                    params![r, uid],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(t) = found {
                thrid = t;
                break;
            }
        }
        tx.execute(
            "UPDATE msgs SET thrid=?1 WHERE uid=?2",
            params![thrid, uid],
        )?;

        tx.execute(
            "INSERT INTO raw (uid, body) VALUES (?1, ?2)",
            params![uid, msg.raw],
        )?;
        tx.execute(
            "INSERT INTO remote_flags (uid, flags) VALUES (?1, ?2)",
            params![uid, flags],
        )?;

        tx.commit()?;
        Ok(Some(uid as Uid))
    }

    fn contains_sha(&self, sha256: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT uid FROM msgs WHERE sha256=?1",
                params![sha256],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn search_msgs(&self, q: &Query) -> Result<Vec<Uid>> {
        let (where_sql, sql_params) = query_conditions(q);
        let sql = format!(
            "SELECT uid FROM msgs WHERE {} ORDER BY date_epoch DESC, uid DESC",
            where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let uids = stmt
            .query_map(params_from_iter(sql_params.iter()), |r| {
                r.get::<_, i64>(0).map(|v| v as Uid)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(uids)
    }

    fn search_thrs(&self, q: &Query) -> Result<Vec<Uid>> {
        let (where_sql, sql_params) = query_conditions(q);
        let sql = format!(
            "SELECT uid, thrid FROM msgs WHERE {} ORDER BY date_epoch DESC, uid DESC",
            where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(sql_params.iter()), |r| {
                Ok((r.get::<_, i64>(0)? as Uid, r.get::<_, i64>(1)? as Uid))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for (uid, thrid) in rows {
            if seen.insert(thrid) {
                out.push(uid);
            }
        }
        Ok(out)
    }

    fn thread_uids(&self, uid: Uid) -> Result<Vec<Uid>> {
        let thrid = self
            .thrid_of(uid)?
            .ok_or_else(|| anyhow!("unknown uid {}", uid))?;
        let mut stmt = self.conn.prepare(
            "SELECT uid FROM msgs WHERE thrid=?1 ORDER BY date_epoch ASC, uid ASC",
        )?;
        let uids = stmt
            .query_map(params![thrid as i64], |r| {
                r.get::<_, i64>(0).map(|v| v as Uid)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(uids)
    }

    fn msgs_info(&self, uids: &[Uid]) -> Result<Vec<MessageMeta>> {
        let mut out = Vec::with_capacity(uids.len());
        for &uid in uids {
            if let Some(m) = self.meta_by_uid(uid)? {
                out.push(m);
            }
        }
        Ok(out)
    }

    fn thrs_info(&self, uids: &[Uid]) -> Result<Vec<ThreadInfo>> {
        let mut out = Vec::with_capacity(uids.len());
        for &uid in uids {
            let members = self.thread_uids(uid)?;
            let msgs = self.msgs_info(&members)?;
            let Some(latest) = msgs.last().cloned() else {
                continue;
            };
            let mut flags: Vec<String> = Vec::new();
            let mut addrs: Vec<Addr> = Vec::new();
            for m in &msgs {
                for f in &m.flags {
                    if !flags.contains(f) {
                        flags.push(f.clone());
                    }
                }
                addrs.extend(m.addrs.iter().cloned());
            }
            out.push(ThreadInfo {
                count: msgs.len(),
                latest,
                flags,
                addrs,
            });
        }
        Ok(out)
    }

    fn raw_msg(&self, uid: Uid) -> Result<Option<Vec<u8>>> {
        let body: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT body FROM raw WHERE uid=?1",
                params![uid as i64],
                |r| r.get(0),
            )
            .optional()?;
        Ok(body)
    }

    fn msgs_flag(&mut self, uids: &[Uid], old: &[String], new: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for &uid in uids {
            let flags: Option<String> = tx
                .query_row(
                    "SELECT flags FROM msgs WHERE uid=?1",
                    params![uid as i64],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(flags) = flags else { continue };
            let mut set = split_flags(&flags);
            set.retain(|f| !old.contains(f));
            for f in new {
                if !set.contains(f) {
                    set.push(f.clone());
                }
            }
            tx.execute(
                "UPDATE msgs SET flags=?1 WHERE uid=?2",
                params![join_flags(&set), uid as i64],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO flag_journal (uid) VALUES (?1)",
                params![uid as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn link_threads(&mut self, uids: &[Uid]) -> Result<Uid> {
        if uids.is_empty() {
            return Err(anyhow!("link_threads: no uids"));
        }
        let tx = self.conn.transaction()?;
        let mut thrids = Vec::new();
        for &uid in uids {
            let t: Option<i64> = tx
                .query_row(
                    "SELECT thrid FROM msgs WHERE uid=?1",
                    params![uid as i64],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(t) = t {
                if !thrids.contains(&t) {
                    thrids.push(t);
                }
            }
        }
        let target = *thrids
            .iter()
            .min()
            .ok_or_else(|| anyhow!("link_threads: unknown uids"))?;
        for t in &thrids {
            tx.execute(
                "UPDATE msgs SET thrid=?1 WHERE thrid=?2",
                params![target, t],
            )?;
        }
        tx.commit()?;
        Ok(target as Uid)
    }

    fn tags_info(&self) -> Result<Vec<TagInfo>> {
        let mut counts: HashMap<String, (u32, u32)> = HashMap::new();
        // builtin tags always show, even when empty
        for t in ["#inbox", "#spam", "#trash", "#sent"] {
            counts.insert(t.to_string(), (0, 0));
        }

        let mut names: HashMap<String, String> = HashMap::new();
        let mut stmt = self.conn.prepare("SELECT id, name FROM tags")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (id, name) in rows {
            counts.entry(id.clone()).or_insert((0, 0));
            names.insert(id, name);
        }

        let mut stmt = self.conn.prepare("SELECT flags FROM msgs")?;
        let all_flags = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for flags in all_flags {
            let set = split_flags(&flags);
            let unread = !set.iter().any(|f| f == "\\Seen");
            let pinned = set.iter().any(|f| f == "\\Flagged");
            for f in &set {
                if f.starts_with('\\') {
                    continue;
                }
                let entry = counts.entry(f.clone()).or_insert((0, 0));
                if unread {
                    entry.0 += 1;
                }
                if pinned {
                    entry.1 += 1;
                }
            }
        }

        let mut out: Vec<TagInfo> = counts
            .into_iter()
            .map(|(id, (unread, pinned))| {
                let name = names
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| builtin_name(&id));
                TagInfo {
                    id,
                    name,
                    unread,
                    pinned,
                }
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn get_tag(&mut self, name: &str) -> Result<Tag> {
        let id = tag_id(name);
        if id.starts_with('#') || id.starts_with('\\') {
            return Ok(Tag {
                name: builtin_name(&id),
                id,
            });
        }
        if id.is_empty() {
            return Err(anyhow!("empty tag name"));
        }
        self.conn.execute(
            "INSERT INTO tags (id, name) VALUES (?1, ?2) \
             ON CONFLICT(id) DO NOTHING",
            params![id, name],
        )?;
        let stored: String = self.conn.query_row(
            "SELECT name FROM tags WHERE id=?1",
            params![id],
            |r| r.get(0),
        )?;
        Ok(Tag { id, name: stored })
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let v: Option<String> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key=?1", params![key], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(v)
    }

    fn set_meta(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn apply_remote_flags(&mut self, uid: Uid, remote: &[String]) -> Result<()> {
        use crate::store::repo::SYNCED_FLAGS;

        let snapshot = self.remote_flags(uid)?.unwrap_or_default();
        let snapshot = split_flags(&snapshot);

        let added: Vec<String> = remote
            .iter()
            .filter(|f| SYNCED_FLAGS.contains(&f.as_str()) && !snapshot.contains(*f))
            .cloned()
            .collect();
        let removed: Vec<String> = snapshot
            .iter()
            .filter(|f| SYNCED_FLAGS.contains(&f.as_str()) && !remote.contains(*f))
            .cloned()
            .collect();

        if !added.is_empty() || !removed.is_empty() {
            let tx = self.conn.transaction()?;
            let flags: Option<String> = tx
                .query_row(
                    "SELECT flags FROM msgs WHERE uid=?1",
                    params![uid as i64],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(flags) = flags {
                let mut set = split_flags(&flags);
                set.retain(|f| !removed.contains(f));
                for f in &added {
                    if !set.contains(f) {
                        set.push(f.clone());
                    }
                }
                tx.execute(
                    "UPDATE msgs SET flags=?1 WHERE uid=?2",
                    params![join_flags(&set), uid as i64],
                )?;
            }
            tx.commit()?;
        }

        self.set_remote_flags(uid, &remote.join(" "))?;
        Ok(())
    }

    fn remote_flags(&self, uid: Uid) -> Result<Option<String>> {
        let v: Option<String> = self
            .conn
            .query_row(
                "SELECT flags FROM remote_flags WHERE uid=?1",
                params![uid as i64],
                |r| r.get(0),
            )
            .optional()?;
        Ok(v)
    }

    fn set_remote_flags(&mut self, uid: Uid, flags: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO remote_flags (uid, flags) VALUES (?1, ?2) \
             ON CONFLICT(uid) DO UPDATE SET flags=excluded.flags",
            params![uid as i64, flags],
        )?;
        Ok(())
    }

    fn uid_by_origin(&self, folder: &str, origin_uid: u32) -> Result<Option<Uid>> {
        let v: Option<i64> = self
            .conn
            .query_row(
                "SELECT uid FROM msgs WHERE origin_folder=?1 AND origin_uid=?2 \
                 ORDER BY uid DESC LIMIT 1",
                params![folder, origin_uid as i64],
                |r| r.get(0),
            )
            .optional()?;
        Ok(v.map(|u| u as Uid))
    }

    fn flag_journal(&self) -> Result<Vec<Uid>> {
        let mut stmt = self.conn.prepare("SELECT uid FROM flag_journal ORDER BY uid")?;
        let uids = stmt
            .query_map([], |r| r.get::<_, i64>(0).map(|v| v as Uid))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(uids)
    }

    fn clear_flag_journal(&mut self, uids: &[Uid]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for &uid in uids {
            tx.execute(
                "DELETE FROM flag_journal WHERE uid=?1",
                params![uid as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn builtin_name(id: &str) -> String {
    match id {
        "#inbox" => "Inbox".to_string(),
        "#spam" => "Spam".to_string(),
        "#trash" => "Trash".to_string(),
        "#sent" => "Sent".to_string(),
        other => other.trim_start_matches(['#', '\\']).to_string(),
    }
}
