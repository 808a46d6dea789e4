pub mod avatars;
pub mod session;
pub mod view;

use anyhow::{Context, Result, anyhow};
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use tiny_http::{Header, Method, Request, Response, ResponseBox, Server};

use crate::config::Config;
use crate::domain::Uid;
use crate::query;
use crate::store::{MailStore, SqliteStore};
use crate::web::avatars::AvatarCache;
use crate::web::session::{Session, Sessions};

const WORKERS: usize = 4;

pub struct App {
    pub cfg: Config,
    pub store: Mutex<SqliteStore>,
    pub sessions: Mutex<Sessions>,
    pub avatars: Mutex<AvatarCache>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| anyhow!("poisoned lock"))
}

/// Run the JSON API server until the process is stopped.
pub fn serve(cfg: Config, store: SqliteStore) -> Result<()> {
    let listen = cfg.listen();
    let server =
        Server::http(&listen).map_err(|e| anyhow!("failed to bind {}: {}", listen, e))?;
    info!("listening on http://{}", listen);

    let app = Arc::new(App {
        cfg,
        store: Mutex::new(store),
        sessions: Mutex::new(Sessions::default()),
        avatars: Mutex::new(AvatarCache::new()?),
    });
    let server = Arc::new(server);

    let mut workers = Vec::with_capacity(WORKERS);
    for _ in 0..WORKERS {
        let server = server.clone();
        let app = app.clone();
        workers.push(std::thread::spawn(move || {
            loop {
                match server.recv() {
                    Ok(req) => handle(req, &app),
                    Err(e) => {
                        error!("accept error: {}", e);
                        break;
                    }
                }
            }
        }));
    }
    for w in workers {
        let _ = w.join();
    }
    Ok(())
}

fn handle(mut req: Request, app: &App) {
    let response = match route(&mut req, app) {
        Ok(r) => r,
        Err(e) => {
            // handler failures answer 500 instead of killing the worker
            error!("{} {}: {:#}", req.method(), req.url(), e);
            json_response(&json!({ "errors": [e.to_string()] }), 500)
        }
    };
    if let Err(e) = req.respond(response) {
        debug!("client went away: {}", e);
    }
}

fn json_response(v: &Value, status: u16) -> ResponseBox {
    Response::from_string(v.to_string())
        .with_status_code(status)
        .with_header(header("Content-Type", "application/json"))
        .boxed()
}

fn header(field: &str, value: &str) -> Header {
    Header::from_bytes(field.as_bytes(), value.as_bytes()).expect("static header")
}

fn errors(status: u16, msg: &str) -> ResponseBox {
    json_response(&json!({ "errors": [msg] }), status)
}

fn json_body<T: for<'de> Deserialize<'de>>(req: &mut Request) -> Result<T> {
    let mut s = String::new();
    req.as_reader().read_to_string(&mut s)?;
    serde_json::from_str(&s).context("bad request body")
}

fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[derive(Deserialize)]
struct LoginReq {
    username: String,
    password: String,
    /// minutes east of UTC
    #[serde(default)]
    tz_offset: i32,
}

#[derive(Deserialize)]
struct TagReq {
    name: String,
}

#[derive(Deserialize)]
struct SearchReq {
    q: String,
    preload: Option<usize>,
}

#[derive(Deserialize)]
struct UidsReq {
    uids: Vec<Uid>,
    #[serde(default)]
    hide_tags: Vec<String>,
}

#[derive(Deserialize)]
struct BodyReq {
    uids: Vec<Uid>,
    #[serde(default = "default_true")]
    read: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct FlagReq {
    uids: Vec<Uid>,
    #[serde(default)]
    old: Vec<String>,
    #[serde(default)]
    new: Vec<String>,
}

#[derive(Deserialize)]
struct LinkReq {
    uids: Vec<Uid>,
}

#[derive(Deserialize)]
struct SendReq {
    to: Vec<String>,
    subject: String,
    text: String,
}

fn route(req: &mut Request, app: &App) -> Result<ResponseBox> {
    let url = req.url().to_string();
    let (path, url_query) = match url.split_once('?') {
        Some((p, q)) => (p, q.to_string()),
        None => (url.as_str(), String::new()),
    };
    let segments: Vec<String> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    let segments: Vec<&str> = segments.iter().map(|s| s.as_str()).collect();
    let method = req.method().clone();

    let token = req
        .headers()
        .iter()
        .find(|h| h.field.equiv("Cookie"))
        .and_then(|h| session::token_from_cookie(h.value.as_str()));
    let sess = token
        .as_deref()
        .and_then(|t| lock(&app.sessions).ok()?.get(t).cloned());

    match (&method, segments.as_slice()) {
        (Method::Post, ["login"]) => return login(req, app),
        (Method::Get, ["logout"]) => return logout(token, app),
        _ => {}
    }

    let Some(sess) = sess else {
        return Ok(errors(403, "not logged in"));
    };

    match (&method, segments.as_slice()) {
        (Method::Get, ["tags"]) => tags(app),
        (Method::Post, ["tag"]) => tag(req, app),
        (Method::Post, ["search"]) => search(req, app, &sess),
        (Method::Post, ["msgs", "info"]) => msgs_info(req, app, &sess),
        (Method::Post, ["thrs", "info"]) => thrs_info(req, app, &sess),
        (Method::Post, ["msgs", "body"]) => msgs_body(req, app),
        (Method::Post, ["msgs", "flag"]) => msgs_flag(req, app),
        (Method::Post, ["thrs", "link"]) => thrs_link(req, app),
        (Method::Post, ["send"]) => send(req, app, &sess),
        (Method::Get, ["raw", uid]) => raw(app, uid, None),
        (Method::Get, ["raw", uid, part]) => raw(app, uid, Some(*part)),
        (Method::Get, ["raw", uid, part, _filename]) => raw(app, uid, Some(*part)),
        (Method::Get, ["avatars.css"]) => avatars_css(app, &url_query),
        _ => Ok(errors(404, "not found")),
    }
}

fn login(req: &mut Request, app: &App) -> Result<ResponseBox> {
    let body: LoginReq = match json_body(req) {
        Ok(b) => b,
        Err(e) => return Ok(errors(400, &e.to_string())),
    };

    match crate::remote::login(&app.cfg, &body.username, &body.password) {
        Ok(mut session) => {
            let _ = session.logout();
        }
        Err(e) => {
            info!("login failed for {}: {}", body.username, e);
            return Ok(errors(400, "Authentication failed."));
        }
    }

    let token = lock(&app.sessions)?.create(&body.username, body.tz_offset);
    let cookie = format!("session={}; Path=/; HttpOnly", token);
    Ok(Response::from_string(json!({}).to_string())
        .with_header(header("Content-Type", "application/json"))
        .with_header(header("Set-Cookie", &cookie))
        .boxed())
}

fn logout(token: Option<String>, app: &App) -> Result<ResponseBox> {
    if let Some(t) = token {
        lock(&app.sessions)?.remove(&t);
    }
    let expired = "session=; Path=/; Max-Age=0";
    Ok(Response::from_string(json!({}).to_string())
        .with_header(header("Content-Type", "application/json"))
        .with_header(header("Set-Cookie", expired))
        .boxed())
}

fn tags(app: &App) -> Result<ResponseBox> {
    let store = lock(&app.store)?;
    let info = store.tags_info()?;
    Ok(json_response(&view::wrap_tags(&info), 200))
}

fn tag(req: &mut Request, app: &App) -> Result<ResponseBox> {
    let body: TagReq = match json_body(req) {
        Ok(b) => b,
        Err(e) => return Ok(errors(400, &e.to_string())),
    };
    let name = body.name.trim();
    if name.is_empty() || name.starts_with('\\') || name.starts_with('#') {
        return Ok(errors(400, "tag name must not start with \\ or #"));
    }
    let tag = lock(&app.store)?.get_tag(name)?;
    Ok(json_response(
        &json!({
            "id": tag.id,
            "name": tag.name,
            "query": view::tag_query(&tag.id),
        }),
        200,
    ))
}

fn search(req: &mut Request, app: &App, sess: &Session) -> Result<ResponseBox> {
    let body: SearchReq = match json_body(req) {
        Ok(b) => b,
        Err(e) => return Ok(errors(400, &e.to_string())),
    };
    let q = query::parse(&body.q);
    let now = view::now_epoch();
    let store = lock(&app.store)?;

    if let Some(root) = q.thread {
        return thread_view(&*store, root, &q, body.preload.unwrap_or(4), sess, now);
    }

    if q.threads {
        let uids = store.search_thrs(&q)?;
        let preload = body.preload.unwrap_or(200).min(uids.len());
        let infos = store.thrs_info(&uids[..preload])?;
        let mut msgs = serde_json::Map::new();
        for t in &infos {
            msgs.insert(
                t.latest.uid.to_string(),
                view::wrap_thread(t, &q.tags, sess.tz_offset_min, now),
            );
        }
        return Ok(json_response(
            &json!({
                "uids": uids,
                "msgs": msgs,
                "msgs_info": "/thrs/info",
                "threads": true,
                "tags": q.tags,
            }),
            200,
        ));
    }

    let uids = store.search_msgs(&q)?;
    let preload = body.preload.unwrap_or(200).min(uids.len());
    let metas = store.msgs_info(&uids[..preload])?;
    let mut msgs = serde_json::Map::new();
    for m in &metas {
        msgs.insert(
            m.uid.to_string(),
            view::wrap_msg(m, &q.tags, sess.tz_offset_min, now),
        );
    }
    Ok(json_response(
        &json!({
            "uids": uids,
            "msgs": msgs,
            "msgs_info": "/msgs/info",
        }),
        200,
    ))
}

/// Assemble one thread: all uids in date order, a preloaded message map
/// (unread and pinned messages always included), thread-level tags, and
/// runs of repeated subjects for the collapse UI.
fn thread_view(
    store: &SqliteStore,
    root: Uid,
    q: &query::Query,
    preload: usize,
    sess: &Session,
    now: i64,
) -> Result<ResponseBox> {
    let uids = store.thread_uids(root)?;
    if uids.is_empty() {
        return Ok(json_response(&json!({}), 200));
    }
    let metas = store.msgs_info(&uids)?;

    let mut tags: Vec<String> = q.tags.clone();
    for m in &metas {
        for f in &m.flags {
            if !tags.contains(f) {
                tags.push(f.clone());
            }
        }
    }
    let tags = view::clean_tags(&tags, &[], &[]);

    let mut same_subject = Vec::new();
    for pair in metas.windows(2) {
        if pair[1].subject == pair[0].subject {
            same_subject.push(pair[1].uid);
        }
    }

    let preload_all = uids.len() <= preload * 2;
    let mut msgs = serde_json::Map::new();
    for (i, m) in metas.iter().enumerate() {
        let keep = preload_all
            || m.is_unread()
            || m.is_pinned()
            || i == 0
            || i + preload > metas.len();
        if !keep {
            continue;
        }
        let mut wrapped = view::wrap_msg(m, &q.tags, sess.tz_offset_min, now);
        // tags render once at thread level
        wrapped["tags"] = json!([]);
        msgs.insert(m.uid.to_string(), wrapped);
    }

    Ok(json_response(
        &json!({
            "uids": uids,
            "msgs": msgs,
            "msgs_info": "/msgs/info",
            "thread": true,
            "tags": tags,
            "same_subject": same_subject,
        }),
        200,
    ))
}

fn msgs_info(req: &mut Request, app: &App, sess: &Session) -> Result<ResponseBox> {
    let body: UidsReq = match json_body(req) {
        Ok(b) => b,
        Err(e) => return Ok(errors(400, &e.to_string())),
    };
    if body.uids.is_empty() {
        return Ok(errors(400, "no uids"));
    }
    let now = view::now_epoch();
    let store = lock(&app.store)?;
    let metas = store.msgs_info(&body.uids)?;
    let mut msgs = serde_json::Map::new();
    for m in &metas {
        msgs.insert(
            m.uid.to_string(),
            view::wrap_msg(m, &body.hide_tags, sess.tz_offset_min, now),
        );
    }
    Ok(json_response(&Value::Object(msgs), 200))
}

fn thrs_info(req: &mut Request, app: &App, sess: &Session) -> Result<ResponseBox> {
    let body: UidsReq = match json_body(req) {
        Ok(b) => b,
        Err(e) => return Ok(errors(400, &e.to_string())),
    };
    if body.uids.is_empty() {
        return Ok(errors(400, "no uids"));
    }
    let now = view::now_epoch();
    let store = lock(&app.store)?;
    let infos = store.thrs_info(&body.uids)?;
    let mut msgs = serde_json::Map::new();
    for t in &infos {
        msgs.insert(
            t.latest.uid.to_string(),
            view::wrap_thread(t, &body.hide_tags, sess.tz_offset_min, now),
        );
    }
    Ok(json_response(&Value::Object(msgs), 200))
}

fn msgs_body(req: &mut Request, app: &App) -> Result<ResponseBox> {
    let body: BodyReq = match json_body(req) {
        Ok(b) => b,
        Err(e) => return Ok(errors(400, &e.to_string())),
    };
    if body.uids.is_empty() {
        return Ok(errors(400, "no uids"));
    }

    let mut store = lock(&app.store)?;
    let mut out = serde_json::Map::new();
    let mut unseen = Vec::new();
    for m in store.msgs_info(&body.uids)? {
        if m.is_unread() {
            unseen.push(m.uid);
        }
    }
    for &uid in &body.uids {
        let Some(raw) = store.raw_msg(uid)? else {
            continue;
        };
        let text = crate::mail::parse::render_body(&raw)?;
        let text = if text.trim().is_empty() {
            "(no text)".to_string()
        } else {
            text
        };
        out.insert(uid.to_string(), json!(text));
    }

    if body.read && !unseen.is_empty() {
        store.msgs_flag(&unseen, &[], &["\\Seen".to_string()])?;
    }
    Ok(json_response(&Value::Object(out), 200))
}

fn msgs_flag(req: &mut Request, app: &App) -> Result<ResponseBox> {
    let body: FlagReq = match json_body(req) {
        Ok(b) => b,
        Err(e) => return Ok(errors(400, &e.to_string())),
    };
    if body.uids.is_empty() {
        return Ok(errors(400, "no uids"));
    }
    lock(&app.store)?.msgs_flag(&body.uids, &body.old, &body.new)?;
    Ok(json_response(&json!({}), 200))
}

fn thrs_link(req: &mut Request, app: &App) -> Result<ResponseBox> {
    let body: LinkReq = match json_body(req) {
        Ok(b) => b,
        Err(e) => return Ok(errors(400, &e.to_string())),
    };
    if body.uids.is_empty() {
        return Ok(json_response(&json!({}), 200));
    }
    let thrid = lock(&app.store)?.link_threads(&body.uids)?;
    Ok(json_response(&json!({ "thrid": thrid }), 200))
}

fn send(req: &mut Request, app: &App, sess: &Session) -> Result<ResponseBox> {
    let body: SendReq = match json_body(req) {
        Ok(b) => b,
        Err(e) => return Ok(errors(400, &e.to_string())),
    };
    if body.to.is_empty() {
        return Ok(errors(400, "no recipients"));
    }
    crate::smtp::send_mail(&app.cfg, &sess.username, &body.to, &body.subject, &body.text)?;

    // pull the sent copy into the local store right away
    {
        let mut store = lock(&app.store)?;
        if let Err(e) = crate::remote::sync::sync(&mut *store, &app.cfg) {
            log::warn!("post-send sync failed: {:#}", e);
        }
    }
    Ok(json_response(&json!({}), 200))
}

fn raw(app: &App, uid: &str, part: Option<&str>) -> Result<ResponseBox> {
    let Ok(uid) = uid.parse::<Uid>() else {
        return Ok(errors(400, "bad uid"));
    };
    let store = lock(&app.store)?;
    let Some(raw) = store.raw_msg(uid)? else {
        return Ok(errors(404, "not found"));
    };

    match part {
        None => Ok(Response::from_data(raw)
            .with_header(header("Content-Type", "text/plain"))
            .boxed()),
        Some(p) => match crate::mail::parse::raw_part(&raw, p)? {
            Some((bytes, mime)) => {
                // message-supplied content types are not trusted to be
                // valid header values
                let ct = Header::from_bytes(b"Content-Type".as_ref(), mime.as_bytes())
                    .unwrap_or_else(|_| header("Content-Type", "application/octet-stream"));
                Ok(Response::from_data(bytes).with_header(ct).boxed())
            }
            None => Ok(errors(404, "no such part")),
        },
    }
}

fn avatars_css(app: &App, url_query: &str) -> Result<ResponseBox> {
    let Some(hashes) = query_param(url_query, "hashes") else {
        return Ok(errors(400, "hashes required"));
    };
    let hashes: Vec<String> = hashes
        .split(',')
        .filter(|h| !h.is_empty())
        .map(|h| h.to_string())
        .collect();
    let size: u32 = query_param(url_query, "size")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);
    let default = query_param(url_query, "default").unwrap_or_else(|| "identicon".to_string());
    let cls = query_param(url_query, "cls").unwrap_or_else(|| ".pic-%s".to_string());

    let css = lock(&app.avatars)?.css(&hashes, size, &default, &cls);
    Ok(Response::from_string(css)
        .with_header(header("Content-Type", "text/css"))
        .boxed())
}
