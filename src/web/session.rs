use std::collections::HashMap;

/// One logged-in browser session. The timezone offset (minutes east of
/// UTC) drives date rendering for this user.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub tz_offset_min: i32,
}

/// In-memory session registry. Tokens are opaque uuids handed out as
/// cookies; restarting the server logs everyone out.
#[derive(Default)]
pub struct Sessions {
    map: HashMap<String, Session>,
}

impl Sessions {
    pub fn create(&mut self, username: &str, tz_offset_min: i32) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.map.insert(
            token.clone(),
            Session {
                username: username.to_string(),
                tz_offset_min,
            },
        );
        token
    }

    pub fn get(&self, token: &str) -> Option<&Session> {
        self.map.get(token)
    }

    pub fn remove(&mut self, token: &str) {
        self.map.remove(token);
    }
}

/// Pull the session token out of a Cookie header value.
pub fn token_from_cookie(cookie: &str) -> Option<String> {
    for part in cookie.split(';') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("session=") {
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_remove() {
        let mut s = Sessions::default();
        let token = s.create("alice", 120);
        assert_eq!(s.get(&token).unwrap().username, "alice");
        assert_eq!(s.get(&token).unwrap().tz_offset_min, 120);
        s.remove(&token);
        assert!(s.get(&token).is_none());
    }

    #[test]
    fn cookie_parsing() {
        assert_eq!(
            token_from_cookie("theme=dark; session=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(token_from_cookie("theme=dark"), None);
        assert_eq!(token_from_cookie("session="), None);
    }
}
