use anyhow::Result;
use base64::{Engine as _, engine::general_purpose};
use log::debug;
use std::collections::HashMap;
use std::time::Duration;

const GRAVATAR_URL: &str = "https://gravatar.com/avatar";

/// Server-side gravatar fetcher with an in-memory cache, so the frontend
/// can ask for a whole page of avatars in one CSS request.
pub struct AvatarCache {
    client: reqwest::blocking::Client,
    cache: HashMap<(String, u32, String), Option<Vec<u8>>>,
}

impl AvatarCache {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            cache: HashMap::new(),
        })
    }

    fn fetch(&mut self, hash: &str, size: u32, default: &str) -> Option<Vec<u8>> {
        let key = (hash.to_string(), size, default.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let url = format!("{}/{}?d={}&s={}", GRAVATAR_URL, hash, default, size);
        debug!("avatar fetch: {}", url);
        let got = match self.client.get(&url).send() {
            Ok(res) if res.status().is_success() => res.bytes().ok().map(|b| b.to_vec()),
            Ok(res) => {
                debug!("avatar {}: status {}", hash, res.status());
                None
            }
            Err(e) => {
                debug!("avatar {}: {}", hash, e);
                None
            }
        };
        self.cache.insert(key, got.clone());
        got
    }

    /// Build CSS with inline base64 images for the requested hashes.
    /// `cls` must contain a `%s` placeholder for the hash.
    pub fn css(&mut self, hashes: &[String], size: u32, default: &str, cls: &str) -> String {
        let mut out = String::new();
        for hash in hashes {
            let Some(img) = self.fetch(hash, size, default) else {
                continue;
            };
            let b64 = general_purpose::STANDARD.encode(&img);
            let selector = cls.replace("%s", hash);
            out.push_str(&format!(
                "{} {{background-image: url(data:image/png;base64,{});}}\n",
                selector, b64
            ));
        }
        out
    }
}
