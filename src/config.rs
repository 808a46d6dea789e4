use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub imap_host: String,
    pub imap_port: Option<u16>,
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    pub username: String,
    /// Prefer the keyring (`tagmail set-password`); this field is a fallback.
    pub password: Option<String>,
    pub listen: Option<String>,
    pub db_path: Option<String>,
}

impl Config {
    pub fn imap_port(&self) -> u16 {
        self.imap_port.unwrap_or(993)
    }

    pub fn smtp_port(&self) -> u16 {
        self.smtp_port.unwrap_or(587)
    }

    pub fn listen(&self) -> String {
        self.listen
            .clone()
            .unwrap_or_else(|| "127.0.0.1:5000".to_string())
    }

    /// Gmail gets its own flag mapping during sync.
    pub fn is_gmail(&self) -> bool {
        self.imap_host == "imap.gmail.com"
    }

    pub fn password(&self) -> Result<String> {
        if let Some(p) = crate::secrets::load_password(&self.username)? {
            return Ok(p);
        }
        self.password
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no password in keyring or config for {}", self.username))
    }
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join("tagmail"))
}

pub fn config_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("config.toml");
    Ok(p)
}

pub fn default_db_path() -> Result<PathBuf> {
    let mut p = config_dir()?;
    fs::create_dir_all(&p)?;
    p.push("mail.db");
    Ok(p)
}

pub fn load_config() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        // create a template config for users to edit
        let sample = Config {
            imap_host: "imap.example.com".to_string(),
            imap_port: Some(993),
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: Some(587),
            username: "you@example.com".to_string(),
            password: None,
            listen: Some("127.0.0.1:5000".to_string()),
            db_path: None,
        };
        let tom = toml::to_string_pretty(&sample)?;
        fs::write(&path, tom)?;
        return Err(anyhow::anyhow!(
            "Created template config at {} — edit it and run again",
            path.display()
        ));
    }
    let s = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&s)?;
    Ok(cfg)
}

pub fn resolve_db_path(cfg: &Config) -> Result<PathBuf> {
    if let Some(p) = &cfg.db_path {
        Ok(PathBuf::from(p))
    } else {
        default_db_path()
    }
}
