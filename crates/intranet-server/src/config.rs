use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("INTRANET_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("INTRANET_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let port = match lookup("INTRANET_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("INTRANET_PORT is not a valid port: {raw}"))?,
            None => 3000,
        };

        Ok(Self {
            jwt_secret,
            db_path: lookup("INTRANET_DB_PATH")
                .unwrap_or_else(|| "intranet.db".into())
                .into(),
            host: lookup("INTRANET_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            upload_dir: lookup("INTRANET_UPLOAD_DIR")
                .unwrap_or_else(|| "./uploads".into())
                .into(),
        })
    }
}
