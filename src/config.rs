use std::{str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Origin the browser reaches us on; OAuth redirect URIs hang off it.
    pub public_url: String,
    pub client_secret_path: String,
    pub media_upload_url: String,
    pub media_upload_preset: String,
    pub typing_quiet_ms: u64,
    pub cache_ttl_secs: u64,
    pub session_idle_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite://duochat.db?mode=rwc".to_owned(),
            bind_addr: "0.0.0.0:8080".to_owned(),
            public_url: "http://localhost:8080".to_owned(),
            client_secret_path: "client_secret.json".to_owned(),
            media_upload_url: "https://api.cloudinary.com/v1_1/demo/image/upload".to_owned(),
            media_upload_preset: "profilepic".to_owned(),
            typing_quiet_ms: 1500,
            cache_ttl_secs: 30,
            session_idle_minutes: 60,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        Ok(Config {
            database_url: var_or("DATABASE_URL", defaults.database_url),
            bind_addr: var_or("BIND_ADDR", defaults.bind_addr),
            public_url: var_or("PUBLIC_URL", defaults.public_url)
                .trim_end_matches('/')
                .to_owned(),
            client_secret_path: var_or("CLIENT_SECRET_PATH", defaults.client_secret_path),
            media_upload_url: var_or("MEDIA_UPLOAD_URL", defaults.media_upload_url),
            media_upload_preset: var_or("MEDIA_UPLOAD_PRESET", defaults.media_upload_preset),
            typing_quiet_ms: parsed_or("TYPING_QUIET_MS", defaults.typing_quiet_ms)?,
            cache_ttl_secs: parsed_or("CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            session_idle_minutes: parsed_or("SESSION_IDLE_MINUTES", defaults.session_idle_minutes)?,
        })
    }

    pub fn typing_quiet(&self) -> Duration {
        Duration::from_millis(self.typing_quiet_ms)
    }

    pub fn redirect_url(&self, provider: &str) -> String {
        format!("{}/lockin/{provider}", self.public_url)
    }
}

fn var_or(key: &str, default: String) -> String {
    dotenv::var(key).unwrap_or(default)
}

fn parsed_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("{key}={raw:?} is not valid")),
        Err(_) => Ok(default),
    }
}
