use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::paths::database_file_path;

const DEFAULT_BASE_URL: &str = "https://knigavuhe.org";
const DEFAULT_PLAYER_BIN: &str = "mpv";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub db_path: PathBuf,
    pub player_bin: PathBuf,
    pub http_timeout: Duration,
    pub user_agent: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let base_url = non_empty("KNIGA_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        let db_path = match non_empty("KNIGA_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => database_file_path()?,
        };
        let player_bin = non_empty("KNIGA_PLAYER_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLAYER_BIN));
        let timeout_secs = non_empty("KNIGA_HTTP_TIMEOUT_SECS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        let user_agent = non_empty("KNIGA_USER_AGENT")
            .unwrap_or_else(|| format!("kniga/{}", env!("CARGO_PKG_VERSION")));

        let config = Self {
            base_url,
            db_path,
            player_bin,
            http_timeout: Duration::from_secs(timeout_secs),
            user_agent,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            bail!("KNIGA_BASE_URL must be an http(s) URL, got {:?}", self.base_url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_are_applied_and_base_url_is_normalized() {
        let config = Config::from_lookup(lookup_from(&[
            ("KNIGA_BASE_URL", "http://mirror.test/ "),
            ("KNIGA_DB_PATH", "/tmp/kniga-test.db"),
            ("KNIGA_PLAYER_BIN", "/usr/local/bin/mpv"),
            ("KNIGA_HTTP_TIMEOUT_SECS", "3"),
        ]))
        .expect("config should load");

        assert_eq!(config.base_url, "http://mirror.test");
        assert_eq!(config.db_path, PathBuf::from("/tmp/kniga-test.db"));
        assert_eq!(config.player_bin, PathBuf::from("/usr/local/bin/mpv"));
        assert_eq!(config.http_timeout, Duration::from_secs(3));
    }

    #[test]
    fn invalid_timeout_falls_back_to_default() {
        let config = Config::from_lookup(lookup_from(&[
            ("KNIGA_DB_PATH", "/tmp/kniga-test.db"),
            ("KNIGA_HTTP_TIMEOUT_SECS", "soon"),
        ]))
        .expect("config should load");

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(
            config.http_timeout,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
        );
        assert_eq!(config.player_bin, PathBuf::from(DEFAULT_PLAYER_BIN));
    }

    #[test]
    fn rejects_base_url_without_scheme() {
        let err = Config::from_lookup(lookup_from(&[
            ("KNIGA_BASE_URL", "knigavuhe.org"),
            ("KNIGA_DB_PATH", "/tmp/kniga-test.db"),
        ]))
        .expect_err("scheme-less base url should be rejected");
        assert!(err.to_string().contains("KNIGA_BASE_URL"));
    }
}
