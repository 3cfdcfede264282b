use std::{env, fs, path::Path, time::Duration};

use tracing::debug;
use url::Url;

use crate::{errors::Error, Result};

/// Path segment substituted with the peer id in [`Config::history_path`].
pub const PEER_PLACEHOLDER: &str = "{peer}";

/// Typed client configuration.
///
/// Defaults match the reference backend (`localhost:8080`, STOMP destinations
/// `/user/queue/messages` and `/app/chat.send`).
#[derive(Clone, Debug)]
pub struct Config {
    // Session
    pub token: String,
    pub initial_peer: Option<String>,

    // REST
    pub api_base_url: Url,
    pub history_path: String,
    pub send_path: String,
    pub me_path: String,
    pub http_timeout: Duration,

    // Push
    pub ws_url: Url,
    pub inbound_destination: String,
    pub outbound_destination: String,
    pub reconnect_delay: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build a config from an arbitrary key lookup (the process environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_or = |key: &str, default: &str| {
            lookup(key)
                .and_then(non_empty)
                .unwrap_or_else(|| default.to_string())
        };
        let millis_or = |key: &str, default: u64| {
            Duration::from_millis(
                lookup(key)
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .unwrap_or(default),
            )
        };

        let token = lookup("WHISPRY_TOKEN").and_then(non_empty).ok_or_else(|| {
            Error::Config("WHISPRY_TOKEN environment variable is required".to_string())
        })?;
        let initial_peer = lookup("WHISPRY_PEER").and_then(non_empty);

        let api_base_url = parse_url(
            "WHISPRY_API_BASE_URL",
            &str_or("WHISPRY_API_BASE_URL", "http://localhost:8080"),
            &["http", "https"],
        )?;
        let history_path = str_or("WHISPRY_HISTORY_PATH", "/api/messages/{peer}");
        if !history_path.split('/').any(|seg| seg == PEER_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "WHISPRY_HISTORY_PATH must contain a {PEER_PLACEHOLDER} segment: {history_path}"
            )));
        }
        let send_path = str_or("WHISPRY_SEND_PATH", "/api/messages");
        let me_path = str_or("WHISPRY_ME_PATH", "/authapp/api/kullanici/me");
        let http_timeout = millis_or("WHISPRY_HTTP_TIMEOUT_MS", 10_000);

        let ws_url = parse_url(
            "WHISPRY_WS_URL",
            &str_or("WHISPRY_WS_URL", "ws://localhost:8080/ws"),
            &["ws", "wss"],
        )?;
        let inbound_destination = str_or("WHISPRY_INBOUND_DESTINATION", "/user/queue/messages");
        let outbound_destination = str_or("WHISPRY_OUTBOUND_DESTINATION", "/app/chat.send");
        let reconnect_delay = millis_or("WHISPRY_RECONNECT_DELAY_MS", 5_000);

        Ok(Self {
            token,
            initial_peer,
            api_base_url,
            history_path,
            send_path,
            me_path,
            http_timeout,
            ws_url,
            inbound_destination,
            outbound_destination,
            reconnect_delay,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Export the file's variables that are not already set. Returns the keys
/// that were applied.
fn load_dotenv_if_present(path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };

    let mut applied = Vec::new();
    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            debug!(%key, "keeping existing environment value over .env");
            continue;
        }
        env::set_var(&key, val);
        applied.push(key);
    }
    if !applied.is_empty() {
        debug!(path = %path.display(), keys = ?applied, "loaded .env");
    }
    applied
}

/// Parse `raw` as an absolute url with a host and one of `schemes`.
fn parse_url(key: &str, raw: &str, schemes: &[&str]) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("{key} is not a valid url ({e}): {raw}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(Error::Config(format!(
            "{key} must use one of {}: {raw}",
            schemes.join(", ")
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::Config(format!("{key} has no host: {raw}")));
    }
    Ok(url)
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let cfg = Config::from_lookup(lookup(&[("WHISPRY_TOKEN", "abc")])).unwrap();
        assert_eq!(cfg.token, "abc");
        assert_eq!(cfg.api_base_url.as_str(), "http://localhost:8080/");
        assert_eq!(cfg.ws_url.as_str(), "ws://localhost:8080/ws");
        assert_eq!(cfg.ws_url.host_str(), Some("localhost"));
        assert_eq!(cfg.inbound_destination, "/user/queue/messages");
        assert_eq!(cfg.outbound_destination, "/app/chat.send");
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(5));
        assert!(cfg.initial_peer.is_none());
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[("WHISPRY_TOKEN", "  ")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup(&[
            ("WHISPRY_TOKEN", "abc"),
            ("WHISPRY_API_BASE_URL", "https://chat.example/"),
            ("WHISPRY_WS_URL", "wss://chat.example/ws"),
            ("WHISPRY_RECONNECT_DELAY_MS", "250"),
            ("WHISPRY_PEER", "42"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_base_url.host_str(), Some("chat.example"));
        assert_eq!(cfg.ws_url.as_str(), "wss://chat.example/ws");
        assert_eq!(cfg.reconnect_delay, Duration::from_millis(250));
        assert_eq!(cfg.initial_peer.as_deref(), Some("42"));
    }

    #[test]
    fn rejects_history_path_without_placeholder() {
        let err = Config::from_lookup(lookup(&[
            ("WHISPRY_TOKEN", "abc"),
            ("WHISPRY_HISTORY_PATH", "/api/messages"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("{peer}"));

        // The placeholder must be a whole segment.
        assert!(Config::from_lookup(lookup(&[
            ("WHISPRY_TOKEN", "abc"),
            ("WHISPRY_HISTORY_PATH", "/api/messages?with={peer}"),
        ]))
        .is_err());
    }

    #[test]
    fn rejects_non_websocket_url() {
        let err = Config::from_lookup(lookup(&[
            ("WHISPRY_TOKEN", "abc"),
            ("WHISPRY_WS_URL", "http://localhost:8080/ws"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_websocket_url_without_host() {
        for raw in ["ws://", "not a url"] {
            let err = Config::from_lookup(lookup(&[
                ("WHISPRY_TOKEN", "abc"),
                ("WHISPRY_WS_URL", raw),
            ]))
            .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn fragment_is_not_part_of_the_websocket_host() {
        let cfg = Config::from_lookup(lookup(&[
            ("WHISPRY_TOKEN", "abc"),
            ("WHISPRY_WS_URL", "ws://chat.example:8080#x"),
        ]))
        .unwrap();
        assert_eq!(cfg.ws_url.host_str(), Some("chat.example"));
        assert_eq!(cfg.ws_url.port(), Some(8080));
    }

    #[test]
    fn dotenv_parsing_skips_comments_and_strips_quotes() {
        let parsed =
            parse_dotenv("# comment\nWHISPRY_TOKEN=\"t0k\"\n\nBROKEN\nWHISPRY_PEER = '7'\n");
        assert_eq!(
            parsed,
            vec![
                ("WHISPRY_TOKEN".to_string(), "t0k".to_string()),
                ("WHISPRY_PEER".to_string(), "7".to_string()),
            ]
        );
        assert_eq!(
            parse_dotenv("export WHISPRY_PEER=9\n"),
            vec![("WHISPRY_PEER".to_string(), "9".to_string())]
        );
    }

    #[test]
    fn dotenv_loading_keeps_existing_variables() {
        let path = env::temp_dir().join(format!("whispry-dotenv-{}.env", std::process::id()));
        fs::write(
            &path,
            "WHISPRY_DOTENV_TEST_SET=from-file\nWHISPRY_DOTENV_TEST_NEW=fresh\n",
        )
        .unwrap();
        env::set_var("WHISPRY_DOTENV_TEST_SET", "from-env");
        env::remove_var("WHISPRY_DOTENV_TEST_NEW");

        let applied = load_dotenv_if_present(&path);
        fs::remove_file(&path).ok();

        assert_eq!(applied, vec!["WHISPRY_DOTENV_TEST_NEW".to_string()]);
        assert_eq!(env::var("WHISPRY_DOTENV_TEST_SET").unwrap(), "from-env");
        assert_eq!(env::var("WHISPRY_DOTENV_TEST_NEW").unwrap(), "fresh");
        assert!(load_dotenv_if_present(Path::new("/nonexistent/whispry.env")).is_empty());
    }
}
