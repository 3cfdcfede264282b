//! REST adapter (reqwest).
//!
//! Implements the core `HistoryClient` and `SendClient` ports against the chat
//! backend and resolves the signed-in user from a stored bearer token.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use url::Url;

use whispry_core::{
    config::{Config, PEER_PLACEHOLDER},
    domain::UserId,
    errors::Error,
    message::OutgoingMessage,
    ports::{HistoryClient, SendClient},
    session::{Identity, Session},
    utils::truncate_text,
    Result,
};

#[derive(Clone, Debug)]
pub struct RestClient {
    base_url: Url,
    history_path: String,
    send_path: String,
    me_path: String,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self {
            base_url: cfg.api_base_url.clone(),
            history_path: cfg.history_path.clone(),
            send_path: cfg.send_path.clone(),
            me_path: cfg.me_path.clone(),
            http,
        })
    }

    pub fn history_url(&self, peer: &UserId) -> Result<Url> {
        self.endpoint(&self.history_path, Some(peer))
    }

    pub fn send_url(&self) -> Result<Url> {
        self.endpoint(&self.send_path, None)
    }

    pub fn me_url(&self) -> Result<Url> {
        self.endpoint(&self.me_path, None)
    }

    /// Append `path` to the base url segment by segment. The `{peer}` segment
    /// is replaced by the percent-encoded peer id.
    fn endpoint(&self, path: &str, peer: Option<&UserId>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                Error::Config(format!("api base url cannot carry a path: {}", self.base_url))
            })?;
            segments.pop_if_empty();
            for seg in path.split('/').filter(|s| !s.is_empty()) {
                match peer {
                    Some(peer) if seg == PEER_PLACEHOLDER => segments.push(peer.as_str()),
                    _ => segments.push(seg),
                };
            }
        }
        Ok(url)
    }

    /// Validate a stored token and return the user it belongs to.
    pub async fn current_user(&self, token: &str) -> Result<Identity> {
        let resp = self
            .http
            .get(self.me_url()?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_reqwest)?;
        let v = read_json(resp).await.map_err(|e| {
            if e.is_auth() {
                Error::Auth("token is invalid or the user no longer exists".to_string())
            } else {
                e
            }
        })?;
        identity_from_json(&v)
    }

    /// Resolve the token into a full session.
    pub async fn open_session(&self, token: &str) -> Result<Session> {
        let identity = self.current_user(token).await?;
        Ok(Session::new(identity, token))
    }
}

#[async_trait]
impl HistoryClient for RestClient {
    async fn fetch_history(&self, session: &Session, peer: &UserId) -> Result<Vec<Value>> {
        let url = self.history_url(peer)?;
        debug!(%url, "fetching history");
        let resp = self
            .http
            .get(url)
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(map_reqwest)?;
        let body = read_json(resp).await?;
        history_records(body)
    }
}

#[async_trait]
impl SendClient for RestClient {
    async fn send_message(&self, session: &Session, msg: &OutgoingMessage) -> Result<Value> {
        let resp = self
            .http
            .post(self.send_url()?)
            .bearer_auth(&session.token)
            .json(msg)
            .send()
            .await
            .map_err(map_reqwest)?;
        read_json(resp).await
    }
}

fn map_reqwest(e: reqwest::Error) -> Error {
    Error::Transport(format!("request failed: {e}"))
}

async fn read_json(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Http {
            status: status.as_u16(),
            body: truncate_text(&body, 200),
        });
    }
    resp.json::<Value>()
        .await
        .map_err(|e| Error::Protocol(format!("invalid json response: {e}")))
}

/// History endpoints return a bare array; paged variants wrap it in
/// `content` or `messages`.
fn history_records(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => {
            for key in ["content", "messages", "data"] {
                if let Some(Value::Array(items)) = obj.remove(key) {
                    return Ok(items);
                }
            }
            Err(Error::Protocol(
                "history response has no message array".to_string(),
            ))
        }
        other => Err(Error::Protocol(format!(
            "unexpected history response: {}",
            truncate_text(&other.to_string(), 80)
        ))),
    }
}

/// Map the backend's user record to an [`Identity`].
fn identity_from_json(v: &Value) -> Result<Identity> {
    let text = |keys: &[&str]| {
        keys.iter().find_map(|k| match v.get(*k) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    };

    let id = text(&["id", "userId", "kullaniciId"])
        .ok_or_else(|| Error::Protocol("user record has no id".to_string()))?;
    let display_name = text(&["isim", "displayName", "name", "kullaniciAdi", "username"])
        .unwrap_or_else(|| id.clone());
    let avatar_path = text(&["avatar", "avatarPath", "profilResmi", "profileImage"]);

    Ok(Identity {
        id: UserId(id),
        display_name,
        avatar_path,
    })
}
