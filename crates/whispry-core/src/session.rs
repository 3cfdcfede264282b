use crate::domain::UserId;

/// The signed-in user as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub display_name: String,
    pub avatar_path: Option<String>,
}

/// Explicit session context handed to the sync engine.
///
/// The engine never reads ambient storage; the owner replaces the session via
/// `SyncEngine::set_session` on login/logout.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    pub token: String,
}

impl Session {
    pub fn new(identity: Identity, token: impl Into<String>) -> Self {
        Self {
            identity,
            token: token.into(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.identity.id
    }

    /// `Authorization` header value for REST calls and the push handshake.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Two sessions share an identity when both the user and the credential match.
    pub fn same_identity(&self, other: &Session) -> bool {
        self.identity.id == other.identity.id && self.token == other.token
    }
}

// Keep the credential out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str) -> Identity {
        Identity {
            id: UserId::from(id),
            display_name: format!("user {id}"),
            avatar_path: None,
        }
    }

    #[test]
    fn debug_redacts_token() {
        let s = Session::new(identity("1"), "secret-token");
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("secret-token"));
        assert_eq!(s.bearer(), "Bearer secret-token");
    }

    #[test]
    fn identity_change_detection() {
        let a = Session::new(identity("1"), "t1");
        assert!(a.same_identity(&Session::new(identity("1"), "t1")));
        assert!(!a.same_identity(&Session::new(identity("1"), "t2")));
        assert!(!a.same_identity(&Session::new(identity("2"), "t1")));
    }
}
