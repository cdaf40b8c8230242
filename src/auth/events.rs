//! Identity-provider event vocabulary.

use serde::{Deserialize, Serialize};

/// User as reported by the identity provider. Opaque beyond its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl UserRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Session payload attached to provider events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token; never parsed here.
    pub token: String,
    pub user: UserRecord,
}

impl Session {
    pub fn new(token: impl Into<String>, user: UserRecord) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "session", rename_all = "kebab-case")]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    RecoveryDetected(Session),
    SessionRestored(Session),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    RecoveryDetected,
    SessionRestored,
}

impl AuthEvent {
    pub fn kind(&self) -> AuthEventKind {
        match self {
            Self::SignedIn(_) => AuthEventKind::SignedIn,
            Self::SignedOut => AuthEventKind::SignedOut,
            Self::TokenRefreshed(_) => AuthEventKind::TokenRefreshed,
            Self::RecoveryDetected(_) => AuthEventKind::RecoveryDetected,
            Self::SessionRestored(_) => AuthEventKind::SessionRestored,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(s)
            | Self::TokenRefreshed(s)
            | Self::RecoveryDetected(s)
            | Self::SessionRestored(s) => Some(s),
            Self::SignedOut => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session().map(|s| s.user.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_format_is_tagged() {
        let event = AuthEvent::SignedIn(Session::new("tok", UserRecord::new("u1")));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "signed-in");
        assert_eq!(json["session"]["user"]["id"], "u1");

        let out: AuthEvent = serde_json::from_str(r#"{"type":"signed-out"}"#).unwrap();
        assert_eq!(out, AuthEvent::SignedOut);
    }

    #[test]
    fn user_id_follows_session() {
        let event = AuthEvent::RecoveryDetected(Session::new("t", UserRecord::new("u9")));
        assert_eq!(event.kind(), AuthEventKind::RecoveryDetected);
        assert_eq!(event.user_id(), Some("u9"));
        assert_eq!(AuthEvent::SignedOut.user_id(), None);
    }
}
