use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage key under which the installation's session token is persisted.
pub const SESSION_STORAGE_KEY: &str = "agent_session";

const SESSION_PREFIX: &str = "sess_";
const SESSION_SUFFIX_LEN: usize = 8;

/// Opaque token identifying one client installation to the remote agent.
///
/// Generated once per install and attached to every outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("{SESSION_PREFIX}{}", &hex[..SESSION_SUFFIX_LEN]))
    }

    /// Accepts a previously persisted token; anything without the `sess_` prefix
    /// or with an empty/non-alphanumeric suffix is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let suffix = value.strip_prefix(SESSION_PREFIX)?;
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_prefix_and_fixed_suffix() {
        let id = SessionId::generate();
        let s = id.as_str();
        assert!(s.starts_with("sess_"));
        assert_eq!(s.len(), "sess_".len() + 8);
        assert!(s["sess_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn parse_accepts_persisted_tokens() {
        assert_eq!(
            SessionId::parse(" sess_ab12cd34 ").map(|s| s.to_string()),
            Some("sess_ab12cd34".to_string())
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SessionId::parse("").is_none());
        assert!(SessionId::parse("sess_").is_none());
        assert!(SessionId::parse("abc12345").is_none());
        assert!(SessionId::parse("sess_ab-12").is_none());
    }
}
