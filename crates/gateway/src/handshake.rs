//! Handshake inspection: turning connection metadata into an [`Identity`].
//!
//! The client passes `clientId`, `deviceId`, `token`, and `sessionToken`
//! as query parameters on the upgrade request; `x-device-id` is accepted
//! as a header fallback. Token verification is a documented opaque
//! mapping, not a real JWT check: well-known substrings select fixed
//! users, and any other non-empty token is accepted as a viewer.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use sha2::{Digest, Sha256};
use tracing::debug;
use url::form_urlencoded;

use crate::session::Identity;

/// Outcome of token resolution: the user and their roles.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub user_id: String,
    pub roles: Vec<String>,
}

/// Map a bearer token to a principal.
///
/// Returns `None` only for an empty token. Unknown non-empty tokens fall
/// back to a synthetic viewer identity derived from the token prefix.
pub fn resolve_token(token: &str) -> Option<Principal> {
    if token.is_empty() {
        return None;
    }
    let (user_id, roles): (&str, &[&str]) = if token.contains("admin") {
        ("admin-user-789", &["admin", "trader", "viewer"])
    } else if token.contains("trader") {
        ("trader-user-123", &["trader", "viewer"])
    } else if token.contains("viewer") {
        ("viewer-user-456", &["viewer"])
    } else if token.contains("demo") {
        ("demo-user-001", &["viewer"])
    } else {
        let prefix: String = token.chars().take(8).collect();
        return Some(Principal {
            user_id: format!("authenticated-user-{prefix}"),
            roles: vec!["viewer".to_string()],
        });
    };
    Some(Principal {
        user_id: user_id.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    })
}

/// Inspects upgrade requests and produces session identities.
pub struct HandshakeInspector {
    jwt_secret: String,
}

impl HandshakeInspector {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Extract an identity from the upgrade request metadata.
    ///
    /// `query` is the raw query string; `device_header` is the value of
    /// `x-device-id` when present. Returns `Err(reason)` to refuse the
    /// connection before the WebSocket upgrade completes.
    pub fn extract(
        &self,
        query: &str,
        device_header: Option<&str>,
    ) -> std::result::Result<Identity, String> {
        let mut user_id = String::new();
        let mut device_id = String::new();
        let mut token = String::new();
        let mut session_token = String::new();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "clientId" => user_id = value.into_owned(),
                "deviceId" => device_id = value.into_owned(),
                "token" => token = value.into_owned(),
                "sessionToken" => session_token = value.into_owned(),
                _ => {}
            }
        }

        if !token.is_empty() {
            if let Some(principal) = resolve_token(&token) {
                debug!(user_id = %principal.user_id, "handshake token resolved");
                user_id = principal.user_id;
            }
        }

        if device_id.is_empty() {
            if let Some(header) = device_header {
                device_id = header.to_string();
            }
        }

        if user_id.is_empty() {
            return Err("missing user identification".to_string());
        }

        if device_id.is_empty() {
            device_id = format!("trading-device-{user_id}");
        }

        let device_id_num = numeric_device_id(&device_id);

        let session_token = match parse_session_token(&session_token) {
            Some(bytes) => bytes,
            None => self.mint_session_token(&user_id, &device_id),
        };

        Ok(Identity {
            client_id: user_id,
            device_id: device_id_num,
            session_token,
        })
    }

    /// Authorize an extracted identity. The reference policy admits
    /// everyone who survived extraction.
    pub fn authorize(&self, identity: &Identity) -> bool {
        debug!(client_id = %identity.client_id, device_id = identity.device_id, "authorizing");
        true
    }

    /// Mint a fresh 16-byte session token:
    /// `SHA-256(userId ":" deviceId ":" nowMillis ":" secret)` truncated.
    fn mint_session_token(&self, user_id: &str, device_id: &str) -> [u8; 16] {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let raw = format!("{user_id}:{device_id}:{now_ms}:{}", self.jwt_secret);
        let digest = Sha256::digest(raw.as_bytes());
        let mut token = [0u8; 16];
        token.copy_from_slice(&digest[..16]);
        token
    }
}

/// Numeric device id: parse as-is, or hash the string mod 1 000 000.
fn numeric_device_id(device_id: &str) -> i64 {
    if let Ok(n) = device_id.parse::<i64>() {
        return n;
    }
    let mut hasher = DefaultHasher::new();
    device_id.hash(&mut hasher);
    (hasher.finish() % 1_000_000) as i64
}

/// A session token is valid only as exactly 32 hex characters.
fn parse_session_token(token: &str) -> Option<[u8; 16]> {
    if token.len() != 32 {
        return None;
    }
    let decoded = hex::decode(token).ok()?;
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&decoded);
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspector() -> HandshakeInspector {
        HandshakeInspector::new("test-secret")
    }

    #[test]
    fn token_table_is_stable() {
        let p = resolve_token("trader").unwrap();
        assert_eq!(p.user_id, "trader-user-123");
        assert_eq!(p.roles, vec!["trader", "viewer"]);

        let p = resolve_token("admin-abc").unwrap();
        assert_eq!(p.user_id, "admin-user-789");
        assert_eq!(p.roles, vec!["admin", "trader", "viewer"]);

        assert_eq!(resolve_token("viewer").unwrap().user_id, "viewer-user-456");
        assert_eq!(resolve_token("demo").unwrap().user_id, "demo-user-001");
        assert!(resolve_token("").is_none());
    }

    #[test]
    fn unknown_token_becomes_synthetic_viewer() {
        let p = resolve_token("abcdef1234567890").unwrap();
        assert_eq!(p.user_id, "authenticated-user-abcdef12");
        assert_eq!(p.roles, vec!["viewer"]);
    }

    #[test]
    fn extract_full_query() {
        let identity = inspector()
            .extract("clientId=trader-1&token=trader&deviceId=42", None)
            .unwrap();
        // The verified token overrides the raw clientId.
        assert_eq!(identity.client_id, "trader-user-123");
        assert_eq!(identity.device_id, 42);
    }

    #[test]
    fn non_numeric_device_id_is_hashed() {
        let identity = inspector()
            .extract("clientId=c1&token=demo&deviceId=my-laptop", None)
            .unwrap();
        assert!(identity.device_id >= 0);
        assert!(identity.device_id < 1_000_000);
        // Stable across calls.
        let again = inspector()
            .extract("clientId=c1&token=demo&deviceId=my-laptop", None)
            .unwrap();
        assert_eq!(identity.device_id, again.device_id);
    }

    #[test]
    fn device_header_fallback() {
        let identity = inspector()
            .extract("clientId=c1&token=demo", Some("77"))
            .unwrap();
        assert_eq!(identity.device_id, 77);
    }

    #[test]
    fn missing_identification_rejected() {
        assert!(inspector().extract("deviceId=42", None).is_err());
        assert!(inspector().extract("", None).is_err());
    }

    #[test]
    fn valid_session_token_round_trips() {
        let hex_token = "00112233445566778899aabbccddeeff";
        let identity = inspector()
            .extract(
                &format!("clientId=c1&token=demo&sessionToken={hex_token}"),
                None,
            )
            .unwrap();
        assert_eq!(identity.token_hex(), hex_token);
    }

    #[test]
    fn invalid_session_token_is_replaced() {
        // Too short, and not hex at all.
        for bad in ["abcd", "zz112233445566778899aabbccddeeff"] {
            let identity = inspector()
                .extract(&format!("clientId=c1&token=demo&sessionToken={bad}"), None)
                .unwrap();
            assert_ne!(identity.token_hex(), bad);
            assert_eq!(identity.session_token.len(), 16);
        }
    }

    #[test]
    fn percent_encoded_values_are_decoded() {
        let identity = inspector()
            .extract("clientId=c%2D1&token=demo%20x", None)
            .unwrap();
        assert_eq!(identity.client_id, "demo-user-001");
    }
}
