//! Session store: identity-keyed, resumable per-client state.
//!
//! A session outlives any single connection. The store indexes sessions
//! both by server-assigned id and by client identity, so a reconnecting
//! client lands back on its previous session as long as the TTL has not
//! elapsed. Field values are tagged variants; each field records whether
//! it survives a reconnect (`persist`) or is scoped to one connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// The stable triple that routes a connection to a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub client_id: String,
    pub device_id: i64,
    pub session_token: [u8; 16],
}

impl Identity {
    pub fn token_hex(&self) -> String {
        hex::encode(self.session_token)
    }
}

/// Tagged session field value. The key space mixes strings, counters, and
/// string lists; JSON blobs ride in `Str`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    StrList(Vec<String>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::StrList(items) => Some(items),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionField {
    value: FieldValue,
    persist: bool,
}

#[derive(Debug)]
struct SessionInner {
    fields: HashMap<String, SessionField>,
    /// Wall-clock millis after which a disconnected session is discarded.
    /// `None` while a connection is bound.
    expires_at: Option<i64>,
    connected: bool,
}

/// One client session. Owned by the store; handlers hold `Arc` clones
/// scoped to a single invocation.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub identity: Identity,
    inner: Mutex<SessionInner>,
}

impl Session {
    fn new(identity: Identity) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            identity,
            inner: Mutex::new(SessionInner {
                fields: HashMap::new(),
                expires_at: None,
                connected: true,
            }),
        }
    }

    /// Set a field. `persist` marks it as surviving reconnects.
    pub fn set_field(&self, key: &str, value: FieldValue, persist: bool) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner
            .fields
            .insert(key.to_string(), SessionField { value, persist });
    }

    /// Read a field by value. Copies out so no lock is held by callers.
    pub fn get_field(&self, key: &str) -> Option<FieldValue> {
        let inner = self.inner.lock().expect("session lock poisoned");
        inner.fields.get(key).map(|f| f.value.clone())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get_field(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get_field(key).and_then(|v| v.as_int())
    }

    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        self.get_field(key).and_then(|v| match v {
            FieldValue::StrList(items) => Some(items),
            _ => None,
        })
    }

    pub fn remove_field(&self, key: &str) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.fields.remove(key);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().expect("session lock poisoned").connected
    }

    /// Millis deadline for a disconnected session, if armed.
    pub fn expires_at(&self) -> Option<i64> {
        self.inner.lock().expect("session lock poisoned").expires_at
    }

    /// Bind a connection. Resuming a disconnected session drops every
    /// non-persistent field, which is what separates per-connection state
    /// (rate-limit stamps, last-order markers) from per-identity state.
    fn bind(&self) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if !inner.connected {
            inner.fields.retain(|_, field| field.persist);
        }
        inner.connected = true;
        inner.expires_at = None;
    }

    fn disconnect(&self, deadline_ms: i64) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.connected = false;
        inner.expires_at = Some(deadline_ms);
    }
}

/// Process-wide session index.
pub struct SessionStore {
    by_id: DashMap<String, Arc<Session>>,
    by_identity: DashMap<Identity, String>,
    ttl_ms: i64,
}

impl SessionStore {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            by_id: DashMap::new(),
            by_identity: DashMap::new(),
            ttl_ms,
        }
    }

    /// Resolve an identity to its session, creating one if absent.
    /// Returns the session and whether it was created by this call.
    pub fn lookup_or_create(&self, identity: Identity) -> (Arc<Session>, bool) {
        if let Some(id) = self.by_identity.get(&identity).map(|e| e.value().clone()) {
            if let Some(session) = self.by_id.get(&id).map(|e| e.value().clone()) {
                session.bind();
                debug!(session_id = %session.id, "session resumed");
                return (session, false);
            }
            // Index entry outlived the session; fall through and recreate.
            self.by_identity.remove(&identity);
        }

        let session = Arc::new(Session::new(identity.clone()));
        self.by_id.insert(session.id.clone(), session.clone());
        self.by_identity.insert(identity, session.id.clone());
        info!(session_id = %session.id, client_id = %session.identity.client_id, "session created");
        (session, true)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.by_id.get(id).map(|e| e.value().clone())
    }

    /// Arm the TTL for a session whose connection just dropped.
    pub fn mark_disconnected(&self, id: &str, now_ms: i64) {
        if let Some(session) = self.get(id) {
            session.disconnect(now_ms + self.ttl_ms);
            debug!(session_id = %id, ttl_ms = self.ttl_ms, "session disconnected, ttl armed");
        }
    }

    /// Drop a session outright.
    pub fn expire(&self, id: &str) {
        if let Some((_, session)) = self.by_id.remove(id) {
            self.by_identity.remove(&session.identity);
            info!(session_id = %id, "session expired");
        }
    }

    /// Remove every disconnected session whose deadline has passed.
    /// Returns the expired ids so the caller can tear down per-session
    /// state held elsewhere (pending queues, room membership).
    pub fn sweep(&self, now_ms: i64) -> Vec<String> {
        let expired: Vec<String> = self
            .by_id
            .iter()
            .filter(|entry| {
                let session = entry.value();
                !session.is_connected()
                    && session.expires_at().is_some_and(|deadline| deadline <= now_ms)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in &expired {
            self.expire(id);
        }
        expired
    }

    pub fn session_count(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(client: &str) -> Identity {
        Identity {
            client_id: client.to_string(),
            device_id: 42,
            session_token: [7u8; 16],
        }
    }

    #[test]
    fn same_identity_resolves_to_same_session() {
        let store = SessionStore::new(30_000);
        let (a, created_a) = store.lookup_or_create(identity("trader-1"));
        let (b, created_b) = store.lookup_or_create(identity("trader-1"));
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn different_identities_get_different_sessions() {
        let store = SessionStore::new(30_000);
        let (a, _) = store.lookup_or_create(identity("trader-1"));
        let (b, _) = store.lookup_or_create(identity("trader-2"));
        assert_ne!(a.id, b.id);
        assert_eq!(store.session_count(), 2);
    }

    #[test]
    fn resume_clears_only_ephemeral_fields() {
        let store = SessionStore::new(30_000);
        let (session, _) = store.lookup_or_create(identity("trader-1"));
        session.set_field("userId", FieldValue::Str("trader-user-123".into()), true);
        session.set_field("rateLimit_orders.place", FieldValue::Int(123_456), false);
        session.set_field("lastOrderId", FieldValue::Str("ORD_1".into()), false);

        store.mark_disconnected(&session.id, 1_000);
        let (resumed, created) = store.lookup_or_create(identity("trader-1"));
        assert!(!created);
        assert_eq!(resumed.get_str("userId").as_deref(), Some("trader-user-123"));
        assert!(resumed.get_int("rateLimit_orders.place").is_none());
        assert!(resumed.get_str("lastOrderId").is_none());
    }

    #[test]
    fn fields_survive_while_connected() {
        let store = SessionStore::new(30_000);
        let (session, _) = store.lookup_or_create(identity("trader-1"));
        session.set_field("lastOrderId", FieldValue::Str("ORD_1".into()), false);
        // A second bind without an intervening disconnect is not a resume.
        let (again, _) = store.lookup_or_create(identity("trader-1"));
        assert_eq!(again.get_str("lastOrderId").as_deref(), Some("ORD_1"));
    }

    #[test]
    fn sweep_expires_only_past_deadline() {
        let store = SessionStore::new(30_000);
        let (a, _) = store.lookup_or_create(identity("gone"));
        let (b, _) = store.lookup_or_create(identity("fresh"));
        store.mark_disconnected(&a.id, 0); // deadline 30_000
        store.mark_disconnected(&b.id, 20_000); // deadline 50_000

        let expired = store.sweep(30_000);
        assert_eq!(expired, vec![a.id.clone()]);
        assert!(store.get(&a.id).is_none());
        assert!(store.get(&b.id).is_some());

        // Expired identity gets a brand-new session.
        let (fresh, created) = store.lookup_or_create(identity("gone"));
        assert!(created);
        assert_ne!(fresh.id, a.id);
    }

    #[test]
    fn connected_sessions_never_swept() {
        let store = SessionStore::new(30_000);
        let (session, _) = store.lookup_or_create(identity("live"));
        assert!(store.sweep(i64::MAX).is_empty());
        assert!(store.get(&session.id).is_some());
    }

    #[test]
    fn string_list_round_trip() {
        let store = SessionStore::new(30_000);
        let (session, _) = store.lookup_or_create(identity("trader-1"));
        session.set_field(
            "subscribedRooms",
            FieldValue::StrList(vec!["market:BTC-USD".into()]),
            true,
        );
        assert_eq!(
            session.get_list("subscribedRooms").unwrap(),
            vec!["market:BTC-USD".to_string()]
        );
    }
}
