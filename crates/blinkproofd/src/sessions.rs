use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blinkproof_core::{CaptureTrigger, TriggerConfig};
use tokio::sync::Mutex;

/// One session's trigger, locked for the whole processing of a frame.
pub type SessionHandle = Arc<Mutex<CaptureTrigger>>;

struct SessionRecord {
    trigger: SessionHandle,
    last_seen: Instant,
}

/// Per-session liveness state, keyed by session id.
///
/// A session is created on its first frame, removed when the client ends it,
/// and evicted by [`SessionRegistry::evict_idle`] once it has seen no frame
/// for the idle timeout. Each session owns its own window, so concurrent
/// liveness checks for different users never share votes.
pub struct SessionRegistry {
    records: HashMap<String, SessionRecord>,
    trigger_config: TriggerConfig,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(trigger_config: TriggerConfig, idle_timeout: Duration) -> Self {
        Self {
            records: HashMap::new(),
            trigger_config,
            idle_timeout,
        }
    }

    /// Handle for `session`, creating a fresh trigger on first use.
    pub fn get_or_create(&mut self, session: &str) -> SessionHandle {
        self.get_or_create_at(session, Instant::now())
    }

    fn get_or_create_at(&mut self, session: &str, now: Instant) -> SessionHandle {
        let config = self.trigger_config;
        let record = self
            .records
            .entry(session.to_string())
            .or_insert_with(|| {
                tracing::info!(session, "liveness session started");
                SessionRecord {
                    trigger: Arc::new(Mutex::new(CaptureTrigger::new(config))),
                    last_seen: now,
                }
            });
        record.last_seen = now;
        record.trigger.clone()
    }

    /// Drop a session's state. Returns whether it existed.
    pub fn end(&mut self, session: &str) -> bool {
        let existed = self.records.remove(session).is_some();
        if existed {
            tracing::info!(session, "liveness session ended");
        }
        existed
    }

    /// Remove sessions idle for longer than the timeout. Returns how many.
    pub fn evict_idle(&mut self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    fn evict_idle_at(&mut self, now: Instant) -> usize {
        let timeout = self.idle_timeout;
        let before = self.records.len();
        self.records.retain(|session, record| {
            let keep = now.saturating_duration_since(record.last_seen) < timeout;
            if !keep {
                tracing::debug!(session = session.as_str(), "evicting idle session");
            }
            keep
        });
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(TriggerConfig::default(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_same_session_shares_state() {
        let mut reg = registry();
        let a = reg.get_or_create("alice");
        let b = reg.get_or_create("alice");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let mut reg = registry();
        let alice = reg.get_or_create("alice");
        let bob = reg.get_or_create("bob");
        assert!(!Arc::ptr_eq(&alice, &bob));

        let _ = alice
            .lock()
            .await
            .evaluate(blinkproof_core::FrameVerdict::no_face());
        assert_eq!(alice.lock().await.window().len(), 1);
        assert!(bob.lock().await.window().is_empty());
    }

    #[test]
    fn test_end_session() {
        let mut reg = registry();
        reg.get_or_create("alice");
        assert!(reg.end("alice"));
        assert!(!reg.end("alice"));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_end_then_recreate_starts_fresh() {
        let mut reg = registry();
        let first = reg.get_or_create("alice");
        reg.end("alice");
        let second = reg.get_or_create("alice");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_evicts_only_idle_sessions() {
        let mut reg = registry();
        let start = Instant::now();
        reg.get_or_create_at("stale", start);
        reg.get_or_create_at("fresh", start + Duration::from_secs(50));

        let evicted = reg.evict_idle_at(start + Duration::from_secs(61));
        assert_eq!(evicted, 1);
        assert_eq!(reg.len(), 1);

        // Touching a session refreshes its idle clock.
        reg.get_or_create_at("fresh", start + Duration::from_secs(100));
        assert_eq!(reg.evict_idle_at(start + Duration::from_secs(150)), 0);
    }
}
