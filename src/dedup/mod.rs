//! Distributed event deduplication and run locking.
//!
//! The deduplicator is the single arbiter of "am I the winner for this
//! alert": runs for the same dedup signature within the TTL window resolve
//! to the existing run instead of starting a new one, and a lease-bound
//! named lock serializes racing deliveries for the same source.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Verdict for an incoming event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DedupAction {
    /// No live entry for this signature; caller owns the new run.
    New,
    /// Same signature, different payload; attach to the existing run.
    UpdateExisting,
    /// Byte-identical redelivery; drop it.
    Skip,
}

#[derive(Debug, Clone)]
struct DedupEntry {
    run_id: String,
    payload_hash: String,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct LockEntry {
    expires_at: Instant,
}

/// TTL-bound dedup table plus lease-bound named locks.
pub struct Deduplicator {
    entries: DashMap<String, DedupEntry>,
    locks: DashMap<String, LockEntry>,
    ttl: Duration,
    lock_lease: Duration,
}

impl Deduplicator {
    #[must_use]
    pub fn new(ttl: Duration, lock_lease: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            ttl,
            lock_lease,
        }
    }

    /// Classify an incoming event against the live dedup window.
    #[must_use]
    pub fn check_duplicate(
        &self,
        source_id: &str,
        event_data: &serde_json::Value,
        severity: &str,
        source: &str,
    ) -> (DedupAction, Option<String>) {
        let key = dedup_signature(source, source_id, severity, service_key(event_data));

        if let Some(entry) = self.entries.get(&key) {
            if entry.expires_at > Instant::now() {
                let action = if entry.payload_hash == payload_hash(event_data) {
                    DedupAction::Skip
                } else {
                    DedupAction::UpdateExisting
                };
                debug!(key = %key, ?action, "duplicate event detected");
                return (action, Some(entry.run_id.clone()));
            }
        }

        self.entries.remove_if(&key, |_, entry| entry.expires_at <= Instant::now());
        (DedupAction::New, None)
    }

    /// Record the winning run for this event's signature for the TTL window.
    pub fn register_execution(
        &self,
        source_id: &str,
        execution_id: &str,
        event_data: &serde_json::Value,
        severity: &str,
        source: &str,
    ) {
        let key = dedup_signature(source, source_id, severity, service_key(event_data));
        self.entries.insert(
            key.clone(),
            DedupEntry {
                run_id: execution_id.to_string(),
                payload_hash: payload_hash(event_data),
                expires_at: Instant::now() + self.ttl,
            },
        );
        info!(key = %key, run_id = execution_id, "execution registered for dedup");
    }

    /// Best-effort named lock with a lease. Returns false when another
    /// holder's lease is still live.
    #[must_use]
    pub fn acquire_lock(&self, name: &str) -> bool {
        use dashmap::mapref::entry::Entry;

        let now = Instant::now();
        let acquired = match self.locks.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    occupied.get_mut().expires_at = now + self.lock_lease;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    expires_at: now + self.lock_lease,
                });
                true
            }
        };

        debug!(lock = name, acquired, "lock acquisition attempt");
        acquired
    }

    /// Release a held lock. Safe to call for expired or unknown locks.
    pub fn release_lock(&self, name: &str) {
        self.locks.remove(name);
        debug!(lock = name, "lock released");
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), Duration::from_secs(60))
    }
}

fn service_key(event_data: &serde_json::Value) -> &str {
    event_data
        .get("service")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
}

fn payload_hash(event_data: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_data.to_string().as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Stable key over `(source, source_id, severity, service)`.
#[must_use]
pub fn dedup_signature(source: &str, source_id: &str, severity: &str, service: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(source_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(severity.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(service.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(service: &str, detail: &str) -> serde_json::Value {
        serde_json::json!({"service": service, "detail": detail})
    }

    #[test]
    fn first_event_is_new() {
        let dedup = Deduplicator::default();
        let (action, run_id) =
            dedup.check_duplicate("alert-1", &event("db", "x"), "critical", "grafana");
        assert_eq!(action, DedupAction::New);
        assert!(run_id.is_none());
    }

    #[test]
    fn identical_redelivery_is_skipped() {
        let dedup = Deduplicator::default();
        dedup.register_execution("alert-1", "run-1", &event("db", "x"), "critical", "grafana");
        let (action, run_id) =
            dedup.check_duplicate("alert-1", &event("db", "x"), "critical", "grafana");
        assert_eq!(action, DedupAction::Skip);
        assert_eq!(run_id, Some("run-1".to_string()));
    }

    #[test]
    fn changed_payload_updates_existing() {
        let dedup = Deduplicator::default();
        dedup.register_execution("alert-1", "run-1", &event("db", "x"), "critical", "grafana");
        let (action, run_id) =
            dedup.check_duplicate("alert-1", &event("db", "y"), "critical", "grafana");
        assert_eq!(action, DedupAction::UpdateExisting);
        assert_eq!(run_id, Some("run-1".to_string()));
    }

    #[test]
    fn different_severity_is_a_different_signature() {
        let dedup = Deduplicator::default();
        dedup.register_execution("alert-1", "run-1", &event("db", "x"), "critical", "grafana");
        let (action, _) = dedup.check_duplicate("alert-1", &event("db", "x"), "warning", "grafana");
        assert_eq!(action, DedupAction::New);
    }

    #[test]
    fn ttl_expiry_makes_events_new_again() {
        let dedup = Deduplicator::new(Duration::from_millis(10), Duration::from_secs(60));
        dedup.register_execution("alert-1", "run-1", &event("db", "x"), "critical", "grafana");
        std::thread::sleep(Duration::from_millis(25));
        let (action, _) = dedup.check_duplicate("alert-1", &event("db", "x"), "critical", "grafana");
        assert_eq!(action, DedupAction::New);
    }

    #[test]
    fn lock_is_mutually_exclusive_until_released() {
        let dedup = Deduplicator::default();
        assert!(dedup.acquire_lock("swarm_run:alert-1"));
        assert!(!dedup.acquire_lock("swarm_run:alert-1"));
        dedup.release_lock("swarm_run:alert-1");
        assert!(dedup.acquire_lock("swarm_run:alert-1"));
    }

    #[test]
    fn expired_lease_can_be_reacquired() {
        let dedup = Deduplicator::new(Duration::from_secs(300), Duration::from_millis(10));
        assert!(dedup.acquire_lock("lock"));
        std::thread::sleep(Duration::from_millis(25));
        assert!(dedup.acquire_lock("lock"));
    }
}
