//! Local history store — durable, deduplicated, per-wallet event log
//!
//! The store exclusively owns the persisted representation. All writers
//! (the referral tracker, transaction-submission flows) go through
//! `append`, which enforces the dedup/merge invariant and broadcasts a
//! change signal for UI consumers.
//!
//! Storage failures are non-fatal: operations degrade to a warning and a
//! no-op. Concurrent writers in other processes are not coordinated; last
//! write wins.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::HistoryConfig;
use crate::event::{TxEvent, TxKind};
use crate::storage::StorageBackend;

const HISTORY_KEY_PREFIX: &str = "sg-history.v1";
const CURSOR_KEY_PREFIX: &str = "referral-tracker.v1";

/// Broadcast payload fired after every successful store mutation.
#[derive(Debug, Clone)]
pub struct HistoryUpdate {
    pub wallet: String,
    pub ts: i64,
}

/// Durable, deduplicated, per-wallet event log.
pub struct HistoryStore {
    backend: Box<dyn StorageBackend>,
    config: HistoryConfig,
    updates: broadcast::Sender<HistoryUpdate>,
    // Serializes read-modify-write cycles so in-process appends apply in
    // call order.
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(backend: Box<dyn StorageBackend>, config: HistoryConfig) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            backend,
            config,
            updates,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Subscribe to store change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryUpdate> {
        self.updates.subscribe()
    }

    fn history_key(&self, wallet: &str) -> String {
        format!("{}:{}:{}", HISTORY_KEY_PREFIX, self.config.cluster, wallet)
    }

    fn cursor_key(&self, wallet: &str) -> String {
        format!("{}:{}:{}", CURSOR_KEY_PREFIX, self.config.cluster, wallet)
    }

    /// Poisoning only means a prior writer panicked mid-cycle; every write
    /// path re-reads storage first, so continuing is safe.
    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load all raw events for a wallet, unsorted (consumers re-sort by ts).
    ///
    /// Fails soft: missing or corrupt storage returns an empty list.
    pub fn load(&self, wallet: &str) -> Vec<TxEvent> {
        if wallet.is_empty() {
            return Vec::new();
        }

        let raw = match self.backend.get(&self.history_key(wallet)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(wallet, error = %e, "History load failed");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<TxEvent>>(&raw) {
            Ok(events) => events.into_iter().filter(TxEvent::is_valid).collect(),
            Err(e) => {
                warn!(wallet, error = %e, "History payload corrupt, resetting view");
                Vec::new()
            }
        }
    }

    /// Insert a new event, or update an existing one in place.
    ///
    /// Re-observing a key updates the mutable fields (`kind`, `ts`, `slot`,
    /// and the sig once a pending entry resolves) instead of duplicating.
    /// A confirmed event also replaces a pending placeholder of the same
    /// level and kind, so the optimistic entry and its confirmation never
    /// coexist. The stored list is kept newest-first and pruned after every
    /// write.
    pub fn append(&self, wallet: &str, event: TxEvent) {
        if wallet.is_empty() {
            warn!("append called without a wallet, dropping event");
            return;
        }
        if !event.is_valid() {
            warn!(wallet, id = %event.id, "Dropping invalid event");
            return;
        }
        if event.synthetic {
            // Synthetic events exist only in the derived view.
            warn!(wallet, id = %event.id, "Refusing to persist synthetic event");
            return;
        }

        let _guard = self.lock_writes();
        let mut events = self.load(wallet);

        let matched = events
            .iter()
            .position(|e| e.key() == event.key())
            .or_else(|| {
                // A confirmed event resolves the matching optimistic entry
                // instead of landing next to it.
                if event.is_pending() {
                    return None;
                }
                events.iter().position(|e| {
                    e.is_pending() && e.level_id == event.level_id && e.kind == event.kind
                })
            });

        match matched {
            Some(i) => {
                let existing = &mut events[i];
                if existing.is_pending() && !event.is_pending() {
                    existing.id = event.id;
                    existing.sig = event.sig;
                }
                existing.kind = event.kind;
                existing.ts = event.ts;
                if event.slot.is_some() {
                    existing.slot = event.slot;
                }
            }
            None => events.push(event),
        }

        // newest first
        events.sort_by(|a, b| b.ts.cmp(&a.ts));
        self.prune(&mut events);
        self.persist(wallet, &events);
    }

    /// Replace a pending entry's placeholder with the confirmed signature.
    ///
    /// No-op if the placeholder is not present (e.g. already pruned).
    pub fn resolve_pending(&self, wallet: &str, pending_sig: &str, sig: &str, slot: Option<u64>) {
        if wallet.is_empty() || sig.is_empty() {
            return;
        }

        let _guard = self.lock_writes();
        let mut events = self.load(wallet);

        let Some(entry) = events.iter_mut().find(|e| e.sig == pending_sig) else {
            return;
        };
        entry.id = sig.to_string();
        entry.sig = sig.to_string();
        if slot.is_some() {
            entry.slot = slot;
        }

        events.sort_by(|a, b| b.ts.cmp(&a.ts));
        self.persist(wallet, &events);
    }

    /// Drop the entire stored history for a wallet.
    pub fn clear(&self, wallet: &str) {
        if wallet.is_empty() {
            return;
        }
        let _guard = self.lock_writes();
        if let Err(e) = self.backend.remove(&self.history_key(wallet)) {
            warn!(wallet, error = %e, "History clear failed");
            return;
        }
        self.notify(wallet);
    }

    /// Drop all REFERRAL_REGISTERED events for a wallet (maintenance path
    /// for histories written before the prefixed signature scheme).
    pub fn clear_referral_events(&self, wallet: &str) {
        if wallet.is_empty() {
            return;
        }

        let _guard = self.lock_writes();
        let events = self.load(wallet);
        let kept: Vec<TxEvent> = events
            .iter()
            .filter(|e| e.kind != TxKind::ReferralRegistered)
            .cloned()
            .collect();

        if kept.len() < events.len() {
            debug!(
                wallet,
                removed = events.len() - kept.len(),
                "Cleared referral registration events"
            );
            self.persist(wallet, &kept);
        }
    }

    /// Record a generic event. Convenience wrapper over `append` matching
    /// the transaction-submission call sites.
    pub fn record(
        &self,
        wallet: &str,
        level_id: u8,
        kind: TxKind,
        sig: &str,
        slot: Option<u64>,
        ts: i64,
    ) {
        self.append(
            wallet,
            TxEvent {
                id: sig.to_string(),
                sig: sig.to_string(),
                level_id,
                kind,
                slot,
                ts,
                synthetic: false,
            },
        );
    }

    /// Record a confirmed level activation.
    pub fn record_activate(&self, wallet: &str, level_id: u8, sig: &str) {
        self.record(wallet, level_id, TxKind::Activate, sig, None, now_ms());
    }

    /// Last-player cursor used by the referral tracker to skip unchanged
    /// polls. Fail-soft like the event log.
    pub fn load_cursor(&self, wallet: &str) -> Option<String> {
        if wallet.is_empty() {
            return None;
        }
        match self.backend.get(&self.cursor_key(wallet)) {
            Ok(value) => value,
            Err(e) => {
                warn!(wallet, error = %e, "Cursor load failed");
                None
            }
        }
    }

    pub fn save_cursor(&self, wallet: &str, last_player: &str) {
        if wallet.is_empty() {
            return;
        }
        if let Err(e) = self.backend.put(&self.cursor_key(wallet), last_player) {
            warn!(wallet, error = %e, "Cursor save failed");
        }
    }

    /// Bounded retention: cap at `max_events` most recent, and drop pending
    /// placeholders older than the retention window. Expects newest-first
    /// input.
    fn prune(&self, events: &mut Vec<TxEvent>) {
        events.truncate(self.config.max_events);

        let cutoff = now_ms().saturating_sub(self.config.pending_retention_ms);
        events.retain(|e| !e.is_pending() || e.ts >= cutoff);
    }

    fn persist(&self, wallet: &str, events: &[TxEvent]) {
        let payload = match serde_json::to_string(events) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(wallet, error = %e, "History serialization failed");
                return;
            }
        };
        if let Err(e) = self.backend.put(&self.history_key(wallet), &payload) {
            warn!(wallet, error = %e, "History save failed");
            return;
        }
        self.notify(wallet);
    }

    fn notify(&self, wallet: &str) {
        // Err means no subscribers, which is fine.
        let _ = self.updates.send(HistoryUpdate {
            wallet: wallet.to_string(),
            ts: now_ms(),
        });
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
