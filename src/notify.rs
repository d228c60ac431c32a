//! Notification bridge
//!
//! Observes the augmented event stream and surfaces exactly one alert per
//! newly seen fact of interest. The seen-set lives for the session only:
//! notifications are a UX affordance, not an audit log. Events older than
//! the freshness window are marked seen silently so a reload does not
//! replay a backlog of stale alerts.
//!
//! One notifier per connected wallet; construct on connect, drop (or
//! `reset`) on disconnect so sessions never cross-contaminate.

use std::collections::HashSet;

use crate::config::HistoryConfig;
use crate::derive::with_synthetic_events;
use crate::event::{TxEvent, TxKind};

/// A user-facing alert payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub kind: TxKind,
    pub level_id: u8,
    pub ts: i64,
}

/// Diffs the derived event view against a session-local seen-set.
pub struct ReferralNotifier {
    seen: HashSet<String>,
    kinds: Vec<TxKind>,
    freshness_ms: i64,
}

impl ReferralNotifier {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            seen: HashSet::new(),
            kinds: vec![TxKind::ReferralActivation, TxKind::ReferralRegistered],
            freshness_ms: config.freshness_ms,
        }
    }

    /// Override the kinds that produce alerts.
    pub fn with_kinds(mut self, kinds: Vec<TxKind>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Recompute the augmented view and return one notification per
    /// newly seen fresh event. Call on every store change signal (and once
    /// on mount). Idempotent: a second scan over the same data is empty.
    pub fn scan(&mut self, raw: &[TxEvent], now_ms: i64) -> Vec<Notification> {
        let derived = with_synthetic_events(raw);
        let mut out = Vec::new();

        for ev in derived.iter().filter(|e| self.kinds.contains(&e.kind)) {
            let key = ev.key();
            if key.is_empty() || self.seen.contains(key) {
                continue;
            }
            self.seen.insert(key.to_string());

            // Stale events are acknowledged without alerting.
            if now_ms.saturating_sub(ev.ts) < self.freshness_ms {
                out.push(Notification {
                    id: key.to_string(),
                    kind: ev.kind.clone(),
                    level_id: ev.level_id,
                    ts: ev.ts,
                });
            }
        }

        out
    }

    /// Forget everything seen; used on wallet disconnect.
    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn bonus(sig: &str, level_id: u8, ts: i64) -> TxEvent {
        TxEvent {
            id: sig.to_string(),
            sig: sig.to_string(),
            level_id,
            kind: TxKind::RefT1,
            slot: None,
            ts,
            synthetic: false,
        }
    }

    fn notifier() -> ReferralNotifier {
        ReferralNotifier::new(&HistoryConfig::default())
    }

    #[test]
    fn test_fresh_event_notifies_exactly_once() {
        let mut notifier = notifier();
        // a fresh referral bonus derives a fresh REFERRAL_ACTIVATION
        let raw = vec![bonus("sig-a", 4, NOW)];

        let first = notifier.scan(&raw, NOW);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, TxKind::ReferralActivation);
        assert_eq!(first[0].level_id, 4);

        // second pass over the same data produces nothing new
        let second = notifier.scan(&raw, NOW);
        assert!(second.is_empty());
    }

    #[test]
    fn test_stale_event_marked_seen_silently() {
        let mut notifier = notifier();
        let ten_minutes_ago = NOW - 10 * 60 * 1000;
        let raw = vec![bonus("sig-old", 2, ten_minutes_ago)];

        assert!(notifier.scan(&raw, NOW).is_empty());
        // and it stays silent even if it later falls inside some window
        assert!(notifier.scan(&raw, ten_minutes_ago + 1).is_empty());
    }

    #[test]
    fn test_new_events_keep_flowing_after_backlog() {
        let mut notifier = notifier();
        let mut raw = vec![bonus("sig-old", 2, NOW - 60 * 60 * 1000)];
        assert!(notifier.scan(&raw, NOW).is_empty());

        raw.push(bonus("sig-new", 3, NOW));
        let alerts = notifier.scan(&raw, NOW);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level_id, 3);
    }

    #[test]
    fn test_uninteresting_kinds_ignored() {
        let mut notifier = notifier();
        let raw = vec![TxEvent {
            id: "sig-a".into(),
            sig: "sig-a".into(),
            level_id: 1,
            kind: TxKind::Activate,
            slot: None,
            ts: NOW,
            synthetic: false,
        }];
        assert!(notifier.scan(&raw, NOW).is_empty());
    }

    #[test]
    fn test_registered_events_alert_too() {
        let mut notifier = notifier();
        let raw = vec![TxEvent {
            id: "referral-registered-line1-abc-1".into(),
            sig: "referral-registered-line1-abc-1".into(),
            level_id: 1,
            kind: TxKind::ReferralRegistered,
            slot: None,
            ts: NOW,
            synthetic: false,
        }];
        let alerts = notifier.scan(&raw, NOW);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, TxKind::ReferralRegistered);
    }

    #[test]
    fn test_reset_allows_renotification() {
        let mut notifier = notifier();
        let raw = vec![bonus("sig-a", 4, NOW)];

        assert_eq!(notifier.scan(&raw, NOW).len(), 1);
        notifier.reset();
        assert_eq!(notifier.scan(&raw, NOW).len(), 1);
    }
}
