//! Synthetic event derivation
//!
//! Produces the augmented, human-meaningful event sequence from the raw
//! stored log without mutating it. Pure and deterministic: the raw log is
//! the single source of truth, so the derived view is recomputed on every
//! read rather than cached.
//!
//! Two inferences run over the raw log:
//! - cycle closures: every third slot fill at a level closes a cycle; if no
//!   real closure event follows, a synthetic CYCLE_CLOSE is emitted at the
//!   closing event's timestamp
//! - referral activations: each referral payout implies that someone in the
//!   downline activated a level

use std::collections::{BTreeMap, HashSet};

use crate::event::{TxEvent, TxKind, CYCLE_SIZE, MAX_LEVELS};

/// Derive the augmented event sequence.
///
/// Output is the union of the valid raw events and all synthetic events,
/// stably sorted ascending by `ts`; on equal timestamps raw events precede
/// synthetic ones and otherwise keep input order. Unknown kinds and
/// out-of-range levels pass through without synthetic inference.
pub fn with_synthetic_events(events: &[TxEvent]) -> Vec<TxEvent> {
    if events.is_empty() {
        return Vec::new();
    }

    // Dedup by id/sig, first occurrence wins, input order preserved. Only
    // structurally broken entries are dropped; out-of-range levels pass
    // through (they just never take part in inference below).
    let mut seen = HashSet::new();
    let mut unique: Vec<TxEvent> = Vec::with_capacity(events.len());
    for ev in events {
        if ev.key().is_empty() || ev.ts <= 0 {
            continue;
        }
        if !seen.insert(ev.key().to_string()) {
            continue;
        }
        unique.push(ev.clone());
    }
    if unique.is_empty() {
        return Vec::new();
    }

    let mut synthetic = Vec::new();
    synthesize_cycle_closures(&unique, &mut synthetic);
    synthesize_referral_activations(&unique, &mut synthetic);

    let mut out = unique;
    out.extend(synthetic);
    // stable: ties keep raw-before-synthetic and input order
    out.sort_by_key(|e| e.ts);
    out
}

/// Walk each level's events in time order tracking a slots-filled counter;
/// every time it reaches the cycle capacity, close the cycle.
fn synthesize_cycle_closures(unique: &[TxEvent], synthetic: &mut Vec<TxEvent>) {
    let mut by_level: BTreeMap<u8, Vec<&TxEvent>> = BTreeMap::new();
    for ev in unique {
        if ev.level_id >= 1 && ev.level_id <= MAX_LEVELS {
            by_level.entry(ev.level_id).or_default().push(ev);
        }
    }

    for (level_id, mut group) in by_level {
        group.sort_by_key(|e| e.ts);

        let mut filled = 0usize;
        for (i, ev) in group.iter().enumerate() {
            if ev.kind.fills_slot() {
                filled += 1;
                if filled == CYCLE_SIZE {
                    // Skip the synthetic closure when the chain already
                    // recorded a real one right after the window.
                    let closed_on_chain = group
                        .get(i + 1)
                        .map(|next| next.kind.is_real_closure())
                        .unwrap_or(false);
                    if !closed_on_chain {
                        let key = format!("synthetic-close-{}-{}", level_id, ev.ts);
                        synthetic.push(TxEvent {
                            id: key.clone(),
                            sig: key,
                            level_id,
                            kind: TxKind::CycleClose,
                            slot: None,
                            ts: ev.ts,
                            synthetic: true,
                        });
                    }
                    filled = 0;
                }
            } else if ev.kind.is_real_closure() {
                filled = 0;
            }
        }
    }
}

/// A referral payout means someone downline activated a level; surface that
/// as its own event just before the payout.
fn synthesize_referral_activations(unique: &[TxEvent], synthetic: &mut Vec<TxEvent>) {
    let mut emitted = HashSet::new();
    for ev in unique {
        if !ev.kind.is_referral_bonus() {
            continue;
        }
        let id = format!("ref-activation-{}-{}", ev.level_id, ev.sig);
        if !emitted.insert(id.clone()) {
            continue;
        }
        synthetic.push(TxEvent {
            id,
            sig: ev.sig.clone(),
            level_id: ev.level_id,
            kind: TxKind::ReferralActivation,
            slot: None,
            ts: ev.ts - 1,
            synthetic: true,
        });
    }
}
