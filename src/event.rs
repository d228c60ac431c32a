//! History event model
//!
//! `TxEvent` is the atomic unit of history: one fact derived from a signed
//! transaction, an optimistic submission, or a client-side inference. The
//! persisted JSON shape matches the v3.10 payout model of the on-chain
//! program, so histories written by older clients load unchanged.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Number of matrix levels in the program.
pub const MAX_LEVELS: u8 = 16;

/// Slot fills that close one cycle at a level.
pub const CYCLE_SIZE: usize = 3;

/// Sig prefix for optimistic entries whose real signature is not yet known.
pub const PENDING_SIG_PREFIX: &str = "pending-";

/// Event kinds, matching the v3.10 payout model.
///
/// The set is open: kinds written by a newer client deserialize into
/// `Other` with the original tag preserved, so they round-trip and pass
/// through derivation untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TxKind {
    /// Entry into the queue at a level
    Activate,
    /// Cycle closed on-chain with auto-recycle
    Recycle,
    /// A new cycle opened after recycle
    RecycleOpen,
    /// Cycle closure (real or synthetic)
    CycleClose,
    /// Owner payout (60%)
    Reward60,
    /// Referral line 1 payout (13%)
    RefT1,
    /// Referral line 2 payout (8%)
    RefT2,
    /// Referral line 3 payout (5%)
    RefT3,
    /// Someone in the referral network activated a level (synthetic)
    ReferralActivation,
    /// A new downline referral registered (tracker-discovered)
    ReferralRegistered,
    /// Treasury payout (14%)
    Treasury,
    /// Unrecognized kind, tag preserved verbatim
    Other(String),
}

impl TxKind {
    pub fn as_str(&self) -> &str {
        match self {
            TxKind::Activate => "ACTIVATE",
            TxKind::Recycle => "RECYCLE",
            TxKind::RecycleOpen => "RECYCLE_OPEN",
            TxKind::CycleClose => "CYCLE_CLOSE",
            TxKind::Reward60 => "REWARD_60",
            TxKind::RefT1 => "REF_T1_13",
            TxKind::RefT2 => "REF_T2_8",
            TxKind::RefT3 => "REF_T3_5",
            TxKind::ReferralActivation => "REFERRAL_ACTIVATION",
            TxKind::ReferralRegistered => "REFERRAL_REGISTERED",
            TxKind::Treasury => "TREASURY_14",
            TxKind::Other(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "ACTIVATE" => TxKind::Activate,
            "RECYCLE" => TxKind::Recycle,
            "RECYCLE_OPEN" => TxKind::RecycleOpen,
            "CYCLE_CLOSE" => TxKind::CycleClose,
            "REWARD_60" => TxKind::Reward60,
            "REF_T1_13" => TxKind::RefT1,
            "REF_T2_8" => TxKind::RefT2,
            "REF_T3_5" => TxKind::RefT3,
            "REFERRAL_ACTIVATION" => TxKind::ReferralActivation,
            "REFERRAL_REGISTERED" => TxKind::ReferralRegistered,
            "TREASURY_14" => TxKind::Treasury,
            other => TxKind::Other(other.to_string()),
        }
    }

    /// Kinds that fill a slot in a cycle.
    pub fn fills_slot(&self) -> bool {
        matches!(self, TxKind::Activate | TxKind::ReferralActivation)
    }

    /// Real on-chain events that close a cycle.
    pub fn is_real_closure(&self) -> bool {
        matches!(
            self,
            TxKind::Recycle | TxKind::RecycleOpen | TxKind::CycleClose
        )
    }

    /// Referral payout kinds, one per referral line.
    pub fn is_referral_bonus(&self) -> bool {
        matches!(self, TxKind::RefT1 | TxKind::RefT2 | TxKind::RefT3)
    }
}

impl Serialize for TxKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TxKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag.is_empty() {
            return Err(de::Error::custom("empty event kind"));
        }
        Ok(TxKind::from_tag(&tag))
    }
}

/// A single history event.
///
/// Contract:
/// - `id`        — unique within a wallet's event set (sig or synthetic id)
/// - `sig`       — real transaction signature, or a deterministic placeholder
///                 (`pending-*`, `referral-registered-line{N}-...`)
/// - `level_id`  — matrix level (1..=16)
/// - `slot`      — on-chain slot for explorer linking, if known
/// - `ts`        — milliseconds since epoch
/// - `synthetic` — true if inferred at read time; never persisted as true
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxEvent {
    pub id: String,
    pub sig: String,
    #[serde(rename = "levelId")]
    pub level_id: u8,
    pub kind: TxKind,
    #[serde(default)]
    pub slot: Option<u64>,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

impl TxEvent {
    /// Dedup key: id, falling back to sig.
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.sig
        } else {
            &self.id
        }
    }

    /// Hard validation applied on load and append. Unknown kinds are
    /// accepted; structurally broken entries are not.
    pub fn is_valid(&self) -> bool {
        if self.id.is_empty() && self.sig.is_empty() {
            return false;
        }
        if self.level_id < 1 || self.level_id > MAX_LEVELS {
            return false;
        }
        self.ts > 0
    }

    /// Optimistic entry awaiting a real signature.
    pub fn is_pending(&self) -> bool {
        self.sig.starts_with(PENDING_SIG_PREFIX)
    }
}
