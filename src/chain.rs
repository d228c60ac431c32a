//! On-chain contract types
//!
//! The read-only surface this client depends on: the Player and GlobalStats
//! accounts of the matrix program, decoded from raw account data, and the
//! `ReferralRpc` trait that abstracts how they are fetched. The program's
//! own logic (payout math, PDA derivation) stays out of scope; accounts are
//! consumed as opaque byte layouts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{HistoryError, Result};

/// Account data begins with an 8-byte discriminator.
const DISCRIMINATOR_LEN: usize = 8;

/// A base58-encoded 32-byte account address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parse and validate a base58 address.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let bytes = bs58::decode(&s)
            .into_vec()
            .map_err(|_| HistoryError::InvalidAddress(s.clone()))?;
        if bytes.len() != 32 {
            return Err(HistoryError::InvalidAddress(s));
        }
        Ok(Self(s))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The all-zero system address, used by the program as "not set".
    pub fn is_default(&self) -> bool {
        self.0 == "11111111111111111111111111111111"
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn read_address(data: &[u8], offset: usize) -> Address {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&data[offset..offset + 32]);
    Address::from_bytes(&bytes)
}

fn read_u64_le(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_i64_le(data: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    i64::from_le_bytes(bytes)
}

/// Player account: registration time and the three-line referral chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerAccount {
    pub authority: Address,
    /// Registration time, unix seconds
    pub created_at: i64,
    pub games_played: u64,
    pub upline1: Address,
    pub upline2: Address,
    pub upline3: Address,
}

impl PlayerAccount {
    /// Bytes past the discriminator: authority 32, bump 1, created_at 8,
    /// games_played 8, upline1..3 32 each.
    pub const MIN_DATA_LEN: usize = DISCRIMINATOR_LEN + 145;

    pub fn from_account_data(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_DATA_LEN {
            return Err(HistoryError::InvalidResponse(format!(
                "player account too short: {} bytes",
                data.len()
            )));
        }
        let off = DISCRIMINATOR_LEN;
        Ok(Self {
            authority: read_address(data, off),
            created_at: read_i64_le(data, off + 33),
            games_played: read_u64_le(data, off + 41),
            upline1: read_address(data, off + 49),
            upline2: read_address(data, off + 81),
            upline3: read_address(data, off + 113),
        })
    }

    /// Which referral line the given wallet occupies for this player, if
    /// any. Lines are checked in payout priority order; the program never
    /// places the same wallet on two lines.
    pub fn upline_line(&self, wallet: &Address) -> Option<u8> {
        if &self.upline1 == wallet {
            Some(1)
        } else if &self.upline2 == wallet {
            Some(2)
        } else if &self.upline3 == wallet {
            Some(3)
        } else {
            None
        }
    }
}

/// Global stats account: player counter and most recent registration.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalStats {
    pub total_players: u64,
    pub last_player: Address,
}

impl GlobalStats {
    /// Bytes past the discriminator: total_players 8, last_player 32, bump 1.
    pub const MIN_DATA_LEN: usize = DISCRIMINATOR_LEN + 41;

    pub fn from_account_data(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_DATA_LEN {
            return Err(HistoryError::InvalidResponse(format!(
                "stats account too short: {} bytes",
                data.len()
            )));
        }
        let off = DISCRIMINATOR_LEN;
        Ok(Self {
            total_players: read_u64_le(data, off),
            last_player: read_address(data, off + 8),
        })
    }
}

/// Read interface over the referral-chain accounts.
///
/// Absent accounts are `Ok(None)`, never errors; errors mean the fetch
/// itself failed and will be retried on the next poll cycle.
#[async_trait]
pub trait ReferralRpc: Send + Sync {
    /// Player account for a wallet, if registered.
    async fn fetch_player(&self, wallet: &Address) -> Result<Option<PlayerAccount>>;

    /// The program's global stats account, if initialized.
    async fn fetch_global_stats(&self) -> Result<Option<GlobalStats>>;
}
