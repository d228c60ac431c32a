//! Client configuration

use serde::{Deserialize, Serialize};

/// Solana cluster the client is scoped to.
///
/// Storage keys embed the cluster name so a devnet history never leaks into
/// a mainnet session on the same machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Cluster {
    #[serde(rename = "mainnet-beta")]
    MainnetBeta,
    #[default]
    #[serde(rename = "devnet")]
    Devnet,
    #[serde(rename = "testnet")]
    Testnet,
}

impl Cluster {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cluster::MainnetBeta => "mainnet-beta",
            Cluster::Devnet => "devnet",
            Cluster::Testnet => "testnet",
        }
    }
}

impl std::fmt::Display for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Cluster used for storage-key scoping
    #[serde(default)]
    pub cluster: Cluster,

    /// Maximum raw events kept per wallet
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Retention window for pending entries, milliseconds
    #[serde(default = "default_pending_retention_ms")]
    pub pending_retention_ms: i64,

    /// Referral tracker poll interval in seconds (floored at 1)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Age above which a new event is marked seen without a notification
    #[serde(default = "default_freshness_ms")]
    pub freshness_ms: i64,
}

fn default_max_events() -> usize { 100 }
fn default_pending_retention_ms() -> i64 { 24 * 60 * 60 * 1000 }
fn default_poll_interval() -> u64 { 30 }
fn default_freshness_ms() -> i64 { 5 * 60 * 1000 }

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            cluster: Cluster::default(),
            max_events: default_max_events(),
            pending_retention_ms: default_pending_retention_ms(),
            poll_interval_secs: default_poll_interval(),
            freshness_ms: default_freshness_ms(),
        }
    }
}
