//! Matrix History Client
//!
//! Local derivation and caching of on-chain transaction history with
//! referral-chain reconstruction for the Solana matrix program. The
//! on-chain program owns the business logic (level pricing, payouts,
//! cycle/slot semantics); this crate reconciles what the chain reports
//! into a durable, deduplicated per-wallet event log and the derived
//! views the UI renders.
//!
//! Subsystems:
//! - [`store::HistoryStore`] — durable, deduplicated event log with a
//!   typed change bus
//! - [`derive::with_synthetic_events`] — pure derivation of the augmented
//!   view (inferred cycle closures, referral activations)
//! - [`tracker::ReferralTracker`] — cancellable polling loop discovering
//!   new downline registrations
//! - [`notify::ReferralNotifier`] — exactly-once, freshness-windowed
//!   alerting over the derived view
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use matrix_history_client::{
//!     Address, FileBackend, HistoryConfig, HistoryStore, ReferralNotifier,
//!     ReferralTracker, RpcConfig, SolanaRpcClient,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(HistoryStore::new(
//!     Box::new(FileBackend::new("./data")?),
//!     HistoryConfig::default(),
//! ));
//!
//! let wallet = Address::new("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin")?;
//! let rpc = Arc::new(SolanaRpcClient::new(RpcConfig::new(
//!     "https://api.devnet.solana.com",
//!     Address::new("4dWfqrMh8irJFT4pSDbNyQzH3MRzVakcJYYNNyLZZ6V6")?,
//!     Address::new("11111111111111111111111111111111")?,
//! ))?);
//!
//! let mut updates = store.subscribe();
//! let mut notifier = ReferralNotifier::new(store.config());
//! let tracker = ReferralTracker::start(rpc, store.clone(), wallet.clone());
//!
//! while let Ok(update) = updates.recv().await {
//!     let raw = store.load(&update.wallet);
//!     for alert in notifier.scan(&raw, update.ts) {
//!         println!("referral activity at level {}", alert.level_id);
//!     }
//! }
//!
//! tracker.stop();
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod derive;
pub mod error;
pub mod event;
pub mod notify;
pub mod rpc;
pub mod storage;
pub mod store;
pub mod tracker;

pub use chain::{Address, GlobalStats, PlayerAccount, ReferralRpc};
pub use config::{Cluster, HistoryConfig};
pub use derive::with_synthetic_events;
pub use error::{HistoryError, Result};
pub use event::{TxEvent, TxKind, CYCLE_SIZE, MAX_LEVELS};
pub use notify::{Notification, ReferralNotifier};
pub use rpc::{RpcConfig, SolanaRpcClient};
pub use storage::{FileBackend, MemoryBackend, StorageBackend};
pub use store::{HistoryStore, HistoryUpdate};
pub use tracker::{referral_registered_sig, sig_covers_referral, ReferralTracker, TrackerHandle};
