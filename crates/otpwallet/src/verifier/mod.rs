//! verifier trait and implementations
//!
//! a verifier is the ledger-side counterpart of the coordinator. it stores
//! commits, checks reveals against the wallet's core and executes the
//! revealed operation.
//!
//! implementations:
//! - memory: in-process, enforces the ledger's checks (tests, demo)
//! - relayer: json over http to a relayer that forwards to the ledger

pub mod memory;

#[cfg(feature = "network")]
pub mod relayer;

use std::sync::Arc;

use async_trait::async_trait;
use otp_merkle::Hash;
use serde::{Deserialize, Serialize};

use crate::descriptor::Core;
use crate::operation::RevealParams;
use crate::{Error, Result};

pub use memory::MemoryVerifier;

#[cfg(feature = "network")]
pub use relayer::RelayerClient;

/// a commit as recorded by the verifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    #[serde(with = "crate::serde_hex::array")]
    pub hash: Hash,
    #[serde(with = "crate::serde_hex::array")]
    pub params_hash: Hash,
    #[serde(with = "crate::serde_hex::array")]
    pub verification_hash: Hash,
    /// unix ms at which the commit was recorded
    pub timestamp: u64,
    pub completed: bool,
}

/// proof half of a reveal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParams {
    #[serde(with = "crate::serde_hex::hashes")]
    pub neighbors: Vec<Hash>,
    pub index: u32,
    #[serde(with = "crate::serde_hex::array")]
    pub eotp: Hash,
}

impl AuthParams {
    /// neighbor bound into the commit hash; zero for a single-leaf tree
    pub fn commit_neighbor(&self) -> Hash {
        self.neighbors.first().copied().unwrap_or([0u8; 32])
    }
}

/// per-interval spending cap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingState {
    pub spending_limit: u128,
    pub spent_amount: u128,
    /// index of the interval `spent_amount` belongs to
    pub last_spending_interval: u64,
    /// length of a spending interval in ms, 0 for a lifetime cap
    pub spending_interval: u64,
}

impl SpendingState {
    pub fn unlimited() -> Self {
        Self::new(u128::MAX, 0)
    }

    pub fn new(spending_limit: u128, spending_interval: u64) -> Self {
        Self {
            spending_limit,
            spent_amount: 0,
            last_spending_interval: 0,
            spending_interval,
        }
    }

    /// amount still spendable at `now_ms`
    pub fn remaining(&self, now_ms: u64) -> u128 {
        let spent = if self.current_interval(now_ms) > self.last_spending_interval {
            0
        } else {
            self.spent_amount
        };
        self.spending_limit.saturating_sub(spent)
    }

    /// record a spend, rejecting it if it would exceed the limit
    pub fn spend(&mut self, amount: u128, now_ms: u64) -> Result<()> {
        let interval = self.current_interval(now_ms);
        if interval > self.last_spending_interval {
            self.spent_amount = 0;
            self.last_spending_interval = interval;
        }
        let total = self.spent_amount.saturating_add(amount);
        if total > self.spending_limit {
            return Err(Error::RejectedByVerifier(format!(
                "spending {} exceeds limit {} (already spent {})",
                amount, self.spending_limit, self.spent_amount
            )));
        }
        self.spent_amount = total;
        Ok(())
    }

    fn current_interval(&self, now_ms: u64) -> u64 {
        if self.spending_interval == 0 {
            0
        } else {
            now_ms / self.spending_interval
        }
    }
}

impl Default for SpendingState {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// ledger-side commit-reveal endpoint of one wallet
#[async_trait]
pub trait Verifier: Send + Sync {
    /// record a commit
    async fn commit(&self, hash: Hash, params_hash: Hash, verification_hash: Hash) -> Result<()>;

    /// check a reveal against a stored commit and execute its operation
    async fn reveal(&self, auth: AuthParams, params: RevealParams) -> Result<()>;

    /// every commit recorded under `hash`
    async fn lookup_commit(&self, hash: Hash) -> Result<Vec<Commit>>;

    async fn core(&self) -> Result<Core>;

    async fn inner_cores(&self) -> Result<Vec<Core>>;

    async fn spending_state(&self) -> Result<SpendingState>;

    /// operations already completed in the current interval
    async fn nonce(&self) -> Result<u32>;
}

#[async_trait]
impl<V: Verifier + ?Sized> Verifier for Arc<V> {
    async fn commit(&self, hash: Hash, params_hash: Hash, verification_hash: Hash) -> Result<()> {
        (**self).commit(hash, params_hash, verification_hash).await
    }

    async fn reveal(&self, auth: AuthParams, params: RevealParams) -> Result<()> {
        (**self).reveal(auth, params).await
    }

    async fn lookup_commit(&self, hash: Hash) -> Result<Vec<Commit>> {
        (**self).lookup_commit(hash).await
    }

    async fn core(&self) -> Result<Core> {
        (**self).core().await
    }

    async fn inner_cores(&self) -> Result<Vec<Core>> {
        (**self).inner_cores().await
    }

    async fn spending_state(&self) -> Result<SpendingState> {
        (**self).spending_state().await
    }

    async fn nonce(&self) -> Result<u32> {
        (**self).nonce().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spending_resets_each_interval() {
        let mut state = SpendingState::new(100, 1_000);
        state.spend(60, 5_000).unwrap();
        assert_eq!(state.remaining(5_500), 40);
        assert!(matches!(state.spend(50, 5_900), Err(Error::RejectedByVerifier(_))));
        // rejected spend is not recorded
        assert_eq!(state.spent_amount, 60);

        assert_eq!(state.remaining(6_000), 100);
        state.spend(100, 6_000).unwrap();
        assert_eq!(state.last_spending_interval, 6);
    }

    #[test]
    fn test_lifetime_cap() {
        let mut state = SpendingState::new(10, 0);
        state.spend(10, 1).unwrap();
        assert!(state.spend(1, u64::MAX).is_err());
        assert!(SpendingState::unlimited().spend(u128::MAX, 0).is_ok());
    }

    #[test]
    fn test_commit_neighbor_of_single_leaf() {
        let auth = AuthParams { neighbors: vec![], index: 0, eotp: [1u8; 32] };
        assert_eq!(auth.commit_neighbor(), [0u8; 32]);
        let auth = AuthParams { neighbors: vec![[3u8; 32], [4u8; 32]], ..auth };
        assert_eq!(auth.commit_neighbor(), [3u8; 32]);
    }
}
