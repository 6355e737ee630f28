//! in-memory verifier
//!
//! performs the same checks the ledger contract does, against state held in
//! process. useful for tests and the local demo; nothing is persisted.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use otp_merkle::{commit_hash, verification_hash, verify_path, Hash, Hasher};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::descriptor::{Address, Core};
use crate::operation::{Operation, RevealParams, TokenType};
use crate::verifier::{AuthParams, Commit, SpendingState, Verifier};
use crate::{Error, Result};

/// default reveal deadline after a commit
pub const DEFAULT_REVEAL_WINDOW: Duration = Duration::from_secs(60);

/// a fungible or non-fungible token holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub token_type: TokenType,
    pub contract: Address,
    pub token_id: u128,
}

struct State {
    core: Core,
    inner_cores: Vec<Core>,
    identification_key: Vec<u8>,
    balance: u128,
    received: HashMap<Address, u128>,
    tokens: HashMap<TokenKey, u128>,
    tokens_received: HashMap<(Address, TokenKey), u128>,
    spending: SpendingState,
    /// completed operations per interval counter
    nonces: HashMap<u64, u32>,
    commits: HashMap<Hash, Vec<Commit>>,
    /// (root, index) pairs already revealed
    used: HashSet<(Hash, u32)>,
    /// submissions left to fail with a network error
    network_failures: u32,
}

pub struct MemoryVerifier {
    state: RwLock<State>,
    hasher: Arc<dyn Hasher>,
    clock: Arc<dyn Clock>,
    reveal_window: Duration,
}

impl MemoryVerifier {
    pub fn new(
        core: Core,
        inner_cores: Vec<Core>,
        identification_key: Vec<u8>,
        hasher: Arc<dyn Hasher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        core.validate()?;
        for inner in &inner_cores {
            inner.validate()?;
        }
        Ok(Self {
            state: RwLock::new(State {
                core,
                inner_cores,
                identification_key,
                balance: 0,
                received: HashMap::new(),
                tokens: HashMap::new(),
                tokens_received: HashMap::new(),
                spending: SpendingState::unlimited(),
                nonces: HashMap::new(),
                commits: HashMap::new(),
                used: HashSet::new(),
                network_failures: 0,
            }),
            hasher,
            clock,
            reveal_window: DEFAULT_REVEAL_WINDOW,
        })
    }

    pub fn with_balance(mut self, balance: u128) -> Self {
        self.state_mut().balance = balance;
        self
    }

    pub fn with_token(mut self, key: TokenKey, amount: u128) -> Self {
        self.state_mut().tokens.insert(key, amount);
        self
    }

    pub fn with_spending(mut self, spending: SpendingState) -> Self {
        self.state_mut().spending = spending;
        self
    }

    pub fn with_reveal_window(mut self, window: Duration) -> Self {
        self.reveal_window = window;
        self
    }

    /// make the next `count` commit/reveal submissions fail with a network error
    pub fn fail_next(&self, count: u32) -> Result<()> {
        self.write()?.network_failures = count;
        Ok(())
    }

    pub fn balance(&self) -> Result<u128> {
        Ok(self.read()?.balance)
    }

    /// native amount received by `dest` from this wallet
    pub fn received(&self, dest: &Address) -> Result<u128> {
        Ok(self.read()?.received.get(dest).copied().unwrap_or(0))
    }

    pub fn token_balance(&self, key: &TokenKey) -> Result<u128> {
        Ok(self.read()?.tokens.get(key).copied().unwrap_or(0))
    }

    pub fn token_received(&self, dest: &Address, key: &TokenKey) -> Result<u128> {
        Ok(self.read()?.tokens_received.get(&(*dest, *key)).copied().unwrap_or(0))
    }

    pub fn identification_key(&self) -> Result<Vec<u8>> {
        Ok(self.read()?.identification_key.clone())
    }

    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|e| Error::Storage(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|e| Error::Storage(e.to_string()))
    }
}

impl State {
    fn take_network_failure(&mut self) -> Result<()> {
        if self.network_failures > 0 {
            self.network_failures -= 1;
            return Err(Error::Network("injected failure".into()));
        }
        Ok(())
    }

    /// proof against the primary core, timed by the commit
    fn authenticate(&self, hasher: &dyn Hasher, leaf: &Hash, auth: &AuthParams, commit_time: u64) -> Result<Hash> {
        let core = &self.core;
        if auth.neighbors.len() != core.height as usize {
            return Err(Error::RejectedByVerifier(format!(
                "proof has {} neighbors, tree height is {}",
                auth.neighbors.len(),
                core.height
            )));
        }
        if !verify_path(hasher, leaf, auth.index as usize, &auth.neighbors, &core.root) {
            return Err(Error::RejectedByVerifier("proof does not reach the wallet root".into()));
        }
        let nonce = (auth.index % core.slot_size as u32) as u16;
        if core.index_at(commit_time, nonce) != Some(auth.index) {
            return Err(Error::RejectedByVerifier(format!(
                "index {} does not belong to the commit's interval",
                auth.index
            )));
        }
        if self.used.contains(&(core.root, auth.index)) {
            return Err(Error::RejectedByVerifier(format!("index {} already used", auth.index)));
        }
        Ok(core.root)
    }

    /// proof against any inner core; the leaf's window must have begun
    fn authenticate_recovery(
        &self,
        hasher: &dyn Hasher,
        leaf: &Hash,
        auth: &AuthParams,
        commit_time: u64,
    ) -> Result<Hash> {
        let inner = self
            .inner_cores
            .iter()
            .filter(|inner| auth.neighbors.len() == inner.height as usize && auth.index < inner.lifespan)
            .find(|inner| verify_path(hasher, leaf, auth.index as usize, &auth.neighbors, &inner.root))
            .ok_or_else(|| Error::RejectedByVerifier("proof does not reach any recovery root".into()))?;

        if inner.counter_at(commit_time) < inner.t0 as u64 + auth.index as u64 {
            return Err(Error::RejectedByVerifier(format!(
                "recovery leaf {} is not reachable yet",
                auth.index
            )));
        }
        if self.used.contains(&(inner.root, auth.index)) {
            return Err(Error::RejectedByVerifier(format!("recovery leaf {} already used", auth.index)));
        }
        Ok(inner.root)
    }

    fn execute(&mut self, operation: &Operation, now: u64) -> Result<()> {
        match operation {
            Operation::Transfer { dest, amount } => {
                if *amount > self.balance {
                    return Err(Error::RejectedByVerifier(format!(
                        "insufficient balance: {} < {}",
                        self.balance, amount
                    )));
                }
                self.spending.spend(*amount, now)?;
                self.balance -= amount;
                let received = self.received.entry(*dest).or_insert(0);
                *received = received.saturating_add(*amount);
            }
            Operation::TransferToken { token_type, contract, token_id, dest, amount, .. } => {
                if *token_type == TokenType::None {
                    return Err(Error::RejectedByVerifier("token transfer without a token type".into()));
                }
                let key = TokenKey { token_type: *token_type, contract: *contract, token_id: *token_id };
                let held = self.tokens.get(&key).copied().unwrap_or(0);
                if *amount > held {
                    return Err(Error::RejectedByVerifier(format!(
                        "insufficient token balance: {} < {}",
                        held, amount
                    )));
                }
                self.tokens.insert(key, held - amount);
                let received = self.tokens_received.entry((*dest, key)).or_insert(0);
                *received = received.saturating_add(*amount);
            }
            Operation::Displace(displacement) => {
                displacement
                    .core
                    .validate()
                    .and_then(|_| displacement.inner_cores.iter().try_for_each(Core::validate))
                    .map_err(|e| Error::RejectedByVerifier(e.to_string()))?;
                self.core = displacement.core.clone();
                self.inner_cores = displacement.inner_cores.clone();
                self.identification_key = displacement.identification_key.clone();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Verifier for MemoryVerifier {
    async fn commit(&self, hash: Hash, params_hash: Hash, verification_hash: Hash) -> Result<()> {
        let timestamp = self.clock.now_ms();
        let mut state = self.write()?;
        state.take_network_failure()?;
        state.commits.entry(hash).or_default().push(Commit {
            hash,
            params_hash,
            verification_hash,
            timestamp,
            completed: false,
        });
        debug!(hash = %hex::encode(hash), timestamp, "commit recorded");
        Ok(())
    }

    async fn reveal(&self, auth: AuthParams, params: RevealParams) -> Result<()> {
        let now = self.clock.now_ms();
        let mut state = self.write()?;
        state.take_network_failure()?;

        let operation = params
            .operation()
            .map_err(|e| Error::RejectedByVerifier(e.to_string()))?;
        let params_hash = operation.params_hash();
        let expected_verification = verification_hash(&params_hash, &auth.eotp);
        let hash = commit_hash(&auth.commit_neighbor(), auth.index, &auth.eotp);

        let position = state
            .commits
            .get(&hash)
            .and_then(|commits| {
                commits
                    .iter()
                    .position(|c| c.params_hash == params_hash && c.verification_hash == expected_verification)
            })
            .ok_or_else(|| Error::RejectedByVerifier("no commit matches the reveal".into()))?;
        let commit = state.commits[&hash][position].clone();
        if commit.completed {
            warn!(hash = %hex::encode(hash), "reveal of a completed commit");
            return Err(Error::RejectedByVerifier("commit already completed".into()));
        }
        let deadline = commit.timestamp.saturating_add(self.reveal_window.as_millis() as u64);
        if now > deadline {
            return Err(Error::Timeout(format!(
                "reveal at {} is past the deadline {}",
                now, deadline
            )));
        }

        let leaf = self.hasher.hash(&auth.eotp);
        let is_displace = matches!(operation, Operation::Displace(_));
        let root = if is_displace {
            state.authenticate_recovery(self.hasher.as_ref(), &leaf, &auth, commit.timestamp)?
        } else {
            state.authenticate(self.hasher.as_ref(), &leaf, &auth, commit.timestamp)?
        };
        let counter = state.core.counter_at(commit.timestamp);

        state.execute(&operation, now)?;

        state.used.insert((root, auth.index));
        if !is_displace {
            *state.nonces.entry(counter).or_insert(0) += 1;
        }
        if let Some(stored) = state.commits.get_mut(&hash).and_then(|c| c.get_mut(position)) {
            stored.completed = true;
        }
        info!(op = operation.name(), index = auth.index, "reveal executed");
        Ok(())
    }

    async fn lookup_commit(&self, hash: Hash) -> Result<Vec<Commit>> {
        Ok(self.read()?.commits.get(&hash).cloned().unwrap_or_default())
    }

    async fn core(&self) -> Result<Core> {
        Ok(self.read()?.core.clone())
    }

    async fn inner_cores(&self) -> Result<Vec<Core>> {
        Ok(self.read()?.inner_cores.clone())
    }

    async fn spending_state(&self) -> Result<SpendingState> {
        Ok(self.read()?.spending.clone())
    }

    async fn nonce(&self) -> Result<u32> {
        let now = self.clock.now_ms();
        let state = self.read()?;
        let counter = state.core.counter_at(now);
        Ok(state.nonces.get(&counter).copied().unwrap_or(0))
    }
}
