//! two-phase commit-reveal authorization
//!
//! ```text
//!   Idle ──▶ Preparing ──commit──▶ Committed ──reveal──▶ Revealed ──▶ Done
//!                │                     │                    │
//!                └─────────────────────┴────────────────────┴──▶ Failed
//! ```
//!
//! the commit publishes only hashes. the eotp, which proves knowledge of the
//! otp behind a leaf, is disclosed at reveal, after the commit is visible to
//! the verifier, so a relayer cannot front-run the operation with the proof.
//!
//! one coordinator serves one wallet: authorizations queue on an async mutex
//! so two operations never race for the same leaf.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use otp_merkle::{
    commit_hash, select_neighbors, tree::recover_randomness, verification_hash, EotpBuilder, Hash, Hasher,
    InnerTree, RestoreEotp, StandardEotp, TreeError,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::CoordinatorConfig;
use crate::descriptor::Core;
use crate::operation::{Operation, RevealParams};
use crate::verifier::{AuthParams, Verifier};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    Idle,
    Preparing,
    Committed,
    Revealed,
    Done,
    Failed,
}

/// how the eotp of a leaf is rebuilt from codes
#[derive(Clone, Debug)]
pub enum Credential {
    /// current code(s) mixed with the wallet's hash seed
    Standard { hseed: Hash, randomness_bits: u8 },
    /// a window of consecutive codes, proving a leaf of an inner tree
    Restore,
}

impl Credential {
    pub fn standard(hseed: Hash) -> Self {
        Credential::Standard { hseed, randomness_bits: 0 }
    }
}

/// one operation to authorize
pub struct AuthRequest<'a> {
    pub operation: Operation,
    /// one code (two in double-otp mode), or the restore window
    pub otps: Vec<u32>,
    pub credential: Credential,
    /// tree holding the leaf: the wallet's tree, or an inner tree for restore
    pub tree: &'a InnerTree,
    /// leaf to use; derived from the clock and verifier nonce when absent
    pub index: Option<u32>,
}

/// everything needed to commit and reveal; dropping it has no effect
#[derive(Clone, Debug)]
pub struct PreparedOperation {
    pub operation: Operation,
    pub root: Hash,
    pub index: u32,
    pub commit_hash: Hash,
    pub params_hash: Hash,
    pub verification_hash: Hash,
    pub auth: AuthParams,
    pub reveal: RevealParams,
    /// verifier nonce the index was derived from
    pub nonce: u32,
    pub counter: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub operation: String,
    pub index: u32,
    #[serde(with = "crate::serde_hex::array")]
    pub commit_hash: Hash,
    pub committed_at_ms: u64,
    pub revealed_at_ms: u64,
}

#[derive(Default)]
struct LocalState {
    /// (root, index) pairs whose eotp has been disclosed
    used: HashSet<(Hash, u32)>,
    /// root the last successful operation ran against
    root: Option<Hash>,
    /// (interval counter, next nonce) after the last successful operation
    nonce: Option<(u64, u32)>,
}

pub struct Coordinator<V> {
    verifier: V,
    hasher: Arc<dyn Hasher>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    local: Mutex<LocalState>,
    state: watch::Sender<AuthState>,
}

impl<V: Verifier> Coordinator<V> {
    pub fn new(verifier: V, hasher: Arc<dyn Hasher>, clock: Arc<dyn Clock>, config: CoordinatorConfig) -> Self {
        let (state, _) = watch::channel(AuthState::Idle);
        Self {
            verifier,
            hasher,
            clock,
            config,
            local: Mutex::new(LocalState::default()),
            state,
        }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// compute the commit without submitting anything
    pub async fn prepare(&self, request: &AuthRequest<'_>) -> Result<PreparedOperation> {
        let local = self.local.lock().await;
        self.prepare_with(&local, request).await
    }

    /// commit then reveal `request`, waiting for any in-flight authorization first
    pub async fn authorize(&self, request: AuthRequest<'_>) -> Result<Receipt> {
        let mut local = self.local.lock().await;
        self.state.send_replace(AuthState::Preparing);
        let result = self.run(&mut local, &request).await;
        match &result {
            Ok(receipt) => {
                self.state.send_replace(AuthState::Done);
                info!(op = %receipt.operation, index = receipt.index, "operation authorized");
            }
            Err(e) => {
                self.state.send_replace(AuthState::Failed);
                warn!(op = request.operation.name(), "authorization failed: {}", e);
            }
        }
        result
    }

    async fn run(&self, local: &mut LocalState, request: &AuthRequest<'_>) -> Result<Receipt> {
        let prepared = self.prepare_with(local, request).await?;
        let commit_hex = hex::encode(prepared.commit_hash);

        let verifier = &self.verifier;
        self.with_retry("commit", || {
            verifier.commit(prepared.commit_hash, prepared.params_hash, prepared.verification_hash)
        })
        .await?;
        let committed_at_ms = self.clock.now_ms();
        info!(commit = %commit_hex, index = prepared.index, "commit submitted");

        self.confirm(&prepared).await?;
        self.state.send_replace(AuthState::Committed);
        debug!(commit = %commit_hex, "commit confirmed");

        // from here the eotp is public
        local.used.insert((prepared.root, prepared.index));
        let deadline = committed_at_ms.saturating_add(self.config.reveal_window.as_millis() as u64);
        let this = self;
        let prepared_ref = &prepared;
        let mut attempt = 0u32;
        self.with_retry("reveal", || {
            attempt += 1;
            let retrying = attempt > 1;
            async move {
                // an earlier attempt may have executed with its response lost
                if retrying && this.reveal_landed(prepared_ref).await? {
                    info!(commit = %hex::encode(prepared_ref.commit_hash), "earlier reveal already executed");
                    return Ok(());
                }
                let now = this.clock.now_ms();
                if now > deadline {
                    return Err(Error::Timeout(format!("reveal window closed at {deadline}, now {now}")));
                }
                verifier.reveal(prepared_ref.auth.clone(), prepared_ref.reveal.clone()).await
            }
        })
        .await?;
        let revealed_at_ms = self.clock.now_ms();
        self.state.send_replace(AuthState::Revealed);

        match &prepared.operation {
            Operation::Displace(displacement) => {
                local.root = Some(displacement.core.root);
                local.nonce = None;
            }
            _ => {
                local.root = Some(prepared.root);
                local.nonce = Some((prepared.counter, prepared.nonce + 1));
            }
        }

        Ok(Receipt {
            operation: prepared.operation.name().to_string(),
            index: prepared.index,
            commit_hash: prepared.commit_hash,
            committed_at_ms,
            revealed_at_ms,
        })
    }

    async fn prepare_with(&self, local: &LocalState, request: &AuthRequest<'_>) -> Result<PreparedOperation> {
        let now = self.clock.now_ms();
        let root = request.tree.root();

        let (index, nonce, counter, slot_nonce) = match &request.credential {
            Credential::Standard { .. } => {
                let core = self.verifier.core().await?;
                self.check_root(local, &core, &root)?;
                let counter = core.counter_at(now);
                let nonce = self.verifier.nonce().await?;
                if let Some((cached_counter, cached_nonce)) = local.nonce {
                    if cached_counter == counter && nonce < cached_nonce {
                        return Err(Error::StateConflict(format!(
                            "verifier nonce {nonce} is behind local nonce {cached_nonce}"
                        )));
                    }
                }
                let index = match request.index {
                    Some(index) => index,
                    None => {
                        let slot_nonce = u16::try_from(nonce)
                            .map_err(|_| Error::StateConflict(format!("nonce {nonce} out of range")))?;
                        core.index_at(now, slot_nonce).ok_or_else(|| {
                            Error::StateConflict(format!(
                                "no leaf for nonce {nonce} at {now}: wallet inactive or interval exhausted"
                            ))
                        })?
                    }
                };
                let slot_nonce = (index % core.slot_size as u32) as u16;
                (index, nonce, counter, slot_nonce)
            }
            Credential::Restore => {
                let inner_cores = self.verifier.inner_cores().await?;
                if !inner_cores.iter().any(|core| core.root == root) {
                    return Err(Error::StateConflict(format!(
                        "recovery tree {} is not registered with the verifier",
                        hex::encode(root)
                    )));
                }
                let index = request
                    .index
                    .ok_or_else(|| Error::Config("restore needs an explicit leaf index".into()))?;
                (index, 0, 0, 0)
            }
        };

        if local.used.contains(&(root, index)) {
            return Err(Error::StateConflict(format!("index {index} was already disclosed")));
        }

        let leaf = *request.tree.leaf(index as usize).ok_or(TreeError::IndexOutOfRange {
            index: index as usize,
            leaves: request.tree.leaf_count,
        })?;
        let eotp = self.build_eotp(request, &leaf, slot_nonce)?;
        if self.hasher.hash(&eotp) != leaf {
            return Err(Error::CodeMismatch);
        }

        let neighbors = select_neighbors(request.tree, index as usize)?;
        let auth = AuthParams { neighbors, index, eotp };
        let params_hash = request.operation.params_hash();
        let prepared = PreparedOperation {
            operation: request.operation.clone(),
            root,
            index,
            commit_hash: commit_hash(&auth.commit_neighbor(), index, &eotp),
            params_hash,
            verification_hash: verification_hash(&params_hash, &eotp),
            auth,
            reveal: request.operation.reveal_params(),
            nonce,
            counter,
        };
        debug!(
            op = prepared.operation.name(),
            index,
            commit = %hex::encode(prepared.commit_hash),
            "operation prepared"
        );
        Ok(prepared)
    }

    fn check_root(&self, local: &LocalState, core: &Core, root: &Hash) -> Result<()> {
        if let Some(cached) = local.root {
            if cached != core.root {
                return Err(Error::StateConflict(format!(
                    "verifier root {} differs from last known root {}",
                    core.root_hex(),
                    hex::encode(cached)
                )));
            }
        }
        if *root != core.root {
            return Err(Error::StateConflict(format!(
                "local tree {} does not match verifier root {}",
                hex::encode(root),
                core.root_hex()
            )));
        }
        Ok(())
    }

    fn build_eotp(&self, request: &AuthRequest<'_>, leaf: &Hash, slot_nonce: u16) -> Result<Hash> {
        match &request.credential {
            Credential::Standard { hseed, randomness_bits } => {
                let base = StandardEotp::new(*hseed).with_nonce(slot_nonce);
                let rand = if *randomness_bits > 0 {
                    recover_randomness(self.hasher.as_ref(), leaf, &base, &request.otps, *randomness_bits)?
                        .ok_or(Error::CodeMismatch)?
                } else {
                    0
                };
                Ok(base.with_rand(rand).build(&request.otps)?)
            }
            Credential::Restore => Ok(RestoreEotp::new(request.otps.len()).build(&request.otps)?),
        }
    }

    /// whether the verifier already marked this operation's commit completed
    async fn reveal_landed(&self, prepared: &PreparedOperation) -> Result<bool> {
        let commits = self.verifier.lookup_commit(prepared.commit_hash).await?;
        Ok(commits.iter().any(|c| {
            c.completed && c.params_hash == prepared.params_hash && c.verification_hash == prepared.verification_hash
        }))
    }

    /// poll until the verifier shows the commit
    async fn confirm(&self, prepared: &PreparedOperation) -> Result<()> {
        let polls = self.config.confirm_polls.max(1);
        for poll in 1..=polls {
            match self.verifier.lookup_commit(prepared.commit_hash).await {
                Ok(commits) => {
                    let visible = commits.iter().any(|c| {
                        !c.completed
                            && c.params_hash == prepared.params_hash
                            && c.verification_hash == prepared.verification_hash
                    });
                    if visible {
                        return Ok(());
                    }
                }
                Err(e) if e.is_retryable() => warn!(poll, "commit lookup failed: {}", e),
                Err(e) => return Err(e),
            }
            if poll < polls {
                tokio::time::sleep(self.config.retry.delay_for_attempt(poll)).await;
            }
        }
        Err(Error::Timeout(format!(
            "commit {} not visible after {} polls",
            hex::encode(prepared.commit_hash),
            polls
        )))
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 1;
        loop {
            match f().await {
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(what, attempt, delay_ms = delay.as_millis() as u64, "retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
