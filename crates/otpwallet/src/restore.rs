//! code-based restore
//!
//! a user who lost everything but the authenticator copies `window`
//! consecutive codes. their restore eotp is a leaf of exactly one inner tree
//! (the one whose phase matches the first code). once located, the leaf
//! authorizes a DISPLACE operation that installs a freshly built tree.

use std::sync::Arc;

use otp_merkle::{EotpBuilder, Hasher, InnerTree, OtpTree, RestoreEotp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::coordinator::{AuthRequest, Coordinator, Credential, Receipt};
use crate::descriptor::Core;
use crate::operation::{Displacement, Operation};
use crate::store::TreeStore;
use crate::verifier::Verifier;
use crate::{Error, Result};

/// position of the submitted codes among the inner trees
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub tree_index: usize,
    pub leaf_index: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub matched: Match,
    pub receipt: Receipt,
}

pub struct RestoreResolver {
    hasher: Arc<dyn Hasher>,
    clock: Arc<dyn Clock>,
}

impl RestoreResolver {
    pub fn new(hasher: Arc<dyn Hasher>, clock: Arc<dyn Clock>) -> Self {
        Self { hasher, clock }
    }

    /// locate `codes` among `inner_trees`
    ///
    /// scans from the newest window that can have been displayed by `now_ms`
    /// back to the first, trying every tree at each leaf index.
    pub fn resolve(
        &self,
        codes: &[u32],
        inner_trees: &[InnerTree],
        effective_time_ms: u64,
        interval_ms: u64,
        now_ms: u64,
    ) -> Result<Match> {
        let window = inner_trees.len();
        if window == 0 {
            return Err(Error::Config("wallet has no inner trees".into()));
        }
        if codes.len() != window {
            return Err(Error::Config(format!("expected {} codes, got {}", window, codes.len())));
        }
        if interval_ms == 0 {
            return Err(Error::Config("interval must be positive".into()));
        }
        let leaves = inner_trees.iter().map(|t| t.leaf_count).min().unwrap_or(0);
        if leaves == 0 {
            return Err(Error::CodeMismatch);
        }

        let target = self.hasher.hash(&RestoreEotp::new(window).build(codes)?);
        let max_index = now_ms.saturating_sub(effective_time_ms) / (interval_ms * window as u64);
        let start = (max_index as usize).saturating_add(1).min(leaves - 1);
        debug!(window, leaves, start, "scanning inner trees");

        let found = (0..=start)
            .rev()
            .flat_map(|leaf_index| (0..window).map(move |tree_index| Match { tree_index, leaf_index }))
            .find(|m| inner_trees[m.tree_index].leaf(m.leaf_index) == Some(&target))
            .ok_or(Error::CodeMismatch)?;
        info!(tree = found.tree_index, leaf = found.leaf_index, "restore codes matched");
        Ok(found)
    }

    /// replace the wallet's authentication material with `replacement`
    ///
    /// the codes are located among the inner trees registered with the
    /// verifier (loaded from `store`), a DISPLACE operation is authorized
    /// with the matched leaf, and on success the replacement tree and its
    /// inner trees are persisted.
    pub async fn displace<V: Verifier>(
        &self,
        coordinator: &Coordinator<V>,
        store: &dyn TreeStore,
        codes: Vec<u32>,
        replacement: &OtpTree,
        displacement: Displacement,
    ) -> Result<RestoreOutcome> {
        if displacement.core.root != replacement.root() {
            return Err(Error::Config("displacement core does not describe the replacement tree".into()));
        }

        let verifier = coordinator.verifier();
        let (core, inner_cores) = futures::try_join!(verifier.core(), verifier.inner_cores())?;
        let inner_trees = load_inner_trees(store, &inner_cores)?;
        let effective_time_ms = core.t0 as u64 * core.interval_ms();

        let matched = self.resolve(
            &codes,
            &inner_trees,
            effective_time_ms,
            core.interval_ms(),
            self.clock.now_ms(),
        )?;

        let receipt = coordinator
            .authorize(AuthRequest {
                operation: Operation::Displace(displacement),
                otps: codes,
                credential: Credential::Restore,
                tree: &inner_trees[matched.tree_index],
                index: Some(matched.leaf_index as u32),
            })
            .await?;

        store.put(&replacement.tree)?;
        for inner in &replacement.inner_trees {
            store.put(inner)?;
        }
        info!(root = %hex::encode(replacement.root()), "wallet displaced");
        Ok(RestoreOutcome { matched, receipt })
    }
}

/// inner trees in the verifier's order
pub fn load_inner_trees(store: &dyn TreeStore, inner_cores: &[Core]) -> Result<Vec<InnerTree>> {
    inner_cores.iter().map(|core| store.load(&core.root)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use otp_merkle::{compute_tree, derive_otp, Sha256Hasher, TreeParams};

    const INTERVAL: u64 = 30_000;
    const T0_MS: u64 = 56_666_667 * INTERVAL;

    fn build(window: usize, intervals: u64) -> (TreeParams, OtpTree) {
        let params = TreeParams::new(b"restore-seed-0000000".to_vec(), [3u8; 32], T0_MS, INTERVAL * intervals)
            .with_inner_trees(window);
        let tree = compute_tree(&params, &Sha256Hasher, &mut |_| {}, &|| false).unwrap();
        (params, tree)
    }

    fn codes(params: &TreeParams, first: u64, window: usize) -> Vec<u32> {
        (first..first + window as u64).map(|k| derive_otp(&params.seed, params.t0() + k)).collect()
    }

    fn resolver() -> RestoreResolver {
        RestoreResolver::new(Arc::new(Sha256Hasher), Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn test_finds_tree_and_leaf() {
        let (params, tree) = build(3, 24);
        // first code at interval 5*3 + 2
        let submitted = codes(&params, 17, 3);
        let now = T0_MS + 20 * INTERVAL;
        let found = resolver()
            .resolve(&submitted, &tree.inner_trees, T0_MS, INTERVAL, now)
            .unwrap();
        assert_eq!(found, Match { tree_index: 2, leaf_index: 5 });
    }

    #[test]
    fn test_window_not_yet_reached_is_skipped() {
        let (params, tree) = build(3, 24);
        let submitted = codes(&params, 17, 3);
        // scan stops at leaf 1
        let now = T0_MS + 3 * INTERVAL;
        let result = resolver().resolve(&submitted, &tree.inner_trees, T0_MS, INTERVAL, now);
        assert!(matches!(result, Err(Error::CodeMismatch)));
    }

    #[test]
    fn test_wrong_or_reordered_codes() {
        let (params, tree) = build(3, 24);
        let now = T0_MS + 24 * INTERVAL;
        let mut submitted = codes(&params, 9, 3);
        submitted.swap(0, 1);
        assert!(matches!(
            resolver().resolve(&submitted, &tree.inner_trees, T0_MS, INTERVAL, now),
            Err(Error::CodeMismatch)
        ));
        assert!(matches!(
            resolver().resolve(&submitted[..2], &tree.inner_trees, T0_MS, INTERVAL, now),
            Err(Error::Config(_))
        ));
        assert!(matches!(resolver().resolve(&[], &[], T0_MS, INTERVAL, now), Err(Error::Config(_))));
    }

    #[test]
    fn test_every_phase_resolves() {
        let (params, tree) = build(4, 32);
        let now = T0_MS + 40 * INTERVAL;
        for first in 0..28u64 {
            let found = resolver()
                .resolve(&codes(&params, first, 4), &tree.inner_trees, T0_MS, INTERVAL, now)
                .unwrap();
            assert_eq!(found.tree_index, (first % 4) as usize);
            assert_eq!(found.leaf_index, (first / 4) as usize);
        }
    }
}
