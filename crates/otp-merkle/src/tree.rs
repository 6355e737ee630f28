//! authentication tree construction
//!
//! building a year-long tree at 30s intervals hashes hundreds of thousands
//! of leaves, so leaves are produced in batches (hashed in parallel), with a
//! progress report and a cancellation check between batches.

use std::fmt;

use rand::Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::eotp::{EotpBuilder, RestoreEotp, StandardEotp};
use crate::hash::{Hash, Hasher};
use crate::otp::derive_otp;
use crate::{tree_height, Result, TreeError};

/// default otp interval (30s, what authenticator apps use)
pub const DEFAULT_INTERVAL_MS: u64 = 30_000;

/// default number of leaves between progress reports
pub const DEFAULT_REPORT_INTERVAL: usize = 1024;

/// randomness above this many bits makes authorization too slow to search
pub const MAX_RANDOMNESS_BITS: u8 = 16;

/// parallelize sibling hashing when a layer is at least this wide
const PARALLEL_LAYER_THRESHOLD: usize = 128;

/// hash used to pad a layer with an odd number of nodes
pub fn filler(hasher: &dyn Hasher) -> Hash {
    hasher.hash(&[0u8; 32])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuildStage {
    Leaves,
    Layers,
    InnerTrees,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub stage: BuildStage,
}

/// inputs of a tree build
#[derive(Clone)]
pub struct TreeParams {
    pub seed: Vec<u8>,
    /// second authenticator seed (double-otp mode)
    pub seed2: Option<Vec<u8>>,
    pub hseed: Hash,
    /// start of the first interval, unix ms
    pub effective_time_ms: u64,
    pub duration_ms: u64,
    pub interval_ms: u64,
    /// leaves (operations) per interval
    pub slot_size: usize,
    pub randomness_bits: u8,
    /// number of inner trees, which is also the restore window
    pub inner_trees: usize,
    pub report_interval: usize,
}

impl fmt::Debug for TreeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeParams")
            .field("double_otp", &self.seed2.is_some())
            .field("effective_time_ms", &self.effective_time_ms)
            .field("duration_ms", &self.duration_ms)
            .field("interval_ms", &self.interval_ms)
            .field("slot_size", &self.slot_size)
            .field("randomness_bits", &self.randomness_bits)
            .field("inner_trees", &self.inner_trees)
            .finish_non_exhaustive()
    }
}

impl TreeParams {
    pub fn new(seed: Vec<u8>, hseed: Hash, effective_time_ms: u64, duration_ms: u64) -> Self {
        Self {
            seed,
            seed2: None,
            hseed,
            effective_time_ms,
            duration_ms,
            interval_ms: DEFAULT_INTERVAL_MS,
            slot_size: 1,
            randomness_bits: 0,
            inner_trees: 0,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    pub fn with_seed2(mut self, seed2: Vec<u8>) -> Self {
        self.seed2 = Some(seed2);
        self
    }

    pub fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_slot_size(mut self, slot_size: usize) -> Self {
        self.slot_size = slot_size;
        self
    }

    pub fn with_randomness(mut self, bits: u8) -> Self {
        self.randomness_bits = bits;
        self
    }

    pub fn with_inner_trees(mut self, count: usize) -> Self {
        self.inner_trees = count;
        self
    }

    pub fn with_report_interval(mut self, leaves: usize) -> Self {
        self.report_interval = leaves;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(TreeError::Config("interval must be positive".into()));
        }
        if self.duration_ms == 0 || self.duration_ms % self.interval_ms != 0 {
            return Err(TreeError::Config(format!(
                "duration {}ms is not a positive multiple of interval {}ms",
                self.duration_ms, self.interval_ms
            )));
        }
        if self.effective_time_ms % self.interval_ms != 0 {
            return Err(TreeError::Config(format!(
                "effective time {} is not aligned to interval {}ms",
                self.effective_time_ms, self.interval_ms
            )));
        }
        if self.slot_size == 0 || self.slot_size > u16::MAX as usize + 1 {
            return Err(TreeError::Config(format!("invalid slot size {}", self.slot_size)));
        }
        if self.randomness_bits > MAX_RANDOMNESS_BITS {
            return Err(TreeError::Config(format!(
                "randomness of {} bits exceeds {}",
                self.randomness_bits, MAX_RANDOMNESS_BITS
            )));
        }
        if self.inner_trees == 1 {
            return Err(TreeError::Config("restore window needs at least 2 codes".into()));
        }
        if self.inner_trees > 0 && self.lifespan() < self.inner_trees as u64 {
            return Err(TreeError::Config(format!(
                "lifespan of {} intervals is shorter than the restore window {}",
                self.lifespan(),
                self.inner_trees
            )));
        }
        Ok(())
    }

    /// index of the first interval
    pub fn t0(&self) -> u64 {
        self.effective_time_ms / self.interval_ms
    }

    /// number of intervals covered
    pub fn lifespan(&self) -> u64 {
        self.duration_ms / self.interval_ms
    }

    pub fn total_leaves(&self) -> usize {
        self.lifespan() as usize * self.slot_size
    }

    /// leaves per inner tree
    pub fn inner_leaves(&self) -> usize {
        if self.inner_trees == 0 {
            0
        } else {
            self.lifespan() as usize / self.inner_trees
        }
    }
}

/// a full tree with the filler-padded layer set
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InnerTree {
    pub layers: Vec<Vec<Hash>>,
    pub leaf_count: usize,
}

impl InnerTree {
    pub fn root(&self) -> Hash {
        self.layers[self.layers.len() - 1][0]
    }

    pub fn height(&self) -> usize {
        self.layers.len() - 1
    }

    pub fn leaves(&self) -> &[Hash] {
        self.layers
            .first()
            .and_then(|layer| layer.get(..self.leaf_count))
            .unwrap_or(&[])
    }

    pub fn leaf(&self, index: usize) -> Option<&Hash> {
        self.leaves().get(index)
    }

    /// structural checks for a layer set that did not come from
    /// [`compute_tree`], e.g. one read back from a cache
    pub fn validate(&self) -> Result<()> {
        let malformed = |msg: String| -> Result<()> { Err(TreeError::Malformed(msg)) };
        let (Some(leaves), Some(top)) = (self.layers.first(), self.layers.last()) else {
            return malformed("tree has no layers".into());
        };
        if top.len() != 1 {
            return malformed(format!("top layer has width {}", top.len()));
        }
        if self.leaf_count == 0 || self.leaf_count > leaves.len() {
            return malformed(format!("{} leaves in a layer of width {}", self.leaf_count, leaves.len()));
        }
        for (level, pair) in self.layers.windows(2).enumerate() {
            let width = pair[0].len();
            if width % 2 != 0 || pair[1].len() != width / 2 {
                return malformed(format!("layer {} of width {} does not reduce to {}", level, width, pair[1].len()));
            }
        }
        Ok(())
    }
}

/// primary tree plus the inner trees built from the same seed
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OtpTree {
    pub tree: InnerTree,
    pub inner_trees: Vec<InnerTree>,
}

impl OtpTree {
    pub fn root(&self) -> Hash {
        self.tree.root()
    }

    pub fn height(&self) -> usize {
        self.tree.height()
    }

    pub fn layers(&self) -> &[Vec<Hash>] {
        &self.tree.layers
    }

    pub fn leaves(&self) -> &[Hash] {
        self.tree.leaves()
    }
}

/// hash leaves into layers, padding odd layers with the filler
pub fn build_layers(hasher: &dyn Hasher, leaves: Vec<Hash>) -> Vec<Vec<Hash>> {
    build_layers_with(hasher, leaves, &mut |_| {})
}

fn build_layers_with(
    hasher: &dyn Hasher,
    leaves: Vec<Hash>,
    on_level: &mut dyn FnMut(usize),
) -> Vec<Vec<Hash>> {
    let pad = filler(hasher);
    let mut layers = vec![leaves];

    loop {
        let current = match layers.last_mut() {
            Some(layer) if layer.len() > 1 => layer,
            _ => break,
        };
        if current.len() % 2 == 1 {
            current.push(pad);
        }

        let next: Vec<Hash> = if current.len() >= PARALLEL_LAYER_THRESHOLD {
            current
                .par_chunks_exact(2)
                .map(|pair| hasher.hash_siblings(&pair[0], &pair[1]))
                .collect()
        } else {
            current
                .chunks_exact(2)
                .map(|pair| hasher.hash_siblings(&pair[0], &pair[1]))
                .collect()
        };

        layers.push(next);
        on_level(layers.len() - 1);
    }

    layers
}

/// build the authentication tree and its inner trees
///
/// `observer` sees progress between batches; when `cancelled` returns true
/// the build stops at the next batch boundary with [`TreeError::Cancelled`].
pub fn compute_tree(
    params: &TreeParams,
    hasher: &dyn Hasher,
    observer: &mut dyn FnMut(Progress),
    cancelled: &dyn Fn() -> bool,
) -> Result<OtpTree> {
    params.validate()?;

    let total = params.total_leaves();
    let batch = params.report_interval.max(1);
    let t0 = params.t0();
    debug!(?params, total, "building authentication tree");

    let randomness: Vec<u32> = if params.randomness_bits > 0 {
        let bound = 1u32 << params.randomness_bits;
        let mut rng = rand::thread_rng();
        (0..total).map(|_| rng.gen_range(0..bound)).collect()
    } else {
        Vec::new()
    };

    let mut leaves: Vec<Hash> = Vec::with_capacity(total);
    let mut start = 0;
    while start < total {
        if cancelled() {
            return Err(TreeError::Cancelled);
        }
        let end = (start + batch).min(total);
        let chunk: Vec<Hash> = (start..end)
            .into_par_iter()
            .map(|i| {
                let slot = (i / params.slot_size) as u64;
                let nonce = (i % params.slot_size) as u16;
                let counter = t0 + slot;
                let mut otps = vec![derive_otp(&params.seed, counter)];
                if let Some(seed2) = &params.seed2 {
                    otps.push(derive_otp(seed2, counter));
                }
                let rand = randomness.get(i).copied().unwrap_or(0);
                let eotp = StandardEotp::new(params.hseed)
                    .with_nonce(nonce)
                    .with_rand(rand)
                    .build(&otps)?;
                Ok(hasher.hash(&eotp))
            })
            .collect::<Result<_>>()?;
        leaves.extend(chunk);
        start = end;
        observer(Progress { completed: start, total, stage: BuildStage::Leaves });
    }

    if cancelled() {
        return Err(TreeError::Cancelled);
    }
    let height = tree_height(total);
    let layers = build_layers_with(hasher, leaves, &mut |level| {
        observer(Progress { completed: level, total: height, stage: BuildStage::Layers });
    });
    let tree = InnerTree { layers, leaf_count: total };

    let inner_trees = compute_inner_trees(params, hasher, observer, cancelled)?;

    debug!(root = %hex::encode(tree.root()), height = tree.height(), inner = inner_trees.len(), "tree built");
    Ok(OtpTree { tree, inner_trees })
}

fn compute_inner_trees(
    params: &TreeParams,
    hasher: &dyn Hasher,
    observer: &mut dyn FnMut(Progress),
    cancelled: &dyn Fn() -> bool,
) -> Result<Vec<InnerTree>> {
    let window = params.inner_trees;
    if window == 0 {
        return Ok(Vec::new());
    }

    let per_tree = params.inner_leaves();
    let total = per_tree * window;
    let t0 = params.t0();
    let builder = RestoreEotp::new(window);

    // tree j leaf i spans counters t0 + i*w + j .. t0 + i*w + j + w
    let span = per_tree * window + window;
    let codes: Vec<u32> = (0..span as u64)
        .into_par_iter()
        .map(|offset| derive_otp(&params.seed, t0 + offset))
        .collect();

    let mut trees = Vec::with_capacity(window);
    for j in 0..window {
        if cancelled() {
            return Err(TreeError::Cancelled);
        }
        let leaves: Vec<Hash> = (0..per_tree)
            .into_par_iter()
            .map(|i| {
                let first = i * window + j;
                let eotp = builder.build(&codes[first..first + window])?;
                Ok(hasher.hash(&eotp))
            })
            .collect::<Result<_>>()?;
        let layers = build_layers(hasher, leaves);
        trees.push(InnerTree { layers, leaf_count: per_tree });
        observer(Progress {
            completed: (j + 1) * per_tree,
            total,
            stage: BuildStage::InnerTrees,
        });
    }
    Ok(trees)
}

/// find the randomness mixed into `leaf`, searching all `2^bits` values
pub fn recover_randomness(
    hasher: &dyn Hasher,
    leaf: &Hash,
    eotp: &StandardEotp,
    otps: &[u32],
    bits: u8,
) -> Result<Option<u32>> {
    if bits > MAX_RANDOMNESS_BITS {
        return Err(TreeError::Config(format!("randomness of {bits} bits exceeds {MAX_RANDOMNESS_BITS}")));
    }
    let bound = 1u32 << bits;
    let found = (0..bound)
        .into_par_iter()
        .find_first(|rand| {
            eotp.clone()
                .with_rand(*rand)
                .build(otps)
                .map(|e| hasher.hash(&e) == *leaf)
                .unwrap_or(false)
        });
    Ok(found)
}
