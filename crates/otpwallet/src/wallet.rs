//! wallet creation
//!
//! a wallet is its secrets (authenticator seed(s), hash seed), the tree built
//! from them and the cores registered with the verifier. the record kept on
//! disk holds the secrets and cores; trees live in the [`TreeStore`].

use std::fmt;
use std::sync::Arc;

use otp_merkle::{derive_otp, Hash, Hasher, OtpTree, TreeParams};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::config::WalletConfig;
use crate::coordinator::{AuthRequest, Credential};
use crate::descriptor::Core;
use crate::crypto::{identification_key, random_bytes, SEED_LEN};
use crate::operation::{Displacement, Operation};
use crate::store::TreeStore;
use crate::task::spawn_build;
use crate::{Error, Result};

/// client-only secrets of a wallet
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSecrets {
    #[serde(with = "crate::serde_hex::bytes")]
    pub seed: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "optional_hex")]
    pub seed2: Option<Vec<u8>>,
    #[serde(with = "crate::serde_hex::array")]
    pub hseed: Hash,
    #[serde(with = "crate::serde_hex::array")]
    pub identification_key: [u8; 32],
}

impl fmt::Debug for WalletSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSecrets")
            .field("double_otp", &self.seed2.is_some())
            .field("identification_key", &hex::encode(self.identification_key))
            .finish_non_exhaustive()
    }
}

mod optional_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom))
            .transpose()
    }
}

impl WalletSecrets {
    pub fn generate(config: &WalletConfig) -> Result<Self> {
        let seed = random_bytes::<SEED_LEN>().to_vec();
        let seed2 = config.double_otp.then(|| random_bytes::<SEED_LEN>().to_vec());
        let hseed = random_bytes::<32>();
        Self::from_seeds(seed, seed2, hseed)
    }

    pub fn from_seeds(seed: Vec<u8>, seed2: Option<Vec<u8>>, hseed: Hash) -> Result<Self> {
        if seed.is_empty() || seed2.as_ref().is_some_and(|s| s.is_empty()) {
            return Err(Error::Config("seed must not be empty".into()));
        }
        let identification_key = identification_key(&seed, &hseed)?;
        Ok(Self { seed, seed2, hseed, identification_key })
    }

    /// the code(s) an authenticator shows at `time_ms`
    pub fn codes_at(&self, time_ms: u64, interval_ms: u64) -> Vec<u32> {
        let counter = time_ms / interval_ms.max(1);
        let mut codes = vec![derive_otp(&self.seed, counter)];
        if let Some(seed2) = &self.seed2 {
            codes.push(derive_otp(seed2, counter));
        }
        codes
    }
}

/// start of the interval containing `time_ms`
pub fn align_effective_time(time_ms: u64, interval_ms: u64) -> u64 {
    time_ms / interval_ms.max(1) * interval_ms
}

/// what is written to disk for a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub config: WalletConfig,
    pub secrets: WalletSecrets,
    pub effective_time_ms: u64,
    pub core: Core,
    pub inner_cores: Vec<Core>,
}

pub struct Wallet {
    pub config: WalletConfig,
    pub secrets: WalletSecrets,
    pub effective_time_ms: u64,
    pub tree: OtpTree,
    pub core: Core,
    pub inner_cores: Vec<Core>,
}

impl Wallet {
    pub fn tree_params(config: &WalletConfig, secrets: &WalletSecrets, effective_time_ms: u64) -> TreeParams {
        let mut params = TreeParams::new(secrets.seed.clone(), secrets.hseed, effective_time_ms, config.duration_ms())
            .with_interval(config.interval_ms())
            .with_slot_size(config.slot_size)
            .with_randomness(config.randomness_bits)
            .with_inner_trees(config.inner_trees);
        if let Some(seed2) = &secrets.seed2 {
            params = params.with_seed2(seed2.clone());
        }
        params
    }

    /// build the tree in the background and cache it with its inner trees
    pub async fn create(
        config: WalletConfig,
        secrets: WalletSecrets,
        effective_time_ms: u64,
        store: &dyn TreeStore,
    ) -> Result<Self> {
        config.validate()?;
        let params = Self::tree_params(&config, &secrets, effective_time_ms);
        let mut task = spawn_build(params, config.hash.hasher());
        while let Some(progress) = task.progress.next().await {
            debug!(stage = ?progress.stage, completed = progress.completed, total = progress.total, "build progress");
        }
        let tree = task.join().await?;

        store.put(&tree.tree)?;
        for inner in &tree.inner_trees {
            store.put(inner)?;
        }
        let wallet = Self::from_tree(config, secrets, effective_time_ms, tree)?;
        info!(root = %wallet.core.root_hex(), leaves = wallet.core.total_leaves(), "wallet created");
        Ok(wallet)
    }

    /// wrap an already built tree
    pub fn from_tree(
        config: WalletConfig,
        secrets: WalletSecrets,
        effective_time_ms: u64,
        tree: OtpTree,
    ) -> Result<Self> {
        let params = Self::tree_params(&config, &secrets, effective_time_ms);
        let core = Core::for_tree(&tree.tree, &params)?;
        let inner_cores = tree
            .inner_trees
            .iter()
            .map(|inner| Core::for_inner_tree(inner, &params))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { config, secrets, effective_time_ms, tree, core, inner_cores })
    }

    /// reassemble a wallet from its record and the cached trees
    pub fn load(record: WalletRecord, store: &dyn TreeStore) -> Result<Self> {
        let tree = store.load(&record.core.root)?;
        let inner_trees = record
            .inner_cores
            .iter()
            .map(|core| store.load(&core.root))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config: record.config,
            secrets: record.secrets,
            effective_time_ms: record.effective_time_ms,
            tree: OtpTree { tree, inner_trees },
            core: record.core,
            inner_cores: record.inner_cores,
        })
    }

    pub fn record(&self) -> WalletRecord {
        WalletRecord {
            config: self.config.clone(),
            secrets: self.secrets.clone(),
            effective_time_ms: self.effective_time_ms,
            core: self.core.clone(),
            inner_cores: self.inner_cores.clone(),
        }
    }

    pub fn hasher(&self) -> Arc<dyn Hasher> {
        self.config.hash.hasher()
    }

    pub fn credential(&self) -> Credential {
        Credential::Standard { hseed: self.secrets.hseed, randomness_bits: self.config.randomness_bits }
    }

    /// authorization material for this wallet to be displaced by
    pub fn displacement(&self) -> Displacement {
        Displacement {
            core: self.core.clone(),
            inner_cores: self.inner_cores.clone(),
            identification_key: self.secrets.identification_key.to_vec(),
        }
    }

    pub fn codes_at(&self, time_ms: u64) -> Vec<u32> {
        self.secrets.codes_at(time_ms, self.config.interval_ms())
    }

    /// `window` consecutive codes starting with the one shown at `time_ms`
    pub fn restore_codes(&self, time_ms: u64) -> Vec<u32> {
        let counter = time_ms / self.config.interval_ms().max(1);
        (counter..counter + self.config.inner_trees as u64)
            .map(|c| derive_otp(&self.secrets.seed, c))
            .collect()
    }

    /// request for `operation` using the codes shown at `time_ms`
    pub fn request(&self, operation: Operation, time_ms: u64) -> AuthRequest<'_> {
        AuthRequest {
            operation,
            otps: self.codes_at(time_ms),
            credential: self.credential(),
            tree: &self.tree.tree,
            index: None,
        }
    }
}
