//! # otpwallet
//!
//! commit-reveal authorization and code-based restore for wallets whose only
//! credential is an otp authenticator.
//!
//! ## protocol
//!
//! ```text
//!   authenticator code ──▶ eotp ──▶ leaf[index] ──neighbors──▶ root (core)
//!
//!   client                                   verifier (ledger)
//!     │  commit(H(neighbor,index,eotp),            │
//!     │         params_hash, H(params_hash,eotp)) ─▶  stores commit
//!     │  lookup_commit ◀──────────────────────────  │
//!     │  reveal(neighbors, index, eotp, params) ──▶  checks hashes, proof,
//!     │                                          │  timing, index reuse,
//!     │                                          │  then executes
//! ```
//!
//! ## restore
//!
//! the inner trees commit to every window of consecutive codes. copying one
//! window from the authenticator is enough to authorize a DISPLACE that
//! installs a new tree, without the hash seed.
//!
//! ## usage
//!
//! ```rust,ignore
//! use otpwallet::{Wallet, WalletConfig, WalletSecrets, MemoryStore};
//!
//! let config = WalletConfig::default();
//! let secrets = WalletSecrets::generate(&config)?;
//! let wallet = Wallet::create(config, secrets, effective_time_ms, &store).await?;
//!
//! let receipt = coordinator
//!     .authorize(wallet.request(Operation::Transfer { dest, amount }, now_ms))
//!     .await?;
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod operation;
pub mod restore;
pub mod serde_hex;
pub mod store;
pub mod task;
pub mod verifier;
pub mod wallet;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CoordinatorConfig, HashFunction, RetryConfig, WalletConfig};
pub use coordinator::{AuthRequest, AuthState, Coordinator, Credential, PreparedOperation, Receipt};
pub use descriptor::{Address, Core};
pub use error::{Error, Result};
pub use operation::{Displacement, Operation, RevealParams, TokenType};
pub use restore::{Match, RestoreOutcome, RestoreResolver};
pub use store::{MemoryStore, SledStore, TreeStore};
pub use task::{spawn_build, BuildTask, CancelHandle};
pub use verifier::{AuthParams, Commit, MemoryVerifier, SpendingState, Verifier};
pub use wallet::{Wallet, WalletRecord, WalletSecrets};

#[cfg(feature = "network")]
pub use verifier::RelayerClient;
