//! otpw: wallets authenticated by an otp authenticator
//!
//! ```bash
//! # create a wallet (secrets in wallet.json, trees in trees/)
//! otpw --data-dir ./wallet new --interval 30 --duration 364 --inner-trees 6
//!
//! # codes to add to / check against the authenticator
//! otpw --data-dir ./wallet code
//!
//! # core and inner cores to register with the wallet contract
//! otpw --data-dir ./wallet inspect
//!
//! # transfer, then restore from codes, against an in-memory verifier
//! otpw demo
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use otpwallet::wallet::align_effective_time;
use otpwallet::{
    Clock, HashFunction, SledStore, SystemClock, TreeStore, Wallet, WalletConfig, WalletRecord, WalletSecrets,
};

mod demo;

const RECORD_FILE: &str = "wallet.json";
const TREES_DIR: &str = "trees";

#[derive(Parser, Debug)]
#[command(name = "otpw")]
#[command(about = "keyless wallet client authenticated by otp codes", long_about = None)]
struct Cli {
    /// wallet directory
    #[arg(long, global = true, default_value = "./otpw-wallet", env = "OTPW_DATA_DIR")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate secrets and build the authentication tree
    New {
        /// Authenticator interval in seconds
        #[arg(long, default_value_t = 30)]
        interval: u64,

        /// Wallet lifetime in days
        #[arg(long, default_value_t = 364)]
        duration: u64,

        /// Operations allowed per interval
        #[arg(long, default_value_t = 1)]
        slot_size: usize,

        /// Require codes from two authenticators
        #[arg(long)]
        double_otp: bool,

        /// Random bits mixed into each leaf
        #[arg(long, default_value_t = 0)]
        randomness_bits: u8,

        /// Consecutive codes needed to restore (0 disables restore)
        #[arg(long, default_value_t = 6)]
        inner_trees: usize,

        /// Use keccak256 for tree nodes
        #[arg(long)]
        keccak: bool,

        /// Overwrite an existing wallet
        #[arg(long)]
        force: bool,
    },

    /// Print the current authenticator code(s) and leaf index
    Code,

    /// Print the cores to register with the wallet contract
    Inspect,

    /// Run a transfer and a code-based restore against an in-memory verifier
    Demo {
        /// Consecutive codes needed to restore
        #[arg(long, default_value_t = 3)]
        inner_trees: usize,

        /// Wallet lifetime in intervals
        #[arg(long, default_value_t = 96)]
        intervals: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otpw=info,otpwallet=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::New { interval, duration, slot_size, double_otp, randomness_bits, inner_trees, keccak, force } => {
            let config = WalletConfig {
                interval: Duration::from_secs(interval),
                duration: Duration::from_secs(duration * 24 * 3600),
                slot_size,
                double_otp,
                randomness_bits,
                inner_trees,
                hash: if keccak { HashFunction::Keccak256 } else { HashFunction::Sha256 },
            };
            create(&cli.data_dir, config, force).await
        }
        Commands::Code => code(&cli.data_dir),
        Commands::Inspect => inspect(&cli.data_dir),
        Commands::Demo { inner_trees, intervals } => demo::run(inner_trees, intervals).await,
    }
}

async fn create(dir: &Path, config: WalletConfig, force: bool) -> Result<()> {
    let record_path = dir.join(RECORD_FILE);
    if record_path.exists() && !force {
        bail!("{} already exists (use --force to replace it)", record_path.display());
    }
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    info!("data dir: {}", dir.display());
    info!("interval: {}s, lifetime: {}s", config.interval.as_secs(), config.duration.as_secs());
    info!("slot size: {}, restore window: {}", config.slot_size, config.inner_trees);

    let store = SledStore::open(dir.join(TREES_DIR))?;
    let secrets = WalletSecrets::generate(&config)?;
    let effective = align_effective_time(SystemClock.now_ms(), config.interval_ms());
    let wallet = Wallet::create(config, secrets, effective, &store).await?;
    store.flush()?;

    let json = serde_json::to_string_pretty(&wallet.record())?;
    fs::write(&record_path, json).with_context(|| format!("writing {}", record_path.display()))?;

    println!("root:    0x{}", wallet.core.root_hex());
    println!("leaves:  {}", wallet.core.total_leaves());
    println!("expires: {}", wallet.core.expires_at_ms() / 1000);
    println!("authenticator secret (hex): {}", hex::encode(&wallet.secrets.seed));
    if let Some(seed2) = &wallet.secrets.seed2 {
        println!("second authenticator secret (hex): {}", hex::encode(seed2));
    }
    Ok(())
}

fn load_record(dir: &Path) -> Result<WalletRecord> {
    let path = dir.join(RECORD_FILE);
    let json = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

fn code(dir: &Path) -> Result<()> {
    let record = load_record(dir)?;
    let now = SystemClock.now_ms();
    let interval_ms = record.config.interval_ms().max(1);
    let codes = record.secrets.codes_at(now, interval_ms);
    let remaining = interval_ms - now % interval_ms;

    for code in &codes {
        println!("{:06}", code);
    }
    match record.core.index_at(now, 0) {
        Some(index) => println!("leaf {} ({}s left)", index, remaining / 1000),
        None if now < record.effective_time_ms => println!("wallet not yet active"),
        None => println!("wallet expired"),
    }
    Ok(())
}

fn inspect(dir: &Path) -> Result<()> {
    let record = load_record(dir)?;
    let store = SledStore::open(dir.join(TREES_DIR))?;

    println!("{}", serde_json::to_string_pretty(&record.core)?);
    println!("cached: {}", store.contains(&record.core.root)?);
    for (i, inner) in record.inner_cores.iter().enumerate() {
        println!(
            "inner[{}]: 0x{} height={} leaves={} cached={}",
            i,
            inner.root_hex(),
            inner.height,
            inner.lifespan,
            store.contains(&inner.root)?
        );
    }
    let displacement = Wallet::load(record, &store)?.displacement();
    println!("displace payload: 0x{}", hex::encode(displacement.encode()));
    Ok(())
}
