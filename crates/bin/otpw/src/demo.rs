//! end-to-end run against an in-memory verifier on a simulated clock

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use tracing::info;

use otpwallet::wallet::align_effective_time;
use otpwallet::{
    Clock, Coordinator, CoordinatorConfig, ManualClock, MemoryStore, MemoryVerifier, Operation, RestoreResolver,
    SystemClock, Wallet, WalletConfig, WalletSecrets,
};

const INTERVAL: Duration = Duration::from_secs(30);
const DEST: [u8; 20] = [0x42; 20];

fn demo_config(inner_trees: usize, intervals: u64) -> Result<WalletConfig> {
    ensure!(inner_trees > 0, "the demo restores the wallet, it needs at least one inner tree");
    let duration_ms = (INTERVAL.as_millis() as u64)
        .checked_mul(intervals)
        .with_context(|| format!("{intervals} intervals overflow the wallet lifetime"))?;
    Ok(WalletConfig {
        interval: INTERVAL,
        duration: Duration::from_millis(duration_ms),
        inner_trees,
        ..Default::default()
    })
}

pub async fn run(inner_trees: usize, intervals: u64) -> Result<()> {
    let config = demo_config(inner_trees, intervals)?;
    let interval_ms = config.interval_ms();
    let store = MemoryStore::new();
    let effective = align_effective_time(SystemClock.now_ms(), interval_ms);
    let clock = ManualClock::new(effective);

    let secrets = WalletSecrets::generate(&config)?;
    let wallet = Wallet::create(config.clone(), secrets, effective, &store).await?;
    info!("wallet root 0x{} ({} leaves)", wallet.core.root_hex(), wallet.core.total_leaves());

    let verifier = Arc::new(
        MemoryVerifier::new(
            wallet.core.clone(),
            wallet.inner_cores.clone(),
            wallet.secrets.identification_key.to_vec(),
            wallet.hasher(),
            Arc::new(clock.clone()),
        )?
        .with_balance(1_000),
    );
    let coordinator = Coordinator::new(
        verifier.clone(),
        wallet.hasher(),
        Arc::new(clock.clone()),
        CoordinatorConfig::default(),
    );

    let mut states = coordinator.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            info!("auth state: {:?}", *states.borrow());
        }
    });

    // a few intervals in, the user reads one code and pays
    clock.advance(3 * interval_ms);
    let receipt = coordinator
        .authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 250 }, clock.now_ms()))
        .await?;
    println!("transfer: leaf {} commit 0x{}", receipt.index, hex::encode(receipt.commit_hash));
    println!("balance: {}", verifier.balance()?);

    // everything but the authenticator is lost; the user copies the next codes
    clock.advance(2 * interval_ms);
    let codes = wallet.restore_codes(clock.now_ms());
    clock.advance(inner_trees as u64 * interval_ms);
    println!("restore codes: {:?}", codes.iter().map(|c| format!("{:06}", c)).collect::<Vec<_>>());

    let replacement_effective = align_effective_time(clock.now_ms(), interval_ms);
    let replacement =
        Wallet::create(config, WalletSecrets::generate(&wallet.config)?, replacement_effective, &MemoryStore::new())
            .await?;
    let resolver = RestoreResolver::new(wallet.hasher(), Arc::new(clock.clone()));
    let outcome = resolver
        .displace(&coordinator, &store, codes, &replacement.tree, replacement.displacement())
        .await?;
    println!(
        "restored: inner tree {} leaf {}, new root 0x{}",
        outcome.matched.tree_index,
        outcome.matched.leaf_index,
        replacement.core.root_hex()
    );

    let receipt = coordinator
        .authorize(replacement.request(Operation::Transfer { dest: DEST, amount: 100 }, clock.now_ms()))
        .await?;
    println!("transfer with new tree: leaf {}", receipt.index);
    println!("balance: {}, received: {}", verifier.balance()?, verifier.received(&DEST)?);
    Ok(())
}
