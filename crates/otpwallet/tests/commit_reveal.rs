//! end-to-end authorization against the in-memory verifier

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use otp_merkle::{select_neighbors, EotpBuilder, Hash, StandardEotp};
use otpwallet::verifier::memory::TokenKey;
use otpwallet::{
    Address, AuthParams, AuthState, Clock, Commit, Coordinator, CoordinatorConfig, Core, Error, HashFunction, ManualClock,
    MemoryStore, MemoryVerifier, Operation, RetryConfig, RevealParams, SpendingState, TokenType, Verifier, Wallet,
    WalletConfig, WalletSecrets,
};

const INTERVAL: u64 = 30_000;
const EFFECTIVE: u64 = 56_666_667 * INTERVAL;
const DEST: Address = [0x5a; 20];

fn config(intervals: u64) -> WalletConfig {
    WalletConfig {
        interval: Duration::from_millis(INTERVAL),
        duration: Duration::from_millis(INTERVAL * intervals),
        inner_trees: 0,
        ..Default::default()
    }
}

async fn wallet(config: WalletConfig) -> Wallet {
    let secrets = WalletSecrets::generate(&config).unwrap();
    Wallet::create(config, secrets, EFFECTIVE, &MemoryStore::new()).await.unwrap()
}

fn verifier(wallet: &Wallet, clock: &ManualClock, balance: u128) -> Arc<MemoryVerifier> {
    Arc::new(
        MemoryVerifier::new(
            wallet.core.clone(),
            wallet.inner_cores.clone(),
            wallet.secrets.identification_key.to_vec(),
            wallet.hasher(),
            Arc::new(clock.clone()),
        )
        .unwrap()
        .with_balance(balance),
    )
}

fn coordinator<V: Verifier>(verifier: V, wallet: &Wallet, clock: &ManualClock) -> Coordinator<V> {
    let config = CoordinatorConfig { retry: RetryConfig::immediate(3), ..Default::default() };
    Coordinator::new(verifier, wallet.hasher(), Arc::new(clock.clone()), config)
}

#[tokio::test]
async fn transfer_moves_exact_amount_once() {
    let wallet = wallet(config(12)).await;
    assert_eq!(wallet.core.total_leaves(), 12);
    assert_eq!(wallet.core.height, 4);

    let clock = ManualClock::new(EFFECTIVE + 3 * INTERVAL + 12_000);
    let verifier = verifier(&wallet, &clock, 10_000);
    let coordinator = coordinator(verifier.clone(), &wallet, &clock);

    let now = clock.now_ms();
    let op = Operation::Transfer { dest: DEST, amount: 1_234 };
    let receipt = coordinator.authorize(wallet.request(op.clone(), now)).await.unwrap();
    assert_eq!(receipt.index, 3);
    assert_eq!(verifier.balance().unwrap(), 10_000 - 1_234);
    assert_eq!(verifier.received(&DEST).unwrap(), 1_234);

    let commits = verifier.lookup_commit(receipt.commit_hash).await.unwrap();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].completed);

    // replay the disclosed proof directly at the verifier
    let otp = wallet.codes_at(now);
    let eotp = StandardEotp::new(wallet.secrets.hseed).build(&otp).unwrap();
    let auth = AuthParams {
        neighbors: select_neighbors(&wallet.tree.tree, 3).unwrap(),
        index: 3,
        eotp,
    };
    let replay = verifier.reveal(auth, op.reveal_params()).await;
    assert!(matches!(replay, Err(Error::RejectedByVerifier(_))));
    assert_eq!(verifier.balance().unwrap(), 10_000 - 1_234);
}

#[tokio::test]
async fn concurrent_authorizations_are_serialized() {
    let wallet = wallet(WalletConfig { slot_size: 2, ..config(12) }).await;
    let clock = ManualClock::new(EFFECTIVE + 3 * INTERVAL);
    let verifier = verifier(&wallet, &clock, 100);
    let coordinator = coordinator(verifier.clone(), &wallet, &clock);

    let now = clock.now_ms();
    let first = coordinator.authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 10 }, now));
    let second = coordinator.authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 20 }, now));
    let (first, second) = tokio::join!(first, second);
    let mut indices = vec![first.unwrap().index, second.unwrap().index];
    indices.sort();

    assert_eq!(indices, vec![6, 7]);
    assert_eq!(verifier.balance().unwrap(), 70);
    assert_eq!(verifier.nonce().await.unwrap(), 2);
}

#[tokio::test]
async fn double_otp_and_keccak_tree() {
    let config = WalletConfig { double_otp: true, hash: HashFunction::Keccak256, ..config(8) };
    let wallet = wallet(config).await;
    assert_eq!(wallet.codes_at(EFFECTIVE).len(), 2);

    let clock = ManualClock::new(EFFECTIVE + 5 * INTERVAL);
    let verifier = verifier(&wallet, &clock, 50);
    let coordinator = coordinator(verifier.clone(), &wallet, &clock);

    let mut request = wallet.request(Operation::Transfer { dest: DEST, amount: 50 }, clock.now_ms());
    // one code is not enough in double-otp mode
    request.otps.truncate(1);
    assert!(coordinator.authorize(request).await.is_err());

    let request = wallet.request(Operation::Transfer { dest: DEST, amount: 50 }, clock.now_ms());
    coordinator.authorize(request).await.unwrap();
    assert_eq!(verifier.balance().unwrap(), 0);
}

#[tokio::test]
async fn randomized_leaves_are_recovered() {
    let wallet = wallet(WalletConfig { randomness_bits: 5, ..config(6) }).await;
    let clock = ManualClock::new(EFFECTIVE + INTERVAL);
    let verifier = verifier(&wallet, &clock, 9);
    let coordinator = coordinator(verifier.clone(), &wallet, &clock);

    let receipt = coordinator
        .authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 9 }, clock.now_ms()))
        .await
        .unwrap();
    assert_eq!(receipt.index, 1);
    assert_eq!(verifier.balance().unwrap(), 0);
}

#[tokio::test]
async fn token_transfer_and_spending_limit() {
    let wallet = wallet(WalletConfig { slot_size: 4, ..config(12) }).await;
    let clock = ManualClock::new(EFFECTIVE);
    let key = TokenKey { token_type: TokenType::Erc1155, contract: [0x77; 20], token_id: 42 };
    let verifier = Arc::new(
        MemoryVerifier::new(wallet.core.clone(), vec![], vec![], wallet.hasher(), Arc::new(clock.clone()))
            .unwrap()
            .with_balance(1_000)
            .with_token(key, 3)
            .with_spending(SpendingState::new(100, INTERVAL)),
    );
    let coordinator = coordinator(verifier.clone(), &wallet, &clock);
    let now = clock.now_ms();

    let token = Operation::TransferToken {
        token_type: TokenType::Erc1155,
        contract: [0x77; 20],
        token_id: 42,
        dest: DEST,
        amount: 2,
        data: b"memo".to_vec(),
    };
    coordinator.authorize(wallet.request(token, now)).await.unwrap();
    assert_eq!(verifier.token_balance(&key).unwrap(), 1);
    assert_eq!(verifier.token_received(&DEST, &key).unwrap(), 2);

    coordinator
        .authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 80 }, now))
        .await
        .unwrap();
    let over = coordinator
        .authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 30 }, now))
        .await;
    assert!(matches!(over, Err(Error::RejectedByVerifier(_))));
    assert_eq!(coordinator.state(), AuthState::Failed);
    assert_eq!(verifier.spending_state().await.unwrap().spent_amount, 80);
}

/// delegates to a memory verifier, letting time pass while a commit is looked up
struct SlowVerifier {
    inner: Arc<MemoryVerifier>,
    clock: ManualClock,
    lookup_delay_ms: u64,
}

#[async_trait]
impl Verifier for SlowVerifier {
    async fn commit(&self, hash: Hash, params_hash: Hash, verification_hash: Hash) -> otpwallet::Result<()> {
        self.inner.commit(hash, params_hash, verification_hash).await
    }

    async fn reveal(&self, auth: AuthParams, params: RevealParams) -> otpwallet::Result<()> {
        self.inner.reveal(auth, params).await
    }

    async fn lookup_commit(&self, hash: Hash) -> otpwallet::Result<Vec<Commit>> {
        self.clock.advance(self.lookup_delay_ms);
        self.inner.lookup_commit(hash).await
    }

    async fn core(&self) -> otpwallet::Result<Core> {
        self.inner.core().await
    }

    async fn inner_cores(&self) -> otpwallet::Result<Vec<Core>> {
        self.inner.inner_cores().await
    }

    async fn spending_state(&self) -> otpwallet::Result<SpendingState> {
        self.inner.spending_state().await
    }

    async fn nonce(&self) -> otpwallet::Result<u32> {
        self.inner.nonce().await
    }
}

#[tokio::test]
async fn reveal_after_window_times_out() {
    let wallet = wallet(config(12)).await;
    let clock = ManualClock::new(EFFECTIVE + 2 * INTERVAL);
    let inner = verifier(&wallet, &clock, 100);
    let slow = SlowVerifier { inner: inner.clone(), clock: clock.clone(), lookup_delay_ms: 61_000 };
    let coordinator = coordinator(slow, &wallet, &clock);

    let result = coordinator
        .authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 1 }, clock.now_ms()))
        .await;
    assert!(matches!(result, Err(Error::Timeout(_))));
    assert_eq!(inner.balance().unwrap(), 100);
}

#[tokio::test]
async fn stale_verifier_root_is_a_conflict() {
    let wallet = wallet(config(12)).await;
    let other = self::wallet(config(12)).await;
    let clock = ManualClock::new(EFFECTIVE + 2 * INTERVAL);
    let verifier = verifier(&other, &clock, 100);
    let coordinator = coordinator(verifier, &wallet, &clock);

    let result = coordinator
        .authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 1 }, clock.now_ms()))
        .await;
    assert!(matches!(result, Err(Error::StateConflict(_))));
}

/// executes reveals but loses the response of the first one
struct LostResponseVerifier {
    inner: Arc<MemoryVerifier>,
    dropped: AtomicBool,
}

#[async_trait]
impl Verifier for LostResponseVerifier {
    async fn commit(&self, hash: Hash, params_hash: Hash, verification_hash: Hash) -> otpwallet::Result<()> {
        self.inner.commit(hash, params_hash, verification_hash).await
    }

    async fn reveal(&self, auth: AuthParams, params: RevealParams) -> otpwallet::Result<()> {
        self.inner.reveal(auth, params).await?;
        if !self.dropped.swap(true, Ordering::SeqCst) {
            return Err(Error::Network("connection reset".into()));
        }
        Ok(())
    }

    async fn lookup_commit(&self, hash: Hash) -> otpwallet::Result<Vec<Commit>> {
        self.inner.lookup_commit(hash).await
    }

    async fn core(&self) -> otpwallet::Result<Core> {
        self.inner.core().await
    }

    async fn inner_cores(&self) -> otpwallet::Result<Vec<Core>> {
        self.inner.inner_cores().await
    }

    async fn spending_state(&self) -> otpwallet::Result<SpendingState> {
        self.inner.spending_state().await
    }

    async fn nonce(&self) -> otpwallet::Result<u32> {
        self.inner.nonce().await
    }
}

#[tokio::test]
async fn executed_reveal_with_lost_response_succeeds_once() {
    let wallet = wallet(WalletConfig { slot_size: 2, ..config(12) }).await;
    let clock = ManualClock::new(EFFECTIVE + 4 * INTERVAL);
    let inner = verifier(&wallet, &clock, 100);
    let lossy = LostResponseVerifier { inner: inner.clone(), dropped: AtomicBool::new(false) };
    let coordinator = coordinator(lossy, &wallet, &clock);

    let receipt = coordinator
        .authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 40 }, clock.now_ms()))
        .await
        .unwrap();
    assert_eq!(receipt.index, 8);
    assert_eq!(coordinator.state(), AuthState::Done);
    assert_eq!(inner.balance().unwrap(), 60);
    assert!(inner.lookup_commit(receipt.commit_hash).await.unwrap()[0].completed);

    // local nonce bookkeeping advanced: the next operation takes the next slot
    let next = coordinator
        .authorize(wallet.request(Operation::Transfer { dest: DEST, amount: 10 }, clock.now_ms()))
        .await
        .unwrap();
    assert_eq!(next.index, 9);
    assert_eq!(inner.balance().unwrap(), 50);
}
