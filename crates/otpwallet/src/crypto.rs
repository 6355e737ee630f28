//! key material for new wallets
//!
//! - os randomness for seeds and the hash seed
//! - hkdf-sha256 for the identification key

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::{Error, Result};

/// authenticator seed length (what totp apps provision)
pub const SEED_LEN: usize = 20;

/// identification key length
pub const IDENTIFICATION_KEY_LEN: usize = 32;

const IDENTIFICATION_KEY_INFO: &[u8] = b"otpwallet:identification_key:v1";

/// generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// derive the key that identifies a wallet to relayers without exposing its seed
///
/// the hash seed is the salt, so two wallets sharing an authenticator seed
/// still get unrelated identification keys.
pub fn identification_key(seed: &[u8], hseed: &[u8; 32]) -> Result<[u8; IDENTIFICATION_KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(Some(hseed), seed);
    let mut key = [0u8; IDENTIFICATION_KEY_LEN];
    hk.expand(IDENTIFICATION_KEY_INFO, &mut key)
        .map_err(|e| Error::Config(format!("hkdf expand failed: {e}")))?;
    Ok(key)
}
