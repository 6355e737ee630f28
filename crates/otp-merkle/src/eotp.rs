//! expanded otp (eotp) builders
//!
//! an eotp is the leaf pre-image. the standard builder keys it to the
//! wallet's hseed; the restore builder folds a window of consecutive codes
//! so that the authenticator alone is enough to reproduce it.

use hmac::{Hmac, Mac, digest::KeyInit};
use sha2::Sha256;

use crate::hash::{sha256, Hash};
use crate::{Result, TreeError};

type HmacSha256 = Hmac<Sha256>;

/// turns the codes a user holds into the 32-byte eotp
pub trait EotpBuilder: Send + Sync {
    fn build(&self, otps: &[u32]) -> Result<Hash>;
}

fn hash_otp(otp: u32) -> Hash {
    sha256(&otp.to_be_bytes())
}

/// one code (or two in double-otp mode) keyed by the wallet's hseed
#[derive(Clone, Debug)]
pub struct StandardEotp {
    hseed: Hash,
    nonce: u16,
    rand: u32,
}

impl StandardEotp {
    pub fn new(hseed: Hash) -> Self {
        Self { hseed, nonce: 0, rand: 0 }
    }

    /// sub-index of the operation within its interval
    pub fn with_nonce(mut self, nonce: u16) -> Self {
        self.nonce = nonce;
        self
    }

    /// per-leaf randomness mixed in at tree construction
    pub fn with_rand(mut self, rand: u32) -> Self {
        self.rand = rand;
        self
    }
}

impl EotpBuilder for StandardEotp {
    fn build(&self, otps: &[u32]) -> Result<Hash> {
        if otps.is_empty() || otps.len() > 2 {
            return Err(TreeError::Eotp(format!(
                "standard eotp takes one or two codes, got {}",
                otps.len()
            )));
        }

        let mut mac: HmacSha256 = KeyInit::new_from_slice(&self.hseed)
            .map_err(|e| TreeError::Eotp(e.to_string()))?;
        for otp in otps {
            Mac::update(&mut mac, &hash_otp(*otp));
        }
        Mac::update(&mut mac, &self.nonce.to_be_bytes());
        Mac::update(&mut mac, &self.rand.to_be_bytes());
        Ok(mac.finalize().into_bytes().into())
    }
}

/// ordered window of consecutive codes, one per authenticator rotation
#[derive(Clone, Copy, Debug)]
pub struct RestoreEotp {
    window: usize,
}

impl RestoreEotp {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl EotpBuilder for RestoreEotp {
    fn build(&self, otps: &[u32]) -> Result<Hash> {
        if otps.len() != self.window || self.window == 0 {
            return Err(TreeError::Eotp(format!(
                "restore eotp takes exactly {} codes, got {}",
                self.window,
                otps.len()
            )));
        }

        let mut buf = Vec::with_capacity(32 * otps.len());
        for otp in otps {
            buf.extend_from_slice(&hash_otp(*otp));
        }
        Ok(sha256(&buf))
    }
}
