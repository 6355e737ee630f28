// src/lib.rs
//! OTP-derived merkle authentication trees
//!
//! a wallet's authentication tree commits to every one-time code its
//! authenticator will ever show during the wallet's lifespan:
//!
//! ```text
//!   seed ──hotp──▶ otp(t0+s) ──┐
//!  (seed2 ──hotp──▶ otp2) ─────┼─hmac(hseed)──▶ eotp ──H──▶ leaf[s*slot+n]
//!                   nonce n ───┘
//!
//!   leaves ──H(l||r)──▶ ... ──▶ root   (committed on the ledger)
//! ```
//!
//! inner trees hash windows of consecutive codes without the hseed, so a
//! user holding nothing but the authenticator can later prove a leaf and
//! displace the wallet's root.

pub mod error;
pub mod hash;
pub mod otp;
pub mod eotp;
pub mod tree;
pub mod proof;

pub use error::{TreeError, Result};
pub use hash::{Hash, Hasher, Keccak256Hasher, Sha256Hasher, keccak256};
pub use eotp::{EotpBuilder, RestoreEotp, StandardEotp};
pub use otp::{counter_at, derive_otp, derive_totp};
pub use tree::{
    compute_tree, BuildStage, InnerTree, OtpTree, Progress, TreeParams, filler,
};
pub use proof::{
    commit_hash, data_hash, select_neighbors, verification_hash, verify_path,
};

/// number of sibling levels needed above `leaves` leaves
pub fn tree_height(leaves: usize) -> usize {
    if leaves <= 1 {
        0
    } else {
        (usize::BITS - (leaves - 1).leading_zeros()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_height() {
        assert_eq!(tree_height(1), 0);
        assert_eq!(tree_height(2), 1);
        assert_eq!(tree_height(3), 2);
        assert_eq!(tree_height(8), 3);
        assert_eq!(tree_height(12), 4);
        assert_eq!(tree_height(16), 4);
        assert_eq!(tree_height(17), 5);
    }
}
