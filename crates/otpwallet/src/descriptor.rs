//! the on-chain authentication descriptor
//!
//! `Core` is what the ledger stores for a tree: its root plus enough timing
//! information to map the current time to a leaf index. times are counted in
//! intervals: `t0` is the first interval, `lifespan` the number of intervals.

use otp_merkle::{Hash, InnerTree, TreeParams};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// 20-byte account address
pub type Address = [u8; 20];

/// left-pad a big-endian scalar to a 32-byte word
pub fn word(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

/// read the 32-byte word at `*offset`, advancing it
pub fn read_word(data: &[u8], offset: &mut usize) -> Result<[u8; 32]> {
    let end = *offset + 32;
    let slice = data
        .get(*offset..end)
        .ok_or_else(|| Error::Serialization(format!("truncated word at byte {}", *offset)))?;
    *offset = end;
    let mut out = [0u8; 32];
    out.copy_from_slice(slice);
    Ok(out)
}

/// scalar value of a word whose top 16 bytes are zero
pub fn word_value(word: &[u8; 32]) -> Result<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(Error::Serialization("word exceeds 128 bits".into()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

pub fn address_word(address: &Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address);
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Core {
    #[serde(with = "crate::serde_hex::array")]
    pub root: Hash,
    pub height: u8,
    /// seconds
    pub interval: u32,
    pub t0: u32,
    pub lifespan: u32,
    pub slot_size: u16,
}

impl Core {
    /// descriptor of the primary tree built from `params`
    pub fn for_tree(tree: &InnerTree, params: &TreeParams) -> Result<Self> {
        Self::build(
            tree,
            params.interval_ms,
            params.t0(),
            params.lifespan(),
            params.slot_size,
        )
    }

    /// descriptor of an inner tree: one leaf per window of `inner_trees` intervals
    pub fn for_inner_tree(tree: &InnerTree, params: &TreeParams) -> Result<Self> {
        let window = params.inner_trees as u64;
        if window == 0 {
            return Err(Error::Config("wallet has no inner trees".into()));
        }
        Self::build(
            tree,
            params.interval_ms * window,
            params.t0() / window,
            params.lifespan() / window,
            1,
        )
    }

    fn build(tree: &InnerTree, interval_ms: u64, t0: u64, lifespan: u64, slot_size: usize) -> Result<Self> {
        let overflow = |what: &str| Error::Config(format!("{what} does not fit the core descriptor"));
        if interval_ms % 1000 != 0 {
            return Err(Error::Config(format!("interval {interval_ms}ms is not whole seconds")));
        }
        Ok(Self {
            root: tree.root(),
            height: u8::try_from(tree.height()).map_err(|_| overflow("height"))?,
            interval: u32::try_from(interval_ms / 1000).map_err(|_| overflow("interval"))?,
            t0: u32::try_from(t0).map_err(|_| overflow("t0"))?,
            lifespan: u32::try_from(lifespan).map_err(|_| overflow("lifespan"))?,
            slot_size: u16::try_from(slot_size).map_err(|_| overflow("slot size"))?,
        })
    }

    /// reject descriptors no leaf index can be derived from
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 || self.lifespan == 0 || self.slot_size == 0 {
            return Err(Error::Config(format!(
                "degenerate core: interval {}s, lifespan {}, slot size {}",
                self.interval, self.lifespan, self.slot_size
            )));
        }
        Ok(())
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval as u64 * 1000
    }

    pub fn total_leaves(&self) -> usize {
        self.lifespan as usize * self.slot_size as usize
    }

    /// interval counter at `time_ms`
    pub fn counter_at(&self, time_ms: u64) -> u64 {
        time_ms / self.interval_ms()
    }

    /// whether `time_ms` falls inside `[t0, t0 + lifespan)`
    pub fn is_active(&self, time_ms: u64) -> bool {
        let counter = self.counter_at(time_ms);
        counter >= self.t0 as u64 && counter < self.t0 as u64 + self.lifespan as u64
    }

    /// leaf index for operation `nonce` of the interval containing `time_ms`
    pub fn index_at(&self, time_ms: u64, nonce: u16) -> Option<u32> {
        if !self.is_active(time_ms) || nonce >= self.slot_size {
            return None;
        }
        let slot = self.counter_at(time_ms) - self.t0 as u64;
        u32::try_from(slot * self.slot_size as u64 + nonce as u64).ok()
    }

    /// unix ms at which the last interval ends
    pub fn expires_at_ms(&self) -> u64 {
        (self.t0 as u64 + self.lifespan as u64) * self.interval_ms()
    }

    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }

    /// inverse of [`Core::encode_words`]
    pub fn decode_words(data: &[u8], offset: &mut usize) -> Result<Self> {
        fn narrow<T: TryFrom<u128>>(value: u128, what: &str) -> Result<T> {
            T::try_from(value).map_err(|_| Error::Serialization(format!("{what} out of range")))
        }
        let root = read_word(data, offset)?;
        Ok(Self {
            root,
            height: narrow(word_value(&read_word(data, offset)?)?, "height")?,
            interval: narrow(word_value(&read_word(data, offset)?)?, "interval")?,
            t0: narrow(word_value(&read_word(data, offset)?)?, "t0")?,
            lifespan: narrow(word_value(&read_word(data, offset)?)?, "lifespan")?,
            slot_size: narrow(word_value(&read_word(data, offset)?)?, "slot size")?,
        })
    }

    /// six 32-byte words in field order
    pub fn encode_words(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.root);
        out.extend_from_slice(&word(self.height as u128));
        out.extend_from_slice(&word(self.interval as u128));
        out.extend_from_slice(&word(self.t0 as u128));
        out.extend_from_slice(&word(self.lifespan as u128));
        out.extend_from_slice(&word(self.slot_size as u128));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otp_merkle::{compute_tree, Sha256Hasher};

    const INTERVAL: u64 = 30_000;
    const EFFECTIVE: u64 = 56_666_667 * INTERVAL;

    fn params() -> TreeParams {
        TreeParams::new(vec![1u8; 20], [2u8; 32], EFFECTIVE, INTERVAL * 12).with_inner_trees(3)
    }

    #[test]
    fn test_core_from_tree() {
        let p = params();
        let tree = compute_tree(&p, &Sha256Hasher, &mut |_| {}, &|| false).unwrap();
        let core = Core::for_tree(&tree.tree, &p).unwrap();
        assert_eq!(core.root, tree.root());
        assert_eq!(core.height, 4);
        assert_eq!(core.interval, 30);
        assert_eq!(core.t0, 56_666_667);
        assert_eq!(core.lifespan, 12);
        assert_eq!(core.total_leaves(), 12);

        let inner = Core::for_inner_tree(&tree.inner_trees[0], &p).unwrap();
        assert_eq!(inner.interval, 90);
        assert_eq!(inner.lifespan, 4);
        assert_eq!(inner.height, 2);
    }

    #[test]
    fn test_index_window() {
        let core = Core {
            root: [0u8; 32],
            height: 4,
            interval: 30,
            t0: 100,
            lifespan: 12,
            slot_size: 2,
        };
        assert_eq!(core.index_at(100 * INTERVAL, 0), Some(0));
        assert_eq!(core.index_at(103 * INTERVAL + 29_999, 1), Some(7));
        assert_eq!(core.index_at(99 * INTERVAL, 0), None);
        assert_eq!(core.index_at(112 * INTERVAL, 0), None);
        assert_eq!(core.index_at(100 * INTERVAL, 2), None);
        assert_eq!(core.expires_at_ms(), 112 * INTERVAL);
        assert!(core.validate().is_ok());
        assert!(Core { slot_size: 0, ..core.clone() }.validate().is_err());
        assert!(Core { interval: 0, ..core }.validate().is_err());
    }

    #[test]
    fn test_words() {
        assert_eq!(word(0x0102)[30..], [1, 2]);
        assert!(word(0x0102)[..30].iter().all(|b| *b == 0));
        let addr = [0xaau8; 20];
        let w = address_word(&addr);
        assert_eq!(&w[12..], &addr);
        assert_eq!(&w[..12], &[0u8; 12]);

        let core = Core { root: [5u8; 32], height: 1, interval: 30, t0: 2, lifespan: 3, slot_size: 1 };
        let mut out = Vec::new();
        core.encode_words(&mut out);
        assert_eq!(out.len(), 6 * 32);
        assert_eq!(&out[..32], &[5u8; 32]);
        assert_eq!(out[32 * 3 + 31], 2);

        let mut offset = 0;
        assert_eq!(Core::decode_words(&out, &mut offset).unwrap(), core);
        assert_eq!(offset, out.len());
        let mut offset = 0;
        assert!(Core::decode_words(&out[..100], &mut offset).is_err());
    }

    #[test]
    fn test_core_json_uses_hex_root() {
        let core = Core { root: [0xab; 32], height: 1, interval: 30, t0: 2, lifespan: 3, slot_size: 1 };
        let json = serde_json::to_string(&core).unwrap();
        assert!(json.contains(&"ab".repeat(32)));
        let back: Core = serde_json::from_str(&json).unwrap();
        assert_eq!(back, core);
    }
}
