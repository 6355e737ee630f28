//! wallet operations and their canonical encodings
//!
//! the same encoding is hashed into `params_hash` at commit and sent in the
//! clear at reveal, so field order and widths are fixed.

use otp_merkle::{data_hash, keccak256, Hash};
use serde::{Deserialize, Serialize};

use crate::descriptor::{address_word, read_word, word, word_value, Address, Core};
use crate::{Error, Result};

pub const OP_TRANSFER_TOKEN: u8 = 2;
pub const OP_TRANSFER: u8 = 4;
pub const OP_DISPLACE: u8 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TokenType {
    Erc20 = 0,
    Erc721 = 1,
    Erc1155 = 2,
    None = 3,
}

impl TokenType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Erc20),
            1 => Some(Self::Erc721),
            2 => Some(Self::Erc1155),
            3 => Some(Self::None),
            _ => None,
        }
    }
}

/// replacement authentication material carried by a displacement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Displacement {
    pub core: Core,
    pub inner_cores: Vec<Core>,
    #[serde(with = "crate::serde_hex::bytes")]
    pub identification_key: Vec<u8>,
}

impl Displacement {
    /// core words, inner core count, inner core words, key length, key bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 * (8 + 6 * self.inner_cores.len()) + self.identification_key.len());
        self.core.encode_words(&mut out);
        out.extend_from_slice(&word(self.inner_cores.len() as u128));
        for inner in &self.inner_cores {
            inner.encode_words(&mut out);
        }
        out.extend_from_slice(&word(self.identification_key.len() as u128));
        out.extend_from_slice(&self.identification_key);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut offset = 0;
        let core = Core::decode_words(data, &mut offset)?;
        let count = word_value(&read_word(data, &mut offset)?)? as usize;
        if count > data.len() / (6 * 32) {
            return Err(Error::Serialization(format!("implausible inner core count {count}")));
        }
        let inner_cores = (0..count)
            .map(|_| Core::decode_words(data, &mut offset))
            .collect::<Result<Vec<_>>>()?;
        let key_len = word_value(&read_word(data, &mut offset)?)? as usize;
        if data.len() - offset != key_len {
            return Err(Error::Serialization(format!(
                "identification key length {} does not match {} trailing bytes",
                key_len,
                data.len() - offset
            )));
        }
        Ok(Self {
            core,
            inner_cores,
            identification_key: data[offset..].to_vec(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Transfer {
        #[serde(with = "crate::serde_hex::array")]
        dest: Address,
        amount: u128,
    },
    TransferToken {
        token_type: TokenType,
        #[serde(with = "crate::serde_hex::array")]
        contract: Address,
        token_id: u128,
        #[serde(with = "crate::serde_hex::array")]
        dest: Address,
        amount: u128,
        #[serde(with = "crate::serde_hex::bytes")]
        data: Vec<u8>,
    },
    Displace(Displacement),
}

/// cleartext reveal tuple, in verifier argument order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealParams {
    pub operation_type: u8,
    pub token_type: TokenType,
    #[serde(with = "crate::serde_hex::array")]
    pub contract_address: Address,
    pub token_id: u128,
    #[serde(with = "crate::serde_hex::array")]
    pub dest: Address,
    pub amount: u128,
    #[serde(with = "crate::serde_hex::bytes")]
    pub data: Vec<u8>,
}

impl Operation {
    pub fn operation_type(&self) -> u8 {
        match self {
            Operation::Transfer { .. } => OP_TRANSFER,
            Operation::TransferToken { .. } => OP_TRANSFER_TOKEN,
            Operation::Displace(_) => OP_DISPLACE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Transfer { .. } => "transfer",
            Operation::TransferToken { .. } => "transfer_token",
            Operation::Displace(_) => "displace",
        }
    }

    /// hash committed alongside the commit hash
    pub fn params_hash(&self) -> Hash {
        match self {
            Operation::Transfer { dest, amount } => {
                keccak256(&[&address_word(dest)[..], &word(*amount)[..]])
            }
            Operation::TransferToken { token_type, contract, token_id, dest, amount, data } => {
                keccak256(&[
                    &word(OP_TRANSFER_TOKEN as u128)[..],
                    &word(*token_type as u8 as u128)[..],
                    &address_word(contract)[..],
                    &word(*token_id)[..],
                    &address_word(dest)[..],
                    &word(*amount)[..],
                    data.as_slice(),
                ])
            }
            Operation::Displace(displacement) => data_hash(&displacement.encode()),
        }
    }

    pub fn reveal_params(&self) -> RevealParams {
        let mut params = RevealParams {
            operation_type: self.operation_type(),
            token_type: TokenType::None,
            contract_address: [0u8; 20],
            token_id: 0,
            dest: [0u8; 20],
            amount: 0,
            data: Vec::new(),
        };
        match self {
            Operation::Transfer { dest, amount } => {
                params.dest = *dest;
                params.amount = *amount;
            }
            Operation::TransferToken { token_type, contract, token_id, dest, amount, data } => {
                params.token_type = *token_type;
                params.contract_address = *contract;
                params.token_id = *token_id;
                params.dest = *dest;
                params.amount = *amount;
                params.data = data.clone();
            }
            Operation::Displace(displacement) => {
                params.data = displacement.encode();
            }
        }
        params
    }
}

impl RevealParams {
    /// rebuild the operation a reveal describes; rejects unknown opcodes
    pub fn operation(&self) -> Result<Operation> {
        match self.operation_type {
            OP_TRANSFER => Ok(Operation::Transfer { dest: self.dest, amount: self.amount }),
            OP_TRANSFER_TOKEN => Ok(Operation::TransferToken {
                token_type: self.token_type,
                contract: self.contract_address,
                token_id: self.token_id,
                dest: self.dest,
                amount: self.amount,
                data: self.data.clone(),
            }),
            OP_DISPLACE => Ok(Operation::Displace(Displacement::decode(&self.data)?)),
            other => Err(Error::Serialization(format!("unknown operation type {other}"))),
        }
    }
}
