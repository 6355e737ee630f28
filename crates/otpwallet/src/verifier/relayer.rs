//! http client for a relayer
//!
//! the relayer submits transactions to the ledger on the wallet's behalf and
//! serves reads of the wallet contract. transport failures and 5xx responses
//! are retryable, 4xx responses are verifier rejections.

use async_trait::async_trait;
use otp_merkle::Hash;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::descriptor::{Address, Core};
use crate::operation::RevealParams;
use crate::verifier::{AuthParams, Commit, SpendingState, Verifier};
use crate::{Error, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitRequest {
    #[serde(with = "crate::serde_hex::array")]
    pub address: Address,
    #[serde(with = "crate::serde_hex::array")]
    pub hash: Hash,
    #[serde(with = "crate::serde_hex::array")]
    pub params_hash: Hash,
    #[serde(with = "crate::serde_hex::array")]
    pub verification_hash: Hash,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevealRequest {
    #[serde(with = "crate::serde_hex::array")]
    pub address: Address,
    pub auth: AuthParams,
    pub params: RevealParams,
}

/// relayer acknowledgement
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayerResponse {
    pub ok: bool,
    /// transaction hash, if one was submitted
    pub tx: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct NonceResponse {
    nonce: u32,
}

/// relayer-backed verifier for one wallet contract
pub struct RelayerClient {
    base_url: String,
    address: Address,
    http: reqwest::Client,
}

impl RelayerClient {
    pub fn new(base_url: impl Into<String>, address: Address) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            address,
            http: reqwest::Client::new(),
        }
    }

    /// local dev relayer
    pub fn localhost(address: Address) -> Self {
        Self::new("http://localhost:3001", address)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, path, hex::encode(self.address))
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let resp: RelayerResponse = Self::decode(resp).await?;
        if resp.ok {
            Ok(())
        } else {
            Err(Error::RejectedByVerifier(resp.error.unwrap_or_else(|| "rejected".into())))
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status == StatusCode::REQUEST_TIMEOUT {
            return Err(Error::Timeout(status.to_string()));
        }
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::RejectedByVerifier(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(Error::Network(status.to_string()));
        }
        resp.json().await.map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[async_trait]
impl Verifier for RelayerClient {
    async fn commit(&self, hash: Hash, params_hash: Hash, verification_hash: Hash) -> Result<()> {
        let req = CommitRequest { address: self.address, hash, params_hash, verification_hash };
        self.post("commit", &req).await
    }

    async fn reveal(&self, auth: AuthParams, params: RevealParams) -> Result<()> {
        let req = RevealRequest { address: self.address, auth, params };
        self.post("reveal", &req).await
    }

    async fn lookup_commit(&self, hash: Hash) -> Result<Vec<Commit>> {
        self.get(format!("{}/{}", self.url("lookup"), hex::encode(hash))).await
    }

    async fn core(&self) -> Result<Core> {
        self.get(self.url("core")).await
    }

    async fn inner_cores(&self) -> Result<Vec<Core>> {
        self.get(self.url("inner-cores")).await
    }

    async fn spending_state(&self) -> Result<SpendingState> {
        self.get(self.url("spending")).await
    }

    async fn nonce(&self) -> Result<u32> {
        let resp: NonceResponse = self.get(self.url("nonce")).await?;
        Ok(resp.nonce)
    }
}
