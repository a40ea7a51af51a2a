//! Wallet signing and CLOB authentication.
//!
//! One signer per key lives in a process-wide cache, so the order path never
//! re-parses the key. Orders and authenticated balance queries both sign
//! through [`cached_signer`].

use alloy::primitives::B256;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use polymarket_client_sdk::clob::types::SignatureType;
use reqwest::RequestBuilder;
use tracing::debug;

use crate::error::TradingError;
use crate::metrics;

/// Keyed by a hash of the private key, never the key itself.
static SIGNERS: Lazy<DashMap<u64, PrivateKeySigner>> = Lazy::new(DashMap::new);

fn key_fingerprint(private_key: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    private_key.trim_start_matches("0x").hash(&mut hasher);
    hasher.finish()
}

/// Wallet kind behind `POLYMARKET_SIGNATURE_TYPE`: 1 is a Magic.link proxy,
/// 2 a Gnosis Safe, anything else a plain EOA.
pub fn wallet_kind(signature_type: u8) -> SignatureType {
    match signature_type {
        1 => SignatureType::Proxy,
        2 => SignatureType::GnosisSafe,
        _ => SignatureType::Eoa,
    }
}

/// Parse a hex private key, with or without `0x`.
pub fn parse_signer(private_key: &str) -> Result<PrivateKeySigner, TradingError> {
    let raw = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(raw)
        .map_err(|e| TradingError::SigningError(format!("private key is not hex: {}", e)))?;
    let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        TradingError::SigningError(format!("private key must be 32 bytes, got {}", bytes.len()))
    })?;

    PrivateKeySigner::from_bytes(&B256::from(key))
        .map_err(|e| TradingError::SigningError(format!("invalid private key: {}", e)))
}

/// The cached signer for `private_key`, parsed on first use.
pub fn cached_signer(private_key: &str) -> Result<PrivateKeySigner, TradingError> {
    let fingerprint = key_fingerprint(private_key);
    if let Some(signer) = SIGNERS.get(&fingerprint) {
        return Ok(signer.clone());
    }

    let signer = parse_signer(private_key)?;
    debug!(address = ?signer.address(), "Cached signer");
    Ok(SIGNERS.entry(fingerprint).or_insert(signer).clone())
}

/// Checksummed wallet address for a private key.
pub fn address_from_private_key(private_key: &str) -> Result<String, TradingError> {
    Ok(format!("{:?}", parse_signer(private_key)?.address()))
}

/// Sign an order message, returning the raw 65-byte signature.
pub async fn sign_message(private_key: &str, message: &[u8]) -> Result<Vec<u8>, TradingError> {
    let _timer = metrics::timer_signing();
    let signature = cached_signer(private_key)?
        .sign_message(message)
        .await
        .map_err(|e| TradingError::SigningError(format!("order signing failed: {}", e)))?;
    Ok(signature.as_bytes().to_vec())
}

/// L1 headers proving ownership of the wallet for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub address: String,
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
}

impl AuthHeaders {
    /// Sign `polymarket:<unix millis>` with the cached signer.
    pub async fn sign(private_key: &str, signature_type: u8) -> Result<Self, TradingError> {
        let _timer = metrics::timer_signing();
        let signer = cached_signer(private_key)?;
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();

        let signature = signer
            .sign_message(format!("polymarket:{}", timestamp).as_bytes())
            .await
            .map_err(|e| TradingError::SigningError(format!("auth signing failed: {}", e)))?;

        let headers = Self {
            address: format!("{:?}", signer.address()),
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
            timestamp,
            nonce: "0".to_string(),
        };
        debug!(
            address = %headers.address,
            wallet = ?wallet_kind(signature_type),
            "Signed auth headers"
        );
        Ok(headers)
    }

    /// Attach the headers to an outgoing request.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("POLY_ADDRESS", &self.address)
            .header("POLY_SIGNATURE", &self.signature)
            .header("POLY_TIMESTAMP", &self.timestamp)
            .header("POLY_NONCE", &self.nonce)
    }
}
