use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};
use crate::store::models::{PayoutData, PayoutTx};

const ADDRESS_PREFIX: &str = "xe_";
const ADDRESS_HEX_LEN: usize = 40;

/// Signs payout transactions on behalf of the payer wallet
pub trait TxSigner: Send + Sync {
    fn address(&self) -> &str;

    /// Return a copy of `tx` with hash and signature attached
    fn sign(&self, tx: &PayoutTx) -> AppResult<PayoutTx>;
}

/// Fields covered by the transaction hash, in canonical order
#[derive(Serialize)]
struct SigningPayload<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: u64,
    nonce: u64,
    timestamp: i64,
    data: &'a PayoutData,
}

fn digest(tx: &PayoutTx) -> AppResult<[u8; 32]> {
    let payload = serde_json::to_vec(&SigningPayload {
        sender: &tx.sender,
        recipient: &tx.recipient,
        amount: tx.amount,
        nonce: tx.nonce,
        timestamp: tx.timestamp,
        data: &tx.data,
    })?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(&payload));
    Ok(out)
}

/// Derive the XE address of a public key
pub fn address_of(key: &VerifyingKey) -> String {
    let hash = Sha256::digest(key.as_bytes());
    format!("{}{}", ADDRESS_PREFIX, hex::encode(&hash[..20]))
}

/// Ed25519 signer holding the payer's private key
pub struct Ed25519Signer {
    key: SigningKey,
    address: String,
}

impl Ed25519Signer {
    /// Load a signing key from a 32-byte hex seed
    pub fn from_hex(private_key: &str) -> AppResult<Self> {
        let bytes = hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|e| AppError::Signing(format!("invalid private key: {}", e)))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AppError::Signing("private key must be 32 bytes".to_string()))?;

        let key = SigningKey::from_bytes(&seed);
        let address = address_of(&key.verifying_key());
        Ok(Self { key, address })
    }
}

impl TxSigner for Ed25519Signer {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, tx: &PayoutTx) -> AppResult<PayoutTx> {
        let hash = digest(tx)?;
        let signature = self.key.sign(&hash);

        let mut signed = tx.clone();
        signed.hash = Some(hex::encode(hash));
        signed.signature = Some(hex::encode(signature.to_bytes()));
        Ok(signed)
    }
}

/// Non-empty hex string of whole bytes
pub fn validate_hex(value: &str) -> bool {
    !value.is_empty() && hex::decode(value).is_ok()
}

/// `xe_` followed by 40 hex characters
pub fn validate_address(value: &str) -> bool {
    match value.strip_prefix(ADDRESS_PREFIX) {
        Some(rest) => rest.len() == ADDRESS_HEX_LEN && validate_hex(rest),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Winner;
    use ed25519_dalek::{Signature, Verifier};

    fn verify(tx: &PayoutTx, key: &VerifyingKey) -> AppResult<bool> {
        let (Some(hash), Some(signature)) = (&tx.hash, &tx.signature) else {
            return Ok(false);
        };
        let expected = digest(tx)?;
        if hex::encode(expected) != *hash {
            return Ok(false);
        }

        let bytes = hex::decode(signature)
            .map_err(|e| AppError::Signing(format!("invalid signature encoding: {}", e)))?;
        let bytes: [u8; 64] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AppError::Signing("signature must be 64 bytes".to_string()))?;

        Ok(key.verify(&expected, &Signature::from_bytes(&bytes)).is_ok())
    }

    const SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn draft() -> PayoutTx {
        let winner = Winner {
            hash: "00ab".to_string(),
            recipient: "xe_0000000000000000000000000000000000000001".to_string(),
            amount: 500,
        };
        PayoutTx::unsigned(&winner, "", 1_700_000_000_000, "Lottery Winnings May 2023".into())
    }

    #[test]
    fn test_signed_tx_verifies() {
        let signer = Ed25519Signer::from_hex(SEED).unwrap();
        let mut tx = draft();
        tx.sender = signer.address().to_string();
        tx.nonce = 7;

        let signed = signer.sign(&tx).unwrap();
        assert!(signed.hash.is_some() && signed.signature.is_some());
        assert!(verify(&signed, &signer.key.verifying_key()).unwrap());

        let mut tampered = signed.clone();
        tampered.amount = 501;
        assert!(!verify(&tampered, &signer.key.verifying_key()).unwrap());
    }

    #[test]
    fn test_signer_address_is_valid() {
        let signer = Ed25519Signer::from_hex(SEED).unwrap();
        assert!(validate_address(signer.address()));
    }

    #[test]
    fn test_rejects_short_key() {
        assert!(matches!(
            Ed25519Signer::from_hex("abcd"),
            Err(AppError::Signing(_))
        ));
    }

    #[test]
    fn test_validators() {
        assert!(validate_hex("00ff"));
        assert!(!validate_hex(""));
        assert!(!validate_hex("abc"));
        assert!(!validate_hex("zz"));

        assert!(validate_address("xe_ED9e05C9c85Ec8c46c333111a1C19035b5ECba99"));
        assert!(!validate_address("ED9e05C9c85Ec8c46c333111a1C19035b5ECba99"));
        assert!(!validate_address("xe_ED9e05C9"));
    }
}
