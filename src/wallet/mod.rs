use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};

use crate::error::NodeError;

/// Generate a new secp256k1 keypair and return (priv_hex, pub_hex_compressed).
/// The compressed public key hex doubles as the account address.
pub fn generate_keypair_hex() -> (String, String) {
    let secp = Secp256k1::new();
    let (sk, pk) = secp.generate_keypair(&mut OsRng);
    (hex::encode(sk.secret_bytes()), hex::encode(pk.serialize()))
}

/// Normalize a hex public key to the lowercase compressed address form.
pub fn pubkey_to_address_hex(pubkey_hex: &str) -> Result<String, &'static str> {
    let bytes = hex::decode(pubkey_hex).map_err(|_| "invalid pubkey hex")?;
    let pk = PublicKey::from_slice(&bytes).map_err(|_| "invalid pubkey bytes")?;
    Ok(hex::encode(pk.serialize()))
}

/// Verify a signature (hex DER) against the given pubkey (hex, compressed) and message hash.
/// Any malformed component is an `Err`, never a panic.
pub fn verify_signature_hex(
    pubkey_hex: &str,
    sig_hex: &str,
    msg32: [u8; 32],
) -> Result<bool, &'static str> {
    let secp = Secp256k1::verification_only();

    let sig_bytes = hex::decode(sig_hex).map_err(|_| "invalid signature hex")?;
    let sig = Signature::from_der(&sig_bytes).map_err(|_| "invalid DER signature")?;

    let pk_bytes = hex::decode(pubkey_hex).map_err(|_| "invalid pubkey hex")?;
    let pk = PublicKey::from_slice(&pk_bytes).map_err(|_| "invalid pubkey bytes")?;

    let msg = Message::from_digest_slice(&msg32).map_err(|_| "invalid message length")?;
    Ok(secp.verify_ecdsa(&msg, &sig, &pk).is_ok())
}

/// The node's own signing identity.
#[derive(Clone)]
pub struct Wallet {
    secret: SecretKey,
    address: String,
}

impl Wallet {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut OsRng);
        Self {
            secret,
            address: hex::encode(public.serialize()),
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, NodeError> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|_| NodeError::Key("secret key is not hex"))?;
        let secret =
            SecretKey::from_slice(&bytes).map_err(|_| NodeError::Key("secret key out of range"))?;
        let public = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret);
        Ok(Self {
            secret,
            address: hex::encode(public.serialize()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign a 32-byte digest, returning hex DER.
    pub fn sign(&self, msg32: [u8; 32]) -> String {
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest(msg32);
        hex::encode(secp.sign_ecdsa(&msg, &self.secret).serialize_der())
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet").field("address", &self.address).finish()
    }
}
