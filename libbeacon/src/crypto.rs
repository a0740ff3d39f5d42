//! The crypto collaborator.
//!
//! Everything that needs a cryptographic primitive goes through [`CryptoProvider`], so that hosts can plug in their
//! own implementation (e.g. a hardware-backed one). [`DefaultCrypto`] is the software implementation:
//!
//! - Identity keys are Ed25519, derived from `blake2b-256(seed)`.
//! - Addresses are Tezos-style `tz1` addresses: `base58check(06a19f || blake2b-160(public key))`.
//! - Peer-to-peer payloads are sealed with AES-256-GCM under a session key derived from the X25519 Diffie-Hellman of
//!   the two identity keys (converted to Montgomery form). Wire format: `nonce(12) || ciphertext || tag(16)`.
//! - Channel-opening payloads, sent before the recipient knows who we are, use an anonymous sealed box built from an
//!   ephemeral X25519 key. Wire format: `ephemeral public key(32) || nonce(12) || ciphertext || tag(16)`.

use crate::errors::CryptoError;
use crate::types::Network;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use blake2::digest::consts::{U20, U32};
use blake2::{Blake2b, Digest};
use curve25519_dalek::montgomery::MontgomeryPoint;
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::fmt::{Debug, Formatter};
use zeroize::Zeroizing;

type Blake2b160 = Blake2b<U20>;
type Blake2b256 = Blake2b<U32>;

const TZ1_PREFIX: [u8; 3] = [6, 161, 159];
const EDPK_PREFIX: [u8; 4] = [13, 15, 37, 217];
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// An Ed25519 identity keypair.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self { signing_key: SigningKey::from_bytes(secret) }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The public key as lowercase hex. This is the client's `beaconId` / `senderId` source.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    fn x25519_secret(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_scalar_bytes())
    }

    fn x25519_public(&self) -> MontgomeryPoint {
        self.signing_key.verifying_key().to_montgomery()
    }
}

impl Debug for KeyPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.public_key_hex())
    }
}

pub trait CryptoProvider: Send + Sync {
    /// Deterministically derives an identity keypair from a persisted seed.
    fn keypair_from_seed(&self, seed: &str) -> KeyPair;

    /// Derives the account address for a public key, given either as 64 hex characters or as an `edpk` string.
    fn address_from_public_key(&self, public_key: &str) -> Result<String, CryptoError>;

    /// A short content hash of the address and network, used as the key for stored accounts and grants.
    fn account_identifier(&self, address: &str, network: &Network) -> String;

    /// The hash of a public key, used as its relay inbox address.
    fn public_key_hash(&self, public_key: &str) -> Result<String, CryptoError>;

    /// Encrypts `plaintext` so only the holder of `peer_public_key` (or us) can read it.
    fn encrypt_for_peer(
        &self,
        keypair: &KeyPair,
        peer_public_key: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn decrypt_from_peer(
        &self,
        keypair: &KeyPair,
        peer_public_key: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Anonymously encrypts `plaintext` for `peer_public_key`. The sender is not authenticated.
    fn seal_for(&self, peer_public_key: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn open_sealed(&self, keypair: &KeyPair, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCrypto;

impl DefaultCrypto {
    fn session_key(keypair: &KeyPair, peer: &VerifyingKey) -> Zeroizing<[u8; KEY_LEN]> {
        let shared = peer.to_montgomery().mul_clamped(*keypair.x25519_secret());
        let ours = keypair.public_key();
        let theirs = peer.to_bytes();
        let (lo, hi) = if ours <= theirs { (ours, theirs) } else { (theirs, ours) };
        let mut hasher = Blake2b256::new();
        hasher.update(shared.as_bytes());
        hasher.update(lo);
        hasher.update(hi);
        Zeroizing::new(hasher.finalize().into())
    }

    fn sealed_box_key(
        shared: &MontgomeryPoint,
        ephemeral: &MontgomeryPoint,
        recipient: &MontgomeryPoint,
    ) -> Zeroizing<[u8; KEY_LEN]> {
        let mut hasher = Blake2b256::new();
        hasher.update(shared.as_bytes());
        hasher.update(ephemeral.as_bytes());
        hasher.update(recipient.as_bytes());
        Zeroizing::new(hasher.finalize().into())
    }
}

impl CryptoProvider for DefaultCrypto {
    fn keypair_from_seed(&self, seed: &str) -> KeyPair {
        let secret: Zeroizing<[u8; 32]> = Zeroizing::new(Blake2b256::digest(seed.as_bytes()).into());
        KeyPair::from_secret_bytes(&secret)
    }

    fn address_from_public_key(&self, public_key: &str) -> Result<String, CryptoError> {
        let key = parse_public_key(public_key)?;
        let hash = Blake2b160::digest(key);
        let mut payload = TZ1_PREFIX.to_vec();
        payload.extend_from_slice(&hash);
        Ok(bs58::encode(payload).with_check().into_string())
    }

    fn account_identifier(&self, address: &str, network: &Network) -> String {
        let mut data = vec![address.to_string(), network.network_type.to_string()];
        if let Some(name) = &network.name {
            data.push(format!("name:{name}"));
        }
        if let Some(rpc_url) = &network.rpc_url {
            data.push(format!("rpc:{rpc_url}"));
        }
        let hash = Blake2b256::digest(data.join("-").as_bytes());
        bs58::encode(&hash[..10]).with_check().into_string()
    }

    fn public_key_hash(&self, public_key: &str) -> Result<String, CryptoError> {
        let key = parse_public_key(public_key)?;
        Ok(hex::encode(Blake2b256::digest(key)))
    }

    fn encrypt_for_peer(
        &self,
        keypair: &KeyPair,
        peer_public_key: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let peer = verifying_key(peer_public_key)?;
        let key = Self::session_key(keypair, &peer);
        aes_encrypt(&key, plaintext)
    }

    fn decrypt_from_peer(
        &self,
        keypair: &KeyPair,
        peer_public_key: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let peer = verifying_key(peer_public_key)?;
        let key = Self::session_key(keypair, &peer);
        aes_decrypt(&key, ciphertext)
    }

    fn seal_for(&self, peer_public_key: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let recipient = verifying_key(peer_public_key)?.to_montgomery();
        let ephemeral_secret = Zeroizing::new(rand::random::<[u8; 32]>());
        let ephemeral = MontgomeryPoint::mul_base_clamped(*ephemeral_secret);
        let shared = recipient.mul_clamped(*ephemeral_secret);
        let key = Self::sealed_box_key(&shared, &ephemeral, &recipient);
        let mut out = ephemeral.to_bytes().to_vec();
        out.extend(aes_encrypt(&key, plaintext)?);
        Ok(out)
    }

    fn open_sealed(&self, keypair: &KeyPair, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < 32 + NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (eph, rest) = ciphertext.split_at(32);
        let mut eph_bytes = [0u8; 32];
        eph_bytes.copy_from_slice(eph);
        let ephemeral = MontgomeryPoint(eph_bytes);
        let shared = ephemeral.mul_clamped(*keypair.x25519_secret());
        let key = Self::sealed_box_key(&shared, &ephemeral, &keypair.x25519_public());
        aes_decrypt(&key, rest)
    }
}

/// Accepts a public key as 64 hex characters or as a base58check `edpk` string.
pub fn parse_public_key(public_key: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = if public_key.starts_with("edpk") {
        let decoded = bs58::decode(public_key).with_check(None).into_vec()?;
        match decoded.strip_prefix(&EDPK_PREFIX[..]) {
            Some(key) => key.to_vec(),
            None => return Err(CryptoError::InvalidPublicKey(public_key.to_string())),
        }
    } else {
        hex::decode(public_key)?
    };
    bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey(public_key.to_string()))
}

fn verifying_key(public_key: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = parse_public_key(public_key)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey(public_key.to_string()))
}

fn aes_encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.into());
    let nonce_bytes = rand::random::<[u8; NONCE_LEN]>();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|_| CryptoError::Encryption)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn aes_decrypt(key: &[u8; KEY_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < NONCE_LEN {
        return Err(CryptoError::Truncated);
    }
    let (nonce_bytes, ct) = ciphertext.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.into());
    cipher.decrypt(Nonce::from_slice(nonce_bytes), ct).map_err(|_| CryptoError::Decryption)
}
