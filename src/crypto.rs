//! Sealed-box encryption of stored objects.
//!
//! Every object is sealed to the repository's X25519 public key with a fresh
//! ephemeral key, so writing only needs the public half. The symmetric key
//! is derived from the shared secret and both public keys with BLAKE3, and
//! the object id is bound as associated data.
//!
//! Wire form: `[ephemeral public key (32)][ciphertext || tag (16)]`.

use std::{fmt, fs, io, path::Path};

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;

pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

const SEAL_CONTEXT: &str = "cairn 2026-10-19 sealed object key";

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "hex::serde")] [u8; KEY_LEN]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

#[derive(Clone)]
pub struct PrivateKey {
    secret: StaticSecret,
}

impl PrivateKey {
    pub fn generate() -> Self {
        PrivateKey {
            secret: StaticSecret::random_from_rng(rand::rngs::OsRng),
        }
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        PrivateKey {
            secret: StaticSecret::from(bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.secret.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(*x25519_dalek::PublicKey::from(&self.secret).as_bytes())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let bytes = <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("key file must hold {KEY_LEN} bytes, found {}", bytes.len()),
            )
        })?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

fn cipher_for(
    shared: &[u8; KEY_LEN],
    ephemeral: &[u8; KEY_LEN],
    recipient: &[u8; KEY_LEN],
) -> ChaCha20Poly1305 {
    let mut material = [0u8; KEY_LEN * 3];
    material[..KEY_LEN].copy_from_slice(shared);
    material[KEY_LEN..KEY_LEN * 2].copy_from_slice(ephemeral);
    material[KEY_LEN * 2..].copy_from_slice(recipient);

    let key = blake3::derive_key(SEAL_CONTEXT, &material);
    ChaCha20Poly1305::new(&key.into())
}

// The derived key is never reused, so a fixed nonce is sufficient.
fn nonce() -> Nonce {
    Nonce::default()
}

pub fn seal(recipient: &PublicKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, String> {
    let ephemeral = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = *x25519_dalek::PublicKey::from(&ephemeral).as_bytes();
    let shared = ephemeral.diffie_hellman(&x25519_dalek::PublicKey::from(recipient.0));

    let cipher = cipher_for(shared.as_bytes(), &ephemeral_public, &recipient.0);
    let ciphertext = cipher
        .encrypt(&nonce(), Payload { msg: plaintext, aad })
        .map_err(|e| format!("seal: {e}"))?;

    let mut out = Vec::with_capacity(KEY_LEN + ciphertext.len());
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn open(key: &PrivateKey, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, String> {
    if sealed.len() < KEY_LEN + TAG_LEN {
        return Err(format!("sealed data too short ({} bytes)", sealed.len()));
    }
    let (ephemeral_public, ciphertext) = sealed.split_at(KEY_LEN);
    let ephemeral_public: [u8; KEY_LEN] = ephemeral_public
        .try_into()
        .map_err(|_| "invalid ephemeral key".to_string())?;

    let shared = key
        .secret
        .diffie_hellman(&x25519_dalek::PublicKey::from(ephemeral_public));
    let recipient = key.public_key();

    let cipher = cipher_for(shared.as_bytes(), &ephemeral_public, &recipient.0);
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    cipher
        .decrypt(&nonce(), payload)
        .map_err(|_| "authentication failed: wrong key or corrupted data".to_string())
}
