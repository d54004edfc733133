//! Credential envelope: AES-256-GCM sealing keyed by an Argon2id-derived
//! key. No pack file uses this pair directly; this follows the crates'
//! own documented usage (nonce-per-message, salt stored alongside the
//! ciphertext) rather than any example's bespoke wrapper.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use rand::RngCore;

const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// `salt || nonce || ciphertext`, the on-disk representation of
/// `Shop.encrypted_secret` and friends.
pub struct Envelope;

impl Envelope {
    pub fn seal(process_secret: &str, plaintext: &str) -> anyhow::Result<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let key_bytes = derive_key(process_secret, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("envelope seal failed: {e}"))?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(process_secret: &str, envelope: &[u8]) -> anyhow::Result<String> {
        if envelope.len() < SALT_LEN + NONCE_LEN {
            anyhow::bail!("envelope too short");
        }
        let (salt, rest) = envelope.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let key_bytes = derive_key(process_secret, salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("envelope open failed: {e}"))?;
        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("envelope was not valid utf-8: {e}"))
    }
}

fn derive_key(process_secret: &str, salt: &[u8]) -> anyhow::Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(process_secret.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("key derivation failed: {e}"))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_roundtrips() {
        let sealed = Envelope::seal("process-secret-at-least-16b", "super-secret-token").unwrap();
        let opened = Envelope::open("process-secret-at-least-16b", &sealed).unwrap();
        assert_eq!(opened, "super-secret-token");
    }

    #[test]
    fn wrong_secret_fails_to_open() {
        let sealed = Envelope::seal("process-secret-at-least-16b", "super-secret-token").unwrap();
        assert!(Envelope::open("a-completely-different-secret!!", &sealed).is_err());
    }
}
