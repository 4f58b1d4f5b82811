//! Passphrase sealing for the file-backed credential store.
//!
//! A fresh salt and nonce are drawn for every write. The key is derived with
//! Argon2id and the value encrypted with ChaCha20-Poly1305.

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use super::StoreError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Encrypted value with the parameters needed to open it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], StoreError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StoreError::Crypto(e.to_string()))?;
    Ok(key)
}

pub fn seal(passphrase: &str, plaintext: &str) -> Result<Sealed, StoreError> {
    let mut rng = rand::thread_rng();
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| StoreError::Crypto(e.to_string()))?;

    Ok(Sealed {
        salt: salt.to_vec(),
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

pub fn open(passphrase: &str, sealed: &Sealed) -> Result<String, StoreError> {
    if sealed.nonce.len() != NONCE_LEN {
        return Err(StoreError::Crypto(format!(
            "nonce must be {} bytes, found {}",
            NONCE_LEN,
            sealed.nonce.len()
        )));
    }

    let key = derive_key(passphrase, &sealed.salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| StoreError::Crypto("wrong passphrase or tampered entry".to_string()))?;

    String::from_utf8(plaintext).map_err(|e| StoreError::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_then_open() {
        let sealed = seal("correct horse", "tok-1").unwrap();
        assert_ne!(sealed.ciphertext, b"tok-1".to_vec());
        assert_eq!(open("correct horse", &sealed).unwrap(), "tok-1");
    }

    #[test]
    fn test_each_seal_uses_fresh_salt_and_nonce() {
        let a = seal("pw", "tok-1").unwrap();
        let b = seal("pw", "tok-1").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let sealed = seal("right", "tok-1").unwrap();
        assert!(matches!(open("wrong", &sealed), Err(StoreError::Crypto(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut sealed = seal("pw", "tok-1").unwrap();
        sealed.ciphertext[0] ^= 0xff;
        assert!(open("pw", &sealed).is_err());

        let mut short_nonce = seal("pw", "tok-1").unwrap();
        short_nonce.nonce.truncate(4);
        assert!(open("pw", &short_nonce).is_err());
    }
}
