//! Reversible XOR obfuscation for the contacts file.
//!
//! This only keeps the file from being read casually. It is not encryption:
//! anyone with the passphrase (the packaged default is public) can reverse it,
//! and the digest suffix detects accidental corruption, not tampering.

use sha2::{Digest, Sha256};

pub const DIGEST_LEN: usize = 32;

#[derive(Clone)]
pub struct ObfuscationKey {
    keystream: [u8; 32],
}

impl ObfuscationKey {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let keystream: [u8; 32] = Sha256::digest(passphrase.as_bytes()).into();
        Self { keystream }
    }

    /// XOR `data` with the keystream. Applying it twice restores the input.
    pub fn apply(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, byte)| byte ^ self.keystream[i % self.keystream.len()])
            .collect()
    }

    /// Obfuscated bytes followed by the SHA-256 of those bytes.
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut sealed = self.apply(plaintext);
        let digest = Sha256::digest(&sealed);
        sealed.extend_from_slice(&digest);
        sealed
    }

    /// Inverse of [`seal`](Self::seal). `None` when the digest does not match.
    pub fn open(&self, sealed: &[u8]) -> Option<Vec<u8>> {
        if sealed.len() < DIGEST_LEN {
            return None;
        }
        let (body, stored) = sealed.split_at(sealed.len() - DIGEST_LEN);
        if Sha256::digest(body).as_slice() != stored {
            return None;
        }
        Some(self.apply(body))
    }
}

impl std::fmt::Debug for ObfuscationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ObfuscationKey([REDACTED])")
    }
}
