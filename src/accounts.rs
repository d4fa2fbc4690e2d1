//! File-backed account store with PBKDF2-SHA256 password verifiers.
//!
//! The whole store is one JSON map of username to `{salt, hash}` (hex).
//! Writes go to a temp file and rename over the original, so a crash never
//! leaves a half-written store. An unreadable store is treated as empty:
//! callers see "unknown user" rather than an internal error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const PBKDF2_ROUNDS: u32 = 150_000;
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    salt: String,
    hash: String,
}

/// Username → password-verifier store. Loaded per call; the mutex only
/// serializes the read-modify-write in `create`.
pub struct PasswordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl PasswordStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn exists(&self, username: &str) -> bool {
        self.load().contains_key(username)
    }

    /// Create an account. The caller has already checked `exists`; a race
    /// losing here surfaces as the later write winning, matching the
    /// best-effort uniqueness contract.
    pub fn create(&self, username: &str, password: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut users = self.load();
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = derive(password, &salt);
        users.insert(
            username.to_string(),
            StoredUser {
                salt: hex::encode(salt),
                hash: hex::encode(hash),
            },
        );
        self.save(&users)
    }

    pub fn verify(&self, username: &str, attempt: &str) -> bool {
        let users = self.load();
        let Some(entry) = users.get(username) else {
            return false;
        };
        let Ok(salt) = hex::decode(&entry.salt) else {
            return false;
        };
        hex::encode(derive(attempt, &salt)) == entry.hash
    }

    fn load(&self) -> HashMap<String, StoredUser> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Account store unreadable, treating as empty: {e}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    /// Atomic replace: write to `<path>.tmp`, then rename over the original.
    fn save(&self, users: &HashMap<String, StoredUser>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let raw = serde_json::to_string_pretty(users)?;
        fs::write(&tmp, raw)
            .with_context(|| format!("Failed to write account store: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace account store: {}", self.path.display()))?;
        Ok(())
    }
}

fn derive(password: &str, salt: &[u8]) -> [u8; 32] {
    pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(password.as_bytes(), salt, PBKDF2_ROUNDS)
}
