use std::collections::HashMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use parking_lot::RwLock;

use crate::api::UserId;

/// Logged in sessions, keyed by the token stored in the session cookie
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, UserId>>,
}

impl SessionStore {
    /// Starts a new session and returns its token
    pub fn create(&self, user_id: UserId) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.sessions.write().insert(token.clone(), user_id);
        token
    }

    pub fn user(&self, token: &str) -> Option<UserId> {
        self.sessions.read().get(token).copied()
    }

    /// Returns the user that was logged in with the token
    pub fn remove(&self, token: &str) -> Option<UserId> {
        self.sessions.write().remove(token)
    }
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow::anyhow!("Failed to hash password: {}", err))
}

/// False for a wrong password as well as for a malformed stored hash
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed_hash) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok(),
        Err(err) => {
            tracing::error!("Stored password hash is malformed: {}", err);
            false
        }
    }
}
