//! Staff credential checks against the `[[auth.users]]` config table.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::error::{BookdeskError, Result};

/// Hex SHA-256 of a password, the form stored in config.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compares without short-circuiting on the first differing byte.
fn digests_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// A username/password pair entered at a prompt or on the command line.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn verify(&self, auth: &AuthConfig) -> Result<()> {
        if auth.users.is_empty() {
            return Err(BookdeskError::auth(
                "No users configured; add [[auth.users]] entries to the config file",
            ));
        }

        let digest = hash_password(&self.password);
        let matched = auth.users.iter().any(|user| {
            user.username == self.username
                && digests_match(&user.password_sha256.to_ascii_lowercase(), &digest)
        });

        if matched {
            info!(user = %self.username, "authenticated");
            Ok(())
        } else {
            warn!(user = %self.username, "authentication failed");
            Err(BookdeskError::auth("Invalid username or password"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserEntry;

    fn config() -> AuthConfig {
        AuthConfig {
            users: vec![UserEntry {
                username: "librarian".into(),
                password_sha256: hash_password("shelf-42").to_uppercase(),
            }],
        }
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify() {
        assert!(Credentials::new("librarian", "shelf-42").verify(&config()).is_ok());

        let err = Credentials::new("librarian", "wrong").verify(&config()).unwrap_err();
        assert_eq!(err.category(), "Authentication Error");
        assert!(Credentials::new("someone", "shelf-42").verify(&config()).is_err());
    }

    #[test]
    fn test_no_users_configured() {
        let err = Credentials::new("a", "b")
            .verify(&AuthConfig::default())
            .unwrap_err();
        assert!(err.message().contains("No users configured"));
    }
}
