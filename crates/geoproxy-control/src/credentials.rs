//! Per-instance proxy credential generation

use geoproxy_backend::ProxyCredentials;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Issues a fresh random username/password pair per instance.
///
/// Alphanumeric only, so the credentials drop straight into the
/// userinfo component of a proxy URL without any escaping. `thread_rng`
/// is a CSPRNG, which is what shared-proxy credentials need.
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    length: usize,
}

impl CredentialIssuer {
    pub fn new() -> Self {
        Self { length: 16 }
    }

    fn random_token(&self) -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }

    /// Generate a credentials pair, independent of every earlier pair
    pub fn issue(&self) -> ProxyCredentials {
        ProxyCredentials {
            username: self.random_token(),
            password: self.random_token(),
        }
    }
}

impl Default for CredentialIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn credentials_are_alphanumeric_and_sized() {
        let creds = CredentialIssuer::new().issue();
        assert_eq!(creds.username.len(), 16);
        assert_eq!(creds.password.len(), 16);
        assert!(creds.username.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(creds.password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn issued_pairs_do_not_repeat() {
        let issuer = CredentialIssuer::new();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let creds = issuer.issue();
            assert_ne!(creds.username, creds.password);
            assert!(seen.insert((creds.username, creds.password)));
        }
    }

    #[test]
    fn credentials_are_url_safe() {
        let creds = CredentialIssuer::new().issue();
        let url = creds.proxy_url("localhost:8888");
        // No characters that would need escaping in a basic-auth userinfo
        assert!(!url.contains(['%', '@'].as_ref()) || url.matches('@').count() == 1);
    }
}
