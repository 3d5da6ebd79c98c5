//! The OAuth token store boundary. Token *acquisition* (the `/oauth/generate-url`
//! flow) is an external collaborator's concern and out of scope here; this is
//! only the lookup contract the Auth Resolver depends on.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthToken {
    pub account_email: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OAuthUnavailable;

#[async_trait]
pub trait OAuthStore: Send + Sync {
    /// Looks up a token for a specific account, case-insensitively.
    async fn lookup_by_email(&self, email: &str) -> Result<OAuthToken, OAuthUnavailable>;

    /// No account pinned on the route entry: round-robin across whatever
    /// tokens are currently stored.
    async fn next_round_robin(&self) -> Result<OAuthToken, OAuthUnavailable>;
}

/// A fixed-at-construction token set. Real deployments would back this with
/// a refreshing store; the Lifecycle only ever sees the trait above.
pub struct InMemoryOAuthStore {
    tokens: Vec<OAuthToken>,
    cursor: AtomicUsize,
}

impl InMemoryOAuthStore {
    pub fn new(tokens: Vec<OAuthToken>) -> Self {
        Self {
            tokens,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Loads a flat list of `{account_email, access_token}` entries from a
    /// YAML file. The token *source* — refreshing, revocation, the
    /// `/oauth/generate-url` flow — is an external collaborator (§1); this
    /// only reads whatever keyed tokens it last wrote out.
    pub fn load_from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("read oauth tokens file {}: {err}", path.display()))?;
        let tokens: Vec<OAuthToken> = serde_yaml::from_str(&text)
            .map_err(|err| anyhow::anyhow!("parse oauth tokens file {}: {err}", path.display()))?;
        Ok(Self::new(tokens))
    }
}

#[async_trait]
impl OAuthStore for InMemoryOAuthStore {
    async fn lookup_by_email(&self, email: &str) -> Result<OAuthToken, OAuthUnavailable> {
        self.tokens
            .iter()
            .find(|t| t.account_email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(OAuthUnavailable)
    }

    async fn next_round_robin(&self) -> Result<OAuthToken, OAuthUnavailable> {
        if self.tokens.is_empty() {
            return Err(OAuthUnavailable);
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.tokens.len();
        Ok(self.tokens[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(email: &str, access_token: &str) -> OAuthToken {
        OAuthToken {
            account_email: email.to_string(),
            access_token: access_token.to_string(),
        }
    }

    #[tokio::test]
    async fn looks_up_by_email_case_insensitively() {
        let store = InMemoryOAuthStore::new(vec![token("U1@x", "T1"), token("u2@x", "T2")]);
        let found = store.lookup_by_email("u1@X").await.unwrap();
        assert_eq!(found.access_token, "T1");
    }

    #[tokio::test]
    async fn round_robins_across_tokens() {
        let store = InMemoryOAuthStore::new(vec![token("u1@x", "T1"), token("u2@x", "T2")]);
        let first = store.next_round_robin().await.unwrap();
        let second = store.next_round_robin().await.unwrap();
        let third = store.next_round_robin().await.unwrap();
        assert_eq!(first.access_token, "T1");
        assert_eq!(second.access_token, "T2");
        assert_eq!(third.access_token, "T1");
    }

    #[tokio::test]
    async fn empty_store_is_unavailable() {
        let store = InMemoryOAuthStore::new(vec![]);
        assert!(store.next_round_robin().await.is_err());
    }
}
