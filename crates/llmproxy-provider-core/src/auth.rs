//! Per-provider outgoing header construction (§4.1). A pure function over a
//! headers list plus the OAuth store: no retries, no provider mutation.

use http::HeaderMap;

use llmproxy_common::{AuthType, ProviderType, AUTH_VALUE_OAUTH, AUTH_VALUE_PASSTHROUGH};

use crate::oauth::{OAuthStore, OAuthUnavailable};
use crate::provider::Provider;

const CLAUDE_CODE_OFFICIAL: &str = "Claude Code Official";
const OAUTH_BETA_FLAG: &str = "oauth-2025-04-20";

const STRIPPED_HEADERS: &[&str] = &["authorization", "x-api-key", "host", "content-length"];

pub struct AuthResolver<'a> {
    oauth: &'a dyn OAuthStore,
}

impl<'a> AuthResolver<'a> {
    pub fn new(oauth: &'a dyn OAuthStore) -> Self {
        Self { oauth }
    }

    /// Builds the outgoing header set for a request routed to `provider`,
    /// given the client's original headers.
    pub async fn resolve(
        &self,
        provider: &Provider,
        original: &HeaderMap,
    ) -> Result<HeaderMap, OAuthUnavailable> {
        let mut headers = HeaderMap::new();
        for (name, value) in original.iter() {
            if STRIPPED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        if let Some(host) = provider_host(&provider.base_url) {
            insert_str(&mut headers, "host", &host);
        }
        if !headers.contains_key("content-type") {
            insert_str(&mut headers, "content-type", "application/json");
        }

        if provider.auth_value == AUTH_VALUE_PASSTHROUGH {
            if let Some(value) = original.get("authorization") {
                headers.insert("authorization", value.clone());
            }
            if let Some(value) = original.get("x-api-key") {
                headers.insert("x-api-key", value.clone());
            }
            if provider.is_anthropic() {
                insert_str(&mut headers, "anthropic-version", "2023-06-01");
            }
            return Ok(headers);
        }

        let secret = if provider.auth_value == AUTH_VALUE_OAUTH {
            let token = match provider.account_email.as_deref() {
                Some(email) => self.oauth.lookup_by_email(email).await?,
                None => self.oauth.next_round_robin().await?,
            };
            token.access_token
        } else {
            provider.auth_value.clone()
        };

        apply_credential(&mut headers, provider, &secret);

        if provider.name == CLAUDE_CODE_OFFICIAL && provider.auth_value == AUTH_VALUE_OAUTH {
            ensure_oauth_beta_flag(&mut headers);
        }

        Ok(headers)
    }
}

fn apply_credential(headers: &mut HeaderMap, provider: &Provider, secret: &str) {
    match (provider.kind, provider.auth_type) {
        (ProviderType::Anthropic, AuthType::ApiKey) => {
            insert_str(headers, "x-api-key", secret);
        }
        (ProviderType::Openai, AuthType::ApiKey) => {
            insert_str(headers, "authorization", &format!("Bearer {secret}"));
        }
        (_, AuthType::AuthToken) => {
            insert_str(headers, "authorization", &format!("Bearer {secret}"));
        }
    }
}

fn ensure_oauth_beta_flag(headers: &mut HeaderMap) {
    let existing = headers
        .get("anthropic-beta")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let already_present = existing
        .split(',')
        .any(|flag| flag.trim() == OAUTH_BETA_FLAG);
    if already_present {
        return;
    }

    let combined = if existing.is_empty() {
        OAUTH_BETA_FLAG.to_string()
    } else {
        format!("{OAUTH_BETA_FLAG},{existing}")
    };
    insert_str(headers, "anthropic-beta", &combined);
}

fn provider_host(base_url: &str) -> Option<String> {
    let without_scheme = base_url.split("://").nth(1).unwrap_or(base_url);
    let host = without_scheme.split('/').next().unwrap_or(without_scheme);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn insert_str(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = http::HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{InMemoryOAuthStore, OAuthToken};
    use llmproxy_common::ProviderConfig;

    fn provider(name: &str, auth_value: &str, account_email: Option<&str>) -> Provider {
        let config = ProviderConfig {
            name: name.to_string(),
            kind: ProviderType::Anthropic,
            base_url: "https://api.anthropic.com".to_string(),
            auth_type: AuthType::AuthToken,
            auth_value: auth_value.to_string(),
            account_email: account_email.map(str::to_string),
            proxy: None,
            enabled: true,
        };
        Provider::from_config(0, &config, None)
    }

    #[tokio::test]
    async fn strips_client_auth_headers_and_injects_host() {
        let oauth = InMemoryOAuthStore::new(vec![]);
        let resolver = AuthResolver::new(&oauth);
        let mut original = HeaderMap::new();
        original.insert("authorization", "Bearer client-token".parse().unwrap());
        original.insert("x-custom", "keep-me".parse().unwrap());

        let provider = provider("literal", "sk-literal-secret", None);
        let headers = resolver.resolve(&provider, &original).await.unwrap();

        assert!(!headers.contains_key("authorization") || headers.get("authorization").unwrap() != "Bearer client-token");
        assert_eq!(headers.get("x-custom").unwrap(), "keep-me");
        assert_eq!(headers.get("host").unwrap(), "api.anthropic.com");
        assert_eq!(
            headers.get("authorization").unwrap(),
            "Bearer sk-literal-secret"
        );
    }

    #[tokio::test]
    async fn passthrough_forwards_client_credential_unchanged() {
        let oauth = InMemoryOAuthStore::new(vec![]);
        let resolver = AuthResolver::new(&oauth);
        let mut original = HeaderMap::new();
        original.insert("x-api-key", "client-key".parse().unwrap());

        let provider = provider("passthrough-provider", "passthrough", None);
        let headers = resolver.resolve(&provider, &original).await.unwrap();

        assert_eq!(headers.get("x-api-key").unwrap(), "client-key");
        assert_eq!(headers.get("anthropic-version").unwrap(), "2023-06-01");
    }

    #[tokio::test]
    async fn oauth_looks_up_by_pinned_account_email() {
        let oauth = InMemoryOAuthStore::new(vec![
            OAuthToken {
                account_email: "u1@x".to_string(),
                access_token: "T1".to_string(),
            },
            OAuthToken {
                account_email: "u2@x".to_string(),
                access_token: "T2".to_string(),
            },
        ]);
        let resolver = AuthResolver::new(&oauth);
        let provider = provider(CLAUDE_CODE_OFFICIAL, "oauth", Some("u2@x"));
        let headers = resolver
            .resolve(&provider, &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(headers.get("authorization").unwrap(), "Bearer T2");
        assert_eq!(
            headers.get("anthropic-beta").unwrap(),
            "oauth-2025-04-20"
        );
    }

    #[tokio::test]
    async fn oauth_unavailable_when_store_empty() {
        let oauth = InMemoryOAuthStore::new(vec![]);
        let resolver = AuthResolver::new(&oauth);
        let provider = provider(CLAUDE_CODE_OFFICIAL, "oauth", Some("u1@x"));
        let result = resolver.resolve(&provider, &HeaderMap::new()).await;
        assert!(result.is_err());
    }
}
