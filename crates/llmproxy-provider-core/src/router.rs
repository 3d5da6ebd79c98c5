//! Model name -> ordered candidate provider list, per §4.3.

use std::collections::HashMap;

use llmproxy_common::{FileConfig, ModelRouteEntry};

use crate::pool::ProviderPool;
use crate::provider::Provider;

const PASSTHROUGH_MODEL: &str = "passthrough";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("model not routed")]
    ModelNotRouted,
}

#[derive(Debug, Clone)]
struct RouteEntry {
    provider: String,
    account_email: Option<String>,
    priority: i32,
    model: String,
}

/// Resolved at config-load time from `model_routes`; a request's `model`
/// field (after passthrough translation, if any) looks itself up here.
pub struct Router {
    routes: HashMap<String, Vec<RouteEntry>>,
    default_route: Option<Vec<RouteEntry>>,
}

const DEFAULT_ROUTE_KEY: &str = "*";

impl Router {
    pub fn from_file_config(config: &FileConfig) -> Self {
        let mut routes: HashMap<String, Vec<RouteEntry>> = HashMap::new();
        let mut default_route = None;

        for (model, entries) in &config.model_routes {
            let mut sorted: Vec<RouteEntry> = entries.iter().map(RouteEntry::from).collect();
            sorted.sort_by_key(|e| e.priority);
            if model == DEFAULT_ROUTE_KEY {
                default_route = Some(sorted);
            } else {
                routes.insert(model.clone(), sorted);
            }
        }

        Self {
            routes,
            default_route,
        }
    }

    /// Ordered `(candidate, upstream_model)` pairs for `model`, falling back
    /// to the `*` catch-all route when the exact model has no entry. A
    /// route entry's `model: "passthrough"` forwards the client-supplied
    /// model string unchanged (§4.3). Providers that are disabled or not
    /// found in the pool are silently skipped — they were already rejected
    /// at config validation time, so this only matters for a route added
    /// between a reload and the provider list settling.
    pub fn candidates_for_model<'a>(
        &self,
        pool: &'a ProviderPool,
        model: &str,
    ) -> Result<Vec<(&'a Provider, String)>, RouterError> {
        let entries = self
            .routes
            .get(model)
            .or(self.default_route.as_ref())
            .ok_or(RouterError::ModelNotRouted)?;

        let candidates: Vec<(&Provider, String)> = entries
            .iter()
            .filter_map(|entry| {
                let provider =
                    pool.get_by_name_and_account(&entry.provider, entry.account_email.as_deref())?;
                let upstream_model = if entry.model == PASSTHROUGH_MODEL {
                    model.to_string()
                } else {
                    entry.model.clone()
                };
                Some((provider, upstream_model))
            })
            .collect();

        if candidates.is_empty() {
            return Err(RouterError::ModelNotRouted);
        }
        Ok(candidates)
    }
}

impl From<&ModelRouteEntry> for RouteEntry {
    fn from(entry: &ModelRouteEntry) -> Self {
        Self {
            provider: entry.provider.clone(),
            account_email: entry.account_email.clone(),
            priority: entry.priority,
            model: entry.model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmproxy_common::FileConfig;

    fn pool_with_provider(name: &str) -> (FileConfig, ProviderPool) {
        let yaml = format!(
            r#"
providers:
  - name: {name}
    type: anthropic
    base_url: https://api.anthropic.com
    auth_type: auth_token
    auth_value: literal-secret
"#
        );
        let config = FileConfig::from_yaml_str(&yaml).unwrap();
        let pool = ProviderPool::from_file_config(
            &config,
            3,
            std::time::Duration::from_secs(30),
            std::time::Duration::from_secs(10),
            None,
        );
        (config, pool)
    }

    #[test]
    fn passthrough_route_forwards_client_model_string() {
        let (mut config, pool) = pool_with_provider("direct");
        config.model_routes.insert(
            "*".to_string(),
            vec![ModelRouteEntry {
                provider: "direct".to_string(),
                model: "passthrough".to_string(),
                priority: 0,
                account_email: None,
            }],
        );
        let router = Router::from_file_config(&config);
        let candidates = router
            .candidates_for_model(&pool, "claude-3-5-sonnet-20241022")
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].1, "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn named_route_translates_to_configured_upstream_model() {
        let (mut config, pool) = pool_with_provider("direct");
        config.model_routes.insert(
            "claude-3-5-sonnet-20241022".to_string(),
            vec![ModelRouteEntry {
                provider: "direct".to_string(),
                model: "gpt-4o".to_string(),
                priority: 0,
                account_email: None,
            }],
        );
        let router = Router::from_file_config(&config);
        let candidates = router
            .candidates_for_model(&pool, "claude-3-5-sonnet-20241022")
            .unwrap();
        assert_eq!(candidates[0].1, "gpt-4o");
    }

    #[test]
    fn unrouted_model_with_no_default_is_rejected() {
        let (config, pool) = pool_with_provider("direct");
        let router = Router::from_file_config(&config);
        assert_eq!(
            router.candidates_for_model(&pool, "nope").unwrap_err(),
            RouterError::ModelNotRouted
        );
    }
}
