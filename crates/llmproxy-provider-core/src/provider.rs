//! The provider entity: immutable configuration plus an opaque identity used
//! to key runtime state in the [`crate::pool::ProviderPool`].

use llmproxy_common::{AuthType, ProviderConfig, ProviderType};

pub type ProviderId = u32;

/// A loaded, immutable provider entry. `(name, account_email)` is unique
/// across enabled providers by the time these are constructed — enforced by
/// [`llmproxy_common::FileConfig::validate`] at config load.
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub kind: ProviderType,
    pub base_url: String,
    pub auth_type: AuthType,
    pub auth_value: String,
    pub account_email: Option<String>,
    pub proxy: Option<String>,
    pub enabled: bool,
}

impl Provider {
    pub fn from_config(id: ProviderId, config: &ProviderConfig, default_proxy: Option<&str>) -> Self {
        Self {
            id,
            name: config.name.clone(),
            kind: config.kind,
            base_url: config.base_url.clone(),
            auth_type: config.auth_type,
            auth_value: config.auth_value.clone(),
            account_email: config.account_email.clone(),
            proxy: config.proxy.clone().or_else(|| default_proxy.map(str::to_string)),
            enabled: config.enabled,
        }
    }

    pub fn matches_account(&self, email: Option<&str>) -> bool {
        match (self.account_email.as_deref(), email) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn is_anthropic(&self) -> bool {
        matches!(self.kind, ProviderType::Anthropic)
    }
}
