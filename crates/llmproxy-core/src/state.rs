//! Shared application state: the collaborators every HTTP handler needs,
//! built once at startup and handed around as `Arc<AppState>`. Config is
//! the only field that can change after boot: [`crate::bootstrap`]'s SIGHUP
//! handler calls [`AppState::apply_config`] to swap in a freshly-loaded
//! settings snapshot; everything else is fixed for the process lifetime.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tiktoken_rs::CoreBPE;

use llmproxy_common::GlobalConfig;
use llmproxy_provider_core::oauth::OAuthStore;
use llmproxy_provider_core::pool::ProviderPool;
use llmproxy_provider_core::router::Router;

use crate::broadcaster::DedupBroadcaster;
use crate::lifecycle::RequestLifecycle;

pub struct AppState {
    pub global: ArcSwap<GlobalConfig>,
    pub pool: Arc<ProviderPool>,
    pub router: Arc<Router>,
    pub oauth: Arc<dyn OAuthStore>,
    pub broadcaster: Arc<DedupBroadcaster>,
    pub lifecycle: RequestLifecycle,
    /// Loaded once at startup (§4.7/§4.9): building a `CoreBPE` involves
    /// parsing the `cl100k_base` merge table, which is too expensive to
    /// repeat per request.
    pub encoder: Arc<CoreBPE>,
}

impl AppState {
    pub fn apply_config(&self, config: GlobalConfig) {
        self.global.store(Arc::new(config));
    }
}
