//! CLI parsing and startup wiring (§4.9, ambient): load the YAML config,
//! validate it, build the Pool/Router/OAuth store/Broadcaster/upstream
//! client, and assemble the [`AppState`] every HTTP handler shares.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use clap::Parser;
use tracing::{info, warn};

use llmproxy_common::{FileConfig, GlobalConfig, GlobalConfigPatch};
use llmproxy_provider_core::oauth::{InMemoryOAuthStore, OAuthStore};
use llmproxy_provider_core::pool::ProviderPool;
use llmproxy_provider_core::router::Router;

use crate::broadcaster::DedupBroadcaster;
use crate::lifecycle::RequestLifecycle;
use crate::state::AppState;
use crate::token_counter;
use crate::upstream_client::{UpstreamClient, WreqUpstreamClient};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "llmproxy",
    version,
    about = "Multi-provider reverse proxy for Anthropic-style chat completion APIs"
)]
pub struct CliArgs {
    /// Path to the providers/routes/settings YAML file.
    #[arg(long, env = "LLMPROXY_CONFIG", default_value = "llmproxy.yaml")]
    pub config: PathBuf,

    /// Bind host, overriding the config file.
    #[arg(long, env = "LLMPROXY_HOST")]
    pub host: Option<String>,

    /// Bind port, overriding the config file.
    #[arg(long, env = "LLMPROXY_PORT")]
    pub port: Option<u16>,

    /// Outbound proxy URL for upstream requests, overriding the config file.
    #[arg(long, env = "LLMPROXY_PROXY")]
    pub proxy: Option<String>,

    /// Optional YAML file of `{account_email, access_token}` entries backing
    /// `auth_value: oauth` providers. Omit to run with an empty OAuth store
    /// (any route requiring OAuth fails with `OAuthUnavailable`).
    #[arg(long, env = "LLMPROXY_OAUTH_TOKENS")]
    pub oauth_tokens: Option<PathBuf>,
}

pub struct Bootstrap {
    pub state: Arc<AppState>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let file_config =
        FileConfig::load(&args.config).with_context(|| format!("load config {}", args.config.display()))?;

    let patch = GlobalConfigPatch {
        host: args.host,
        port: args.port,
        proxy: args.proxy,
    };
    let global = GlobalConfig::from_file_and_patch(&file_config, patch.clone());

    let pool = Arc::new(ProviderPool::from_file_config(
        &file_config,
        global.unhealthy_threshold,
        global.failure_cooldown,
        global.count_tokens_cooldown,
        global.proxy.as_deref(),
    ));
    let router = Arc::new(Router::from_file_config(&file_config));

    let oauth: Arc<dyn OAuthStore> = match &args.oauth_tokens {
        Some(path) => Arc::new(
            InMemoryOAuthStore::load_from_yaml_file(path)
                .with_context(|| format!("load oauth tokens {}", path.display()))?,
        ),
        None => Arc::new(InMemoryOAuthStore::new(Vec::new())),
    };

    let broadcaster = Arc::new(DedupBroadcaster::new(
        global.dedup_buffer_soft_cap,
        global.subscriber_queue_cap,
    ));
    let upstream: Arc<dyn UpstreamClient> = Arc::new(WreqUpstreamClient::new());

    let lifecycle = RequestLifecycle::new(
        pool.clone(),
        router.clone(),
        oauth.clone(),
        broadcaster.clone(),
        upstream,
    );

    let encoder = Arc::new(token_counter::build_encoder().context("build token counter encoder")?);

    let state = Arc::new(AppState {
        global: ArcSwap::from_pointee(global),
        pool,
        router,
        oauth,
        broadcaster,
        lifecycle,
        encoder,
    });

    spawn_reload_on_sighup(state.clone(), args.config.clone(), patch);

    Ok(Bootstrap { state })
}

/// Re-reads the settings block of the config file on `SIGHUP` and swaps the
/// live [`GlobalConfig`] snapshot. Providers and model routes are not
/// hot-reloaded: `ProviderPool`/`Router` are plain `Arc`s built once in
/// [`bootstrap`], so picking up a changed provider list or route table still
/// needs a restart. A reload whose file fails to parse or validate leaves the
/// previous snapshot in place.
#[cfg(unix)]
fn spawn_reload_on_sighup(state: Arc<AppState>, config_path: PathBuf, patch: GlobalConfigPatch) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "failed to install SIGHUP handler, config hot-reload disabled");
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            if sighup.recv().await.is_none() {
                return;
            }
            reload_config(&state, &config_path, &patch);
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_state: Arc<AppState>, _config_path: PathBuf, _patch: GlobalConfigPatch) {}

fn reload_config(state: &AppState, config_path: &std::path::Path, patch: &GlobalConfigPatch) {
    match FileConfig::load(config_path) {
        Ok(file_config) => {
            let reloaded = GlobalConfig::from_file_and_patch(&file_config, patch.clone());
            state.apply_config(reloaded);
            info!(path = %config_path.display(), "reloaded config settings on SIGHUP");
        }
        Err(err) => {
            warn!(
                path = %config_path.display(),
                error = %err,
                "SIGHUP reload failed, keeping previous config"
            );
        }
    }
}
