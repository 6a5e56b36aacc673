// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Engine configuration (§6 "Recognized configuration options").

use url::Url;

use crate::error::Error;
use crate::provider::ProviderNode;
use crate::utils::validate_url_is_secure;

/// How verbose the engine's own [`tracing`] output should be. This is a
/// hint for the host application's subscriber filter, not something this
/// crate installs itself (§10.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Maximally verbose.
    Debug,
    /// Routine operational messages.
    Info,
    /// Recoverable problems.
    Warn,
    /// Unrecoverable-for-the-call problems.
    Error,
}

/// Construction-time configuration for an [`crate::engine::Engine`]
/// (§6). Validated by [`EngineConfig::validate`], called from
/// [`crate::engine::Engine::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identifies the aggregator project.
    pub project_id: String,
    /// Identifies the target network, e.g. `"mainnet"`.
    pub network_id: String,
    /// Appended to `project_id` after a `.` when present.
    pub project_token: Option<String>,
    /// Overrides the aggregator host. Defaults to `https://rpc.direct.dev`.
    pub base_url: String,
    /// Verbosity hint for host-installed logging.
    pub log_level: LogLevel,
    /// Bypass the aggregator entirely and route every request straight to
    /// providers.
    pub dev_mode: bool,
    /// `>= 0`: windowed dispatch with this many milliseconds between
    /// dispatches. `< 0`: dispatch immediately after every scheduling cycle.
    pub batch_window_ms: i64,
    /// Use NDJSON instead of the Wire binary protocol.
    pub prefer_json: bool,
    /// Opt-in click-prime hint: collapse a request's fingerprint under the
    /// symbolic `"latest"` block height (see
    /// [`crate::fingerprint::RequestFingerprint::of_with_latest_height_override`])
    /// so a click-primed speculative fetch and the user's own follow-up
    /// request against the then-current explicit height join the same
    /// cache/inflight entry instead of missing each other.
    pub predict_on_click: bool,
    /// Upstream provider nodes. Must be non-empty.
    pub providers: Vec<ProviderNode>,
}

impl EngineConfig {
    /// Build a config with the given required fields and sensible
    /// defaults for everything else (aggregator enabled, windowed
    /// dispatch at 10ms, Wire transport).
    pub fn new(project_id: impl Into<String>, network_id: impl Into<String>, providers: Vec<ProviderNode>) -> Self {
        EngineConfig {
            project_id: project_id.into(),
            network_id: network_id.into(),
            project_token: None,
            base_url: "https://rpc.direct.dev".to_owned(),
            log_level: LogLevel::Info,
            dev_mode: false,
            batch_window_ms: 10,
            prefer_json: false,
            predict_on_click: false,
            providers,
        }
    }

    /// Construct the aggregator endpoint URL: `POST {baseUrl}/v1/{projectId[.projectToken]}/{networkId}` (§6).
    pub fn endpoint_url(&self) -> Result<Url, Error> {
        let project_segment = match &self.project_token {
            Some(token) => format!("{}.{}", self.project_id, token),
            None => self.project_id.clone(),
        };
        let path = format!("v1/{project_segment}/{}", self.network_id);
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::validation(format!("invalid base_url {:?}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| Error::validation("base_url cannot be a base for path segments"))?
            .extend(path.split('/'));
        Ok(url)
    }

    /// Validate this configuration, as done by [`crate::engine::Engine::new`].
    pub fn validate(&self) -> Result<(), Error> {
        if self.project_id.is_empty() {
            return Err(Error::validation("project_id must not be empty"));
        }
        if self.network_id.is_empty() {
            return Err(Error::validation("network_id must not be empty"));
        }
        if self.providers.is_empty() {
            return Err(Error::NoProviders);
        }
        self.endpoint_url()?;
        validate_url_is_secure(&self.base_url)?;
        for provider in &self.providers {
            validate_url_is_secure(provider.url())?;
        }
        Ok(())
    }
}
