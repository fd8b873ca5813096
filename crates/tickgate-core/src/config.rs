//! Pipeline configuration.
//!
//! Loaded from TOML; every section and field is optional and falls back to
//! the defaults below. Dates are quoted `"YYYY-MM-DD"` strings.
//!
//! ```toml
//! quality_threshold = 70.0
//!
//! [validation]
//! z_threshold = 3.0
//! tolerance = 0.05
//!
//! [orchestrator]
//! worker_pool_size = 3
//! history_start = "2024-01-02"
//!
//! [scheduler]
//! cron = "0 22 * * 1-5"
//!
//! [[instruments]]
//! id = "WTI"
//! name = "WTI Crude"
//! unit = "USD/bbl"
//! valid_range = { min = 20.0, max = 130.0 }
//!
//! [[providers]]
//! id = "eia"
//! series_keys = { WTI = "PET.RWTC.D" }
//! connector = { kind = "http_json", url_template = "https://api.example/{series}?start={start}&end={end}" }
//! ```

use std::collections::BTreeSet;
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::macros::date;
use time::Date;

use crate::connectors::{FixtureConnector, HttpJsonConnector};
use crate::http_client::HttpClient;
use crate::monitor::DEFAULT_STALE_AFTER_DAYS;
use crate::orchestrator::OrchestratorConfig;
use crate::quality::{validate_threshold, QualityGate, DEFAULT_THRESHOLD};
use crate::retry::RetryPolicy;
use crate::scheduler::{CronTrigger, DEFAULT_CRON};
use crate::source::{CapabilitySet, ConnectorRegistry, SourceConnector};
use crate::validation::{ValidationConfig, Validator};
use crate::{ConfigurationError, InstrumentId, ProviderId, ProviderProfile, TrackedInstrument, ValueRange};

/// Environment variable that overrides `notifications.webhook_url`.
pub const WEBHOOK_URL_ENV: &str = "TICKGATE_WEBHOOK_URL";
/// Environment variable that overrides `notifications.webhook_token`.
pub const WEBHOOK_TOKEN_ENV: &str = "TICKGATE_WEBHOOK_TOKEN";
/// File name looked up under `TICKGATE_HOME` when no path is given.
pub const CONFIG_FILE_NAME: &str = "tickgate.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub quality_threshold: f64,
    pub validation: ValidationConfig,
    pub orchestrator: OrchestratorSection,
    pub retry: RetryPolicy,
    pub scheduler: SchedulerSection,
    pub monitor: MonitorSection,
    pub notifications: NotificationSection,
    pub instruments: Vec<TrackedInstrument>,
    pub providers: Vec<ProviderSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorSection {
    pub worker_pool_size: usize,
    pub fetch_timeout_secs: u64,
    pub lookback_days: u32,
    /// First date of the configured history (full refresh and fallback for
    /// incremental runs with nothing stored).
    pub history_start: Date,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            worker_pool_size: defaults.worker_pool_size,
            fetch_timeout_secs: defaults.fetch_timeout.as_secs(),
            lookback_days: defaults.lookback_days,
            history_start: date!(2024 - 01 - 02),
            cache_ttl_secs: defaults.cache_ttl.as_secs(),
            cache_max_entries: defaults.cache_max_entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    pub cron: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            cron: DEFAULT_CRON.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSection {
    pub stale_after_days: u32,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationSection {
    /// Also write every alert to the log.
    pub log: bool,
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            log: true,
            webhook_url: None,
            webhook_token: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// How to reach a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorSection {
    /// Deterministic generated weekday series around each instrument's
    /// valid-range midpoint, multiplied by `scale`.
    Fixture {
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default = "default_wobble")]
        wobble: f64,
    },
    HttpJson {
        url_template: String,
        /// Environment variable holding a bearer token.
        #[serde(default)]
        token_env: Option<String>,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_scale() -> f64 {
    1.0
}

fn default_wobble() -> f64 {
    0.002
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

impl Default for ConnectorSection {
    fn default() -> Self {
        Self::Fixture {
            scale: default_scale(),
            wobble: default_wobble(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(flatten)]
    pub profile: ProviderProfile,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub connector: ConnectorSection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: DEFAULT_THRESHOLD,
            validation: ValidationConfig::default(),
            orchestrator: OrchestratorSection::default(),
            retry: RetryPolicy::default(),
            scheduler: SchedulerSection::default(),
            monitor: MonitorSection::default(),
            notifications: NotificationSection::default(),
            instruments: default_instruments(),
            providers: default_providers(),
        }
    }
}

/// Demo universe: two crude benchmarks served by two fixture providers.
fn default_instruments() -> Vec<TrackedInstrument> {
    let crude = |id: &str, name: &str, max: f64| {
        InstrumentId::parse(id).ok().zip(ValueRange::new(20.0, max).ok()).map(
            |(id, range)| TrackedInstrument::new(id, name, "USD/bbl", range),
        )
    };
    [crude("WTI", "WTI Crude Spot", 130.0), crude("BRENT", "Brent Crude Spot", 140.0)]
        .into_iter()
        .flatten()
        .collect()
}

fn default_providers() -> Vec<ProviderSection> {
    let provider = |id: &str, budget: u32, scale: f64, keys: [(&str, &str); 2]| {
        let mut profile = ProviderProfile::new(ProviderId::parse(id).ok()?, budget);
        for (instrument, key) in keys {
            profile = profile.with_series(InstrumentId::parse(instrument).ok()?, key);
        }
        Some(ProviderSection {
            profile,
            capabilities: CapabilitySet::new(true, false),
            connector: ConnectorSection::Fixture {
                scale,
                wobble: default_wobble(),
            },
        })
    };
    [
        provider("eia", 5_000, 1.0, [("WTI", "PET.RWTC.D"), ("BRENT", "PET.RBRTE.D")]),
        provider("fred", 120, 1.002, [("WTI", "DCOILWTICO"), ("BRENT", "DCOILBRENTEU")]),
    ]
    .into_iter()
    .flatten()
    .collect()
}

impl PipelineConfig {
    /// Read, parse, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// `path` if given, else `home/tickgate.toml` if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>, home: &Path) -> Result<Self, ConfigurationError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let candidate = home.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Self::load(&candidate);
        }
        tracing::debug!(home = %home.display(), "no config file, using defaults");
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env(&mut self) {
        if let Some(url) = non_empty_env(WEBHOOK_URL_ENV) {
            self.notifications.webhook_url = Some(url);
        }
        if let Some(token) = non_empty_env(WEBHOOK_TOKEN_ENV) {
            self.notifications.webhook_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_threshold(self.quality_threshold)?;
        self.validation.validate()?;
        self.orchestrator_config().validate()?;
        CronTrigger::parse(&self.scheduler.cron)?;

        if self.instruments.is_empty() {
            return Err(ConfigurationError::invalid("instruments", "at least one instrument is required"));
        }
        if self.providers.is_empty() {
            return Err(ConfigurationError::invalid("providers", "at least one provider is required"));
        }
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = self.instruments.iter().find(|i| !seen.insert(&i.id)) {
            return Err(ConfigurationError::invalid(
                "instruments",
                format!("'{}' is listed twice", duplicate.id),
            ));
        }
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = self.providers.iter().find(|p| !seen.insert(&p.profile.id)) {
            return Err(ConfigurationError::invalid(
                "providers",
                format!("'{}' is listed twice", duplicate.profile.id),
            ));
        }
        for provider in &self.providers {
            if provider.profile.daily_request_budget == 0 {
                return Err(ConfigurationError::invalid(
                    "daily_request_budget",
                    format!("provider '{}' must allow at least one request", provider.profile.id),
                ));
            }
            if let ConnectorSection::HttpJson { url_template, .. } = &provider.connector {
                if !url_template.starts_with("http://") && !url_template.starts_with("https://") {
                    return Err(ConfigurationError::invalid(
                        "url_template",
                        format!("provider '{}' needs an http(s) URL", provider.profile.id),
                    ));
                }
            }
        }
        if let Some(url) = &self.notifications.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigurationError::invalid("webhook_url", "must be an http(s) URL"));
            }
        }
        Ok(())
    }

    pub fn instrument_ids(&self) -> Vec<InstrumentId> {
        self.instruments.iter().map(|i| i.id.clone()).collect()
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.profile.id.clone()).collect()
    }

    pub fn profiles(&self) -> Vec<ProviderProfile> {
        self.providers.iter().map(|p| p.profile.clone()).collect()
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.validation, self.instruments.clone())
    }

    pub fn gate(&self) -> Result<QualityGate, ConfigurationError> {
        QualityGate::new(self.quality_threshold)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_pool_size: self.orchestrator.worker_pool_size,
            fetch_timeout: Duration::from_secs(self.orchestrator.fetch_timeout_secs),
            retry: self.retry,
            lookback_days: self.orchestrator.lookback_days,
            cache_ttl: Duration::from_secs(self.orchestrator.cache_ttl_secs),
            cache_max_entries: self.orchestrator.cache_max_entries,
        }
    }

    /// Build one connector per provider. With `fixtures_only`, HTTP providers
    /// are replaced by generated fixtures.
    pub fn registry(&self, http_client: Arc<dyn HttpClient>, fixtures_only: bool) -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::new();
        for provider in &self.providers {
            let connector: Arc<dyn SourceConnector> = match &provider.connector {
                ConnectorSection::Fixture { scale, wobble } => self.fixture_for(provider, *scale, *wobble),
                ConnectorSection::HttpJson { .. } if fixtures_only => {
                    self.fixture_for(provider, default_scale(), default_wobble())
                }
                ConnectorSection::HttpJson {
                    url_template,
                    token_env,
                    timeout_ms,
                } => {
                    let token = token_env.as_deref().and_then(non_empty_env);
                    Arc::new(
                        HttpJsonConnector::new(
                            provider.profile.id.clone(),
                            url_template.clone(),
                            Arc::clone(&http_client),
                        )
                        .with_bearer_token(token)
                        .with_timeout_ms(*timeout_ms),
                    )
                }
            };
            registry.register(connector, provider.capabilities);
        }
        registry
    }

    fn fixture_for(&self, provider: &ProviderSection, scale: f64, wobble: f64) -> Arc<dyn SourceConnector> {
        let mut fixture = FixtureConnector::new(provider.profile.id.clone());
        for instrument in &self.instruments {
            if provider.profile.series_key(&instrument.id).is_some() {
                let midpoint = (instrument.valid_range.min() + instrument.valid_range.max()) / 2.0;
                fixture = fixture.with_generated_series(instrument.id.clone(), midpoint * scale, wobble);
            }
        }
        Arc::new(fixture)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.scheduler.cron, "@daily");
        assert_eq!(config.orchestrator_config(), OrchestratorConfig::default());
    }

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let config = PipelineConfig::from_toml_str(
            r#"
            quality_threshold = 80.0

            [validation]
            tolerance = 0.02

            [orchestrator]
            worker_pool_size = 5
            history_start = "2025-06-02"

            [retry]
            max_attempts = 4
            backoff = { kind = "fixed", delay = 0.5 }

            [[instruments]]
            id = "WTI"
            name = "WTI"
            unit = "USD/bbl"
            valid_range = { min = 20.0, max = 130.0 }
            required_fields = ["close"]

            [[providers]]
            id = "eia"
            series_keys = { WTI = "PET.RWTC.D" }
            capabilities = { ohlc = true }
            connector = { kind = "http_json", url_template = "https://api.test/{series}" }
            "#,
        )
        .expect("parses");

        config.validate().expect("valid");
        assert_eq!(config.quality_threshold, 80.0);
        assert_eq!(config.validation.tolerance, 0.02);
        assert_eq!(config.validation.z_threshold, 3.0);
        assert_eq!(config.orchestrator.worker_pool_size, 5);
        assert_eq!(config.orchestrator.history_start, date!(2025 - 06 - 02));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.providers[0].profile.daily_request_budget, 500);
        assert!(matches!(config.providers[0].connector, ConnectorSection::HttpJson { .. }));
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let bad_threshold = PipelineConfig {
            quality_threshold: 120.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            bad_threshold.validate(),
            Err(ConfigurationError::InvalidOption { option: "quality_threshold", .. })
        ));

        let mut bad_cron = PipelineConfig::default();
        bad_cron.scheduler.cron = "every day".into();
        assert!(matches!(bad_cron.validate(), Err(ConfigurationError::InvalidCron { .. })));

        let mut no_workers = PipelineConfig::default();
        no_workers.orchestrator.worker_pool_size = 0;
        assert!(no_workers.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = PipelineConfig::from_toml_str("quality_treshold = 70.0").expect_err("typo");
        assert!(matches!(error, ConfigurationError::Parse(_)));
    }

    #[test]
    fn fixture_registry_covers_every_provider() {
        let config = PipelineConfig::default();
        let registry = config.registry(Arc::new(crate::http_client::ReqwestHttpClient::new()), true);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.providers(), config.provider_ids());
    }
}
