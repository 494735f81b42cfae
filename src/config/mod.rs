//! Settings loading.
//!
//! Settings come from an optional YAML file, then `SHELLGATE_*` environment
//! variables override individual fields. Every field has a default, so an
//! empty file (or no file) is a valid configuration.

pub mod templates;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditConfig, JsonlSink};
use crate::context;
use crate::error::{AuditError, ConfigError};
use crate::gatekeeper::{Evaluator, OpenAiEvaluator, ProviderPreset};
use crate::security::{
    PolicyList, RiskClassifier, RiskRule, RiskTier, SandboxConfig, SandboxValidator,
};

pub use templates::{get_template, list_templates, SecurityTemplate};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "SHELLGATE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub environment: String,
    pub debug_mode: bool,

    /// Evaluator preset name, or `none`.
    pub provider: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,

    pub default_timeout_seconds: u64,
    pub max_output_bytes: usize,

    pub audit_log_path: PathBuf,
    pub audit_queue_size: usize,
    pub audit_max_wait_ms: u64,
    pub audit_max_bytes: u64,
    pub audit_backup_count: usize,
    pub shutdown_grace_seconds: u64,

    pub template: Option<String>,
    pub allowlist: Vec<String>,
    pub blocklist: Vec<String>,
    pub default_tier: RiskTier,
    pub risk_rules: Vec<RiskRule>,
    /// Use the built-in classification table after `risk_rules`.
    pub builtin_rules: bool,
    pub sandbox: SandboxConfig,

    pub os_info: Option<String>,
    pub log_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "shellgate".to_string(),
            environment: "production".to_string(),
            debug_mode: false,
            provider: "openai".to_string(),
            api_key: None,
            model: None,
            base_url: None,
            default_timeout_seconds: 300,
            max_output_bytes: 1_000_000,
            audit_log_path: PathBuf::from("shellgate_audit.jsonl"),
            audit_queue_size: 1000,
            audit_max_wait_ms: 5000,
            audit_max_bytes: 10 * 1024 * 1024,
            audit_backup_count: 5,
            shutdown_grace_seconds: 10,
            template: None,
            allowlist: Vec::new(),
            blocklist: Vec::new(),
            default_tier: RiskTier::Yellow,
            risk_rules: Vec::new(),
            builtin_rules: true,
            sandbox: SandboxConfig::default(),
            os_info: None,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Settings {
    /// Load settings from `path` (when it exists) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                warn!("Config file {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Apply `SHELLGATE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("DEBUG_MODE") {
            self.debug_mode = parse_bool("DEBUG_MODE", &v)?;
        }
        if let Some(v) = get("PROVIDER") {
            self.provider = v;
        }
        if let Some(v) = get("API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = get("MODEL") {
            self.model = Some(v);
        }
        if let Some(v) = get("BASE_URL") {
            self.base_url = Some(v);
        }
        if let Some(v) = get("DEFAULT_TIMEOUT_SECONDS") {
            self.default_timeout_seconds = parse_num("DEFAULT_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("MAX_OUTPUT_BYTES") {
            self.max_output_bytes = parse_num("MAX_OUTPUT_BYTES", &v)?;
        }
        if let Some(v) = get("AUDIT_LOG_PATH") {
            self.audit_log_path = PathBuf::from(v);
        }
        if let Some(v) = get("AUDIT_QUEUE_SIZE") {
            self.audit_queue_size = parse_num("AUDIT_QUEUE_SIZE", &v)?;
        }
        if let Some(v) = get("OS_INFO") {
            self.os_info = Some(v);
        }
        if let Some(v) = get("TEMPLATE") {
            self.template = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_seconds == 0 {
            return Err(invalid("default_timeout_seconds", "0"));
        }
        if self.audit_queue_size == 0 {
            return Err(invalid("audit_queue_size", "0"));
        }
        if self.max_output_bytes == 0 {
            return Err(invalid("max_output_bytes", "0"));
        }
        if let Some(name) = &self.template {
            get_template(name)?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn os_info(&self) -> String {
        self.os_info.clone().unwrap_or_else(context::detect_os)
    }

    /// Allow and block lists after applying the template.
    ///
    /// A template only fills a list that is empty in the settings.
    pub fn effective_lists(&self) -> Result<(Vec<String>, Vec<String>), ConfigError> {
        let mut blocklist = self.blocklist.clone();
        let mut allowlist = self.allowlist.clone();

        if let Some(name) = &self.template {
            let template = get_template(name)?;
            if blocklist.is_empty() {
                blocklist = template.blocklist.iter().map(|s| s.to_string()).collect();
            }
            if allowlist.is_empty() {
                allowlist = template.allowlist.iter().map(|s| s.to_string()).collect();
            }
            info!("Applied security template '{}'", template.name);
        }

        Ok((blocklist, allowlist))
    }

    pub fn policy_list(&self) -> Result<PolicyList, ConfigError> {
        let (blocklist, allowlist) = self.effective_lists()?;
        PolicyList::new(&blocklist, &allowlist)
    }

    pub fn classifier(&self) -> Result<RiskClassifier, ConfigError> {
        RiskClassifier::with_rules(self.default_tier, &self.risk_rules, self.builtin_rules)
    }

    pub fn sandbox_validator(&self) -> SandboxValidator {
        SandboxValidator::new(&self.sandbox)
    }

    pub fn audit_config(&self) -> AuditConfig {
        AuditConfig {
            queue_size: self.audit_queue_size,
            max_wait: Duration::from_millis(self.audit_max_wait_ms),
        }
    }

    pub fn audit_sink(&self) -> Result<JsonlSink, AuditError> {
        JsonlSink::open(
            &self.audit_log_path,
            self.audit_max_bytes,
            self.audit_backup_count,
        )
        .map_err(|source| AuditError::Open {
            path: self.audit_log_path.display().to_string(),
            source,
        })
    }

    /// Build the configured evaluator, reading API keys from the environment.
    pub fn evaluator(&self) -> Result<Option<Arc<dyn Evaluator>>, ConfigError> {
        self.evaluator_with(|key| std::env::var(key).ok())
    }

    /// Build the configured evaluator with a custom key lookup.
    ///
    /// `Ok(None)` means no gatekeeper: commands needing one are denied.
    pub fn evaluator_with<F>(&self, lookup: F) -> Result<Option<Arc<dyn Evaluator>>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = self.provider.trim();
        if provider.is_empty() || provider.eq_ignore_ascii_case("none") {
            info!("No evaluator configured");
            return Ok(None);
        }

        let Some(preset) = ProviderPreset::from_name(provider) else {
            // Unknown name: only usable as a custom OpenAI-compatible endpoint.
            let (Some(base_url), Some(model)) = (&self.base_url, &self.model) else {
                return Err(ConfigError::Evaluator(format!(
                    "unknown provider '{}' needs both base_url and model",
                    provider
                )));
            };
            let key = self.api_key.clone().unwrap_or_default();
            return Ok(Some(Arc::new(OpenAiEvaluator::new(
                provider, &key, base_url, model.clone(),
            ))));
        };

        let key = self
            .api_key
            .clone()
            .or_else(|| preset.key_env_var().and_then(&lookup))
            .or_else(|| preset.placeholder_key().map(str::to_string));
        let Some(key) = key else {
            warn!(
                "No API key for provider {} (set {}); gatekeeper disabled",
                preset.name(),
                preset.key_env_var().unwrap_or("api_key")
            );
            return Ok(None);
        };

        let evaluator = match self.base_url.as_deref() {
            Some(base_url) => OpenAiEvaluator::new(
                preset.name(),
                &key,
                base_url,
                self.model.as_deref().unwrap_or(preset.default_model()),
            ),
            None => OpenAiEvaluator::from_preset(preset, &key, self.model.as_deref()),
        };
        info!("Using {} evaluator with model {}", preset.name(), evaluator.model());
        Ok(Some(Arc::new(evaluator)))
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}
