use anyhow::{Context, Result};
use mordomo_core::{LlmConfig, OrchestratorConfig, RouterConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MordomoConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_max_sessions() -> usize {
    mordomo_gateway::session::DEFAULT_MAX_SESSIONS
}

fn default_gateway_bind() -> String {
    "127.0.0.1:8765".to_string()
}

/// Model endpoint used for classification and enhancement
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_classify_max_tokens")]
    pub classify_max_tokens: u32,
    #[serde(default = "default_enhance_max_tokens")]
    pub enhance_max_tokens: u32,
    #[serde(default = "default_classify_timeout_secs")]
    pub classify_timeout_secs: u64,
    #[serde(default = "default_enhance_timeout_secs")]
    pub enhance_timeout_secs: u64,
    #[serde(default = "default_classify_temperature")]
    pub classify_temperature: f32,
    #[serde(default = "default_enhance_temperature")]
    pub enhance_temperature: f32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            classify_max_tokens: default_classify_max_tokens(),
            enhance_max_tokens: default_enhance_max_tokens(),
            classify_timeout_secs: default_classify_timeout_secs(),
            enhance_timeout_secs: default_enhance_timeout_secs(),
            classify_temperature: default_classify_temperature(),
            enhance_temperature: default_enhance_temperature(),
        }
    }
}

impl std::fmt::Debug for LlmSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSection")
            .field("enabled", &self.enabled)
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("classify_timeout_secs", &self.classify_timeout_secs)
            .field("enhance_timeout_secs", &self.enhance_timeout_secs)
            .finish()
    }
}

impl LlmSection {
    /// Enabled and holding a key
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.api_key.trim().is_empty()
    }

    pub fn to_core(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            classify_max_tokens: self.classify_max_tokens,
            enhance_max_tokens: self.enhance_max_tokens,
            classify_timeout: Duration::from_secs(self.classify_timeout_secs),
            enhance_timeout: Duration::from_secs(self.enhance_timeout_secs),
            classify_temperature: self.classify_temperature,
            enhance_temperature: self.enhance_temperature,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_llm_base_url() -> String {
    "https://api.synthetic.new/v1".to_string()
}
fn default_llm_model() -> String {
    "hf:deepseek-ai/DeepSeek-V3".to_string()
}
fn default_classify_max_tokens() -> u32 {
    100
}
fn default_enhance_max_tokens() -> u32 {
    200
}
fn default_classify_timeout_secs() -> u64 {
    10
}
fn default_enhance_timeout_secs() -> u64 {
    30
}
fn default_classify_temperature() -> f32 {
    0.1
}
fn default_enhance_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,
    #[serde(default = "default_tie_margin")]
    pub tie_margin: f64,
    #[serde(default = "default_true")]
    pub semantic: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
            tie_margin: default_tie_margin(),
            semantic: true,
        }
    }
}

impl RoutingConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            acceptance_threshold: self.acceptance_threshold,
            tie_margin: self.tie_margin,
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            semantic: self.semantic,
        }
    }
}

fn default_acceptance_threshold() -> f64 {
    0.3
}
fn default_tie_margin() -> f64 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mordomo")
}

impl MordomoConfig {
    /// Load from `custom_path`, or from `~/.mordomo/config.toml`.
    ///
    /// A missing default file yields the built-in defaults; a missing custom
    /// file is an error.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = match custom_path {
            Some(path) => path.clone(),
            None => {
                let path = config_dir().join("config.toml");
                if !path.exists() {
                    info!(
                        "No config at {}, using defaults. Run `mordomo init` to create one.",
                        path.display()
                    );
                    return Ok(Self::default());
                }
                path
            }
        };
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    warn!(
                        "Config file {} is readable by other users ({:o}). It may hold an API key; consider chmod 600.",
                        path.display(),
                        mode & 0o777
                    );
                }
            }
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;

        if !config.llm.api_key.is_empty() && !content.contains("${MORDOMO_LLM_API_KEY}") {
            warn!(
                "LLM API key is hardcoded in config file. Prefer api_key = \"${{MORDOMO_LLM_API_KEY}}\""
            );
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.gateway.max_sessions > 0,
            "gateway.max_sessions must be at least 1"
        );
        let routing = &self.routing;
        anyhow::ensure!(
            (0.0..=1.0).contains(&routing.acceptance_threshold),
            "routing.acceptance_threshold must be within [0, 1], got {}",
            routing.acceptance_threshold
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&routing.tie_margin),
            "routing.tie_margin must be within [0, 1], got {}",
            routing.tie_margin
        );
        Ok(())
    }

    /// Copy safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.llm.api_key = mask_secret(&copy.llm.api_key);
        copy
    }
}

/// Variables that may be expanded in config files
const ALLOWED_ENV_VARS: &[&str] = &["MORDOMO_LLM_API_KEY", "MORDOMO_GATEWAY_BIND"];

fn expand_env_vars(s: &str) -> String {
    expand_vars_with(s, |name| std::env::var(name).ok())
}

/// Replace allowlisted `${VAR}` occurrences using `lookup`; others are left as written
fn expand_vars_with(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = &result[abs_start + 2..abs_start + end];

        if !ALLOWED_ENV_VARS.contains(&var_name) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = lookup(var_name).unwrap_or_default();
        let value_len = value.len();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value_len;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "MORDOMO_LLM_API_KEY" => Some("syn_test_key_1234".to_string()),
            "MORDOMO_GATEWAY_BIND" => Some("0.0.0.0:9000".to_string()),
            _ => Some("leaked".to_string()),
        }
    }

    #[test]
    fn test_shipped_default_parses() {
        let cfg = MordomoConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(cfg.gateway.bind, "127.0.0.1:8765");
        assert_eq!(cfg.gateway.max_sessions, 1000);
        assert_eq!(cfg.llm.classify_max_tokens, 100);
        assert_eq!(cfg.llm.enhance_timeout_secs, 30);
        assert_eq!(cfg.routing.acceptance_threshold, 0.3);
        assert_eq!(cfg.routing.tie_margin, 0.2);
        assert!(cfg.routing.semantic);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = MordomoConfig::parse("").unwrap();
        assert_eq!(cfg.gateway.bind, "127.0.0.1:8765");
        assert_eq!(cfg.gateway.max_sessions, 1000);
        assert!(cfg.llm.enabled);
        assert!(!cfg.llm.is_usable());
        assert_eq!(cfg.llm.model, "hf:deepseek-ai/DeepSeek-V3");
    }

    #[test]
    fn test_expansion_respects_allowlist() {
        let out = expand_vars_with(
            "key = \"${MORDOMO_LLM_API_KEY}\"\nbind = \"${MORDOMO_GATEWAY_BIND}\"\nhome = \"${HOME}\"",
            lookup,
        );
        assert!(out.contains("key = \"syn_test_key_1234\""));
        assert!(out.contains("bind = \"0.0.0.0:9000\""));
        assert!(out.contains("${HOME}"));
        assert!(!out.contains("leaked"));
    }

    #[test]
    fn test_expansion_unset_and_unterminated() {
        let out = expand_vars_with("a = \"${MORDOMO_LLM_API_KEY}\"", |_| None);
        assert_eq!(out, "a = \"\"");
        assert_eq!(expand_vars_with("b = \"${OPEN", lookup), "b = \"${OPEN");
    }

    #[test]
    fn test_llm_section_to_core() {
        let cfg = MordomoConfig::parse(
            r#"
            [llm]
            api_key = "syn_0123456789abcdef"
            base_url = "http://localhost:11434/v1"
            classify_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert!(cfg.llm.is_usable());

        let core = cfg.llm.to_core();
        assert_eq!(core.base_url, "http://localhost:11434/v1");
        assert_eq!(core.classify_timeout, Duration::from_secs(5));
        assert_eq!(core.enhance_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_disabled_llm_is_not_usable() {
        let cfg = MordomoConfig::parse("[llm]\nenabled = false\napi_key = \"syn_abc\"\n").unwrap();
        assert!(!cfg.llm.is_usable());
    }

    #[test]
    fn test_secret_masked() {
        let cfg = MordomoConfig::parse("[llm]\napi_key = \"syn_0123456789abcdef\"\n").unwrap();
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("0123456789"));
        assert!(debug.contains("syn...cdef"));

        let printed = toml::to_string_pretty(&cfg.redacted()).unwrap();
        assert!(!printed.contains("0123456789"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let err = MordomoConfig::parse("[routing]\nacceptance_threshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("acceptance_threshold"));
    }

    #[test]
    fn test_rejects_zero_max_sessions() {
        let err = MordomoConfig::parse("[gateway]\nmax_sessions = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_sessions"));
    }

    #[test]
    fn test_load_custom_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nbind = \"127.0.0.1:9999\"\n[logging]\nlevel = \"debug\"").unwrap();

        let cfg = MordomoConfig::load(&Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.gateway.bind, "127.0.0.1:9999");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.routing.tie_margin, 0.2);
    }

    #[test]
    fn test_load_missing_custom_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(MordomoConfig::load(&Some(missing)).is_err());
    }
}
