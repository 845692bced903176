use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::culture::{Culture, CultureFormat, RequestCulture};
use crate::localizer::{DEFAULT_CULTURE_TAG, LocalizerOptions};
use crate::loader::{EmptyLoader, FileResourceLoader};
use crate::negotiate::providers::DEFAULT_CULTURE_COOKIE;
use crate::negotiate::{
    AcceptLanguageProvider, CookieProvider, CultureNegotiator, QueryStringProvider,
    clamp_provider_timeout, default_provider_timeout,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizerConfig {
    #[serde(default)]
    pub version: Option<u32>,
    /// Second-tier fallback tag, used verbatim as a key suffix.
    #[serde(default = "default_culture_tag")]
    pub default_culture: String,
    #[serde(default)]
    pub culture_format: CultureFormat,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub negotiation: NegotiationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_culture_tag() -> String {
    DEFAULT_CULTURE_TAG.to_string()
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            version: None,
            default_culture: default_culture_tag(),
            culture_format: CultureFormat::default(),
            resources: ResourcesConfig::default(),
            negotiation: NegotiationConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// TOML or JSON file of `name.culture = text` entries. Relative paths are
    /// resolved against the localizer home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Reload when the resource file's mtime changes.
    #[serde(default = "default_true")]
    pub watch: bool,
    /// How often the file is checked when `watch` is on (humantime, e.g. `2s`).
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Unconditional periodic reload (humantime), off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_interval: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> String {
    "2s".to_string()
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            path: None,
            watch: true,
            poll_interval: default_poll_interval(),
            reload_interval: None,
        }
    }
}

impl ResourcesConfig {
    pub fn resolved_path(&self, home: &Path) -> Option<PathBuf> {
        self.path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                home.join(p)
            }
        })
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        let d = humantime::parse_duration(self.poll_interval.trim())
            .with_context(|| format!("invalid resources.poll_interval: {}", self.poll_interval))?;
        Ok(d.max(Duration::from_millis(100)))
    }

    pub fn reload_interval(&self) -> Result<Option<Duration>> {
        let Some(raw) = self.reload_interval.as_deref() else {
            return Ok(None);
        };
        let d = humantime::parse_duration(raw.trim())
            .with_context(|| format!("invalid resources.reload_interval: {raw}"))?;
        if d.is_zero() {
            return Err(anyhow!("resources.reload_interval must be greater than zero"));
        }
        Ok(Some(d))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Query,
    Cookie,
    AcceptLanguage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Providers in evaluation order.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderKind>,
    /// Culture used when no provider wins.
    #[serde(default = "default_request_culture")]
    pub default_culture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ui_culture: Option<String>,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_timeout_ms: Option<u64>,
    #[serde(default = "default_max_accept_language_values")]
    pub max_accept_language_values: usize,
}

fn default_providers() -> Vec<ProviderKind> {
    vec![
        ProviderKind::Query,
        ProviderKind::Cookie,
        ProviderKind::AcceptLanguage,
    ]
}

fn default_request_culture() -> String {
    "zh-CN".to_string()
}

fn default_cookie_name() -> String {
    DEFAULT_CULTURE_COOKIE.to_string()
}

fn default_max_accept_language_values() -> usize {
    3
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            default_culture: default_request_culture(),
            default_ui_culture: None,
            cookie_name: default_cookie_name(),
            provider_timeout_ms: None,
            max_accept_language_values: default_max_accept_language_values(),
        }
    }
}

impl NegotiationConfig {
    pub fn default_request_culture(&self) -> Result<RequestCulture> {
        let culture = Culture::parse(&self.default_culture)
            .with_context(|| "invalid negotiation.default_culture".to_string())?;
        let ui_culture = match self.default_ui_culture.as_deref() {
            Some(ui) => Culture::parse(ui)
                .with_context(|| "invalid negotiation.default_ui_culture".to_string())?,
            None => culture.clone(),
        };
        Ok(RequestCulture::new(culture, ui_culture))
    }

    pub fn provider_timeout(&self) -> Duration {
        match self.provider_timeout_ms {
            Some(ms) if ms > 0 => clamp_provider_timeout(Duration::from_millis(ms)),
            _ => default_provider_timeout(),
        }
    }

    pub fn build_negotiator(&self) -> Result<CultureNegotiator> {
        let mut negotiator = CultureNegotiator::new(self.default_request_culture()?)
            .with_provider_timeout(self.provider_timeout());
        for kind in &self.providers {
            negotiator = match kind {
                ProviderKind::Query => negotiator.with_provider(QueryStringProvider::default()),
                ProviderKind::Cookie => {
                    negotiator.with_provider(CookieProvider::new(self.cookie_name.clone()))
                }
                ProviderKind::AcceptLanguage => negotiator.with_provider(AcceptLanguageProvider {
                    max_values: self.max_accept_language_values.clamp(1, 16),
                }),
            };
        }
        Ok(negotiator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Write `runtime.log` here instead of stderr. Relative to the home dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl LocalizerConfig {
    /// Check everything that would otherwise only fail at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.default_culture.trim().is_empty() {
            return Err(anyhow!("default_culture must not be empty"));
        }
        self.negotiation.default_request_culture()?;
        self.resources.poll_interval()?;
        self.resources.reload_interval()?;
        Ok(())
    }

    pub fn localizer_options(&self, home: &Path) -> LocalizerOptions {
        let options = LocalizerOptions::default()
            .with_culture_format(self.culture_format)
            .with_default_culture(self.default_culture.trim());
        match self.resources.resolved_path(home) {
            Some(path) => options.with_loader(FileResourceLoader::new(path)),
            None => options.with_loader(EmptyLoader),
        }
    }
}

const CONFIG_VERSION: u32 = 1;

/// Home directory for config, resources and logs.
pub fn localizer_home_dir() -> PathBuf {
    if let Ok(dir) = env::var("LOCALIZER_HOME") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dynamic-localizer")
}

fn config_toml_path(dir: &Path) -> PathBuf {
    dir.join("config.toml")
}

fn config_json_path(dir: &Path) -> PathBuf {
    dir.join("config.json")
}

/// The file `load_config_from(dir)` would read (TOML preferred).
pub fn config_file_path_in(dir: &Path) -> PathBuf {
    let toml_path = config_toml_path(dir);
    if toml_path.exists() {
        toml_path
    } else if config_json_path(dir).exists() {
        config_json_path(dir)
    } else {
        toml_path
    }
}

pub fn config_file_path() -> PathBuf {
    config_file_path_in(&localizer_home_dir())
}

fn normalize_config(cfg: &mut LocalizerConfig) {
    if cfg.version.is_none() {
        cfg.version = Some(CONFIG_VERSION);
    }
    cfg.default_culture = cfg.default_culture.trim().to_string();
    cfg.negotiation.providers.dedup();
    if cfg.negotiation.cookie_name.trim().is_empty() {
        cfg.negotiation.cookie_name = default_cookie_name();
    }
}

pub async fn load_config_from(dir: &Path) -> Result<LocalizerConfig> {
    let toml_path = config_toml_path(dir);
    if toml_path.exists() {
        let text = fs::read_to_string(&toml_path)
            .await
            .with_context(|| format!("read {:?}", toml_path))?;
        let mut cfg = toml::from_str::<LocalizerConfig>(&text)
            .with_context(|| format!("parse {:?}", toml_path))?;
        normalize_config(&mut cfg);
        return Ok(cfg);
    }

    let json_path = config_json_path(dir);
    if json_path.exists() {
        let bytes = fs::read(&json_path)
            .await
            .with_context(|| format!("read {:?}", json_path))?;
        let mut cfg = serde_json::from_slice::<LocalizerConfig>(&bytes)
            .with_context(|| format!("parse {:?}", json_path))?;
        normalize_config(&mut cfg);
        return Ok(cfg);
    }

    let mut cfg = LocalizerConfig::default();
    normalize_config(&mut cfg);
    Ok(cfg)
}

pub async fn load_config() -> Result<LocalizerConfig> {
    load_config_from(&localizer_home_dir()).await
}

const CONFIG_TOML_TEMPLATE: &str = r#"# dynamic-localizer config.toml
#
# Lookup order for a key: `key.<request culture>` -> `key.<default_culture>` -> key itself.

version = 1

# Second-tier fallback suffix, used verbatim.
default_culture = "zh_CN"

# How the request culture becomes a key suffix: "full" (en-US), "underscore" (en_US), "language" (en).
culture_format = "full"

[resources]
path = "resources.toml"
watch = true
poll_interval = "2s"
# reload_interval = "10m"

[negotiation]
providers = ["query", "cookie", "accept-language"]
default_culture = "zh-CN"
cookie_name = ".Localizer.Culture"
provider_timeout_ms = 2000
max_accept_language_values = 3

[server]
host = "127.0.0.1"
port = 3300

# [logging]
# dir = "logs"
"#;

const RESOURCES_TOML_TEMPLATE: &str = r#"# name.culture = "text"; positional placeholders: {0}, {1,-8}

[greet]
en-US = "Hello {0}"
zh_CN = "你好{0}"
"#;

/// Write a commented `config.toml` (and a sample resource file when absent).
pub async fn init_config_toml_in(dir: &Path, force: bool) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = config_toml_path(dir);
    if path.exists() && !force {
        return Err(anyhow!(
            "{:?} already exists (use --force to overwrite)",
            path
        ));
    }

    let tmp_path = dir.join("config.toml.tmp");
    fs::write(&tmp_path, CONFIG_TOML_TEMPLATE).await?;
    fs::rename(&tmp_path, &path).await?;

    let resources = dir.join("resources.toml");
    if !resources.exists()
        && let Err(err) = fs::write(&resources, RESOURCES_TOML_TEMPLATE).await
    {
        warn!("failed to write sample resources {:?}: {}", resources, err);
    }
    Ok(path)
}

pub async fn init_config_toml(force: bool) -> Result<PathBuf> {
    init_config_toml_in(&localizer_home_dir(), force).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Mutex, OnceLock};

    fn temp_home() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dynamic-localizer-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp home");
        dir
    }

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, content).expect("write test file");
    }

    struct ScopedEnv {
        saved: Vec<(String, Option<String>)>,
    }

    impl ScopedEnv {
        fn new() -> Self {
            Self { saved: Vec::new() }
        }

        unsafe fn set(&mut self, key: &str, value: &str) {
            self.saved.push((key.to_string(), std::env::var(key).ok()));
            unsafe { std::env::set_var(key, value) };
        }
    }

    impl Drop for ScopedEnv {
        fn drop(&mut self) {
            for (key, old) in self.saved.drain(..).rev() {
                unsafe {
                    match old {
                        Some(v) => std::env::set_var(&key, v),
                        None => std::env::remove_var(&key),
                    }
                }
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        match LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    #[test]
    fn home_dir_honours_env_override() {
        let _lock = env_lock();
        let mut env = ScopedEnv::new();
        unsafe { env.set("LOCALIZER_HOME", "/tmp/localizer-home") };
        assert_eq!(localizer_home_dir(), PathBuf::from("/tmp/localizer-home"));
        unsafe { env.set("LOCALIZER_HOME", "   ") };
        assert!(localizer_home_dir().ends_with(".dynamic-localizer"));
    }

    #[tokio::test]
    async fn missing_config_yields_defaults() {
        let home = temp_home();
        let cfg = load_config_from(&home).await.expect("load");
        assert_eq!(cfg.version, Some(1));
        assert_eq!(cfg.default_culture, "zh_CN");
        assert_eq!(cfg.culture_format, CultureFormat::Full);
        assert_eq!(cfg.negotiation.providers, default_providers());
        assert_eq!(cfg.server.port, 3300);
        assert!(cfg.resources.path.is_none());
        cfg.validate().expect("defaults validate");
    }

    #[tokio::test]
    async fn toml_is_preferred_over_json() {
        let home = temp_home();
        write_file(&home.join("config.json"), r#"{ "default_culture": "en" }"#);
        write_file(
            &home.join("config.toml"),
            r#"
default_culture = "fr"
culture_format = "underscore"

[negotiation]
providers = ["accept-language", "query"]
default_culture = "en-GB"
"#,
        );
        assert_eq!(config_file_path_in(&home), home.join("config.toml"));
        let cfg = load_config_from(&home).await.expect("load");
        assert_eq!(cfg.default_culture, "fr");
        assert_eq!(cfg.culture_format, CultureFormat::Underscore);
        assert_eq!(
            cfg.negotiation.providers,
            vec![ProviderKind::AcceptLanguage, ProviderKind::Query]
        );
        let negotiator = cfg.negotiation.build_negotiator().expect("negotiator");
        let names: Vec<&str> = negotiator.providers().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["accept-language", "query"]);
        assert_eq!(
            negotiator.default_culture().culture.to_string(),
            "en-GB"
        );
    }

    #[tokio::test]
    async fn json_config_is_read_when_no_toml() {
        let home = temp_home();
        write_file(
            &home.join("config.json"),
            r#"{ "default_culture": "en", "resources": { "path": "strings.json", "watch": false } }"#,
        );
        let cfg = load_config_from(&home).await.expect("load");
        assert_eq!(cfg.default_culture, "en");
        assert!(!cfg.resources.watch);
        assert_eq!(
            cfg.resources.resolved_path(&home),
            Some(home.join("strings.json"))
        );
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut cfg = LocalizerConfig::default();
        cfg.negotiation.default_culture = "not a culture".to_string();
        assert!(cfg.validate().is_err());
        assert!(cfg.negotiation.build_negotiator().is_err());

        let mut cfg = LocalizerConfig::default();
        cfg.resources.poll_interval = "soon".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = LocalizerConfig::default();
        cfg.resources.reload_interval = Some("0s".to_string());
        assert!(cfg.validate().is_err());
        cfg.resources.reload_interval = Some("5m".to_string());
        assert_eq!(
            cfg.resources.reload_interval().expect("interval"),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn provider_timeout_from_config_is_clamped() {
        let mut n = NegotiationConfig {
            provider_timeout_ms: Some(1),
            ..Default::default()
        };
        assert_eq!(n.provider_timeout(), Duration::from_millis(10));
        n.provider_timeout_ms = Some(250);
        assert_eq!(n.provider_timeout(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn init_writes_template_that_loads() {
        let home = temp_home();
        let path = init_config_toml_in(&home, false).await.expect("init");
        assert_eq!(path, home.join("config.toml"));
        assert!(home.join("resources.toml").exists());
        assert!(init_config_toml_in(&home, false).await.is_err());
        init_config_toml_in(&home, true).await.expect("force init");

        let cfg = load_config_from(&home).await.expect("load");
        cfg.validate().expect("template validates");
        let localizer = crate::localizer::DynamicLocalizer::new(cfg.localizer_options(&home));
        localizer.initialize().expect("sample resources load");
        let en = Culture::parse("en-US").expect("culture");
        assert_eq!(
            localizer.lookup_formatted(&en, "greet", &[&"Bob"]).text,
            "Hello Bob"
        );
    }
}
