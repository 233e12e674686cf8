use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    filters::DEFAULT_WINDOW_DAYS,
    pipeline::{
        DEFAULT_MAX_RESULTS, DEFAULT_QUERY_DELAY, DelayRange, MAX_QUERY_DELAY_MS, PipelineSettings,
    },
    provider::{ApiToken, DEFAULT_PROVIDER_COMMAND, DEFAULT_PROVIDER_TIMEOUT, ProviderSettings},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/clipscout-env";
pub const CONFIG_PATH_VAR: &str = "CLIPSCOUT_CONFIG";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_TARGET_COUNT: usize = 20;
pub const DEFAULT_OUTPUT_FILE: &str = "results.csv";
pub const DEFAULT_SEARCH_TERMS: [&str; 6] = [
    "тушь для ресниц",
    "стойкая тушь",
    "объемная тушь",
    "#тушь",
    "#ресницы",
    "#макияж",
];

/// Every key the env file and process environment may carry.
const KNOWN_KEYS: &[&str] = &[
    "PROVIDER",
    "PROVIDER_COMMAND",
    "PROVIDER_URL",
    "PROVIDER_TOKEN",
    "PROVIDER_FIXTURE",
    "PROVIDER_TIMEOUT_SECS",
    "WINDOW_DAYS",
    "MAX_RESULTS",
    "TARGET_COUNT",
    "QUERY_DELAY_MS",
    "SEARCH_TERMS",
    "OUTPUT_FILE",
    "CLIPSCOUT_HOST",
    "CLIPSCOUT_PORT",
    "PORT",
];

/// Raw `KEY=VALUE` pairs, as read from the env file and/or the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    values: HashMap<String, String>,
}

impl EnvConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Overlays `other` on top of `self`; keys present in both take `other`'s value.
    pub fn merge(mut self, other: EnvConfig) -> Self {
        self.values.extend(other.values);
        self
    }

    /// Picks up known keys from the process environment.
    pub fn from_process_env() -> Self {
        let mut cfg = Self::default();
        for key in KNOWN_KEYS {
            if let Ok(value) = std::env::var(key) {
                cfg.set(*key, value.trim());
            }
        }
        cfg
    }
}

/// Fully resolved settings shared by both binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub pipeline: PipelineSettings,
    pub search_terms: Vec<String>,
    pub target_count: usize,
    pub output_file: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            pipeline: PipelineSettings::default(),
            search_terms: DEFAULT_SEARCH_TERMS.iter().map(|t| t.to_string()).collect(),
            target_count: DEFAULT_TARGET_COUNT,
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    Ok(Some(parse_env_config(&content)))
}

pub fn parse_env_config(content: &str) -> EnvConfig {
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            cfg.set(key.trim(), value);
        }
    }
    cfg
}

/// Loads the config file named by `CLIPSCOUT_CONFIG` (or the default path),
/// then applies environment overrides.
pub fn load_settings() -> Result<Settings> {
    let path = std::env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    load_settings_from(path)
}

pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let file = read_env_config(path)?.unwrap_or_default();
    settings_from_env(&file.merge(EnvConfig::from_process_env()))
        .with_context(|| format!("Resolving configuration (file: {})", path.display()))
}

pub fn settings_from_env(cfg: &EnvConfig) -> Result<Settings> {
    let defaults = Settings::default();

    let timeout_secs = parse_or(
        cfg,
        "PROVIDER_TIMEOUT_SECS",
        DEFAULT_PROVIDER_TIMEOUT.as_secs(),
    )?;
    let provider_timeout = Duration::from_secs(timeout_secs);
    let provider = provider_settings(cfg, provider_timeout)?;

    let query_delay = match cfg.get("QUERY_DELAY_MS") {
        Some(value) => DelayRange::parse_millis(value).ok_or_else(|| {
            anyhow!(
                "QUERY_DELAY_MS must look like `2000-4000` with values of at most \
                 {MAX_QUERY_DELAY_MS} ms, got `{value}`"
            )
        })?,
        None => DEFAULT_QUERY_DELAY,
    };

    let pipeline = PipelineSettings {
        window_days: parse_or(cfg, "WINDOW_DAYS", DEFAULT_WINDOW_DAYS)?,
        max_results: parse_or(cfg, "MAX_RESULTS", DEFAULT_MAX_RESULTS)?,
        provider_timeout,
        query_delay,
    };

    let search_terms = match cfg.get("SEARCH_TERMS") {
        Some(value) => split_terms(value),
        None => defaults.search_terms,
    };
    if search_terms.is_empty() {
        bail!("SEARCH_TERMS does not contain any term");
    }

    let port = match cfg.get("CLIPSCOUT_PORT") {
        Some(_) => parse_or(cfg, "CLIPSCOUT_PORT", DEFAULT_PORT)?,
        None => parse_or(cfg, "PORT", DEFAULT_PORT)?,
    };

    Ok(Settings {
        provider,
        pipeline,
        search_terms,
        target_count: parse_or(cfg, "TARGET_COUNT", DEFAULT_TARGET_COUNT)?,
        output_file: cfg
            .get("OUTPUT_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_file),
        host: cfg
            .get("CLIPSCOUT_HOST")
            .map(str::to_string)
            .unwrap_or(defaults.host),
        port,
    })
}

fn provider_settings(cfg: &EnvConfig, timeout: Duration) -> Result<ProviderSettings> {
    match cfg.get("PROVIDER").unwrap_or("command") {
        "command" => {
            let line = cfg.get("PROVIDER_COMMAND").unwrap_or(DEFAULT_PROVIDER_COMMAND);
            let mut parts = line.split_whitespace().map(str::to_string);
            let program = parts
                .next()
                .ok_or_else(|| anyhow!("PROVIDER_COMMAND is blank"))?;
            Ok(ProviderSettings::Command {
                program,
                args: parts.collect(),
            })
        }
        "http" => {
            let url = cfg
                .get("PROVIDER_URL")
                .ok_or_else(|| anyhow!("PROVIDER=http requires PROVIDER_URL"))?;
            Ok(ProviderSettings::Http {
                url: url.to_string(),
                token: cfg.get("PROVIDER_TOKEN").map(|t| ApiToken(t.to_string())),
                timeout,
            })
        }
        "fixture" => {
            let path = cfg
                .get("PROVIDER_FIXTURE")
                .ok_or_else(|| anyhow!("PROVIDER=fixture requires PROVIDER_FIXTURE"))?;
            Ok(ProviderSettings::Fixture {
                path: PathBuf::from(path),
            })
        }
        other => bail!("unknown PROVIDER `{other}` (expected command, http or fixture)"),
    }
}

fn parse_or<T>(cfg: &EnvConfig, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match cfg.get(key) {
        Some(value) => value
            .parse()
            .with_context(|| format!("Parsing {key} from `{value}`")),
        None => Ok(default),
    }
}

pub fn split_terms(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn read_env_config_skips_comments_and_quotes() {
        let cfg = make_config("# provider\nWINDOW_DAYS=\"3\"\n\nPROVIDER_URL = https://api.test\n");
        let parsed = read_env_config(cfg.path()).unwrap().unwrap();
        assert_eq!(parsed.get("WINDOW_DAYS"), Some("3"));
        assert_eq!(parsed.get("PROVIDER_URL"), Some("https://api.test"));
        assert_eq!(parsed.get("MISSING"), None);
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_env_config(&dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn empty_config_yields_defaults() {
        let settings = settings_from_env(&EnvConfig::default()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.pipeline.window_days, 7);
        assert_eq!(settings.search_terms.len(), 6);
        assert_eq!(
            settings.provider,
            ProviderSettings::Command {
                program: DEFAULT_PROVIDER_COMMAND.into(),
                args: Vec::new(),
            }
        );
    }

    #[test]
    fn http_provider_and_pipeline_values_are_read() {
        let cfg = parse_env_config(
            "PROVIDER=http\nPROVIDER_URL=https://scraper.test/search\nPROVIDER_TOKEN=abc\n\
             PROVIDER_TIMEOUT_SECS=15\nWINDOW_DAYS=14\nMAX_RESULTS=50\nQUERY_DELAY_MS=100-250\n\
             SEARCH_TERMS=mascara, #lashes ,\nPORT=9000\n",
        );
        let settings = settings_from_env(&cfg).unwrap();
        assert_eq!(
            settings.provider,
            ProviderSettings::Http {
                url: "https://scraper.test/search".into(),
                token: Some(ApiToken("abc".into())),
                timeout: Duration::from_secs(15),
            }
        );
        assert_eq!(settings.pipeline.window_days, 14);
        assert_eq!(settings.pipeline.max_results, 50);
        assert_eq!(settings.pipeline.provider_timeout, Duration::from_secs(15));
        assert_eq!(
            settings.pipeline.query_delay,
            DelayRange::parse_millis("100-250").unwrap()
        );
        assert_eq!(settings.search_terms, ["mascara", "#lashes"]);
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn clipscout_port_wins_over_port() {
        let cfg = parse_env_config("PORT=9000\nCLIPSCOUT_PORT=9100\n");
        assert_eq!(settings_from_env(&cfg).unwrap().port, 9100);
    }

    #[test]
    fn command_line_is_split_into_program_and_args() {
        let cfg = parse_env_config("PROVIDER_COMMAND=node scraper.js --headless\n");
        assert_eq!(
            settings_from_env(&cfg).unwrap().provider,
            ProviderSettings::Command {
                program: "node".into(),
                args: vec!["scraper.js".into(), "--headless".into()],
            }
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        for bad in [
            "WINDOW_DAYS=week",
            "MAX_RESULTS=-1",
            "QUERY_DELAY_MS=later",
            "QUERY_DELAY_MS=0-18446744073709551615",
            "PROVIDER=browser",
            "PROVIDER=http",
            "PROVIDER=fixture",
            "SEARCH_TERMS= , ,",
        ] {
            assert!(
                settings_from_env(&parse_env_config(bad)).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn file_values_are_overridden_by_later_layers() {
        let file = parse_env_config("WINDOW_DAYS=3\nMAX_RESULTS=5\n");
        let mut overrides = EnvConfig::default();
        overrides.set("WINDOW_DAYS", "9");
        let merged = file.merge(overrides);
        let settings = settings_from_env(&merged).unwrap();
        assert_eq!(settings.pipeline.window_days, 9);
        assert_eq!(settings.pipeline.max_results, 5);
    }
}
