//! Video providers: the external collaborators that actually talk to the
//! platform.
//!
//! Browser automation, sessions and anti-bot work all live behind this trait.
//! The crate ships three implementations:
//!
//! * [`CommandProvider`] runs a helper program (typically a headless-browser
//!   script) and reads JSON from its stdout, much like driving `yt-dlp`.
//! * [`HttpProvider`] queries a third-party scraping API.
//! * [`FixtureProvider`] replays canned records, for offline runs and tests.
//!
//! Every provider hands back raw JSON entries untouched; making sense of them
//! is the normalizer's job.

use std::{
    fmt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::{process::Command, task};
use tracing::debug;

use crate::metadata::RawProviderRecord;

pub const DEFAULT_PROVIDER_COMMAND: &str = "clipscout-provider";
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Keys under which providers wrap their result list.
const ENVELOPE_KEYS: &[&str] = &["data", "items", "videos", "itemList", "aweme_list"];
/// Cap on how much provider stderr ends up in an error message.
const STDERR_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("could not decode provider response: {0}")]
    Decode(String),
    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("provider task failed: {0}")]
    Join(#[from] task::JoinError),
}

/// Narrow interface the pipeline uses to fetch raw search results.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Returns up to `limit` raw entries for `query`. Implementations may
    /// return more; the pipeline truncates.
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RawProviderRecord>, ProviderError>;
}

/// Bearer token that stays out of `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(pub String);

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

/// Which provider to build, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSettings {
    Command {
        program: String,
        args: Vec<String>,
    },
    Http {
        url: String,
        token: Option<ApiToken>,
        timeout: Duration,
    },
    Fixture {
        path: PathBuf,
    },
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::Command {
            program: DEFAULT_PROVIDER_COMMAND.to_owned(),
            args: Vec::new(),
        }
    }
}

/// Instantiates the configured provider. Fixture files are read eagerly so a
/// bad path fails at startup rather than on the first request.
pub fn build_provider(
    settings: &ProviderSettings,
) -> Result<Arc<dyn VideoProvider>, ProviderError> {
    let provider: Arc<dyn VideoProvider> = match settings {
        ProviderSettings::Command { program, args } => {
            Arc::new(CommandProvider::new(program.clone()).with_args(args.clone()))
        }
        ProviderSettings::Http {
            url,
            token,
            timeout,
        } => Arc::new(HttpProvider::new(
            url.clone(),
            token.as_ref().map(|token| token.0.clone()),
            *timeout,
        )),
        ProviderSettings::Fixture { path } => Arc::new(FixtureProvider::from_file(path)?),
    };
    Ok(provider)
}

/// Runs `<program> <args...> <query> <limit>` and parses stdout.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl VideoProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.program
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RawProviderRecord>, ProviderError> {
        debug!(program = %self.program, limit, "invoking provider command");

        // kill_on_drop ties the child's lifetime to this future, so a caller
        // abandoning the collection also stops the helper.
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(query)
            .arg(limit.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProviderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProviderError::Exit {
                program: self.program.clone(),
                status: output.status,
                stderr: excerpt(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_response(&stdout)
    }
}

/// `GET <endpoint>?query=<q>&count=<n>` against a scraping API.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    endpoint: String,
    token: Option<ApiToken>,
    agent: ureq::Agent,
}

impl HttpProvider {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("clipscout/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            endpoint: endpoint.into(),
            token: token.map(ApiToken),
            agent,
        }
    }

    fn fetch(&self, query: &str, limit: usize) -> Result<Vec<RawProviderRecord>, ProviderError> {
        let mut request = self
            .agent
            .get(&self.endpoint)
            .query("query", query)
            .query("count", &limit.to_string());
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {}", token.0));
        }

        let response = request.call().map_err(|err| ProviderError::Http {
            url: self.endpoint.clone(),
            message: err.to_string(),
        })?;
        let body = response
            .into_string()
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        parse_response(&body)
    }
}

#[async_trait]
impl VideoProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RawProviderRecord>, ProviderError> {
        // ureq is blocking; keep it off the async workers.
        let provider = self.clone();
        let query = query.to_owned();
        task::spawn_blocking(move || provider.fetch(&query, limit)).await?
    }
}

/// Serves the same canned entries for every query.
#[derive(Debug, Clone, Default)]
pub struct FixtureProvider {
    records: Vec<RawProviderRecord>,
}

impl FixtureProvider {
    pub fn new(records: Vec<RawProviderRecord>) -> Self {
        Self { records }
    }

    /// Loads entries from a file in any format [`parse_response`] accepts.
    pub fn from_file(path: &Path) -> Result<Self, ProviderError> {
        let content = std::fs::read_to_string(path).map_err(|source| ProviderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(parse_response(&content)?))
    }
}

#[async_trait]
impl VideoProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn search(
        &self,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<RawProviderRecord>, ProviderError> {
        Ok(self.records.iter().take(limit).cloned().collect())
    }
}

/// Extracts the entry list from a provider response body.
///
/// Accepts a top-level array, an object wrapping the array under one of the
/// usual envelope keys (possibly nested, e.g. `{"data": {"videos": [...]}}`),
/// a single entry object, or JSON lines. An object carrying an `error` key is
/// reported as a failure instead of being mistaken for an entry.
pub fn parse_response(body: &str) -> Result<Vec<RawProviderRecord>, ProviderError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value) => unwrap_envelope(value),
        Err(whole_err) => {
            let mut entries = Vec::new();
            for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
                let value: Value = serde_json::from_str(line)
                    .map_err(|_| ProviderError::Decode(whole_err.to_string()))?;
                entries.extend(unwrap_envelope(value)?);
            }
            Ok(entries)
        }
    }
}

fn unwrap_envelope(value: Value) -> Result<Vec<RawProviderRecord>, ProviderError> {
    match value {
        Value::Array(entries) => Ok(entries),
        Value::Object(mut object) => {
            if let Some(error) = object.get("error").filter(|error| !error.is_null()) {
                let message = match error {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                return Err(ProviderError::Decode(format!(
                    "provider reported an error: {}",
                    excerpt(&message)
                )));
            }
            for key in ENVELOPE_KEYS {
                match object.remove(*key) {
                    Some(inner @ (Value::Array(_) | Value::Object(_))) => {
                        return unwrap_envelope(inner);
                    }
                    Some(Value::Null) => return Ok(Vec::new()),
                    Some(other) => {
                        object.insert((*key).to_owned(), other);
                    }
                    None => {}
                }
            }
            Ok(vec![Value::Object(object)])
        }
        Value::Null => Ok(Vec::new()),
        other => Err(ProviderError::Decode(format!(
            "expected a list of entries, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(STDERR_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_owned(),
    }
}
