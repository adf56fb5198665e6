use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CriticError;
use crate::types::{CommentStyle, PullRequestRef, ReviewMode};

/// Public GitHub REST endpoint.
pub const DEFAULT_SOURCE_HOST_BASE_URL: &str = "https://api.github.com";
/// Public OpenAI endpoint (without the `/v1` suffix).
pub const DEFAULT_COMPLETION_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.5;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_CONTEXT_WINDOW: u32 = 16384;
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Immutable description of one review run.
///
/// Built once at startup by [`Settings::from_env`] and shared by reference
/// with every pipeline stage.
///
/// # Examples
///
/// ```
/// use critic_core::{PullRequestRef, ReviewMode, ReviewRequest};
///
/// let request = ReviewRequest::new(PullRequestRef::new("octocat/hello", 7).unwrap());
/// assert_eq!(request.mode, ReviewMode::Files);
/// assert_eq!(request.max_tokens, 2048);
/// assert!(!request.strict);
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub pull_request: PullRequestRef,
    /// REST API base of the source-control host.
    pub source_host_base_url: String,
    /// Base URL of the OpenAI-compatible completion service.
    pub completion_base_url: String,
    pub mode: ReviewMode,
    /// Language the review must be written in.
    pub language: String,
    /// Instruction template overriding the built-in one.
    pub custom_prompt: Option<String>,
    pub model: String,
    pub temperature: f64,
    /// Completion budget per request.
    pub max_tokens: u32,
    /// Model context size; prompt and completion together must fit.
    pub context_window: u32,
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    /// Escalate any completion or posting failure to a failed run.
    pub strict: bool,
    /// Upper bound on concurrent completion calls.
    pub concurrency: usize,
    /// Attempts per chunk, including the first one.
    pub max_attempts: u32,
    /// Overall deadline for the completion stage.
    pub run_timeout: Option<Duration>,
    /// Stop sending a unit's remaining chunks once one of them failed.
    pub abort_unit_on_failure: bool,
    pub comment_style: CommentStyle,
}

impl ReviewRequest {
    /// A request with every optional setting at its default.
    pub fn new(pull_request: PullRequestRef) -> Self {
        Self {
            pull_request,
            source_host_base_url: DEFAULT_SOURCE_HOST_BASE_URL.into(),
            completion_base_url: DEFAULT_COMPLETION_BASE_URL.into(),
            mode: ReviewMode::Files,
            language: DEFAULT_LANGUAGE.into(),
            custom_prompt: None,
            model: DEFAULT_MODEL.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            context_window: DEFAULT_CONTEXT_WINDOW,
            include_pattern: None,
            exclude_pattern: None,
            strict: false,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            run_timeout: None,
            abort_unit_on_failure: false,
            comment_style: CommentStyle::PerUnit,
        }
    }

    /// Check value ranges and regex syntax.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), CriticError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(CriticError::Config(format!(
                "TEMPERATURE must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(CriticError::Config("MAX_TOKENS must be positive".into()));
        }
        if self.max_tokens >= self.context_window {
            return Err(CriticError::Config(format!(
                "MAX_TOKENS ({}) must be smaller than CONTEXT_WINDOW ({})",
                self.max_tokens, self.context_window
            )));
        }
        if self.concurrency == 0 {
            return Err(CriticError::Config("CONCURRENCY must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(CriticError::Config("MAX_ATTEMPTS must be at least 1".into()));
        }
        for (name, pattern) in [
            ("INCLUDE_REGEX", &self.include_pattern),
            ("EXCLUDE_REGEX", &self.exclude_pattern),
        ] {
            if let Some(p) = pattern {
                regex::Regex::new(p)
                    .map_err(|e| CriticError::Config(format!("invalid {name} '{p}': {e}")))?;
            }
        }
        Ok(())
    }
}

/// Secrets for the two external services.
///
/// Kept apart from [`ReviewRequest`] so the request can be logged and
/// serialized freely. `Debug` output is redacted.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub source_host_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("source_host_token", &"<redacted>")
            .finish()
    }
}

/// Optional settings file (`.critic.toml`).
///
/// Environment variables override every value here. Secrets are never read
/// from the file.
///
/// # Examples
///
/// ```
/// use critic_core::FileConfig;
///
/// let config = FileConfig::from_toml("[llm]\nmodel = \"gpt-4o\"\n").unwrap();
/// assert_eq!(config.llm.model.as_deref(), Some("gpt-4o"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub review: ReviewSection,
}

/// `[source]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSection {
    pub base_url: Option<String>,
    /// `owner/repo`.
    pub repository: Option<String>,
}

/// `[llm]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSection {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub context_window: Option<u32>,
    pub max_attempts: Option<u32>,
}

/// `[review]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewSection {
    pub mode: Option<ReviewMode>,
    pub language: Option<String>,
    pub custom_prompt: Option<String>,
    pub include_regex: Option<String>,
    pub exclude_regex: Option<String>,
    pub strict: Option<bool>,
    pub concurrency: Option<usize>,
    pub run_timeout_secs: Option<u64>,
    pub abort_unit_on_failure: Option<bool>,
    pub comment_style: Option<CommentStyle>,
}

impl FileConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::FileNotFound`] if `path` does not exist,
    /// [`CriticError::Io`] on read failure, or [`CriticError::Toml`] on
    /// invalid content.
    pub fn from_file(path: &Path) -> Result<Self, CriticError> {
        if !path.exists() {
            return Err(CriticError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Toml`] if parsing fails.
    pub fn from_toml(content: &str) -> Result<Self, CriticError> {
        Ok(toml::from_str(content)?)
    }
}

/// Everything resolved at startup: the run description and its secrets.
#[derive(Debug, Clone)]
pub struct Settings {
    pub request: ReviewRequest,
    pub credentials: Credentials,
}

impl Settings {
    /// Resolve settings from the process environment layered over `file`.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Config`] for missing required variables,
    /// unparsable values, or invalid regex patterns.
    pub fn from_env(file: &FileConfig) -> Result<Self, CriticError> {
        Self::from_lookup(file, |key| std::env::var(key).ok())
    }

    /// Resolve settings from an arbitrary variable lookup layered over `file`.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// See [`Settings::from_env`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use critic_core::{FileConfig, Settings};
    ///
    /// let env: HashMap<&str, &str> = [
    ///     ("API_KEY", "sk-test"),
    ///     ("SOURCE_HOST_TOKEN", "ghp-test"),
    ///     ("PULL_REQUEST_ID", "12"),
    ///     ("REPOSITORY", "octocat/hello"),
    /// ]
    /// .into_iter()
    /// .collect();
    /// let settings =
    ///     Settings::from_lookup(&FileConfig::default(), |k| env.get(k).map(|v| v.to_string()))
    ///         .unwrap();
    /// assert_eq!(settings.request.pull_request.number, 12);
    /// ```
    pub fn from_lookup<F>(file: &FileConfig, lookup: F) -> Result<Self, CriticError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |names: &[&str]| -> Option<String> {
            names.iter().find_map(|name| {
                lookup(name)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
        };
        let require = |names: &[&str]| -> Result<String, CriticError> {
            get(names).ok_or_else(|| {
                CriticError::Config(format!("{} is required but not set", names.join(" or ")))
            })
        };

        let api_key = require(&["API_KEY", "OPENAI_API_KEY"])?;
        let source_host_token = require(&["SOURCE_HOST_TOKEN", "GITHUB_TOKEN"])?;
        let number: u64 = parse_value("PULL_REQUEST_ID", &require(&["PULL_REQUEST_ID", "GITHUB_PR_ID"])?)?;
        let slug = match get(&["REPOSITORY", "GITHUB_REPOSITORY"]) {
            Some(s) => s,
            None => file.source.repository.clone().ok_or_else(|| {
                CriticError::Config("REPOSITORY or GITHUB_REPOSITORY is required but not set".into())
            })?,
        };
        let pull_request = PullRequestRef::new(&slug, number).map_err(CriticError::Config)?;

        let mut request = ReviewRequest::new(pull_request);

        if let Some(v) = get(&["SOURCE_HOST_BASE_URL", "GITHUB_BASE_URL"])
            .or_else(|| file.source.base_url.clone())
        {
            request.source_host_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get(&["COMPLETION_BASE_URL"]).or_else(|| file.llm.base_url.clone()) {
            request.completion_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get(&["MODEL", "OPENAI_MODEL"]).or_else(|| file.llm.model.clone()) {
            request.model = v;
        }
        request.temperature = match get(&["TEMPERATURE", "OPENAI_TEMPERATURE"]) {
            Some(v) => parse_value("TEMPERATURE", &v)?,
            None => file.llm.temperature.unwrap_or(request.temperature),
        };
        request.max_tokens = match get(&["MAX_TOKENS", "OPENAI_MAX_TOKENS"]) {
            Some(v) => parse_value("MAX_TOKENS", &v)?,
            None => file.llm.max_tokens.unwrap_or(request.max_tokens),
        };
        request.context_window = match get(&["CONTEXT_WINDOW"]) {
            Some(v) => parse_value("CONTEXT_WINDOW", &v)?,
            None => file.llm.context_window.unwrap_or(request.context_window),
        };
        request.max_attempts = match get(&["MAX_ATTEMPTS"]) {
            Some(v) => parse_value("MAX_ATTEMPTS", &v)?,
            None => file.llm.max_attempts.unwrap_or(request.max_attempts),
        };
        request.mode = match get(&["MODE"]) {
            Some(v) => parse_value("MODE", &v)?,
            None => file.review.mode.unwrap_or(request.mode),
        };
        if let Some(v) = get(&["LANGUAGE"]).or_else(|| file.review.language.clone()) {
            request.language = v;
        }
        request.custom_prompt = get(&["CUSTOM_PROMPT"]).or_else(|| non_empty(&file.review.custom_prompt));
        request.include_pattern =
            get(&["INCLUDE_REGEX"]).or_else(|| non_empty(&file.review.include_regex));
        request.exclude_pattern =
            get(&["EXCLUDE_REGEX"]).or_else(|| non_empty(&file.review.exclude_regex));
        request.strict = match get(&["STRICT"]) {
            Some(v) => parse_bool("STRICT", &v)?,
            None => file.review.strict.unwrap_or(false),
        };
        request.concurrency = match get(&["CONCURRENCY"]) {
            Some(v) => parse_value("CONCURRENCY", &v)?,
            None => file.review.concurrency.unwrap_or(request.concurrency),
        };
        let timeout_secs: Option<u64> = match get(&["RUN_TIMEOUT_SECS"]) {
            Some(v) => Some(parse_value("RUN_TIMEOUT_SECS", &v)?),
            None => file.review.run_timeout_secs,
        };
        request.run_timeout = timeout_secs.filter(|s| *s > 0).map(Duration::from_secs);
        request.abort_unit_on_failure = match get(&["ABORT_UNIT_ON_FAILURE"]) {
            Some(v) => parse_bool("ABORT_UNIT_ON_FAILURE", &v)?,
            None => file.review.abort_unit_on_failure.unwrap_or(false),
        };
        request.comment_style = match get(&["COMMENT_STYLE"]) {
            Some(v) => parse_value("COMMENT_STYLE", &v)?,
            None => file.review.comment_style.unwrap_or_default(),
        };

        request.validate()?;

        Ok(Self {
            request,
            credentials: Credentials {
                api_key,
                source_host_token,
            },
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, CriticError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse()
        .map_err(|e| CriticError::Config(format!("{name} has invalid value '{raw}': {e}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, CriticError> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CriticError::Config(format!(
            "{name} has invalid value '{raw}': expected true or false"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base_env() -> HashMap<String, String> {
        [
            ("API_KEY", "sk-test"),
            ("SOURCE_HOST_TOKEN", "ghp-test"),
            ("PULL_REQUEST_ID", "42"),
            ("REPOSITORY", "octocat/hello-world"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn load(env: &HashMap<String, String>) -> Result<Settings, CriticError> {
        Settings::from_lookup(&FileConfig::default(), |k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let settings = load(&base_env()).unwrap();
        let r = &settings.request;
        assert_eq!(r.pull_request.to_string(), "octocat/hello-world#42");
        assert_eq!(r.source_host_base_url, DEFAULT_SOURCE_HOST_BASE_URL);
        assert_eq!(r.model, DEFAULT_MODEL);
        assert_eq!(r.temperature, 0.5);
        assert_eq!(r.max_tokens, 2048);
        assert_eq!(r.mode, ReviewMode::Files);
        assert_eq!(r.language, "en");
        assert!(r.custom_prompt.is_none());
        assert!(r.include_pattern.is_none());
        assert!(r.exclude_pattern.is_none());
        assert!(r.run_timeout.is_none());
        assert_eq!(r.comment_style, CommentStyle::PerUnit);
    }

    #[test]
    fn missing_secret_is_config_error() {
        let mut env = base_env();
        env.remove("API_KEY");
        let err = load(&env).unwrap_err();
        assert!(matches!(err, CriticError::Config(_)));
        assert!(err.to_string().contains("API_KEY"));
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let mut env = base_env();
        env.insert("SOURCE_HOST_TOKEN".into(), "   ".into());
        assert!(load(&env).is_err());
    }

    #[test]
    fn legacy_github_names_are_accepted() {
        let mut env = base_env();
        env.remove("SOURCE_HOST_TOKEN");
        env.remove("PULL_REQUEST_ID");
        env.remove("REPOSITORY");
        env.insert("GITHUB_TOKEN".into(), "ghp".into());
        env.insert("GITHUB_PR_ID".into(), "9".into());
        env.insert("GITHUB_REPOSITORY".into(), "a/b".into());
        let settings = load(&env).unwrap();
        assert_eq!(settings.request.pull_request.number, 9);
    }

    #[test]
    fn malformed_include_regex_fails_fast() {
        let mut env = base_env();
        env.insert("INCLUDE_REGEX".into(), "([a-z".into());
        let err = load(&env).unwrap_err();
        assert!(matches!(err, CriticError::Config(_)));
        assert!(err.to_string().contains("INCLUDE_REGEX"));
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let mut env = base_env();
        env.insert("TEMPERATURE".into(), "2.5".into());
        assert!(load(&env).is_err());
        env.insert("TEMPERATURE".into(), "warm".into());
        assert!(load(&env).is_err());
    }

    #[test]
    fn max_tokens_must_fit_context_window() {
        let mut env = base_env();
        env.insert("MAX_TOKENS".into(), "0".into());
        assert!(load(&env).is_err());
        env.insert("MAX_TOKENS".into(), "20000".into());
        assert!(load(&env).is_err());
        env.insert("CONTEXT_WINDOW".into(), "128000".into());
        assert_eq!(load(&env).unwrap().request.max_tokens, 20000);
    }

    #[test]
    fn invalid_mode_rejected() {
        let mut env = base_env();
        env.insert("MODE".into(), "commits".into());
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("MODE"));
    }

    #[test]
    fn booleans_and_timeout_parse() {
        let mut env = base_env();
        env.insert("STRICT".into(), "Yes".into());
        env.insert("ABORT_UNIT_ON_FAILURE".into(), "1".into());
        env.insert("RUN_TIMEOUT_SECS".into(), "300".into());
        let r = load(&env).unwrap().request;
        assert!(r.strict);
        assert!(r.abort_unit_on_failure);
        assert_eq!(r.run_timeout, Some(Duration::from_secs(300)));

        env.insert("STRICT".into(), "maybe".into());
        assert!(load(&env).is_err());
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let mut env = base_env();
        env.insert(
            "SOURCE_HOST_BASE_URL".into(),
            "https://github.example.com/api/v3/".into(),
        );
        let r = load(&env).unwrap().request;
        assert_eq!(r.source_host_base_url, "https://github.example.com/api/v3");
    }

    #[test]
    fn env_overrides_file() {
        let file = FileConfig::from_toml(
            r#"
[source]
repository = "file/repo"

[llm]
model = "gpt-4o"
temperature = 0.2

[review]
mode = "patch"
language = "ja"
comment_style = "combined"
"#,
        )
        .unwrap();
        let mut env = base_env();
        env.remove("REPOSITORY");
        env.insert("LANGUAGE".into(), "de".into());
        let settings = Settings::from_lookup(&file, |k| env.get(k).cloned()).unwrap();
        let r = settings.request;
        assert_eq!(r.pull_request.owner, "file");
        assert_eq!(r.model, "gpt-4o");
        assert_eq!(r.temperature, 0.2);
        assert_eq!(r.mode, ReviewMode::Patch);
        assert_eq!(r.language, "de");
        assert_eq!(r.comment_style, CommentStyle::Combined);
    }

    #[test]
    fn invalid_toml_returns_error() {
        assert!(FileConfig::from_toml("{{invalid}}").is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".critic.toml");
        std::fs::write(&path, "[review]\nstrict = true\n").unwrap();
        let config = FileConfig::from_file(&path).unwrap();
        assert_eq!(config.review.strict, Some(true));

        let missing = FileConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(CriticError::FileNotFound(_))));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let settings = load(&base_env()).unwrap();
        let debug = format!("{:?}", settings.credentials);
        assert!(!debug.contains("sk-test"));
        assert!(debug.contains("redacted"));
    }
}
