use std::time::Duration;

use thiserror::Error;

/// Errors surfaced while driving a request through the crawl pipeline.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("max depth reached: depth {depth} > {max_depth} for {url}")]
    DepthExceeded {
        url: String,
        depth: u32,
        max_depth: u32,
    },

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("rule `{rule}` not found in task `{task}`")]
    RuleNotFound { task: String, rule: String },

    #[error("parse failed: {0}")]
    Parse(#[from] RuleError),

    #[error("task `{0}` is not registered")]
    TaskNotFound(String),

    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limit: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("task `{0}` has no fetcher")]
    NoFetcher(String),

    #[error("body too short: {len} bytes, expected at least {min}")]
    BodyTooShort { len: usize, min: usize },

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("proxy: {0}")]
    Proxy(#[from] ProxyError),

    #[error("{0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("script: {0}")]
    Script(#[from] ScriptError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("request record #{0} has no string `Url`")]
    MissingUrl(usize),

    #[error("request record #{index}: invalid `{field}`")]
    InvalidField { index: usize, field: &'static str },

    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum RateLimitError {
    #[error("deadline expired before a token was available")]
    Deadline,

    #[error("token would only be available in {0:?}, past the deadline")]
    WouldExceedDeadline(Duration),

    #[error("rate is zero, no token will ever be available")]
    Unsatisfiable,
}

#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("scheduler is closed")]
    Closed,

    #[error("scheduler is already running")]
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy url list is empty")]
    Empty,

    #[error("invalid proxy url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
