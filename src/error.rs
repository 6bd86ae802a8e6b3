use std::fmt;

use thiserror::Error;

/// Failures of the field cipher itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("ciphertext is {actual} bytes but {expected} were expected")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("decrypted field is not valid utf-8")]
    InvalidUtf8,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Failures to locate or read the length tag carried by an encrypted field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("no length marker found in field")]
    MissingMarker,
    #[error("length marker {0:?} is not a valid length")]
    InvalidLength(String),
    #[error("field declares {declared} bytes but carries {available}")]
    Truncated { declared: usize, available: usize },
    #[error("field of {0} bytes does not fit the length prefix")]
    TooLong(usize),
}

/// Errors surfaced by discovery operations.
///
/// Validation failures (token mismatch, loopback) are not errors; the handler
/// reports them as dropped outcomes instead.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("config error: {0}")]
    Config(String),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("network error: {0}")]
    Network(String),
    #[error("wire error: {0}")]
    Wire(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("message is missing its {0} field")]
    MissingField(&'static str),
    #[error("server port {0:?} is not a valid port number")]
    InvalidPort(String),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Several field-level failures reported as one.
///
/// Built by operations that touch many fields (building a request or response,
/// decrypting an inbound message) so the caller sees every failed field at once.
#[derive(Debug)]
pub struct AggregateError {
    context: &'static str,
    failures: Vec<(&'static str, DiscoveryError)>,
}

impl AggregateError {
    pub fn new(context: &'static str) -> Self {
        Self {
            context,
            failures: Vec::new(),
        }
    }

    /// Records `err` against `field` when present.
    pub fn record(mut self, field: &'static str, err: Option<DiscoveryError>) -> Self {
        if let Some(err) = err {
            self.failures.push((field, err));
        }
        self
    }

    pub fn context(&self) -> &str {
        self.context
    }

    pub fn failures(&self) -> &[(&'static str, DiscoveryError)] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.context)?;
        for (field, err) in &self.failures {
            write!(f, "\n\t{}: {}", field, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

impl From<std::io::Error> for DiscoveryError {
    fn from(err: std::io::Error) -> Self {
        DiscoveryError::Network(err.to_string())
    }
}
