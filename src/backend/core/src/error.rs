//! Error handling for the causal log core.
//!
//! Only integration errors surface as [`CausalError`]: invariant violations
//! while stamping or recovering, resolution against an unknown branch, and
//! failures of the layers around the core (persistence, configuration).
//! Replication duplicates and concurrent updates are modeled as data and never
//! produce an error.
//!
//! # Usage
//!
//! ```rust,ignore
//! use causal_log_core::error::{CausalError, ErrorContext, Result};
//!
//! fn load() -> Result<Config> {
//!     Config::from_file(path).context("Failed to load log configuration")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for causal log operations.
pub type Result<T> = std::result::Result<T, CausalError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Sequencing Errors (1000-1099)
    SequenceNrOverflow,
    NonMonotonicSequenceNr,

    // Causality Errors (1100-1199)
    CausalityViolation,

    // Version Errors (1200-1299)
    UnknownWinner,
    AggregateNotFound,

    // Log Errors (2000-2099)
    LogNotFound,
    LogAlreadyExists,
    LogUnavailable,
    PersistenceFailed,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::SequenceNrOverflow => 1000,
            Self::NonMonotonicSequenceNr => 1001,

            Self::CausalityViolation => 1100,

            Self::UnknownWinner => 1200,
            Self::AggregateNotFound => 1201,

            Self::LogNotFound => 2000,
            Self::LogAlreadyExists => 2001,
            Self::LogUnavailable => 2002,
            Self::PersistenceFailed => 2003,

            Self::SerializationError => 2200,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Whether the caller may retry the same request.
    ///
    /// Invariant violations are never retryable: they indicate a bug or a
    /// corrupted recovery state.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceFailed | Self::LogUnavailable)
    }

    /// Whether this error signals a broken sequencing or causality invariant.
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::SequenceNrOverflow | Self::NonMonotonicSequenceNr | Self::CausalityViolation
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "sequencing",
            1100..=1199 => "causality",
            1200..=1299 => "versions",
            2000..=2099 => "log",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (unknown winner, missing aggregate)
    Low,
    /// Operational issues (persistence, closed logs)
    Medium,
    /// Misconfiguration and serialization failures
    High,
    /// Broken invariants requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::UnknownWinner
            | ErrorCode::AggregateNotFound
            | ErrorCode::LogNotFound
            | ErrorCode::LogAlreadyExists => Self::Low,

            ErrorCode::LogUnavailable | ErrorCode::PersistenceFailed => Self::Medium,

            ErrorCode::SerializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::SequenceNrOverflow
            | ErrorCode::NonMonotonicSequenceNr
            | ErrorCode::CausalityViolation
            | ErrorCode::InternalError
            | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (log, aggregate)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the causal log core.
#[derive(Error, Debug)]
pub struct CausalError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Message safe to show callers
    message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for CausalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl CausalError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both a caller-facing and an internal message.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    fn record_metrics(&self) {
        counter!(
            "causal_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain Constructors
// ═══════════════════════════════════════════════════════════════════════════════

impl CausalError {
    /// Assigning the next sequence number would overflow.
    pub fn sequence_nr_overflow(sequence_nr: u64, delta: u64) -> Self {
        Self::new(
            ErrorCode::SequenceNrOverflow,
            format!("Sequence number {} cannot advance by {}", sequence_nr, delta),
        )
        .with_details(
            ErrorDetails::new()
                .with_context("sequence_nr", sequence_nr)
                .with_context("delta", delta),
        )
    }

    /// An externally placed event would not advance the log's sequence number.
    pub fn non_monotonic_sequence_nr(current: u64, event_sequence_nr: u64) -> Self {
        Self::new(
            ErrorCode::NonMonotonicSequenceNr,
            format!(
                "Event sequence number {} does not advance past {}",
                event_sequence_nr, current
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_context("current_sequence_nr", current)
                .with_context("event_sequence_nr", event_sequence_nr),
        )
    }

    /// An update arrived that is causally before or equal to an existing version.
    pub fn causality_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CausalityViolation, message.into())
    }

    /// Resolution selected a timestamp that matches no current branch.
    pub fn unknown_winner(winner: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnknownWinner,
            format!("No version with timestamp {} to resolve to", winner),
        )
        .with_details(ErrorDetails::new().with_context("winner", winner.to_string()))
    }

    pub fn aggregate_not_found(aggregate_id: impl fmt::Display) -> Self {
        let id = aggregate_id.to_string();
        Self::new(
            ErrorCode::AggregateNotFound,
            format!("Aggregate not found: {}", id),
        )
        .with_details(ErrorDetails::new().with_entity("aggregate", id))
    }

    pub fn log_not_found(log_id: impl fmt::Display) -> Self {
        let id = log_id.to_string();
        Self::new(ErrorCode::LogNotFound, format!("Event log not found: {}", id))
            .with_details(ErrorDetails::new().with_entity("log", id))
    }

    pub fn log_already_exists(log_id: impl fmt::Display) -> Self {
        let id = log_id.to_string();
        Self::new(
            ErrorCode::LogAlreadyExists,
            format!("Event log already running: {}", id),
        )
        .with_details(ErrorDetails::new().with_entity("log", id))
    }

    /// The log's owning task has stopped.
    pub fn log_unavailable(log_id: impl fmt::Display) -> Self {
        let id = log_id.to_string();
        Self::new(
            ErrorCode::LogUnavailable,
            format!("Event log is not running: {}", id),
        )
        .with_details(ErrorDetails::new().with_entity("log", id))
    }

    pub fn persistence_failed(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::PersistenceFailed,
            "Failed to persist log state",
            message,
        )
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error",
            message,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context message to the error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Set a specific error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| CausalError::internal(message).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| CausalError::with_internal(code, code.to_string(), e.to_string()))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| CausalError::internal(message))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| CausalError::new(code, code.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for CausalError {
    fn from(error: serde_json::Error) -> Self {
        CausalError::with_internal(
            ErrorCode::SerializationError,
            "Failed to serialize or deserialize data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for CausalError {
    fn from(error: config::ConfigError) -> Self {
        CausalError::with_internal(
            ErrorCode::InvalidConfiguration,
            "Invalid configuration",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for CausalError {
    fn from(error: tokio::sync::oneshot::error::RecvError) -> Self {
        CausalError::with_internal(
            ErrorCode::LogUnavailable,
            "Event log stopped before replying",
            error.to_string(),
        )
    }
}

impl From<anyhow::Error> for CausalError {
    fn from(error: anyhow::Error) -> Self {
        CausalError::internal(error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
