//! Shared types for the debtrazor migration pipeline.
//!
//! - `RazorError`: unified error taxonomy with transient/permanent classification
//! - `SessionId`: identifier scoping one pipeline run's checkpoints
//! - `StageId`: the fixed set of pipeline stages, in execution order

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error type for all debtrazor subsystems.
#[derive(Debug, thiserror::Error)]
pub enum RazorError {
    // === Generation Service Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Context length exceeded for {provider}: {message}")]
    ContextLengthExceeded { provider: String, message: String },

    #[error("Malformed output from {stage} stage: {message}")]
    MalformedOutput { stage: String, message: String },

    // === Traversal Errors ===
    #[error("Failed to list directory {path}: {message}")]
    Listing { path: String, message: String },

    #[error("Traversal cannot accept {event} while in phase {phase}")]
    UnexpectedEvent { phase: String, event: String },

    // === Pipeline Errors ===
    #[error("Configuration invalid: {0}")]
    Config(String),

    #[error("Migration plan rejected at step {step} ('{file}'): {reason}")]
    PlanValidation {
        step: usize,
        file: String,
        reason: String,
    },

    #[error("Checkpoint error for session '{session}': {message}")]
    Checkpoint { session: String, message: String },

    // === Tool Errors ===
    #[error("Tool '{tool}' error: {message}")]
    ToolError { tool: String, message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

impl RazorError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RazorError::RateLimited { .. }
                | RazorError::RequestTimeout { .. }
                | RazorError::CommandTimeout { .. }
                | RazorError::ProviderError {
                    retryable: true,
                    ..
                }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RazorError::AuthError { .. }
                | RazorError::Config(_)
                | RazorError::PlanValidation { .. }
                | RazorError::MalformedOutput { .. }
                | RazorError::ContextLengthExceeded { .. }
        )
    }
}

/// A convenience alias for `Result<T, RazorError>`.
pub type Result<T> = std::result::Result<T, RazorError>;

// ---------------------------------------------------------------------------
// SessionId: scopes checkpoints for one pipeline run
// ---------------------------------------------------------------------------

/// Identifier of one pipeline run. Rerunning with the same id resumes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// StageId: pipeline stages in their fixed execution order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Document,
    PlanLayout,
    PlanOrder,
    Migrate,
}

impl StageId {
    /// All stages in the order the orchestrator runs them.
    pub const ORDER: [StageId; 4] = [
        StageId::Document,
        StageId::PlanLayout,
        StageId::PlanOrder,
        StageId::Migrate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Document => "document",
            StageId::PlanLayout => "plan_layout",
            StageId::PlanOrder => "plan_order",
            StageId::Migrate => "migrate",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_provider_error() {
        let err = RazorError::ProviderError {
            provider: "openai".into(),
            status: 500,
            message: "internal server error".into(),
            retryable: true,
        };
        assert_eq!(
            err.to_string(),
            "Provider openai returned HTTP 500: internal server error"
        );
    }

    #[test]
    fn error_display_plan_validation() {
        let err = RazorError::PlanValidation {
            step: 2,
            file: "app/main.rs".into(),
            reason: "new context 'app/lib.rs' is not produced by an earlier step".into(),
        };
        assert_eq!(
            err.to_string(),
            "Migration plan rejected at step 2 ('app/main.rs'): new context 'app/lib.rs' is not produced by an earlier step"
        );
    }

    #[test]
    fn error_display_listing() {
        let err = RazorError::Listing {
            path: "/src/private".into(),
            message: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to list directory /src/private: permission denied"
        );
    }

    // --- is_retryable ---

    #[test]
    fn retryable_transient_generation_errors() {
        let rate = RazorError::RateLimited {
            provider: "x".into(),
            retry_after_ms: 1000,
        };
        let timeout = RazorError::RequestTimeout {
            provider: "x".into(),
            timeout_ms: 30_000,
        };
        let flagged = RazorError::ProviderError {
            provider: "x".into(),
            status: 503,
            message: "unavailable".into(),
            retryable: true,
        };
        assert!(rate.is_retryable());
        assert!(timeout.is_retryable());
        assert!(flagged.is_retryable());
    }

    #[test]
    fn not_retryable_permanent_errors() {
        let bad_request = RazorError::ProviderError {
            provider: "x".into(),
            status: 400,
            message: "bad request".into(),
            retryable: false,
        };
        let malformed = RazorError::MalformedOutput {
            stage: "plan_order".into(),
            message: "missing steps".into(),
        };
        assert!(!bad_request.is_retryable());
        assert!(!malformed.is_retryable());
        assert!(malformed.is_terminal());
    }

    // --- is_terminal ---

    #[test]
    fn terminal_config_and_auth() {
        assert!(RazorError::Config("new_language is required".into()).is_terminal());
        assert!(RazorError::AuthError {
            provider: "x".into()
        }
        .is_terminal());
        assert!(!RazorError::Other("x".into()).is_terminal());
    }

    #[test]
    fn stage_order_is_fixed() {
        assert_eq!(
            StageId::ORDER,
            [
                StageId::Document,
                StageId::PlanLayout,
                StageId::PlanOrder,
                StageId::Migrate
            ]
        );
        assert!(StageId::Document < StageId::Migrate);
    }

    #[test]
    fn stage_id_serializes_snake_case() {
        let json = serde_json::to_string(&StageId::PlanLayout).unwrap();
        assert_eq!(json, "\"plan_layout\"");
        assert_eq!(StageId::PlanOrder.to_string(), "plan_order");
    }

    #[test]
    fn session_id_is_transparent() {
        let id = SessionId::new("legacy-run");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"legacy-run\"");
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
