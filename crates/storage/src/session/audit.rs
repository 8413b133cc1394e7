//! Audit logging for session and signing-key lifecycle events.
//!
//! Every retirement of a session, every movement of a user's
//! active-session pointer and every key rotation leaves a structured
//! audit event recording who did it, what was affected, when, and whether
//! it succeeded.
//!
//! # Usage
//!
//! ```no_run
//! use tokenward_storage::session::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("session-orchestrator")
//!     .action(AuditAction::RetireSession)
//!     .resource("user:u-1/session:s-1")
//!     .result(AuditResult::Success)
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Action performed on a session or key resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// New session records were stored.
    BeginSession,
    /// A session record was retired.
    RetireSession,
    /// A user's active-session pointer was created or moved.
    SetActivePointer,
    /// A user's active-session pointer was removed.
    DeleteActivePointer,
    /// A new signing key became current.
    RotateKey,
    /// A superseded signing key left the retained set.
    PruneKey,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeginSession => write!(f, "begin_session"),
            Self::RetireSession => write!(f, "retire_session"),
            Self::SetActivePointer => write!(f, "set_active_pointer"),
            Self::DeleteActivePointer => write!(f, "delete_active_pointer"),
            Self::RotateKey => write!(f, "rotate_key"),
            Self::PruneKey => write!(f, "prune_key"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation failed with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Identity of the component performing the operation.
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier (e.g., "user:u-1/session:s-1" or "kid:...").
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context (e.g., invalidation reason, record count).
    #[builder(default)]
    pub metadata: HashMap<String, String>,
}

/// Trait for audit log backends.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events on the
/// `tokenward::audit` target.
///
/// Successful operations are logged at `INFO`, failed ones at `WARN`.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: who performed the action
/// - `audit.action`: the operation (e.g., "retire_session")
/// - `audit.resource`: what was affected
/// - `audit.result`: "success" or "failure: ..."
/// - `audit.metadata`: additional context as `k=v` pairs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let mut pairs: Vec<String> =
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        let metadata_str = pairs.join(", ");

        match event.result {
            AuditResult::Success => tracing::event!(
                target: "tokenward::audit",
                tracing::Level::INFO,
                audit.timestamp = %event.timestamp.to_rfc3339(),
                audit.actor = %event.actor,
                audit.action = %event.action,
                audit.resource = %event.resource,
                audit.result = %event.result,
                audit.metadata = %metadata_str,
                "audit_event"
            ),
            AuditResult::Failure(_) => tracing::event!(
                target: "tokenward::audit",
                tracing::Level::WARN,
                audit.timestamp = %event.timestamp.to_rfc3339(),
                audit.actor = %event.actor,
                audit.action = %event.action,
                audit.resource = %event.resource,
                audit.result = %event.result,
                audit.metadata = %metadata_str,
                "audit_event"
            ),
        }
    }
}

/// No-op audit logger for testing and environments where audit is not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Constructs a resource identifier for a user's session.
pub fn session_resource(user_id: impl fmt::Display, session_id: impl fmt::Display) -> String {
    format!("user:{user_id}/session:{session_id}")
}

/// Constructs a resource identifier for a user's active-session pointer.
pub fn pointer_resource(user_id: impl fmt::Display) -> String {
    format!("user:{user_id}/active")
}

/// Constructs a resource identifier for a signing key.
pub fn key_resource(kid: impl fmt::Display) -> String {
    format!("kid:{kid}")
}
