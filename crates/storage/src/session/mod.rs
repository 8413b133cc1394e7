//! Session persistence: records, active-session pointers and the
//! invalidation log.
//!
//! # Tables
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────┐      ┌────────────────────┐
//! │  SessionRecord   │◄─────│  ActiveSession   │      │ InvalidationRecord │
//! │ one per token,   │      │ at most one per  │      │ append-only, one   │
//! │ active → inactive│─────►│ user             │      │ per retirement     │
//! └──────────────────┘      └──────────────────┘      └────────────────────┘
//! ```
//!
//! # Storage Trait
//!
//! The [`SessionStore`] trait abstracts the three tables. Use
//! [`MemorySessionStore`] for tests and single-process deployments, and
//! wrap any store in [`AuditedSessionStore`](audited_store::AuditedSessionStore)
//! to emit audit events for every mutation.

pub mod audit;
pub mod audited_store;
mod record;
mod store;

pub use record::{ActiveSession, InvalidationReason, InvalidationRecord, SessionRecord, SessionScope};
pub use store::{MemorySessionStore, SessionStore};
