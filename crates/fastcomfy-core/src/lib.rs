//! # fastcomfy-core
//!
//! Foundation types shared by every gateway crate:
//!
//! - [`ids`]: opaque identifier newtypes ([`TenantToken`], [`PromptId`])
//! - [`job`]: the per-tenant job definition parsed from a job file
//! - [`resolve`]: variable substitution, seed randomization, unique output names
//! - [`output`]: output descriptors reported by a finished job
//! - [`errors`]: the dispatch error taxonomy
//! - [`alert`]: the outbound alerting seam
//! - [`logging`]: tracing subscriber setup

#![deny(unsafe_code)]

pub mod alert;
pub mod errors;
pub mod ids;
pub mod job;
pub mod logging;
pub mod output;
pub mod resolve;

pub use alert::{AlertKind, Alerter, LogAlerter};
pub use errors::{DispatchError, JobFileError, ResolutionError};
pub use ids::{PromptId, TenantToken};
pub use job::{JobDefinition, JobGraph, JobNode, NodeMeta, VariableSpec, VariableType};
pub use output::OutputDescriptor;
pub use resolve::{ResolvedJob, resolve};
