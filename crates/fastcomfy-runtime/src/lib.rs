//! # fastcomfy-runtime
//!
//! Tenant-level orchestration on top of `fastcomfy-backend`:
//!
//! - [`tenant`]: one tenant's node pool, lifecycle and `generate`
//! - [`balancer`]: least-loaded node selection
//! - [`registry`]: token to tenant map, directory loading and hot reload
//! - [`storage`]: artifact persistence seam and the local directory store
//! - [`alert`]: rate-limited webhook alerts

#![deny(unsafe_code)]

pub mod alert;
pub mod balancer;
pub mod context;
pub mod errors;
pub mod registry;
pub mod storage;
pub mod tenant;

pub use alert::{WebhookAlerter, alerter_from_settings};
pub use balancer::{NodeSelector, pick_least_loaded};
pub use context::RuntimeContext;
pub use errors::RegistryError;
pub use registry::{ReloadSummary, TenantRegistry};
pub use storage::{ArtifactStore, LocalArtifactStore, StorageError};
pub use tenant::{Generation, TenantRuntime, TenantSnapshot, TenantStatus};
