//! # fastcomfy-server
//!
//! HTTP front end of the gateway.
//!
//! - `POST /api/generate_sync`: dispatch a job, wait for its outputs
//! - `GET /api/list`: tenant listing
//! - `POST /api/start/{token}`, `POST /api/stop/{token}`: tenant lifecycle
//! - `POST /api/reload`: rebuild every tenant from the job directory
//! - `GET /health`: liveness and tenant counts
//! - `GET /artifacts/...`: stored outputs, when local storage is enabled

#![deny(unsafe_code)]

pub mod envelope;
pub mod health;
pub mod server;
pub mod shutdown;

pub use envelope::{ApiResponse, Envelope};
pub use server::{AppState, GatewayServer, GenerateRequest};
pub use shutdown::{DrainReport, ShutdownCoordinator};
