//! # fastcomfy-backend
//!
//! Everything that talks to a single backend node:
//!
//! - [`node`]: address normalization and derived URLs
//! - [`client`]: job submission, queue depth, artifact download over HTTP
//! - [`events`]: the closed set of stream events and frame decoding
//! - [`session`]: one reconnecting event stream per (tenant, node)
//! - [`consumer`]: dispatches stream events to handlers
//! - [`completion`]: correlation id to one-shot waiter registry

#![deny(unsafe_code)]

pub mod client;
pub mod completion;
pub mod consumer;
pub mod errors;
pub mod events;
pub mod node;
pub mod session;

pub use client::{BackendClient, ClientTimeouts, SubmitResponse};
pub use completion::{CompletionRegistry, CorrelationRegistry, WaitError, Waiter};
pub use consumer::{MonitorThresholds, NodeEventConsumer};
pub use errors::BackendError;
pub use events::{BackendEvent, decode_frame};
pub use node::BackendNode;
pub use session::{EventSession, ReconnectPolicy, SessionConfig, SessionState};
