#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Turnstile
//!
//! Two-tier token-bucket admission control for HTTP services: a **global
//! per-client** limiter and a **per-client-per-parameter** limiter, backed
//! by visitor registries with background eviction of idle entries.
//!
//! ## Features
//!
//! - **Token buckets** with continuous time-proportional refill and the
//!   full burst available on first contact
//! - **Two-tier evaluation** in a fixed order (global first), so blame for
//!   a denial is deterministic
//! - **Visitor registries** with single-critical-section get-or-create —
//!   no duplicate burst budgets under racing first requests
//! - **Background sweepers** (one per tier) with deterministic shutdown
//! - **Tower middleware** that short-circuits denials with a 429 JSON body
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use turnstile::{AdmissionControl, AdmissionLayer, LimiterSettings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let control = Arc::new(AdmissionControl::new(LimiterSettings::default()));
//!     let sweepers = control.start_sweepers();
//!
//!     // Wrap any tower service speaking http::Request / http::Response:
//!     let layer = AdmissionLayer::new(Arc::clone(&control));
//!     # let _ = layer;
//!
//!     sweepers.shutdown().await;
//! }
//! ```

pub mod bucket;
pub mod identity;
pub mod middleware;
pub mod prelude;
pub mod registry;
pub mod service;
pub mod settings;

// Re-exports
pub use bucket::TokenBucket;
pub use identity::{client_identity, PeerAddr, FORWARDED_FOR};
pub use middleware::{AdmissionLayer, AdmissionService};
pub use registry::{ClientRegistry, ParamRegistry};
pub use service::{AdmissionControl, LimitTier, SweeperHandle, Verdict, NO_PARAM};
pub use settings::{LimiterSettings, SettingsError};
