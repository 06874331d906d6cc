//! Convenient re-exports for common Turnstile types.
pub use crate::{
    bucket::TokenBucket,
    identity::{client_identity, PeerAddr},
    middleware::{AdmissionLayer, AdmissionService},
    registry::{ClientRegistry, ParamRegistry},
    service::{AdmissionControl, LimitTier, SweeperHandle, Verdict, NO_PARAM},
    settings::{LimiterSettings, SettingsError},
};
