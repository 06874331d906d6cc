//! The admission-control service: both registries, the ordered two-tier
//! decision, and the sweep lifecycle.
//!
//! One [`AdmissionControl`] instance is constructed at startup and handed
//! (via `Arc`) to the middleware; tests can build as many isolated
//! instances as they like. There is no process-wide state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::registry::{ClientRegistry, ParamRegistry};
use crate::settings::LimiterSettings;

/// Sentinel parameter key for requests carrying no parameter value.
///
/// All parameter-less requests from one client share this single bucket.
pub const NO_PARAM: &str = "__none__";

/// Which limiter tier produced a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitTier {
    /// The per-client (global) tier.
    Global,
    /// The per-client-per-parameter tier.
    PerParam,
}

impl LimitTier {
    /// Human-readable denial message for this tier, as emitted in the
    /// 429 response body.
    pub fn message(&self) -> &'static str {
        match self {
            LimitTier::Global => "Too Many Requests (global limit)",
            LimitTier::PerParam => "Too Many Requests (per-param limit)",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the request to the protected handler.
    Allowed,
    /// Short-circuit with a 429 attributed to the given tier.
    Denied(LimitTier),
}

impl Verdict {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Two-tier admission control service.
///
/// Owns the client and param registries and knows how to run the decision:
/// global tier first, param tier second, fixed order. A request that
/// exhausts both budgets at once is always reported as a global denial.
///
/// # Example
///
/// ```rust
/// use turnstile::{AdmissionControl, LimiterSettings};
///
/// let control = AdmissionControl::new(LimiterSettings::default());
/// assert!(control.admit("203.0.113.7", Some("London")).is_allowed());
/// ```
#[derive(Debug)]
pub struct AdmissionControl {
    settings: LimiterSettings,
    clients: ClientRegistry,
    params: ParamRegistry,
}

impl AdmissionControl {
    /// Build a service from `settings` (normalized first, so unusable
    /// values fall back to their defaults).
    pub fn new(settings: LimiterSettings) -> Self {
        let settings = settings.normalized();
        let clients = ClientRegistry::new(settings.global_rate_per_minute, settings.global_burst);
        let params = ParamRegistry::new(settings.param_rate_per_minute, settings.param_burst);
        Self { settings, clients, params }
    }

    /// The (normalized) settings this service runs with.
    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    /// The global-tier registry. Exposed for eviction tests and operational
    /// inspection.
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// The param-tier registry. Exposed for eviction tests and operational
    /// inspection.
    pub fn params(&self) -> &ParamRegistry {
        &self.params
    }

    /// Run the ordered admission decision for one request.
    ///
    /// A missing or empty `param` maps to [`NO_PARAM`] so parameter-less
    /// requests from a client compete for one shared bucket. The param
    /// bucket is neither created nor charged when the global tier denies.
    pub fn admit(&self, client: &str, param: Option<&str>) -> Verdict {
        let param = match param {
            Some(p) if !p.is_empty() => p,
            _ => NO_PARAM,
        };
        if !self.clients.bucket_for(client).allow() {
            return Verdict::Denied(LimitTier::Global);
        }
        if !self.params.bucket_for(client, param).allow() {
            return Verdict::Denied(LimitTier::PerParam);
        }
        Verdict::Allowed
    }

    /// Denial detail string for the given tier, carrying the configured
    /// rate numbers.
    pub fn denial_detail(&self, tier: LimitTier) -> String {
        match tier {
            LimitTier::Global => format!(
                "Rate limit exceeded: max {} requests per minute per user/IP",
                self.settings.global_rate_per_minute
            ),
            LimitTier::PerParam => format!(
                "Rate limit exceeded: max {} requests per minute per unique param per user/IP",
                self.settings.param_rate_per_minute
            ),
        }
    }

    /// Clear both registries. Test isolation hook; a replayed request
    /// sequence then reproduces the same verdicts.
    pub fn reset(&self) {
        self.clients.clear();
        self.params.clear();
    }

    /// One sweep pass over the global tier. Returns evicted entries.
    pub fn sweep_clients_once(&self) -> usize {
        self.clients.sweep(self.settings.cleanup_timeout())
    }

    /// One sweep pass over the param tier. Returns evicted pairs.
    pub fn sweep_params_once(&self) -> usize {
        self.params.sweep(self.settings.cleanup_timeout())
    }

    /// Spawn the two background sweep loops, one per registry, each waking
    /// on the configured sweep interval. The returned handle stops them
    /// deterministically; dropping it aborts them.
    pub fn start_sweepers(self: &Arc<Self>) -> SweeperHandle {
        let (tx, rx) = watch::channel(false);
        let period = self.settings.sweep_interval();

        let control = Arc::clone(self);
        let clients = tokio::spawn(sweep_loop(rx.clone(), period, "clients", move || {
            control.sweep_clients_once()
        }));

        let control = Arc::clone(self);
        let params = tokio::spawn(sweep_loop(rx, period, "params", move || {
            control.sweep_params_once()
        }));

        SweeperHandle { shutdown: tx, tasks: vec![clients, params] }
    }
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self::new(LimiterSettings::default())
    }
}

async fn sweep_loop<F>(
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
    tier: &'static str,
    sweep: F,
) where
    F: Fn() -> usize + Send + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; burn it so the loop waits a
    // full period before its first pass.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = sweep();
                debug!(target: "turnstile::sweeper", tier, evicted, "sweep pass");
            }
            _ = shutdown.changed() => {
                debug!(target: "turnstile::sweeper", tier, "sweeper stopped");
                break;
            }
        }
    }
}

/// Handle to the two running sweep loops.
///
/// [`shutdown`](Self::shutdown) stops both loops and waits for them to
/// finish. Dropping the handle aborts them instead.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal both loops to stop and wait for them to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    /// True once both loops have exited.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
