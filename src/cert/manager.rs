//! Certificate lifecycle manager.
//!
//! # Responsibilities
//! - Schedule periodic renewal checks against the provider
//! - Serialize renewal with the server's lifecycle lock
//! - Hot-swap renewed material and cycle the listener
//! - Stop monitoring cleanly and report it exactly once
//!
//! # Design Decisions
//! - Renewal results travel through a capacity-1 channel from the job
//!   task to the waiter loop; the channel doubles as the hand-off point
//!   a manual renewal can use
//! - An atomic in-flight gate makes renewal single-flight: a request
//!   arriving while one runs is dropped, not queued
//! - Both loops bump a shared counter on exit; whichever reaches 2 logs
//!   completion and resets the gate, so the manager can be reattached

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CertConfig;
use crate::server::{ServerCore, ServerError};
use crate::tls::CertificateLease;

use super::provider::{MaterialError, MaterialProvider};

const DAY_SECS: i64 = 86_400;
/// Check interval used when `interval_days` is zero (test mode).
const TEST_INTERVAL: Duration = Duration::from_secs(60);

type RenewalOutcome = Result<CertificateLease, MaterialError>;

/// Errors from manager operations.
#[derive(Debug, Error)]
pub enum CertError {
    #[error(transparent)]
    Material(#[from] MaterialError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

struct Channels {
    stop_tx: Option<broadcast::Sender<()>>,
    job_tx: Option<mpsc::Sender<RenewalOutcome>>,
}

/// Drives certificate renewal for one server core.
pub struct CertManager {
    config: CertConfig,
    provider: Arc<dyn MaterialProvider>,
    lease: ArcSwapOption<CertificateLease>,
    in_flight: AtomicBool,
    monitoring: AtomicBool,
    loops_stopped: AtomicUsize,
    channels: std::sync::Mutex<Channels>,
}

impl CertManager {
    pub fn new(config: CertConfig, provider: Arc<dyn MaterialProvider>) -> Self {
        Self {
            config,
            provider,
            lease: ArcSwapOption::empty(),
            in_flight: AtomicBool::new(false),
            monitoring: AtomicBool::new(false),
            loops_stopped: AtomicUsize::new(0),
            channels: std::sync::Mutex::new(Channels {
                stop_tx: None,
                job_tx: None,
            }),
        }
    }

    /// The currently installed lease, if any.
    pub fn lease(&self) -> Option<Arc<CertificateLease>> {
        self.lease.load_full()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Acquire)
    }

    /// Make sure valid material is installed on the server before it
    /// starts serving TLS. Issues a certificate only when the provider
    /// deems the existing one too close to expiry.
    pub async fn ensure_material(&self, server: &ServerCore) -> Result<(), CertError> {
        let lease = self.provider.request_certificate().await?;
        let paths = self.provider.material_paths();
        let mut guard = server.exclusive().await;
        guard.install_material(&paths).await?;
        self.lease.store(Some(Arc::new(lease)));
        Ok(())
    }

    /// Start the scheduler and waiter loops. Returns false when they are
    /// already running.
    pub fn start_monitoring(self: &Arc<Self>, server: Arc<ServerCore>) -> bool {
        if self.monitoring.swap(true, Ordering::AcqRel) {
            debug!("certificate monitoring already active");
            return false;
        }
        self.loops_stopped.store(0, Ordering::Release);

        let (stop_tx, _) = broadcast::channel(4);
        let (job_tx, job_rx) = mpsc::channel(1);
        {
            let mut channels = self.lock_channels();
            channels.stop_tx = Some(stop_tx.clone());
            channels.job_tx = Some(job_tx);
        }

        let scheduler = Arc::clone(self);
        let scheduler_server = Arc::clone(&server);
        let mut scheduler_stop = stop_tx.subscribe();
        tokio::spawn(async move {
            scheduler.scheduler_loop(scheduler_server, &mut scheduler_stop).await;
            scheduler.note_loop_stopped();
        });

        let waiter = Arc::clone(self);
        let mut waiter_stop = stop_tx.subscribe();
        tokio::spawn(async move {
            waiter.waiter_loop(server, job_rx, &mut waiter_stop).await;
            waiter.note_loop_stopped();
        });

        info!(
            interval_days = self.config.interval_days,
            "certificate monitoring started"
        );
        true
    }

    /// Interrupt both loops at their next blocking point. Idempotent; a
    /// renewal already in flight finishes but its result is discarded.
    pub fn stop_monitoring(&self) {
        if !self.monitoring.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut channels = self.lock_channels();
        if let Some(stop_tx) = channels.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        channels.job_tx = None;
    }

    /// Trigger a renewal immediately, outside the schedule. Returns
    /// false when monitoring is off or a renewal is already in flight.
    pub fn request_renewal_now(&self) -> bool {
        let job_tx = match self.lock_channels().job_tx.clone() {
            Some(tx) => tx,
            None => {
                debug!("renewal requested while monitoring is off");
                return false;
            }
        };
        self.spawn_renewal(job_tx)
    }

    fn spawn_renewal(&self, job_tx: mpsc::Sender<RenewalOutcome>) -> bool {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("renewal already in flight, request dropped");
            return false;
        }
        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            let outcome = provider.request_renewal().await;
            // capacity 1; the waiter takes the previous job before a new
            // one can be scheduled
            let _ = job_tx.send(outcome).await;
        });
        true
    }

    async fn scheduler_loop(
        &self,
        server: Arc<ServerCore>,
        stop: &mut broadcast::Receiver<()>,
    ) {
        let mut wake = Instant::now() + initial_wait(&self.config, SystemTime::now());
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = tokio::time::sleep_until(wake) => {
                    let job_tx = match self.lock_channels().job_tx.clone() {
                        Some(tx) => tx,
                        None => break,
                    };
                    // fire under the lifecycle lock so the renewal never
                    // races a concurrent stop or start
                    let _guard = server.exclusive().await;
                    debug!("scheduled renewal check firing");
                    self.spawn_renewal(job_tx);
                    // advance from the previous wake point, not from
                    // now, so slow iterations do not accumulate drift
                    wake += interval_wait(&self.config);
                }
            }
        }
    }

    async fn waiter_loop(
        &self,
        server: Arc<ServerCore>,
        mut jobs: mpsc::Receiver<RenewalOutcome>,
        stop: &mut broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                job = jobs.recv() => {
                    let Some(outcome) = job else { break };
                    match outcome {
                        Ok(lease) => self.install(&server, lease).await,
                        Err(err) => {
                            warn!(error = %err, "renewal failed, keeping current certificate");
                        }
                    }
                    self.in_flight.store(false, Ordering::Release);
                }
            }
        }
    }

    /// Install renewed material and cycle the listener, all under one
    /// hold of the lifecycle lock.
    async fn install(&self, server: &ServerCore, lease: CertificateLease) {
        let paths = self.provider.material_paths();
        let grace = Duration::from_secs(self.config.stop_delay_secs);
        let mut guard = server.exclusive().await;
        if let Err(err) = guard.install_material(&paths).await {
            warn!(error = %err, "failed to install renewed material");
            return;
        }
        self.lease.store(Some(Arc::new(lease)));
        if guard.is_running() {
            if let Err(err) = guard.stop(grace).await {
                warn!(error = %err, "restart after renewal: stop failed");
                return;
            }
            if let Err(err) = guard.start().await {
                warn!(error = %err, "restart after renewal: start failed");
                return;
            }
            info!("listener restarted with renewed certificate");
        }
    }

    fn note_loop_stopped(&self) {
        let stopped = self.loops_stopped.fetch_add(1, Ordering::AcqRel) + 1;
        if stopped == 2 {
            self.loops_stopped.store(0, Ordering::Release);
            self.in_flight.store(false, Ordering::Release);
            info!("certificate monitoring stopped");
        }
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Delay before the first scheduled check: the remainder of the current
/// day (UTC), plus the configured offset, plus the whole interval. Zero
/// `interval_days` selects the 60-second test interval.
fn initial_wait(config: &CertConfig, now: SystemTime) -> Duration {
    if config.interval_days == 0 {
        return TEST_INTERVAL;
    }
    let epoch_secs = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64;
    let since_midnight = epoch_secs.rem_euclid(DAY_SECS);
    let wait = DAY_SECS - since_midnight
        + config.time_offset_secs
        + DAY_SECS * i64::from(config.interval_days);
    Duration::from_secs(wait.max(0) as u64)
}

fn interval_wait(config: &CertConfig) -> Duration {
    if config.interval_days == 0 {
        TEST_INTERVAL
    } else {
        Duration::from_secs(u64::from(config.interval_days) * DAY_SECS as u64)
    }
}
