//! Connection lifecycle and acquisition orchestration: the state machine
//! around connect/disconnect, capability discovery, the one-shot diagnostic
//! scan, and the continuous subscription that feeds the stats aggregator.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{MetricCatalog, MetricId};
use crate::diagnostics::DiagnosticsIndex;
use crate::stats::SharedStats;
use crate::transport::{ConnectOptions, PayloadStream, Transport};

/// Connection lifecycle. `Failed` is user-actionable: a later `connect()` is
/// accepted exactly as from `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }

    fn can_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed { .. }
        )
    }
}

/// Tunables for the connect attempt and the acquisition subscription.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub discover_capabilities: bool,
    pub scan_on_connect: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            discover_capabilities: true,
            scan_on_connect: true,
        }
    }
}

struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    supported: Option<BTreeSet<MetricId>>,
    subscription: Option<Subscription>,
    connect_cancel: Option<CancellationToken>,
}

/// Orchestrates the transport: owns the connection state machine and the
/// acquisition subscription. All mutations are serialized through one
/// internal lock; readers see snapshots via watch channels and accessors.
pub struct ConnectionController {
    transport: Arc<dyn Transport>,
    config: AcquisitionConfig,
    catalog: Arc<MetricCatalog>,
    stats: SharedStats,
    diagnostics: Arc<RwLock<DiagnosticsIndex>>,
    state_tx: watch::Sender<ConnectionState>,
    enabled_rx: watch::Receiver<BTreeSet<MetricId>>,
    interest_rx: watch::Receiver<BTreeSet<MetricId>>,
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl ConnectionController {
    /// Creates the controller and starts the background watcher that
    /// restarts the subscription when the enabled or interest set changes.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        catalog: Arc<MetricCatalog>,
        config: AcquisitionConfig,
        stats: SharedStats,
        diagnostics: Arc<RwLock<DiagnosticsIndex>>,
        enabled_rx: watch::Receiver<BTreeSet<MetricId>>,
        interest_rx: watch::Receiver<BTreeSet<MetricId>>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let controller = Arc::new(Self {
            transport,
            config,
            catalog,
            stats,
            diagnostics,
            state_tx,
            enabled_rx,
            interest_rx,
            inner: Mutex::new(Inner::default()),
            cancel: CancellationToken::new(),
        });
        Arc::clone(&controller).spawn_change_watcher();
        controller
    }

    /// Attempts to connect. Suspends only until the attempt resolves; the
    /// continuous stream is delivered asynchronously afterwards. A no-op
    /// while `Connecting` or `Connected`.
    pub async fn connect(&self) {
        let attempt_cancel;
        {
            let mut inner = self.inner.lock().await;
            let state = self.state_tx.borrow().clone();
            if !state.can_connect() {
                warn!(?state, "connect ignored; already connecting or connected");
                return;
            }
            self.state_tx.send_replace(ConnectionState::Connecting);
            attempt_cancel = self.cancel.child_token();
            inner.connect_cancel = Some(attempt_cancel.clone());
        }

        let opts = ConnectOptions {
            timeout: self.config.connect_timeout,
            discover_capabilities: self.config.discover_capabilities,
        };
        let outcome = tokio::select! {
            _ = attempt_cancel.cancelled() => {
                // A disconnect raced the attempt and already settled state.
                info!("connect attempt aborted");
                return;
            }
            res = tokio::time::timeout(
                self.config.connect_timeout,
                self.transport.connect(opts),
            ) => res,
        };

        let mut inner = self.inner.lock().await;
        inner.connect_cancel = None;
        if attempt_cancel.is_cancelled() {
            return;
        }

        match outcome {
            Err(_elapsed) => {
                let reason = format!(
                    "connect timed out after {:?}",
                    self.config.connect_timeout
                );
                error!(%reason, "connection failed");
                self.state_tx
                    .send_replace(ConnectionState::Failed { reason });
            }
            Ok(Err(err)) => {
                error!(error = %err, "connection failed");
                self.state_tx.send_replace(ConnectionState::Failed {
                    reason: err.to_string(),
                });
            }
            Ok(Ok(capabilities)) => {
                inner.supported = capabilities.supported;
                if let Some(supported) = &inner.supported {
                    info!(count = supported.len(), "capability discovery complete");
                }

                if self.config.scan_on_connect {
                    match self.transport.scan_codes().await {
                        Ok(codes) => {
                            info!(count = codes.len(), "diagnostic scan complete");
                            self.diagnostics.write().await.load(codes);
                        }
                        // Stale-but-valid beats empty: keep the old index.
                        Err(err) => {
                            warn!(error = %err, "diagnostic scan failed; keeping previous codes")
                        }
                    }
                }

                self.state_tx.send_replace(ConnectionState::Connected);
                info!("connected");
                self.restart_subscription_locked(&mut inner).await;
            }
        }
    }

    /// Tears down the subscription, clears live stats and discovered
    /// capabilities, and settles in `Disconnected`. Safe from any state:
    /// aborts an in-flight connect attempt, idempotent when already
    /// disconnected.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(token) = inner.connect_cancel.take() {
            token.cancel();
        }
        if let Some(sub) = inner.subscription.take() {
            sub.cancel.cancel();
            let _ = sub.task.await;
        }
        inner.supported = None;
        self.transport.disconnect().await;
        self.stats.write().await.clear();

        let changed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                false
            } else {
                *state = ConnectionState::Disconnected;
                true
            }
        });
        if changed {
            info!("disconnected");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Receiver for state transitions, for presentation layers.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Discovered supported-metric set; `None` while disconnected or when
    /// capability discovery is disabled.
    pub async fn supported_metrics(&self) -> Option<BTreeSet<MetricId>> {
        self.inner.lock().await.supported.clone()
    }

    pub fn stats_handle(&self) -> SharedStats {
        Arc::clone(&self.stats)
    }

    pub fn diagnostics_handle(&self) -> Arc<RwLock<DiagnosticsIndex>> {
        Arc::clone(&self.diagnostics)
    }

    pub async fn reset_all_stats(&self) {
        self.stats.write().await.reset_all();
        info!("all metric stats reset");
    }

    pub async fn reset_stats(&self, id: &MetricId) {
        self.stats.write().await.reset(id);
    }

    /// Stops the change watcher and any live subscription. The controller is
    /// unusable afterwards; used on application shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn spawn_change_watcher(self: Arc<Self>) {
        let mut enabled_rx = self.enabled_rx.clone();
        let mut interest_rx = self.interest_rx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    res = enabled_rx.changed() => if res.is_err() { return; },
                    res = interest_rx.changed() => if res.is_err() { return; },
                }

                if *self.state_tx.borrow() == ConnectionState::Connected {
                    debug!("requested metric set changed; restarting acquisition");
                    self.restart_subscription().await;
                } else {
                    // Even while disconnected, stats for metrics that left
                    // the requested set must not linger as stale values.
                    let enabled = enabled_rx.borrow().clone();
                    let interest = interest_rx.borrow().clone();
                    let requested: BTreeSet<MetricId> =
                        enabled.intersection(&interest).cloned().collect();
                    self.stats.write().await.prune(&requested);
                }
            }
        });
    }

    async fn restart_subscription(&self) {
        let mut inner = self.inner.lock().await;
        self.restart_subscription_locked(&mut inner).await;
    }

    /// Cancels any prior stream, prunes stats to the new target set, and
    /// starts a fresh subscription. The prior stream task is awaited before
    /// the new one starts so two streams never write stats concurrently.
    async fn restart_subscription_locked(&self, inner: &mut Inner) {
        if let Some(sub) = inner.subscription.take() {
            sub.cancel.cancel();
            let _ = sub.task.await;
        }

        let enabled = self.enabled_rx.borrow().clone();
        let interest = self.interest_rx.borrow().clone();
        let requested: BTreeSet<MetricId> = enabled.intersection(&interest).cloned().collect();
        let target = self.filter_supported(requested, inner.supported.as_ref());

        {
            let mut stats = self.stats.write().await;
            let removed = stats.prune(&target);
            if removed > 0 {
                info!(removed, "pruned stats for metrics leaving the subscription");
            }
        }

        if target.is_empty() {
            info!("no metrics to acquire; subscription idle");
            return;
        }

        let metrics: Vec<MetricId> = target.iter().cloned().collect();
        let stream = match self
            .transport
            .subscribe(metrics.clone(), self.config.poll_interval)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "starting acquisition subscription failed");
                return;
            }
        };
        info!(count = metrics.len(), "acquisition subscription started");

        let cancel = self.cancel.child_token();
        let stats = Arc::clone(&self.stats);
        let task = tokio::spawn(run_subscription(stream, stats, cancel.clone()));
        inner.subscription = Some(Subscription { cancel, task });
    }

    /// Applies capability filtering: metrics absent from the discovered
    /// supported set are excluded, except vendor-extension metrics, which
    /// are outside the discoverable category and pass through unfiltered.
    fn filter_supported(
        &self,
        requested: BTreeSet<MetricId>,
        supported: Option<&BTreeSet<MetricId>>,
    ) -> BTreeSet<MetricId> {
        let Some(supported) = supported else {
            return requested;
        };

        let mut kept = BTreeSet::new();
        let mut dropped = Vec::new();
        for id in requested {
            let vendor = self
                .catalog
                .get(&id)
                .map_or(false, |d| d.vendor_extension);
            if vendor || supported.contains(&id) {
                kept.insert(id);
            } else {
                dropped.push(id);
            }
        }
        if !dropped.is_empty() {
            info!(?dropped, "excluding unsupported metrics from subscription");
        }
        kept
    }
}

/// Consumes one acquisition stream until cancelled, the stream errors, or it
/// completes. Stream failures are logged and absorbed; they do not change
/// the logical connection state.
async fn run_subscription(
    mut stream: PayloadStream,
    stats: SharedStats,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => match item {
                Some(Ok(payload)) => stats.write().await.apply(payload),
                Some(Err(err)) => {
                    error!(error = %err, "acquisition stream error");
                    return;
                }
                None => {
                    warn!("acquisition stream ended");
                    return;
                }
            }
        }
    }
}
