//! Shared test harness: a scripted mock transport plus the wired-up core.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::time::sleep;

use obdcore::{
    AcquisitionConfig, Capabilities, ConnectOptions, ConnectionController, DecodedPayload,
    DiagnosticCode, DiagnosticsIndex, EnablementStore, InterestRegistry, MemoryStore,
    MetricCatalog, MetricId, PayloadStream, SharedStats, StatsAggregator, Transport,
    TransportError,
};

pub enum ConnectBehavior {
    Succeed,
    Fail(String),
    Hang,
}

type FeedSender = mpsc::UnboundedSender<Result<DecodedPayload, TransportError>>;

/// Transport double: scripted connect outcomes, recorded subscriptions, and
/// hand-fed payload streams.
pub struct MockTransport {
    behaviors: Mutex<VecDeque<ConnectBehavior>>,
    supported: Mutex<Option<BTreeSet<MetricId>>>,
    scan_result: Mutex<Result<Vec<DiagnosticCode>, String>>,
    subscriptions: Mutex<Vec<Vec<MetricId>>>,
    feeds: Mutex<Vec<FeedSender>>,
    pub disconnect_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(VecDeque::new()),
            supported: Mutex::new(None),
            scan_result: Mutex::new(Ok(vec![])),
            subscriptions: Mutex::new(Vec::new()),
            feeds: Mutex::new(Vec::new()),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    pub fn script_connect(&self, behavior: ConnectBehavior) {
        self.behaviors.lock().unwrap().push_back(behavior);
    }

    pub fn set_supported(&self, ids: &[&str]) {
        let set = ids.iter().copied().map(MetricId::from).collect();
        *self.supported.lock().unwrap() = Some(set);
    }

    pub fn set_scan_result(&self, result: Result<Vec<DiagnosticCode>, &str>) {
        *self.scan_result.lock().unwrap() = result.map_err(str::to_string);
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn last_subscription(&self) -> Option<Vec<MetricId>> {
        self.subscriptions.lock().unwrap().last().cloned()
    }

    /// Pushes one payload down the most recent subscription stream.
    pub fn feed(&self, payload: DecodedPayload) {
        self.feed_item(Ok(payload));
    }

    pub fn feed_error(&self, err: TransportError) {
        self.feed_item(Err(err));
    }

    fn feed_item(&self, item: Result<DecodedPayload, TransportError>) {
        let feeds = self.feeds.lock().unwrap();
        let sender = feeds.last().expect("no active subscription to feed");
        sender.unbounded_send(item).expect("stream receiver gone");
    }

    /// Closes the most recent stream without an error (clean completion).
    pub fn end_stream(&self) {
        let mut feeds = self.feeds.lock().unwrap();
        if let Some(sender) = feeds.last_mut() {
            sender.close_channel();
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, opts: ConnectOptions) -> Result<Capabilities, TransportError> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectBehavior::Succeed);
        match behavior {
            ConnectBehavior::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            ConnectBehavior::Fail(reason) => Err(TransportError::Device(reason)),
            ConnectBehavior::Succeed => Ok(Capabilities {
                supported: if opts.discover_capabilities {
                    self.supported.lock().unwrap().clone()
                } else {
                    None
                },
            }),
        }
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::Relaxed);
    }

    async fn subscribe(
        &self,
        metrics: Vec<MetricId>,
        _interval: Duration,
    ) -> Result<PayloadStream, TransportError> {
        self.subscriptions.lock().unwrap().push(metrics);
        let (tx, rx) = mpsc::unbounded();
        self.feeds.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }

    async fn scan_codes(&self) -> Result<Vec<DiagnosticCode>, TransportError> {
        match &*self.scan_result.lock().unwrap() {
            Ok(codes) => Ok(codes.clone()),
            Err(msg) => Err(TransportError::Scan(msg.clone())),
        }
    }
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub controller: Arc<ConnectionController>,
    pub enablement: EnablementStore,
    pub registry: InterestRegistry,
    pub stats: SharedStats,
    pub diagnostics: Arc<RwLock<DiagnosticsIndex>>,
}

/// Opt-in log output for debugging, e.g. RUST_LOG=obdcore=debug.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn harness(config: AcquisitionConfig) -> Harness {
    init_tracing();
    let catalog = Arc::new(MetricCatalog::standard());
    let enablement = EnablementStore::load(Arc::clone(&catalog), Arc::new(MemoryStore::new()));
    let registry = InterestRegistry::new();
    let stats = StatsAggregator::shared();
    let diagnostics = Arc::new(RwLock::new(DiagnosticsIndex::new()));
    let transport = Arc::new(MockTransport::new());

    let controller = ConnectionController::spawn(
        Arc::clone(&transport) as Arc<dyn Transport>,
        catalog,
        config,
        Arc::clone(&stats),
        Arc::clone(&diagnostics),
        enablement.subscribe(),
        registry.subscribe(),
    );

    Harness {
        transport,
        controller,
        enablement,
        registry,
        stats,
        diagnostics,
    }
}

pub fn ids(keys: &[&str]) -> BTreeSet<MetricId> {
    keys.iter().copied().map(MetricId::from).collect()
}

pub fn id_vec(keys: &[&str]) -> Vec<MetricId> {
    keys.iter().copied().map(MetricId::from).collect()
}

/// Lets background tasks (change watcher, stream consumer) run.
pub async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

/// Polls an async condition until it holds or a short deadline passes.
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}
