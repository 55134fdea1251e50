//! Acquisition core for vehicle diagnostic parameters: sits between a
//! decoding transport (the wire protocol lives elsewhere) and consumers of
//! live metric data.
//!
//! Components:
//! - [`catalog`]: static definitions of monitorable metrics.
//! - [`enablement`]: persisted, ordered enabled/disabled state per metric.
//! - [`interest`]: demand-driven union of what observers currently render.
//! - [`connection`]: connect/disconnect state machine and the acquisition
//!   subscription over the enabled ∩ interested ∩ supported set.
//! - [`stats`]: running latest/min/max/count per metric.
//! - [`diagnostics`]: severity-grouped trouble codes from one-shot scans.

pub mod catalog;
pub mod connection;
pub mod diagnostics;
pub mod enablement;
pub mod error;
pub mod interest;
pub mod persist;
pub mod stats;
pub mod transport;

pub use catalog::{MetricCatalog, MetricDefinition, MetricId, RangeStatus, ValueRange};
pub use connection::{AcquisitionConfig, ConnectionController, ConnectionState};
pub use diagnostics::{DiagnosticCode, DiagnosticsIndex, Severity, SEVERITY_ORDER};
pub use enablement::EnablementStore;
pub use error::{PersistError, TransportError};
pub use interest::{InterestRegistry, InterestToken};
pub use persist::{FileStore, KvStore, MemoryStore};
pub use stats::{MetricStats, SharedStats, StatsAggregator};
pub use transport::{
    Capabilities, ConnectOptions, DecodedPayload, FuelSystemState, MetricSample, MilStatus,
    PayloadStream, Transport,
};
