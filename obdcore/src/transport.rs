//! Transport collaborator contract: connect/disconnect, capability discovery,
//! the acquisition subscription stream, and the decoded payload shapes.
//! Implementations own the wire protocol; the core never sees raw frames.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::catalog::MetricId;
use crate::diagnostics::DiagnosticCode;
use crate::error::TransportError;

/// One decoded measurement for a metric. Ephemeral: produced by the
/// transport, consumed once by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: MetricId,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(metric: impl Into<MetricId>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            value,
            unit: unit.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Trouble-indicator lamp status. Latest wins; never accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilStatus {
    pub mil_on: bool,
    pub dtc_count: u32,
}

/// Per-bank fuel system state; `None` for banks the ECU does not report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelSystemState {
    pub code: String,
    pub description: String,
}

/// Everything the decoder can push down an acquisition subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    Sample(MetricSample),
    MilStatus(MilStatus),
    FuelStatus(Vec<Option<FuelSystemState>>),
}

/// Result of a successful connect. `supported` is `None` when capability
/// discovery was disabled, which means no filtering downstream.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub supported: Option<BTreeSet<MetricId>>,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub timeout: Duration,
    pub discover_capabilities: bool,
}

pub type PayloadStream = BoxStream<'static, Result<DecodedPayload, TransportError>>;

/// The decoding transport the controller drives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection and, when requested, discover which metrics
    /// the source supports.
    async fn connect(&self, opts: ConnectOptions) -> Result<Capabilities, TransportError>;

    async fn disconnect(&self);

    /// Start a continuous acquisition stream for the given metrics at the
    /// given polling interval. The previous stream for this transport is
    /// expected to have been cancelled by the caller.
    async fn subscribe(
        &self,
        metrics: Vec<MetricId>,
        interval: Duration,
    ) -> Result<PayloadStream, TransportError>;

    /// One-shot trouble/status code scan.
    async fn scan_codes(&self) -> Result<Vec<DiagnosticCode>, TransportError>;
}
