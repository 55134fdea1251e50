//! Trouble/status code index, grouped by severity for presentation.
//! Fed by one-shot scans; independent of the live metric pipeline.

use serde::{Deserialize, Serialize};

/// Closed severity scale. Unknown severities are rejected when the transport
/// decodes a scan result; there is deliberately no catch-all variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Moderate => "Moderate",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

/// Presentation priority, highest first.
pub const SEVERITY_ORDER: [Severity; 4] = [
    Severity::Critical,
    Severity::High,
    Severity::Moderate,
    Severity::Low,
];

/// One trouble/status code from a scan. Immutable snapshot data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCode {
    pub code: String,
    pub title: String,
    pub severity: Severity,
    pub description: String,
    pub causes: Vec<String>,
    pub remedies: Vec<String>,
}

/// Holds the most recent scan result, replaced wholesale on each load.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsIndex {
    codes: Vec<DiagnosticCode>,
}

impl DiagnosticsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entire index with a fresh scan result.
    pub fn load(&mut self, codes: Vec<DiagnosticCode>) {
        self.codes = codes;
    }

    pub fn codes(&self) -> &[DiagnosticCode] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Codes bucketed in fixed priority order (Critical → Low), empty groups
    /// omitted. Recomputed from the stored codes on every call.
    pub fn grouped_by_severity(&self) -> Vec<(Severity, Vec<DiagnosticCode>)> {
        SEVERITY_ORDER
            .iter()
            .filter_map(|&severity| {
                let group: Vec<DiagnosticCode> = self
                    .codes
                    .iter()
                    .filter(|c| c.severity == severity)
                    .cloned()
                    .collect();
                if group.is_empty() {
                    None
                } else {
                    Some((severity, group))
                }
            })
            .collect()
    }
}
