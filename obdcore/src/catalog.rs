//! Catalog of monitorable metrics: stable identities, units, value bands.
//! Pure data; the catalog never changes after load.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Stable protocol-addressable key for a metric, e.g. `"010C"` for engine RPM
/// (mode + PID hex) or a vendor mode 22 address like `"221940"`.
///
/// Persistence is keyed by this identifier, not a session-local handle, so
/// enabled flags and ordering survive process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(String);

impl MetricId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetricId {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Inclusive numeric range used for the typical/warning/danger bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    /// Normalized 0..1 position of `value` within the range; 0 for a
    /// degenerate (zero-width) range.
    pub fn normalized_position(&self, value: f64) -> f64 {
        if self.max == self.min {
            return 0.0;
        }
        (value - self.min) / (self.max - self.min)
    }
}

/// Where a value sits relative to a definition's bands. Warning and danger
/// ranges are outer envelopes: a value outside the danger envelope is
/// `Danger`, outside the warning envelope is `Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    Typical,
    Warning,
    Danger,
    /// Inside the envelopes but outside the typical band.
    OffScale,
}

/// A single monitorable metric definition. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: MetricId,
    pub name: String,
    /// Decode formula from the raw frame, informational only.
    pub formula: String,
    pub units: String,
    pub typical_range: ValueRange,
    pub warning_range: Option<ValueRange>,
    pub danger_range: Option<ValueRange>,
    pub notes: Option<String>,
    /// Vendor-addressed metrics bypass capability discovery filtering.
    pub vendor_extension: bool,
    /// Whether the metric starts enabled before any persisted overlay.
    pub default_enabled: bool,
}

impl MetricDefinition {
    /// Display string for UI, e.g. "600 – 7000 RPM".
    pub fn display_range(&self) -> String {
        format!(
            "{:.0} – {:.0} {}",
            self.typical_range.min, self.typical_range.max, self.units
        )
    }

    pub fn status_for(&self, value: f64) -> RangeStatus {
        if let Some(danger) = self.danger_range {
            if !danger.contains(value) {
                return RangeStatus::Danger;
            }
        }
        if let Some(warning) = self.warning_range {
            if !warning.contains(value) {
                return RangeStatus::Warning;
            }
        }
        if self.typical_range.contains(value) {
            RangeStatus::Typical
        } else {
            RangeStatus::OffScale
        }
    }
}

/// Immutable arena of metric definitions indexed by stable id.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    defs: Vec<MetricDefinition>,
    by_id: HashMap<MetricId, usize>,
}

impl MetricCatalog {
    pub fn new(defs: Vec<MetricDefinition>) -> Self {
        let by_id = defs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        Self { defs, by_id }
    }

    /// The built-in standard definitions.
    pub fn standard() -> Self {
        Self::new(STANDARD.clone())
    }

    pub fn get(&self, id: &MetricId) -> Option<&MetricDefinition> {
        self.by_id.get(id).map(|&i| &self.defs[i])
    }

    pub fn contains(&self, id: &MetricId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.defs
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[allow(clippy::too_many_arguments)]
fn def(
    id: &str,
    name: &str,
    formula: &str,
    units: &str,
    typical: ValueRange,
    warning: Option<ValueRange>,
    danger: Option<ValueRange>,
    notes: Option<&str>,
    default_enabled: bool,
) -> MetricDefinition {
    MetricDefinition {
        id: MetricId::from(id),
        name: name.to_string(),
        formula: formula.to_string(),
        units: units.to_string(),
        typical_range: typical,
        warning_range: warning,
        danger_range: danger,
        notes: notes.map(str::to_string),
        vendor_extension: false,
        default_enabled,
    }
}

static STANDARD: Lazy<Vec<MetricDefinition>> = Lazy::new(|| {
    vec![
        def(
            "0142",
            "OBD Module Voltage",
            "((A*256)+B)/1000",
            "V",
            ValueRange::new(11.5, 14.8),
            Some(ValueRange::new(11.0, 15.2)),
            Some(ValueRange::new(10.5, 15.5)),
            Some("Battery/alternator voltage"),
            true,
        ),
        def(
            "0105",
            "Engine Coolant Temp",
            "A - 40",
            "°C",
            ValueRange::new(70.0, 105.0),
            Some(ValueRange::new(105.0, 115.0)),
            Some(ValueRange::new(115.0, 130.0)),
            Some("Subtract 40 offset"),
            true,
        ),
        def(
            "010C",
            "Engine RPM",
            "((A*256)+B)/4",
            "RPM",
            ValueRange::new(600.0, 7000.0),
            Some(ValueRange::new(7000.0, 7500.0)),
            Some(ValueRange::new(7500.0, 8500.0)),
            Some("Main tachometer source"),
            true,
        ),
        def(
            "0144",
            "Air-Fuel Ratio (λ)",
            "((A*256)+B)/32768",
            "λ",
            ValueRange::new(0.8, 1.2),
            Some(ValueRange::new(0.75, 1.25)),
            Some(ValueRange::new(0.7, 1.3)),
            Some("1.00 = stoich"),
            false,
        ),
        def(
            "010D",
            "Vehicle Speed",
            "A",
            "km/h",
            ValueRange::new(0.0, 250.0),
            None,
            None,
            None,
            true,
        ),
        def(
            "015C",
            "Engine Oil Temp",
            "A - 40",
            "°C",
            ValueRange::new(60.0, 130.0),
            Some(ValueRange::new(130.0, 140.0)),
            Some(ValueRange::new(140.0, 160.0)),
            Some("Optional PID"),
            false,
        ),
        def(
            "010A",
            "Fuel Pressure",
            "A*3",
            "kPa",
            ValueRange::new(240.0, 450.0),
            Some(ValueRange::new(200.0, 500.0)),
            None,
            Some("Gauge fuel pressure"),
            false,
        ),
        def(
            "013C",
            "Catalyst Temp (Bank 1, Sensor 1)",
            "((A*256)+B)/10",
            "°C",
            ValueRange::new(200.0, 900.0),
            Some(ValueRange::new(900.0, 950.0)),
            Some(ValueRange::new(950.0, 1000.0)),
            Some("Pre-cat temp"),
            false,
        ),
        MetricDefinition {
            // GM mode 22: not discoverable through mode 01 capability bits.
            vendor_extension: true,
            ..def(
                "221940",
                "Transmission Fluid Temp",
                "A - 40",
                "°C",
                ValueRange::new(40.0, 110.0),
                Some(ValueRange::new(110.0, 120.0)),
                Some(ValueRange::new(120.0, 135.0)),
                Some("GM mode 22 extension"),
                false,
            )
        },
    ]
});
