//! Diagnostic reports and their JSON export.
//!
//! The export uses camelCase keys for telemetry consumers and carries a
//! format version so downstream parsers can reject what they don't know.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::element::{Element, ElementId};
use crate::vec3::Vec3;

pub const REPORT_VERSION: &str = "1.0";

/// Authoritative vs rendered agreement across the live elements.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub is_in_sync: bool,
    pub max_deviation: f32,
    pub out_of_sync_count: usize,
    /// Fraction of elements within tolerance; 1.0 for an empty set.
    pub sync_accuracy: f32,
    pub element_count: usize,
    pub tolerance: f32,
    pub out_of_sync_ids: Vec<ElementId>,
}

impl SyncReport {
    /// Compare `position` and `rendered_position` per element.
    ///
    /// A non-finite deviation counts as out of sync and as infinite.
    pub fn from_elements(elements: &[Element], tolerance: f32) -> Self {
        let mut max_deviation = 0.0f32;
        let mut out_of_sync_ids = Vec::new();
        for e in elements {
            let d = e.sync_deviation();
            let d = if d.is_finite() { d } else { f32::INFINITY };
            max_deviation = max_deviation.max(d);
            if d > tolerance {
                out_of_sync_ids.push(e.id);
            }
        }
        let n = elements.len();
        let out = out_of_sync_ids.len();
        Self {
            is_in_sync: out == 0,
            max_deviation,
            out_of_sync_count: out,
            sync_accuracy: if n == 0 {
                1.0
            } else {
                (n - out) as f32 / n as f32
            },
            element_count: n,
            tolerance,
            out_of_sync_ids,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    /// Mean wall time of a full tick.
    pub avg_update_time_micros: f64,
    pub peak_update_time_micros: f64,
    pub last_update_time_micros: f64,
    /// Mean per-element share of a tick, from the lifecycle metrics.
    pub avg_element_update_micros: f64,
    pub active_count: usize,
    pub pool_efficiency: f64,
    pub ticks: u64,
    pub over_budget_ticks: u64,
    pub frame_budget_micros: u64,
    pub optimizer: &'static str,
}

/// What the renderer consumes for one element.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    pub id: ElementId,
    pub rendered_position: Vec3,
    pub scale: f32,
}

pub fn render_outputs(elements: &[Element]) -> Vec<RenderOutput> {
    elements
        .iter()
        .map(|e| RenderOutput {
            id: e.id,
            rendered_position: e.rendered_position,
            scale: e.scale,
        })
        .collect()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportExport<'a, T: Serialize> {
    version: &'static str,
    generated_at_unix: u64,
    kind: &'a str,
    report: &'a T,
}

/// Serialize any report under the versioned envelope.
pub fn export_json<T: Serialize>(kind: &str, report: &T) -> serde_json::Result<String> {
    let generated_at_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    serde_json::to_string_pretty(&ReportExport {
        version: REPORT_VERSION,
        generated_at_unix,
        kind,
        report,
    })
}
