//! Per-boundary training metrics and where they go.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub epoch: usize,
    pub window: usize,
    /// Global count of applied updates after this boundary.
    pub boundary: usize,
    pub rank: usize,
    /// Steps covered by this boundary's segment.
    pub steps: usize,
    /// Mean mode-classification loss over the segment.
    pub cls: f32,
    /// Mean regression loss over the segment and axes.
    pub reg: f32,
    pub reg_xyz: [f32; 3],
    /// Accumulated (scaled) segment loss that was backpropagated.
    pub loss: f32,
    pub lr: f64,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub epoch: usize,
    /// Predicted steps across all ranks.
    pub steps: f64,
    pub loss: f64,
    pub ade: f64,
    pub fde: f64,
    pub min_ade: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricsRecord {
    Step(StepMetrics),
    Validation(ValidationReport),
}

pub trait MetricsSink {
    fn record(&mut self, record: &MetricsRecord) -> std::io::Result<()>;

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&mut self, _record: &MetricsRecord) -> std::io::Result<()> {
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<MetricsRecord>,
}

impl MemorySink {
    pub fn steps(&self) -> impl Iterator<Item = &StepMetrics> {
        self.records.iter().filter_map(|r| match r {
            MetricsRecord::Step(s) => Some(s),
            _ => None,
        })
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, record: &MetricsRecord) -> std::io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// One JSON object per line, appended.
pub struct JsonlSink {
    out: BufWriter<File>,
}

impl JsonlSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl MetricsSink for JsonlSink {
    fn record(&mut self, record: &MetricsRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}
