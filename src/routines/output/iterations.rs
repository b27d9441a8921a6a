use csv::WriterBuilder;
use eyre::Result;
use serde::{Deserialize, Serialize};

use crate::algorithms::Status;
use crate::routines::output::OutputFile;
use crate::routines::settings::Settings;

/// Summary of one iteration of the control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Tolerance of the current stage
    pub tolerance: f64,
    pub status: Status,
    pub active: usize,
    pub frontier: usize,
    pub bias: f64,
    pub statistical: f64,
    pub total: f64,
    /// Norm of the estimate
    pub estimate: f64,
    pub total_cost: f64,
    pub new_samples: usize,
    pub degraded: usize,
}

/// This holds one [IterationRecord] per iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationLog {
    records: Vec<IterationRecord>,
}

impl IterationLog {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the log to `iterations.csv` in the output folder
    pub fn write(&self, settings: &Settings) -> Result<()> {
        tracing::debug!("Writing iterations...");
        let outputfile = OutputFile::new(&settings.output.path, "iterations.csv")?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(outputfile.file());

        writer.write_record([
            "iteration",
            "tolerance",
            "converged",
            "status",
            "active",
            "frontier",
            "bias",
            "statistical",
            "total",
            "estimate",
            "total_cost",
            "new_samples",
            "degraded",
        ])?;

        for record in &self.records {
            writer.write_record(&[
                record.iteration.to_string(),
                record.tolerance.to_string(),
                (record.status == Status::Converged).to_string(),
                record.status.to_string(),
                record.active.to_string(),
                record.frontier.to_string(),
                record.bias.to_string(),
                record.statistical.to_string(),
                record.total.to_string(),
                record.estimate.to_string(),
                record.total_cost.to_string(),
                record.new_samples.to_string(),
                record.degraded.to_string(),
            ])?;
        }
        writer.flush()?;
        tracing::debug!("Iterations written to {:?}", outputfile.relative_path());
        Ok(())
    }
}
