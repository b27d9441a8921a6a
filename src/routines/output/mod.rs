use std::fs::{create_dir_all, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use eyre::{Result, WrapErr};
use serde::Serialize;

use crate::algorithms::Status;
use crate::routines::estimation::ErrorEstimate;
use crate::routines::settings::Settings;
use crate::structs::profile::IndexProfile;

pub mod iterations;

use iterations::IterationLog;

/// Defines the result of a MIMC run
///
/// A [MimcResult] holds the final estimate together with the error estimates, the active
/// index set and the statistics needed to inspect how the run progressed.
#[derive(Debug, Clone, Serialize)]
pub struct MimcResult {
    status: Status,
    estimate: Vec<f64>,
    error: Option<ErrorEstimate>,
    profile: IndexProfile,
    iterations: usize,
    total_cost: f64,
    samples: usize,
    settings: Settings,
    iteration_log: IterationLog,
}

#[allow(clippy::too_many_arguments)]
impl MimcResult {
    pub fn new(
        status: Status,
        estimate: Vec<f64>,
        error: Option<ErrorEstimate>,
        profile: IndexProfile,
        iterations: usize,
        total_cost: f64,
        samples: usize,
        settings: Settings,
        iteration_log: IterationLog,
    ) -> Self {
        Self {
            status,
            estimate,
            error,
            profile,
            iterations,
            total_cost,
            samples,
            settings,
            iteration_log,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn converged(&self) -> bool {
        self.status == Status::Converged
    }

    /// See [Status::exit_code]
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// The MIMC estimate, the sum of the mean differences over the active set
    pub fn estimate(&self) -> &[f64] {
        &self.estimate
    }

    /// Error estimates of the last iteration
    pub fn error(&self) -> Option<&ErrorEstimate> {
        self.error.as_ref()
    }

    pub fn profile(&self) -> &IndexProfile {
        &self.profile
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    /// Number of evaluations in the sample store
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn iteration_log(&self) -> &IterationLog {
        &self.iteration_log
    }

    pub fn write_outputs(&self) -> Result<()> {
        if self.settings.output.write {
            tracing::debug!("Writing outputs to {:?}", self.settings.output.path);
            self.settings.write()?;
            self.iteration_log
                .write(&self.settings)
                .wrap_err("Failed to write iterations")?;
            self.write_levels().wrap_err("Failed to write levels")?;
        }
        Ok(())
    }

    /// Writes the statistics of every active index to `levels.csv`
    pub fn write_levels(&self) -> Result<()> {
        tracing::debug!("Writing levels...");
        let outputfile = OutputFile::new(&self.settings.output.path, "levels.csv")?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(outputfile.file());

        writer.write_record([
            "index",
            "count",
            "expectation",
            "variance",
            "fine_variance",
            "work",
            "spent",
            "fixed",
        ])?;

        let optional = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        for (index, stats) in self.profile.iter() {
            writer.write_record(&[
                index.to_string(),
                stats.count().to_string(),
                stats.expectation().to_string(),
                optional(stats.variance()),
                optional(stats.fine_variance()),
                optional(stats.work()),
                stats.spent().to_string(),
                stats.is_fixed().to_string(),
            ])?;
        }
        writer.flush()?;
        tracing::debug!("Levels written to {:?}", outputfile.relative_path());
        Ok(())
    }
}

/// An output file opened for writing inside the output folder
#[derive(Debug)]
pub struct OutputFile {
    file: File,
    relative_path: PathBuf,
}

impl OutputFile {
    pub fn new(folder: &str, file_name: &str) -> Result<Self> {
        let relative_path = Path::new(&folder).join(file_name);

        if let Some(parent) = relative_path.parent() {
            create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create directories for {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&relative_path)
            .wrap_err_with(|| format!("Failed to open file: {:?}", relative_path))?;

        Ok(OutputFile {
            file,
            relative_path,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_owned(self) -> File {
        self.file
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }
}
