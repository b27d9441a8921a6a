use std::collections::BTreeMap;

use config::Config as eConfig;
use eyre::{bail, Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::error::MimcError;
use crate::routines::estimation::budget::{tolerance_sequence, Split};
use crate::routines::output::OutputFile;
use crate::structs::multi_index::MultiIndex;

/// Contains all settings for a MIMC run
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    /// General configuration settings
    pub config: Config,
    /// Target tolerance and how it is split between bias and statistical error
    pub tolerance: Tolerance,
    /// Decay rates assumed before enough data is available
    pub priors: Priors,
    /// Sampling and evaluation
    pub sampling: Sampling,
    /// Limits on the active index set
    pub indexset: IndexSettings,
    /// Hard limits on the run
    pub termination: Termination,
    /// Configuration for logging
    pub log: Log,
    /// Configuration for the output files
    pub output: Output,
    /// Checkpointing between iterations
    pub checkpoint: Checkpoint,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            config: Config::default(),
            tolerance: Tolerance::default(),
            priors: Priors::default(),
            sampling: Sampling::default(),
            indexset: IndexSettings::default(),
            termination: Termination::default(),
            log: Log::default(),
            output: Output::default(),
            checkpoint: Checkpoint::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Settings::default()
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), MimcError> {
        let dim = self.config.dimensions;
        if dim == 0 {
            return Err(MimcError::Configuration(
                "At least one dimension is required".to_string(),
            ));
        }
        self.tolerance.validate()?;
        self.priors.validate(dim)?;
        self.sampling.validate()?;
        self.indexset.validate(dim)?;
        self.termination.validate()?;
        Ok(())
    }

    /// Scalar parameters identifying the run, stored next to checkpoints
    pub fn tagged_parameters(&self) -> BTreeMap<String, f64> {
        let dim = self.config.dimensions;
        let mut parameters = BTreeMap::new();
        parameters.insert("dimensions".to_string(), dim as f64);
        parameters.insert("seed".to_string(), self.config.seed as f64);
        parameters.insert("tolerance.target".to_string(), self.tolerance.target);
        parameters.insert("tolerance.theta".to_string(), self.tolerance.theta);
        parameters.insert("tolerance.confidence".to_string(), self.tolerance.confidence);
        if let Some(max) = self.tolerance.max {
            parameters.insert("tolerance.max".to_string(), max);
        }
        for (name, rates) in [
            ("weak", self.priors.weak(dim)),
            ("strong", self.priors.strong(dim)),
            ("work", self.priors.work(dim)),
        ] {
            for (d, rate) in rates.iter().enumerate() {
                parameters.insert(format!("priors.{}.{}", name, d), *rate);
            }
        }
        parameters.insert("sampling.warmup".to_string(), self.sampling.warmup as f64);
        parameters.insert(
            "sampling.reuse".to_string(),
            if self.sampling.reuse { 1.0 } else { 0.0 },
        );
        parameters.insert(
            "indexset.max_active".to_string(),
            self.indexset.max_active as f64,
        );
        parameters.insert(
            "indexset.max_level".to_string(),
            self.indexset.max_level as f64,
        );
        if let Some(max_cost) = self.termination.max_cost {
            parameters.insert("termination.max_cost".to_string(), max_cost);
        }
        parameters
    }

    /// Writes a copy of the settings to `settings.json` in the output folder
    pub fn write(&self) -> Result<()> {
        let serialized =
            serde_json::to_string_pretty(self).wrap_err("Unable to serialize settings")?;
        let outputfile = OutputFile::new(&self.output.path, "settings.json")?;
        let mut file = outputfile.file_owned();
        std::io::Write::write_all(&mut file, serialized.as_bytes())
            .wrap_err("Unable to write settings to file")?;
        Ok(())
    }
}

/// General configuration settings
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Number of discretization dimensions, the length of every multi-index
    pub dimensions: usize,
    /// Maximum number of iterations of the control loop
    pub max_iterations: usize,
    /// Root of the seed stream
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dimensions: 1,
            max_iterations: 100,
            seed: 22,
        }
    }
}

/// Target tolerance and its split
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Tolerance {
    /// The total error tolerance, `TOL`
    pub target: f64,
    /// Fraction of the tolerance reserved for the bias
    pub theta: f64,
    /// Whether the bias fraction is fixed or follows the estimated bias
    pub split: Split,
    /// Two-sided confidence level of the statistical error bound
    pub confidence: f64,
    /// If set, the run works through a sequence of decreasing tolerances starting at this value
    pub max: Option<f64>,
    /// Ratio between consecutive tolerances down to the target
    pub r1: f64,
    /// Ratio between the extra tolerances below the target
    pub r2: f64,
    /// Number of extra tolerances below the target
    pub extra: usize,
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance {
            target: 1e-2,
            theta: 0.5,
            split: Split::Adaptive,
            confidence: 0.95,
            max: None,
            r1: std::f64::consts::SQRT_2,
            r2: 1.1,
            extra: 2,
        }
    }
}

impl Tolerance {
    pub fn validate(&self) -> Result<(), MimcError> {
        let invalid = |msg: String| Err(MimcError::Configuration(msg));
        if !(self.target.is_finite() && self.target > 0.0) {
            return invalid(format!(
                "The tolerance must be positive and finite, got {}",
                self.target
            ));
        }
        if !(self.theta > 0.0 && self.theta < 1.0) {
            return invalid(format!("Theta must be in (0, 1), got {}", self.theta));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return invalid(format!(
                "The confidence must be in (0, 1), got {}",
                self.confidence
            ));
        }
        if let Some(max) = self.max {
            if !(max.is_finite() && max > self.target) {
                return invalid(format!(
                    "The maximum tolerance ({}) must exceed the target ({})",
                    max, self.target
                ));
            }
            if !(self.r1 > 1.0 && self.r2 > 1.0) {
                return invalid(format!(
                    "Tolerance ratios must be greater than one, got r1 = {} and r2 = {}",
                    self.r1, self.r2
                ));
            }
        }
        Ok(())
    }

    /// The tolerances the run works through, ending at or below the target
    pub fn sequence(&self) -> Vec<f64> {
        match self.max {
            Some(max) => tolerance_sequence(self.target, max, self.r1, self.r2, self.extra),
            None => vec![self.target],
        }
    }
}

/// Decay rates per direction, in powers of two per level
///
/// Empty vectors use the defaults in every direction.
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Priors {
    /// Rate of `|EΔ|`, defaults to 1
    pub weak: Vec<f64>,
    /// Rate of `VΔ`, defaults to 2
    pub strong: Vec<f64>,
    /// Growth rate of the cost per sample, defaults to 1
    pub work: Vec<f64>,
}

impl Priors {
    fn expand(values: &[f64], dim: usize, default: f64) -> Vec<f64> {
        if values.is_empty() {
            vec![default; dim]
        } else {
            values.to_vec()
        }
    }

    pub fn weak(&self, dim: usize) -> Vec<f64> {
        Priors::expand(&self.weak, dim, 1.0)
    }

    pub fn strong(&self, dim: usize) -> Vec<f64> {
        Priors::expand(&self.strong, dim, 2.0)
    }

    pub fn work(&self, dim: usize) -> Vec<f64> {
        Priors::expand(&self.work, dim, 1.0)
    }

    pub fn validate(&self, dim: usize) -> Result<(), MimcError> {
        for (name, values) in [
            ("weak", &self.weak),
            ("strong", &self.strong),
            ("work", &self.work),
        ] {
            if !values.is_empty() && values.len() != dim {
                return Err(MimcError::Configuration(format!(
                    "The {} prior has {} entries, expected {}",
                    name,
                    values.len(),
                    dim
                )));
            }
            if values.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
                return Err(MimcError::Configuration(format!(
                    "The {} prior must be positive, got {:?}",
                    name, values
                )));
            }
        }
        Ok(())
    }
}

/// Sampling and evaluation settings
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Sampling {
    /// Number of samples taken at a newly activated index
    pub warmup: usize,
    /// Reuse evaluations already in the sample store
    pub reuse: bool,
    /// Number of times a diverged evaluation is retried
    pub max_retries: usize,
    /// Number of worker threads, 0 to derive it from the available parallelism
    pub threads: usize,
    /// Number of threads used by a single evaluation
    pub solver_threads: usize,
    /// Maximum number of new samples per index and iteration
    pub max_batch: usize,
}

impl Default for Sampling {
    fn default() -> Self {
        Sampling {
            warmup: 10,
            reuse: true,
            max_retries: 3,
            threads: 0,
            solver_threads: 1,
            max_batch: 1_000_000,
        }
    }
}

impl Sampling {
    pub fn validate(&self) -> Result<(), MimcError> {
        if self.warmup < 2 {
            return Err(MimcError::Configuration(format!(
                "At least two warm-up samples are required, got {}",
                self.warmup
            )));
        }
        if self.max_batch == 0 {
            return Err(MimcError::Configuration(
                "The maximum batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Limits on the active index set
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct IndexSettings {
    /// Minimum number of active indices before convergence is accepted
    pub min_active: usize,
    /// Maximum number of active indices
    pub max_active: usize,
    /// Maximum level in any direction
    pub max_level: u32,
    /// Maximum number of indices activated per iteration
    pub max_add: usize,
    /// Indices activated at start-up without requiring their predecessors
    pub fixed: Vec<Vec<u32>>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            min_active: 1,
            max_active: 128,
            max_level: 24,
            max_add: 1,
            fixed: Vec::new(),
        }
    }
}

impl IndexSettings {
    pub fn validate(&self, dim: usize) -> Result<(), MimcError> {
        if self.max_active == 0 {
            return Err(MimcError::Configuration(
                "The maximum number of active indices must be positive".to_string(),
            ));
        }
        if self.min_active > self.max_active {
            return Err(MimcError::Configuration(format!(
                "min_active ({}) exceeds max_active ({})",
                self.min_active, self.max_active
            )));
        }
        if self.max_add == 0 {
            return Err(MimcError::Configuration(
                "At least one index must be added per iteration".to_string(),
            ));
        }
        for fixed in &self.fixed {
            if fixed.len() != dim {
                return Err(MimcError::Configuration(format!(
                    "Fixed index {:?} does not have {} coordinates",
                    fixed, dim
                )));
            }
        }
        Ok(())
    }

    pub fn fixed_indices(&self) -> Vec<MultiIndex> {
        self.fixed.iter().cloned().map(MultiIndex::new).collect()
    }
}

/// Hard limits on the run
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Termination {
    /// Total cost after which the run stops
    pub max_cost: Option<f64>,
    /// Number of consecutive iterations a non-positive weak rate is tolerated
    pub stall_iterations: usize,
}

impl Default for Termination {
    fn default() -> Self {
        Termination {
            max_cost: None,
            stall_iterations: 3,
        }
    }
}

impl Termination {
    pub fn validate(&self) -> Result<(), MimcError> {
        if let Some(max_cost) = self.max_cost {
            if !(max_cost.is_finite() && max_cost > 0.0) {
                return Err(MimcError::Configuration(format!(
                    "The cost cap must be positive, got {}",
                    max_cost
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Log {
    /// The maximum log level to display
    ///
    /// One of `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// The file to write the log to, relative to the output folder
    pub file: String,
    /// Whether to install a global subscriber
    ///
    /// Disable this to use a custom subscriber or to run benchmarks.
    pub write: bool,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            level: String::from("info"),
            file: String::from("log.txt"),
            write: true,
        }
    }
}

/// Configuration for the output files
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Output {
    /// Whether to write the output files
    pub write: bool,
    /// The (relative) path to write the output files to
    pub path: String,
}

impl Default for Output {
    fn default() -> Self {
        Output {
            write: true,
            path: String::from("outputs/"),
        }
    }
}

impl Output {
    /// Parses the output folder location
    ///
    /// A single `#` is replaced with the lowest number for which the folder does not exist yet.
    pub fn parse_output_folder(&mut self) -> Result<()> {
        if self.path.is_empty() {
            self.path = Output::default().path;
        }

        match self.path.matches('#').count() {
            0 => Ok(()),
            1 => {
                let mut num = 1;
                while std::path::Path::new(&self.path.replace('#', &num.to_string())).exists() {
                    num += 1;
                }
                self.path = self.path.replace('#', &num.to_string());
                Ok(())
            }
            _ => bail!("Only one `#` symbol is allowed in the output path"),
        }
    }
}

/// Checkpointing between iterations
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Checkpoint {
    /// Save the profile and samples after every evaluation phase
    pub enabled: bool,
    /// The run tag the checkpoint is stored under
    pub tag: String,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Checkpoint {
            enabled: false,
            tag: String::from("mimc"),
        }
    }
}

/// Parses the settings from a TOML configuration file
///
/// Entries may be overridden by environment variables prefixed with `MIMC_`, using a double
/// underscore between the section and the entry, e.g. `MIMC_TOLERANCE__TARGET=1e-3` or
/// `MIMC_TERMINATION__MAX_COST=500`.
/// The settings are validated and, if output is enabled, a copy is written to
/// `settings.json`.
pub fn read(path: impl Into<String>) -> Result<Settings> {
    let settings_path = path.into();

    let parsed = eConfig::builder()
        .add_source(config::File::with_name(&settings_path).format(config::FileFormat::Toml))
        .add_source(
            config::Environment::with_prefix("MIMC")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .wrap_err_with(|| format!("Unable to read settings from {}", settings_path))?;

    let mut settings: Settings = parsed
        .try_deserialize()
        .wrap_err("Unable to parse settings")?;

    settings.validate()?;
    settings.output.parse_output_folder()?;

    if settings.output.write {
        settings
            .write()
            .wrap_err("Could not write settings to file")?;
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_priors_expand_to_dimension() {
        let priors = Priors::default();
        assert_eq!(priors.weak(3), vec![1.0; 3]);
        assert_eq!(priors.strong(2), vec![2.0; 2]);

        let mut settings = Settings::default();
        settings.config.dimensions = 2;
        settings.priors.weak = vec![1.0];
        assert!(matches!(
            settings.validate(),
            Err(MimcError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_tolerances() {
        let mut settings = Settings::default();
        settings.tolerance.target = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.tolerance.theta = 1.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.tolerance.max = Some(1e-3);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_tolerance_sequence_without_continuation() {
        assert_eq!(Tolerance::default().sequence(), vec![1e-2]);
    }

    #[test]
    fn test_tagged_parameters() {
        let mut settings = Settings::default();
        settings.config.dimensions = 2;
        let parameters = settings.tagged_parameters();
        assert_eq!(parameters["dimensions"], 2.0);
        assert_eq!(parameters["priors.strong.1"], 2.0);
        assert_eq!(parameters["tolerance.target"], 1e-2);
        assert!(!parameters.contains_key("termination.max_cost"));
    }
}
