use std::time::Instant;

use eyre::{Result, WrapErr};

use crate::algorithms::mimc::Mimc;
use crate::algorithms::Algorithm;
use crate::routines::evaluation::Evaluator;
use crate::routines::logger;
use crate::routines::output::MimcResult;
use crate::routines::persistence::{JsonStore, Persistence};
use crate::routines::settings::Settings;

/// Primary entrypoint for mimcore
///
/// Runs the adaptive MIMC driver with the given evaluator until it converges or stops.
/// Logging is set up according to the `[log]` section, a checkpoint is saved after every
/// evaluation phase when `[checkpoint] enabled` is set, and the output files are written
/// if `[output] write` is set.
///
/// The returned [MimcResult] reports the status of the run, see [MimcResult::exit_code].
pub fn fit<E: Evaluator>(evaluator: E, settings: Settings) -> Result<MimcResult> {
    let now = Instant::now();
    let mut settings = settings;
    settings.output.parse_output_folder()?;

    logger::setup_log(&settings)?;
    tracing::info!("Starting mimcore");

    match settings.output.write {
        true => tracing::info!("Output files will be written to {}", settings.output.path),
        false => tracing::info!(
            "Output files will not be written - set `write = true` in the [output] section to enable output files"
        ),
    }

    let mut algorithm = Mimc::new(settings.clone(), evaluator)?;
    if settings.checkpoint.enabled {
        algorithm = algorithm.with_persistence(Box::new(JsonStore::new(&settings.output.path)));
    }

    let result = run(algorithm)?;
    result.write_outputs()?;
    tracing::info!("Program complete after {:.2?}", now.elapsed());
    Ok(result)
}

/// Continue a checkpointed run
///
/// The checkpoint is read from `<output>/<tag>.json`, where the tag is taken from the
/// `[checkpoint]` section. Settings such as the tolerance may differ from the original run.
pub fn resume<E: Evaluator>(evaluator: E, settings: Settings) -> Result<MimcResult> {
    let now = Instant::now();
    logger::setup_log(&settings)?;

    let store = JsonStore::new(&settings.output.path);
    let record = store
        .load(&settings.checkpoint.tag)
        .wrap_err_with(|| format!("Unable to resume run '{}'", settings.checkpoint.tag))?;

    let mut algorithm = Mimc::resume(settings.clone(), evaluator, record)?;
    if settings.checkpoint.enabled {
        algorithm = algorithm.with_persistence(Box::new(store));
    }

    let result = run(algorithm)?;
    result.write_outputs()?;
    tracing::info!("Program complete after {:.2?}", now.elapsed());
    Ok(result)
}

/// Alternative entrypoint, primarily meant for third-party libraries
///
/// Does not set up logging, write output files or save checkpoints.
pub fn fit_internal<E: Evaluator>(evaluator: E, settings: Settings) -> Result<MimcResult> {
    run(Mimc::new(settings, evaluator)?)
}

fn run<E: Evaluator>(mut algorithm: Mimc<E>) -> Result<MimcResult> {
    let result = match algorithm.fit() {
        Ok(result) => result,
        Err(err) => {
            tracing::error!("An error has occurred during the run: {}", err);
            return Err(err.into());
        }
    };
    tracing::info!(
        "{} after {} iterations, estimate {:?} at a total cost of {:.4e}",
        result.status(),
        result.iterations(),
        result.estimate(),
        result.total_cost()
    );
    Ok(result)
}
