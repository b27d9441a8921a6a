use std::time::Instant;

use eyre::Result;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::routines::output::OutputFile;
use crate::routines::settings::Settings;

/// Setup logging for the library
///
/// Log messages are written to stdout and to the log file in the output folder, filtered
/// by the level in the `[log]` section (`info` by default).
///
/// Nothing is installed when `log.write` is disabled. If a global subscriber has already
/// been set, for instance by an earlier run in the same process, it is kept.
pub fn setup_log(settings: &Settings) -> Result<()> {
    if !settings.log.write {
        return Ok(());
    }

    let env_filter = EnvFilter::new(settings.log.level.as_str());

    let timestamper = CompactTimestamp {
        start: Instant::now(),
    };

    let subscriber = Registry::default().with(env_filter);

    let outputfile = OutputFile::new(&settings.output.path, &settings.log.file)?;

    let file_layer = fmt::layer()
        .with_writer(outputfile.file_owned())
        .with_ansi(false)
        .with_timer(timestamper.clone());

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(false)
        .with_timer(timestamper);

    if subscriber.with(file_layer).with(stdout_layer).try_init().is_err() {
        tracing::debug!("A global subscriber is already set, keeping it");
    }

    Ok(())
}

#[derive(Clone)]
struct CompactTimestamp {
    start: Instant,
}

impl FormatTime for CompactTimestamp {
    fn format_time(
        &self,
        w: &mut tracing_subscriber::fmt::format::Writer<'_>,
    ) -> Result<(), std::fmt::Error> {
        let elapsed = self.start.elapsed();
        let hours = elapsed.as_secs() / 3600;
        let minutes = (elapsed.as_secs() % 3600) / 60;
        let seconds = elapsed.as_secs() % 60;

        write!(w, "{:02}h {:02}m {:02}s", hours, minutes, seconds)
    }
}
