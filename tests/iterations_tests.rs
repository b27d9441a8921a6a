use eyre::Result;
use mimcore::prelude::*;

/// Test that the iteration log and output files describe the run
#[test]
fn test_outputs_are_written() -> Result<()> {
    let folder = std::env::temp_dir()
        .join(format!("mimcore-outputs-{}", std::process::id()))
        .to_string_lossy()
        .into_owned();

    let mut settings = Settings::new();
    settings.config.dimensions = 1;
    settings.tolerance.target = 1e-2;
    settings.sampling.threads = 2;
    settings.log.write = false;
    settings.output.path = folder.clone();

    let result = fit(AnalyticModel::new(1.0, 1), settings)?;
    assert!(result.converged());

    let log = result.iteration_log();
    assert_eq!(log.len(), result.iterations());
    assert_eq!(log.last().unwrap().status, Status::Converged);
    assert!(log
        .records()
        .windows(2)
        .all(|w| w[1].total_cost >= w[0].total_cost && w[1].active >= w[0].active));

    let read = |name: &str| std::fs::read_to_string(std::path::Path::new(&folder).join(name));

    let iterations = read("iterations.csv")?;
    let lines: Vec<&str> = iterations.lines().collect();
    assert_eq!(lines.len(), result.iterations() + 1);
    assert!(lines[0].starts_with("iteration,tolerance,converged,status"));
    assert!(lines.last().unwrap().contains(",true,Converged,"));

    let levels = read("levels.csv")?;
    assert_eq!(levels.lines().count(), result.profile().len() + 1);

    let written: Settings = serde_json::from_str(&read("settings.json")?)?;
    assert_eq!(&written, result.settings());

    std::fs::remove_dir_all(&folder)?;
    Ok(())
}

/// Test the output folder placeholder
#[test]
fn test_output_folder_numbering() -> Result<()> {
    let base = std::env::temp_dir().join(format!("mimcore-numbered-{}", std::process::id()));
    std::fs::create_dir_all(base.join("run-1"))?;

    let mut output = settings::Output {
        write: true,
        path: base.join("run-#").to_string_lossy().into_owned(),
    };
    output.parse_output_folder()?;
    std::fs::remove_dir_all(&base)?;

    assert_eq!(output.path, base.join("run-2").to_string_lossy());
    Ok(())
}
