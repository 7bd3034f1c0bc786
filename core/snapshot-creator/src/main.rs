use std::path::PathBuf;

use clap::{Parser, Subcommand};
use models::{ensure_code, Error, ErrorKind, ResultExt};
use snapshot_creator::config::GenerateConfig;
use snapshot_creator::logger::LOGGER;
use snapshot_creator::output::write_atomic;
use snapshot_creator::v8_engine::{JsSource, V8Engine, V8RuntimeFactory};
use snapshot_creator::{parse_embedded, PlatformScheduler, SnapshotBuilder};
use tracing::instrument;

#[derive(Debug, Parser)]
#[command(name = "snapshot-creator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a startup snapshot and emit it as C++ source
    Generate(GenerateConfig),
    /// Check that a generated source file is well formed
    Verify { path: PathBuf },
}

#[instrument(skip_all)]
fn generate(config: GenerateConfig) -> Result<(), Error> {
    let config = config.load()?;
    let _build_log = match &config.log_file {
        Some(path) => Some(LOGGER.build_log(path)?),
        None => None,
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .with_kind(ErrorKind::Engine)?;
    let platform = PlatformScheduler::new();
    let engine = match &config.v8_flags {
        Some(flags) => V8Engine::with_flags(flags.clone()),
        None => V8Engine::new(),
    };
    let factory = V8RuntimeFactory::new(
        config
            .bootstrap
            .iter()
            .map(JsSource::from_path)
            .collect::<Result<Vec<_>, _>>()?,
    );

    let startup = config.startup_args();
    let source = SnapshotBuilder::new(&engine, &factory, &platform, rt.handle().clone())
        .format(config.snapshot_format())
        .generate(startup.args, startup.exec_args);

    match &config.output {
        Some(path) => write_atomic(path, &source)?,
        None => print!("{source}"),
    }
    Ok(())
}

fn verify(path: PathBuf) -> Result<(), Error> {
    let source = std::fs::read_to_string(&path)
        .with_ctx(|_| (ErrorKind::Filesystem, path.display().to_string()))?;
    let snapshot = parse_embedded(&source)?;
    ensure_code!(
        snapshot.is_consistent(),
        ErrorKind::ParseSnapshot,
        "{} declares blob_size {} but holds {} bytes",
        path.display(),
        snapshot.declared_size,
        snapshot.blob.len()
    );
    println!(
        "{}: {} byte blob, {} isolate data indexes",
        path.display(),
        snapshot.blob.len(),
        snapshot.isolate_data_indexes.len()
    );
    Ok(())
}

fn main() {
    LOGGER.enable();

    let res = match Cli::parse().command {
        Command::Generate(config) => generate(config),
        Command::Verify { path } => verify(path),
    };

    if let Err(e) = res {
        tracing::error!("{e}");
        tracing::debug!("{:?}", e.source);
        std::process::exit(e.kind.code())
    }
}
