use anyhow::{bail, Context};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use kbuildsrv::config::{get_default_config_path, load_config_from_file};
use kbuildsrv::gce::resolve_from_metadata;
use kbuildsrv::log_collector::install_global;
use kbuildsrv::{
    ArtifactStore, BuildId, BuildOrchestrator, BuildRequest, DirStore, GcsStore, JobLog,
    LogCollector, RemoteBuildCoordinator, ServerConfig,
};

const USAGE: &str = "usage: kbuildsrv build <repository> <commit>\n       kbuildsrv relay <command-json>";

fn load_config() -> anyhow::Result<ServerConfig> {
    match get_default_config_path() {
        Some(path) => load_config_from_file(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(ServerConfig::default()),
    }
}

/// `file:///srv/kernels` keeps artifacts on local disk; anything else is GCS.
fn artifact_store(config: &ServerConfig) -> Arc<dyn ArtifactStore> {
    match config.storage_endpoint.strip_prefix("file://") {
        Some(root) => Arc::new(DirStore::new(PathBuf::from(root))),
        None => Arc::new(GcsStore::from_config(config)),
    }
}

async fn build(config: &ServerConfig, repository: &str, commit: &str, command_line: &str) -> anyhow::Result<ExitCode> {
    let request = BuildRequest::new(repository, commit, command_line)?;
    let orchestrator = BuildOrchestrator::new(config, request, artifact_store(config))?;
    let info = orchestrator.get_info();
    log::info!("[Main] Build {} of {} at {}", info.id, info.repository, info.commit);

    let outcome = orchestrator.run().wait().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn relay(config: &ServerConfig, command_json: &str) -> anyhow::Result<ExitCode> {
    let command: Value =
        serde_json::from_str(command_json).context("command must be a JSON document")?;
    let original_command = match command.get("orig_cmd").and_then(Value::as_str) {
        Some(cmd) => cmd.to_string(),
        None => command_json.to_string(),
    };

    let id = BuildId::new();
    let run_log = config.log_root.join(id.as_str()).join("run.log");
    let log = JobLog::open(id.as_str(), &run_log).map_err(anyhow::Error::msg)?;

    let outcome = RemoteBuildCoordinator::new(config, original_command, command, log)?
        .run()
        .wait()
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = load_config()?;

    let collector = LogCollector::new(config.server_log_file()).map_err(anyhow::Error::msg)?;
    if let Err(e) = install_global(collector.clone(), log::LevelFilter::Info) {
        eprintln!("[Main] WARNING: {}", e);
    }
    log::info!("[Main] kbuildsrv {} starting", kbuildsrv::VERSION);

    resolve_from_metadata(&mut config).await;

    let command_line = args.join(" ");
    let result = match args.get(1).map(String::as_str) {
        Some("build") => match (args.get(2), args.get(3)) {
            (Some(repository), Some(commit)) => build(&config, repository, commit, &command_line).await,
            _ => bail!(USAGE),
        },
        Some("relay") => match args.get(2) {
            Some(command_json) => relay(&config, command_json).await,
            None => bail!(USAGE),
        },
        _ => bail!(USAGE),
    };

    if let Err(e) = &result {
        log::error!("[Main] {:#}", e);
    }
    let _ = collector.flush_blocking();
    result
}
