use std::path::{Path, PathBuf};

use crate::agent_engine::engine::Orchestrator;
use crate::agent_engine::event_bus::SessionCommand;
use crate::agent_engine::state::{SessionReport, Task};
use crate::config::{self, AppConfig};
use crate::errors::{GuiPilotError, GuiPilotResult};

/// Command-line overrides for a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub task: Option<String>,
    pub domain: Option<String>,
    pub id: Option<String>,
    pub max_iterations: Option<u32>,
    pub report: Option<PathBuf>,
}

pub fn apply_overrides(cfg: &mut AppConfig, opts: &RunOptions) {
    if let Some(task) = &opts.task {
        cfg.task.description = task.clone();
    }
    if opts.domain.is_some() {
        cfg.task.domain = opts.domain.clone();
    }
    if opts.id.is_some() {
        cfg.task.id = opts.id.clone();
    }
    if let Some(n) = opts.max_iterations {
        cfg.session.max_iterations = n;
    }
}

/// Run one session to the end. Ctrl-C asks the loop to stop at the next iteration.
pub async fn run_task(opts: RunOptions) -> GuiPilotResult<SessionReport> {
    let mut cfg = config::load_config(opts.config.as_deref())?;
    apply_overrides(&mut cfg, &opts);
    cfg.validate()?;
    if cfg.task.description.trim().is_empty() {
        return Err(GuiPilotError::Config(
            "no task given: set [task].description or pass --task".into(),
        ));
    }

    let mut orchestrator = Orchestrator::from_config(&cfg)?;
    let stop = orchestrator.events().command_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current iteration");
            let _ = stop.send(SessionCommand::Stop).await;
        }
    });

    let report = orchestrator.run_session(Task::from_config(&cfg.task)).await;
    if let Some(path) = &opts.report {
        write_report(&report, path)?;
    }
    Ok(report)
}

pub fn write_report(report: &SessionReport, path: &Path) -> GuiPilotResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    tracing::info!(path = %path.display(), "session report written");
    Ok(())
}

/// Load and validate the configuration, returning a short description of it.
pub fn check_config(path: Option<&Path>) -> GuiPilotResult<String> {
    let cfg = config::load_config(path)?;
    cfg.validate()?;
    let mut providers: Vec<&String> = cfg.llm.providers.keys().collect();
    providers.sort();
    Ok(format!(
        "active provider: {}\nproviders: {}\nperception: {}\nmachine: {:?} at {}\nmax iterations: {}, attempts per call: {}, review policy: {:?}",
        cfg.llm.active_provider,
        providers.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", "),
        cfg.perception.endpoint,
        cfg.machine.kind,
        cfg.machine.endpoint,
        cfg.session.max_iterations,
        cfg.session.max_retries,
        cfg.session.review_policy,
    ))
}

pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
