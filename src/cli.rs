//! CLI helper functions

use crate::{
    config::AppConfig,
    model::{Job, JobRequest, JobStatus},
    orchestrator::ExtractionOrchestrator,
    providers::{self, ProviderChange},
    registry::ExtractorRegistry,
    scheduler::Scheduler,
    store::{self, JobStore, ScheduleStore},
    transport::TransportLayer,
};
use eyre::{Context, Result, eyre};
use owo_colors::OwoColorize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Load the config file (if present), then apply environment overrides
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let mut config = AppConfig::read_or_default(path)?;
    config.apply_env()?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Wired-up core services
pub struct Inventory {
    pub config: AppConfig,
    pub registry: Arc<ExtractorRegistry>,
    pub orchestrator: Arc<ExtractionOrchestrator>,
    pub scheduler: Arc<Scheduler>,
}

/// Build the registry, register providers and assemble the orchestrator.
///
/// With `dry_run` the configured transport is replaced by the null sink.
pub async fn bootstrap(config: AppConfig, dry_run: bool) -> Result<Inventory> {
    let registry = Arc::new(ExtractorRegistry::new(providers::catalog_from_config(
        &config.providers,
    )));

    for (provider, outcome) in providers::register_all(&registry, &config.providers).await {
        match outcome {
            Ok(count) => log::info!(
                "{} {} with {} extractor(s)",
                "✓".green(),
                provider.cyan(),
                count
            ),
            Err(e) => log::warn!("{} {} unavailable: {}", "✗".red(), provider.cyan(), e),
        }
    }

    let transport = if dry_run {
        log::info!("Dry run: artifacts will be discarded");
        TransportLayer::null()
    } else {
        TransportLayer::from_config(&config.transport).context("Failed to build transport")?
    };

    let store = store::open(&config.store).context("Failed to open job store")?;
    let jobs: Arc<dyn JobStore> = store.clone();
    let schedules: Arc<dyn ScheduleStore> = store;

    let orchestrator = Arc::new(ExtractionOrchestrator::new(
        Arc::clone(&registry),
        Arc::new(transport),
        jobs,
        config.orchestrator.clone(),
    ));
    let scheduler = Scheduler::new(Arc::clone(&orchestrator), schedules);

    Ok(Inventory {
        config,
        registry,
        orchestrator,
        scheduler,
    })
}

/// Parse `key=value` filters; values that parse as JSON keep their type
pub fn parse_filters(raw: &[String]) -> Result<Vec<(String, Value)>> {
    raw.iter()
        .map(|item| {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| eyre!("Filter '{}' is not key=value", item))?;
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

/// Run one job to completion
pub async fn run_job(inventory: &Inventory, request: JobRequest) -> Result<Job> {
    let job_id = inventory
        .orchestrator
        .create_job(request)
        .await
        .context("Job rejected")?;
    inventory
        .orchestrator
        .run(job_id)
        .await
        .with_context(|| format!("Job {} did not run", job_id))
}

/// Human-readable job summary
pub fn print_summary(job: &Job) {
    let status = match job.status {
        JobStatus::Completed => job.status.as_str().green().to_string(),
        JobStatus::Cancelled => job.status.as_str().yellow().to_string(),
        _ => job.status.as_str().red().to_string(),
    };
    println!("Job {} {}", job.id.to_string().bright_black(), status);
    println!(
        "  {} pulled, {} delivered, {} failed",
        job.counts.total,
        job.counts.successful.green(),
        job.counts.failed.red()
    );
    for error in &job.errors {
        let scope = match (&error.provider, &error.service) {
            (Some(p), Some(s)) => format!("{}:{}", p, s),
            (Some(p), None) => p.clone(),
            _ => "job".to_string(),
        };
        let marker = if error.fatal { "✗".red().to_string() } else { "!".yellow().to_string() };
        println!(
            "  {} [{:?}] {} {}",
            marker,
            error.stage,
            scope.cyan(),
            error.message
        );
    }
}

/// Re-read the config file and register or unregister providers whose
/// `enabled` flag changed.
///
/// Services are fixed at startup; a provider that was not configured at
/// startup is reported as unknown.
pub async fn reload_providers(
    inventory: &Inventory,
    config_path: impl AsRef<Path>,
) -> Result<Vec<(String, ProviderChange)>> {
    let config = load_config(config_path)?;
    let changes = providers::reconcile(&inventory.registry, &config.providers).await;

    for (provider, change) in &changes {
        match change {
            ProviderChange::Registered(count) => log::info!(
                "{} {} enabled with {} extractor(s)",
                "✓".green(),
                provider.cyan(),
                count
            ),
            ProviderChange::Unregistered(count) => log::info!(
                "{} {} disabled, {} extractor(s) removed",
                "-".yellow(),
                provider.cyan(),
                count
            ),
            ProviderChange::Failed(e) => {
                log::warn!("{} {} unavailable: {}", "✗".red(), provider.cyan(), e)
            }
        }
    }
    if changes.is_empty() {
        log::info!("Configuration reloaded, providers unchanged");
    }
    Ok(changes)
}

/// SIGHUP on unix; never fires elsewhere
struct ReloadSignal {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    fn new() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            inner: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                .context("Failed to listen for SIGHUP")?,
        })
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if self.inner.recv().await.is_some() {
            return;
        }
        std::future::pending::<()>().await
    }
}

/// Register config schedules and drive them until Ctrl-C.
///
/// SIGHUP re-reads `config_path` and applies provider enable/disable changes.
pub async fn serve(inventory: &Inventory, config_path: impl AsRef<Path>) -> Result<()> {
    let config_path = config_path.as_ref();
    let default_batch_size = inventory.config.orchestrator.default_batch_size;
    for declared in &inventory.config.schedules {
        let schedule = inventory
            .scheduler
            .create_schedule(
                &declared.cron_expression,
                declared.to_request(default_batch_size),
                declared.name.clone(),
            )
            .await
            .with_context(|| format!("Invalid schedule '{}'", declared.cron_expression))?;
        log::info!(
            "Schedule {} {}",
            schedule.name.as_deref().unwrap_or("(unnamed)").cyan(),
            schedule.cron_expression.bright_black()
        );
    }

    let count = inventory.scheduler.start().await.context("Failed to start scheduler")?;
    log::info!(
        "Serving {} schedule(s), press Ctrl-C to stop, SIGHUP to reload providers",
        count
    );

    let mut reload = ReloadSignal::new()?;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = reload.recv() => {
                log::info!("Reloading {}", config_path.display());
                if let Err(e) = reload_providers(inventory, config_path).await {
                    log::error!("Reload failed, keeping current providers: {:#}", e);
                }
            }
        }
    }

    log::info!("Shutting down");
    inventory.scheduler.shutdown().await?;
    let cancelled = inventory.orchestrator.cancel_all().await;
    if cancelled > 0 {
        log::warn!("Cancelled {} running job(s)", cancelled);
    }
    Ok(())
}

/// Print each configured provider's services and registration state
pub async fn print_providers(inventory: &Inventory) {
    let catalog = inventory.registry.catalog();
    for (name, provider) in &inventory.config.providers {
        let state = if !provider.enabled {
            "disabled".bright_black().to_string()
        } else if inventory.registry.is_registered(name).await {
            "registered".green().to_string()
        } else {
            "unavailable".red().to_string()
        };
        println!("{} ({})", name.cyan(), state);
        for service in catalog.services(name) {
            println!("  - {}", service);
        }
    }
}
