//! One job invocation, from configuration to exit status.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::{Instrument, error, info, info_span, warn};

use adprompt_ai::TextGenerator;
use adprompt_core::RunId;
use adprompt_infra::config::{CREDENTIALS_ENV, JobConfig};
use adprompt_infra::external::HttpSessionGenerator;
use adprompt_infra::jobs::{BatchCoordinator, BatchError, BatchReport};
use adprompt_infra::work_store::{PostgresWorkItemStore, WorkItemStore};

use crate::cli::Args;

/// A resource held for the whole run and given back on every exit path.
#[async_trait]
pub trait Release: Send + Sync {
    async fn release(&self);
}

#[async_trait]
impl Release for PostgresWorkItemStore {
    async fn release(&self) {
        self.close().await;
    }
}

#[async_trait]
impl Release for HttpSessionGenerator {
    async fn release(&self) {
        if let Err(e) = self.close().await {
            warn!(error = %e, "closing the generation session failed");
        }
    }
}

/// Run one batch, reading the credential string from `GEMINI_COOKIES`.
///
/// Zero or partial success is `Ok`, and so is an unreachable database (there
/// is simply no work). Configuration errors, an unusable session and
/// interruption are `Err`.
pub async fn run(args: Args) -> Result<()> {
    let credentials_env = std::env::var(CREDENTIALS_ENV).ok();
    run_with_env(args, credentials_env.as_deref()).await
}

/// [`run`] with the credential string passed in.
pub async fn run_with_env(args: Args, credentials_env: Option<&str>) -> Result<()> {
    let run_id = RunId::new();
    let span = info_span!("adprompt_job", %run_id);
    execute(args, credentials_env, run_id).instrument(span).await
}

async fn execute(args: Args, credentials_env: Option<&str>, run_id: RunId) -> Result<()> {
    let config = args
        .into_config(credentials_env)
        .context("invalid configuration")?;
    log_config(&config);

    let store = match PostgresWorkItemStore::connect(
        &config.database_url,
        config.table.clone(),
        config.database_connect_timeout,
    )
    .await
    {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "cannot connect to the database; no work available");
            return Ok(());
        }
    };

    let generator = match HttpSessionGenerator::connect(config.backend.clone(), &config.credentials).await {
        Ok(generator) => Arc::new(generator),
        Err(e) => {
            store.release().await;
            return Err(anyhow!(e).context("cannot initialise the generation session"));
        }
    };

    let coordinator = BatchCoordinator::new(
        store.clone(),
        Arc::clone(&generator),
        config.template.clone(),
        config.batch.clone(),
    )
    .with_run_id(run_id);

    let resources: [&dyn Release; 2] = [generator.as_ref(), &store];
    drive(
        &coordinator,
        config.batch_limit,
        config.record_cap,
        &resources,
        interrupted(),
    )
    .await
    .map(|_| ())
}

/// Run the batch raced against `interrupt`, then release `resources` in
/// order, however the run ended.
pub async fn drive<S, G, I>(
    coordinator: &BatchCoordinator<S, G>,
    batch_limit: usize,
    record_cap: Option<usize>,
    resources: &[&dyn Release],
    interrupt: I,
) -> Result<BatchReport>
where
    S: WorkItemStore,
    G: TextGenerator,
    I: Future<Output = ()>,
{
    let outcome = tokio::select! {
        result = coordinator.run(batch_limit, record_cap) => Some(result),
        () = interrupt => {
            warn!("interrupted; releasing resources");
            None
        }
    };

    for resource in resources {
        resource.release().await;
    }

    match outcome {
        Some(Ok(report)) => {
            summarize(&report);
            Ok(report)
        }
        Some(Err(err)) => {
            summarize(err.partial_report());
            let BatchError::FatalSession { source, .. } = &err;
            error!(item_id = %source.item_id, "session credentials need attention before the next run");
            Err(anyhow!(err))
        }
        None => Err(anyhow!("interrupted before the batch finished")),
    }
}

/// Resolves on Ctrl-C. Never resolves when the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn log_config(config: &JobConfig) {
    info!(
        table = config.table.table(),
        backend = %config.backend.base_url,
        model = %config.backend.model,
        credential_source = %config.credential_source,
        credential = %config.credentials.redacted(),
        batch_limit = config.batch_limit,
        record_cap = ?config.record_cap,
        on_exhausted = %config.batch.on_exhausted,
        "configuration loaded"
    );
}

fn summarize(report: &BatchReport) {
    for skipped in &report.skipped {
        info!(item_id = %skipped.id, reason = skipped.reason.label(), "skipped");
    }
    info!(
        claimed = report.claimed,
        processed = report.processed(),
        persisted = report.persisted.len(),
        skipped = report.skipped.len(),
        session_invalid_signals = report.session_invalid_signals,
        "summary"
    );
}
