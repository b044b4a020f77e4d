//! Ejecución de un job: un task de tokio por job, dentro del span `job`
//! para que todo lo que loguea termine en `<output>/<id>.log`.

use anyhow::{Context, Result};
use chrono::Utc;
use common::{patterns::PageAnalysis, store, JobId, JobStatus, ProductRecord, ResultDocument, Task};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::joblog::JOB_SPAN;
use crate::state::AppState;

/// Lanza el job en background. Un error o un panic del loop deja el job en `failed`.
pub fn spawn_job(state: AppState, id: JobId, task: Task, cancel: CancellationToken) {
    let span = info_span!(JOB_SPAN, job_id = id);
    let inner = tokio::spawn(run_job(state.clone(), id, task, cancel).instrument(span.clone()));

    tokio::spawn(
        async move {
            let failure = match inner.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(e) if e.is_panic() => Some("job panicked".to_string()),
                Err(e) => Some(e.to_string()),
            };
            if let Some(msg) = failure {
                error!("job {} falló: {}", id, msg);
                state
                    .registry
                    .finish(id, JobStatus::Failed, Utc::now(), Some(msg));
            }
        }
        .instrument(span),
    );
}

pub async fn run_job(state: AppState, id: JobId, task: Task, cancel: CancellationToken) -> Result<()> {
    let total = task.identifiers.len();
    let category = task.category_name.clone();

    // una sola sesión de navegador: los jobs se procesan de a uno
    let mut source = state.source.lock().await;
    state.registry.mark_in_progress(id);
    info!("job {} iniciado: {} items de '{}'", id, total, category);

    let mut products: Vec<ProductRecord> = Vec::with_capacity(total);
    let mut pending: Vec<PageAnalysis> = Vec::new();
    let mut stopped = false;

    for (i, identifier) in task.identifiers.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("stop pedido, corto antes del item {}/{}", i + 1, total);
            stopped = true;
            break;
        }

        info!(item = %identifier, "procesando item {}/{}", i + 1, total);
        let rules = state.rules.get(&category);
        let fetched = source
            .fetch_item(identifier, &category, rules.as_ref(), &cancel)
            .await;

        let success = fetched.record.is_success();
        if let Some(err) = &fetched.record.error {
            warn!(item = %identifier, "item fallido: {}", err);
        }
        products.push(fetched.record);
        state.registry.record_item(id, success);

        if rules.is_none() {
            pending.extend(fetched.analysis);
            if pending.len() >= state.config.learn_sample_size {
                learn_rules(&state, &category, std::mem::take(&mut pending)).await?;
            }
        }
    }
    drop(source);

    if !pending.is_empty() && state.rules.get(&category).is_none() {
        learn_rules(&state, &category, pending).await?;
    }

    // un stop que llega después del último item no cambia el resultado
    let status = if stopped {
        JobStatus::Stopped
    } else {
        JobStatus::Completed
    };
    let at = Utc::now();

    let mut snapshot = state
        .registry
        .get(id)
        .with_context(|| format!("job {id} desapareció del registro"))?;
    snapshot.close(status, at, None);

    let doc = ResultDocument::from_job(&snapshot, products);
    let path = state.config.result_path(id);
    blocking(move || {
        store::write_json_atomic(&path, &doc)
            .with_context(|| format!("no se pudo escribir {}", path.display()))
    })
    .await?;

    state.registry.finish(id, status, at, None);
    info!(
        "job {} {}: {} ok, {} fallidos de {}",
        id,
        status,
        snapshot.counters.success_count,
        snapshot.counters.failed_count,
        snapshot.counters.total_count
    );
    Ok(())
}

// Escrituras a disco (con reintentos que duermen) fuera del runtime,
// dentro del mismo span para que sigan yendo al log del job.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let span = Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(f))
        .await
        .context("tarea bloqueante abortada")?
}

async fn learn_rules(state: &AppState, category: &str, analyses: Vec<PageAnalysis>) -> Result<()> {
    let rules = state.rules.clone();
    let category = category.to_string();
    blocking(move || rules.learn(&category, &analyses).map(|_| ())).await
}
