use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use common::{
    logs, JobId, JobInfo, JobStatusResponse, LogQuery, StartJobRequest, StartJobResponse,
    StopJobRequest, StopJobResponse,
};
use flate2::{write::GzEncoder, Compression};
use serde_json::{json, Value};
use std::io::{ErrorKind, Write as _};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;
use crate::runner;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs))
        .route("/jobs/start", post(start_job))
        .route("/jobs/:id/status", get(job_status))
        .route("/jobs/:id/stop", post(stop_job))
        .route("/jobs/:id/download", get(download_job))
        .route("/jobs/:id/logs", get(job_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "hostname": state.hostname,
        "site": state.config.site,
        "rule_sets": state.rules.len(),
    }))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobStatusResponse>> {
    Json(
        state
            .registry
            .list()
            .iter()
            .map(JobInfo::status_response)
            .collect(),
    )
}

// Cualquier cuerpo inválido es 400: el orquestador descarta la tarea en vez
// de reencolarla para siempre.
async fn start_job(
    State(state): State<AppState>,
    body: Result<Json<StartJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartJobResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (task, site) = req.into_task().map_err(ApiError::BadRequest)?;

    let site = site.unwrap_or_else(|| state.config.site.clone());
    if !state.config.serves(&site) {
        return Err(ApiError::BadRequest(format!(
            "site '{}' is not served by this worker ({})",
            site, state.config.site
        )));
    }

    let items = task.identifiers.len();
    let (id, cancel) = state.registry.create(task.clone(), state.config.site.clone());
    info!(
        "job {} aceptado: {} items de '{}' (category_id={})",
        id, items, task.category_name, task.category_id
    );
    runner::spawn_job(state.clone(), id, task, cancel);

    let job = state
        .registry
        .get(id)
        .ok_or_else(|| ApiError::job_not_found(id))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            job_id: id,
            status: job.status,
            message: format!("Scraping accepted: {items} items"),
        }),
    ))
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .registry
        .get(id)
        .ok_or_else(|| ApiError::job_not_found(id))?;
    Ok(Json(job.status_response()))
}

// El cuerpo es opcional: `POST /jobs/7/stop` sin body también vale.
async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    body: Option<Json<StopJobRequest>>,
) -> Result<Json<StopJobResponse>, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let job = state.registry.request_stop(id, reason.clone())?;
    info!(
        "stop pedido para job {} ({})",
        id,
        reason.as_deref().unwrap_or("sin motivo")
    );

    Ok(Json(StopJobResponse {
        job_id: id,
        status: job.status,
        stop_requested: true,
        counters: job.counters,
        message: "Stop requested".to_string(),
    }))
}

async fn download_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .registry
        .get(id)
        .ok_or_else(|| ApiError::job_not_found(id))?;
    if !job.status.is_downloadable() {
        return Err(ApiError::BadRequest(format!(
            "job {id} is {}, nothing to download yet",
            job.status
        )));
    }

    let path = state.config.result_path(id);
    let raw = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ApiError::NotFound(format!("result of job {id} not found")),
        _ => ApiError::Internal(e.into()),
    })?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let gz = encoder.finish().map_err(|e| ApiError::Internal(e.into()))?;

    let disposition = format!("attachment; filename=\"job_{id}.json.gz\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        gz,
    ))
}

// El log vive en disco: se puede consultar aunque el worker se haya reiniciado.
async fn job_logs(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mode = query.mode()?;

    let path = state.config.log_path(id);
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => ApiError::NotFound(format!("no log for job {id}")),
            _ => ApiError::Internal(e.into()),
        })?;

    let text = logs::select_lines(&content, &mode)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleBook;
    use crate::scrape::{FetchedItem, ProductSource};
    use crate::state::ServerConfig;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use common::patterns::{LearnerConfig, RuleSet};
    use common::{JobStatus, ProductRecord, ResultDocument, Task};
    use flate2::read::GzDecoder;
    use std::io::Read as _;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    /// Fuente falsa: el item "FAIL" falla; con `gate` cada fetch espera un permiso.
    struct FakeSource {
        calls: Arc<AtomicUsize>,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl ProductSource for FakeSource {
        async fn fetch_item(
            &mut self,
            identifier: &str,
            _category: &str,
            _rules: Option<&RuleSet>,
            _cancel: &CancellationToken,
        ) -> FetchedItem {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let url = format!("https://www.amazon.com/dp/{identifier}");
            let record = if identifier == "FAIL" {
                ProductRecord::failed(identifier, url, "Failed to fetch page")
            } else {
                let mut r = ProductRecord::new(identifier, url);
                r.title = Some(format!("Producto {identifier}"));
                r.attributes.insert("brand".into(), "Acme".into());
                r
            };
            FetchedItem {
                record,
                analysis: None,
            }
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        state: AppState,
        calls: Arc<AtomicUsize>,
    }

    fn harness(gate: Option<Arc<Semaphore>>) -> Harness {
        harness_in(tempfile::tempdir().unwrap(), gate)
    }

    fn harness_in(dir: tempfile::TempDir, gate: Option<Arc<Semaphore>>) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            calls: calls.clone(),
            gate,
        };
        let config = ServerConfig {
            site: "amazon".into(),
            output_dir: dir.path().to_path_buf(),
            learn_sample_size: 5,
        };
        let state = AppState::new(
            Box::new(source),
            RuleBook::in_memory(LearnerConfig::default()),
            config,
        );
        Harness {
            _dir: dir,
            state,
            calls,
        }
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn start(state: &AppState, ids: &[&str]) -> JobId {
        let (status, body) = send(
            state,
            post_json(
                "/jobs/start",
                json!({ "category_id": 10, "site": "amazon",
                        "item_identifiers": ids, "category_name": "Laptops" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let resp: StartJobResponse = serde_json::from_slice(&body).unwrap();
        resp.job_id
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("la condición no se cumplió a tiempo");
    }

    async fn wait_terminal(state: &AppState, id: JobId) -> JobInfo {
        let registry = state.registry.clone();
        wait_until(|| {
            registry
                .get(id)
                .map(|j| j.status.is_terminal())
                .unwrap_or(false)
        })
        .await;
        state.registry.get(id).unwrap()
    }

    async fn download(state: &AppState, id: JobId) -> ResultDocument {
        let (status, body) = send(state, get(&format!("/jobs/{id}/download"))).await;
        assert_eq!(status, StatusCode::OK);
        let mut json = String::new();
        GzDecoder::new(body.as_slice())
            .read_to_string(&mut json)
            .unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn job_completo_con_un_item_fallido() {
        let h = harness(None);
        let id = start(&h.state, &["A1", "FAIL", "A3"]).await;

        let job = wait_terminal(&h.state, id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.counters.success_count, 2);
        assert_eq!(job.counters.failed_count, 1);
        assert_eq!(job.counters.processed_count, 3);
        assert!(job.completed_at.is_some());

        let (status, body) = send(&h.state, get(&format!("/jobs/{id}/status"))).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["status"], json!("completed"));
        assert_eq!(v["total_count"], json!(3));

        let doc = download(&h.state, id).await;
        assert_eq!(doc.status, JobStatus::Completed);
        assert_eq!(doc.products.len(), 3);
        assert_eq!(doc.category, "Laptops");
        assert_eq!(doc.products.iter().filter(|p| p.error.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn stop_durante_el_primer_item_deja_un_solo_procesado() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(Some(gate.clone()));
        let id = start(&h.state, &["A1", "A2", "A3", "A4", "A5"]).await;

        let calls = h.calls.clone();
        wait_until(|| calls.load(Ordering::SeqCst) == 1).await;

        let (status, body) = send(
            &h.state,
            post_json(&format!("/jobs/{id}/stop"), json!({ "reason": "manual" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let resp: StopJobResponse = serde_json::from_slice(&body).unwrap();
        assert!(resp.stop_requested);
        assert!(!resp.status.is_terminal());

        gate.add_permits(10);
        let job = wait_terminal(&h.state, id).await;
        assert_eq!(job.status, JobStatus::Stopped);
        assert_eq!(job.counters.processed_count, 1);
        assert!(job.stopped_at.is_some());
        assert_eq!(job.stop_reason.as_deref(), Some("manual"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let doc = download(&h.state, id).await;
        assert_eq!(doc.status, JobStatus::Stopped);
        assert_eq!(doc.products.len(), 1);
    }

    #[tokio::test]
    async fn stop_sobre_job_terminal_es_400_y_no_cambia_nada() {
        let h = harness(None);
        let id = start(&h.state, &["A1"]).await;
        let before = wait_terminal(&h.state, id).await;

        let req = Request::builder()
            .method("POST")
            .uri(format!("/jobs/{id}/stop"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&h.state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let after = h.state.registry.get(id).unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.completed_at, before.completed_at);
        assert_eq!(after.counters, before.counters);

        let (status, _) = send(&h.state, post_json("/jobs/999/stop", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_antes_de_terminar_es_400() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(Some(gate.clone()));
        let id = start(&h.state, &["A1"]).await;

        let (status, _) = send(&h.state, get(&format!("/jobs/{id}/download"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&h.state, get("/jobs/999/download")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&h.state, get("/jobs/999/status")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        gate.add_permits(1);
        wait_terminal(&h.state, id).await;
    }

    #[tokio::test]
    async fn start_valida_la_peticion() {
        let h = harness(None);
        let cases = [
            json!({ "site": "amazon", "item_identifiers": ["A"] }),
            json!({ "category_id": 1, "item_identifiers": [] }),
            json!({ "category_id": 1, "item_identifiers": "A" }),
            json!({ "category_id": 1, "site": "ebay", "item_identifiers": ["A"] }),
        ];
        for body in cases {
            let (status, _) = send(&h.state, post_json("/jobs/start", body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        }

        // errores de tipo o de content-type también son 400, no 422/415
        let (status, _) = send(
            &h.state,
            post_json("/jobs/start", json!({ "category_id": "abc", "item_identifiers": ["A"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &h.state,
            post_json("/jobs/start", json!({ "category_id": 1, "item_identifiers": { "a": 1 } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let no_content_type = Request::builder()
            .method("POST")
            .uri("/jobs/start")
            .body(Body::from(r#"{"category_id": 1, "item_identifiers": ["A"]}"#))
            .unwrap();
        let (status, body) = send(&h.state, no_content_type).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert!(v["error"].is_string());
        let (status, _) = send(
            &h.state,
            Request::builder()
                .method("POST")
                .uri("/jobs/start")
                .header("content-type", "application/json")
                .body(Body::from("{ no es json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(h.state.registry.list().is_empty());

        // sin site usa el del worker; acepta el alias `asins`
        let (status, _) = send(
            &h.state,
            post_json("/jobs/start", json!({ "category_id": 1, "asins": ["A"] })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn logs_por_modo() {
        let h = harness(None);
        let path = h.state.config.log_path(3);
        std::fs::write(&path, "uno\ndos\ntres\ncuatro\n").unwrap();

        let text = |body: Vec<u8>| String::from_utf8(body).unwrap();

        let (status, body) = send(&h.state, get("/jobs/3/logs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text(body), "uno\ndos\ntres\ncuatro\n");

        let (_, body) = send(&h.state, get("/jobs/3/logs?tail=2")).await;
        assert_eq!(text(body), "tres\ncuatro\n");

        let (_, body) = send(&h.state, get("/jobs/3/logs?from=2&to=3")).await;
        assert_eq!(text(body), "dos\ntres\n");

        let (_, body) = send(&h.state, get("/jobs/3/logs?grep=%5Ed")).await;
        assert_eq!(text(body), "2:dos\n");

        let (status, _) = send(&h.state, get("/jobs/3/logs?tail=1&grep=x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&h.state, get("/jobs/3/logs?grep=%28")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&h.state, get("/jobs/4/logs")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_y_listado() {
        let h = harness(None);
        let (status, body) = send(&h.state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["status"], json!("ok"));
        assert_eq!(v["site"], json!("amazon"));

        h.state.registry.create(
            Task {
                category_id: 1,
                category_name: "X".into(),
                identifiers: vec!["A".into()],
            },
            "amazon".into(),
        );
        let (_, body) = send(&h.state, get("/jobs")).await;
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 1);
        assert_eq!(v[0]["status"], json!("accepted"));
    }

    #[tokio::test]
    async fn ids_no_pisan_archivos_de_una_corrida_anterior() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.json"), r#"{"viejo": true}"#).unwrap();
        std::fs::write(dir.path().join("1.log"), "linea vieja\n").unwrap();
        let h = harness_in(dir, None);

        let id = start(&h.state, &["A1"]).await;
        assert_eq!(id, 2);
        wait_terminal(&h.state, id).await;

        let old = std::fs::read_to_string(h.state.config.result_path(1)).unwrap();
        assert_eq!(old, r#"{"viejo": true}"#);
        let (status, body) = send(&h.state, get("/jobs/1/logs")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), "linea vieja\n");

        let doc = download(&h.state, id).await;
        assert_eq!(doc.products.len(), 1);
    }
}
