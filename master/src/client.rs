//! Cliente del API HTTP de un Job Server.

use async_trait::async_trait;
use common::{
    JobId, JobStatusResponse, LogQuery, StartJobRequest, StartJobResponse, StopJobRequest,
    StopJobResponse, WorkerHandle,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    /// El worker respondió, pero con un status de error.
    #[error("worker respondió {code}: {body}")]
    Status { code: u16, body: String },
    /// No hubo respuesta utilizable (conexión, timeout, cuerpo inválido).
    #[error("error de transporte: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, ClientError::Status { code: 400, .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Status { code: 404, .. })
    }
}

/// Operaciones del orquestador contra un worker.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    async fn start(
        &self,
        worker: &WorkerHandle,
        req: &StartJobRequest,
    ) -> Result<StartJobResponse, ClientError>;

    async fn status(&self, worker: &WorkerHandle, job: JobId)
        -> Result<JobStatusResponse, ClientError>;

    async fn stop(
        &self,
        worker: &WorkerHandle,
        job: JobId,
        reason: Option<String>,
    ) -> Result<StopJobResponse, ClientError>;

    async fn logs(
        &self,
        worker: &WorkerHandle,
        job: JobId,
        query: &LogQuery,
    ) -> Result<String, ClientError>;

    /// Documento de resultado tal como lo sirve el worker (gzip).
    async fn download(&self, worker: &WorkerHandle, job: JobId) -> Result<Vec<u8>, ClientError>;
}

#[derive(Clone, Default)]
pub struct HttpWorkerClient {
    http: Client,
}

impl HttpWorkerClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

async fn checked(req: RequestBuilder) -> Result<reqwest::Response, ClientError> {
    let resp = req.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        code: status.as_u16(),
        body,
    })
}

async fn json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ClientError> {
    Ok(checked(req).await?.json::<T>().await?)
}

#[async_trait]
impl WorkerApi for HttpWorkerClient {
    async fn start(
        &self,
        worker: &WorkerHandle,
        req: &StartJobRequest,
    ) -> Result<StartJobResponse, ClientError> {
        let url = format!("{}/jobs/start", worker.base_url());
        json(self.http.post(&url).json(req).timeout(CONTROL_TIMEOUT)).await
    }

    async fn status(
        &self,
        worker: &WorkerHandle,
        job: JobId,
    ) -> Result<JobStatusResponse, ClientError> {
        let url = format!("{}/jobs/{job}/status", worker.base_url());
        json(self.http.get(&url).timeout(CONTROL_TIMEOUT)).await
    }

    async fn stop(
        &self,
        worker: &WorkerHandle,
        job: JobId,
        reason: Option<String>,
    ) -> Result<StopJobResponse, ClientError> {
        let url = format!("{}/jobs/{job}/stop", worker.base_url());
        let body = StopJobRequest { reason };
        json(self.http.post(&url).json(&body).timeout(CONTROL_TIMEOUT)).await
    }

    async fn logs(
        &self,
        worker: &WorkerHandle,
        job: JobId,
        query: &LogQuery,
    ) -> Result<String, ClientError> {
        let url = format!("{}/jobs/{job}/logs", worker.base_url());
        let resp = checked(self.http.get(&url).query(query).timeout(TRANSFER_TIMEOUT)).await?;
        Ok(resp.text().await?)
    }

    async fn download(&self, worker: &WorkerHandle, job: JobId) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}/jobs/{job}/download", worker.base_url());
        let resp = checked(self.http.get(&url).timeout(TRANSFER_TIMEOUT)).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}
