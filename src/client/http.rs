use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::client::session::Session;
use crate::models::api::{CancelJobResponse, EncodeResponse, SubmitJobResponse};
use crate::models::job::{Job, JobPriority, JobStatus};
use crate::models::method_result::{Method, ResultSet};
use crate::services::engine::EncodeMethod;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server returned {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

impl ClientError {
    /// HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Anything that can fetch a job snapshot; the watcher polls through this.
#[async_trait]
pub trait JobSource: Send + Sync + 'static {
    async fn fetch_job(&self, job_id: Uuid) -> Result<Job, ClientError>;
}

/// Typed client for the job service HTTP API.
#[derive(Clone)]
pub struct JobsClient {
    http: reqwest::Client,
    session: Arc<RwLock<Session>>,
}

impl JobsClient {
    pub fn new(session: Session) -> Self {
        Self::with_http(reqwest::Client::new(), session)
    }

    pub fn with_http(http: reqwest::Client, session: Session) -> Self {
        Self {
            http,
            session: Arc::new(RwLock::new(session)),
        }
    }

    pub async fn sign_in(&self, token: impl Into<String>) {
        self.session.write().await.sign_in(token);
    }

    pub async fn sign_out(&self) {
        self.session.write().await.sign_out();
    }

    /// Current session snapshot.
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Authorized request for `path`. The session lock is released before
    /// the caller sends it.
    async fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let session = self.session().await;
        session.authorize(self.http.request(method, session.url(path)))
    }

    pub async fn submit_job(
        &self,
        image: Vec<u8>,
        filename: &str,
        priority: Option<JobPriority>,
    ) -> Result<SubmitJobResponse, ClientError> {
        let mut form = Form::new().part("file", Part::bytes(image).file_name(filename.to_string()));
        if let Some(priority) = priority {
            form = form.text("priority", priority.to_string());
        }

        let request = self
            .request(reqwest::Method::POST, "/api/v1/jobs")
            .await
            .multipart(form);
        decode(request.send().await?).await
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Job>, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let request = self
            .request(reqwest::Method::GET, "/api/v1/jobs")
            .await
            .query(&query);
        decode(request.send().await?).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, ClientError> {
        let path = format!("/api/v1/jobs/{job_id}");
        let request = self.request(reqwest::Method::GET, &path).await;
        decode(request.send().await?).await
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> Result<CancelJobResponse, ClientError> {
        let path = format!("/api/v1/jobs/{job_id}");
        let request = self.request(reqwest::Method::DELETE, &path).await;
        decode(request.send().await?).await
    }

    /// Run methods synchronously; an empty slice runs all of them.
    pub async fn analyze(
        &self,
        image: Vec<u8>,
        filename: &str,
        methods: &[Method],
    ) -> Result<ResultSet, ClientError> {
        let methods = if methods.is_empty() {
            "all".to_string()
        } else {
            methods
                .iter()
                .map(|m| m.as_ref())
                .collect::<Vec<_>>()
                .join(",")
        };
        let form = Form::new()
            .part("file", Part::bytes(image).file_name(filename.to_string()))
            .text("methods", methods);

        let request = self
            .request(reqwest::Method::POST, "/api/v1/analysis/analyze")
            .await
            .multipart(form);
        let raw: Map<String, Value> = decode(request.send().await?).await?;
        Ok(ResultSet::from_raw(raw))
    }

    pub async fn encode(
        &self,
        image: Vec<u8>,
        filename: &str,
        message: &str,
        method: EncodeMethod,
    ) -> Result<EncodeResponse, ClientError> {
        let form = Form::new()
            .part("file", Part::bytes(image).file_name(filename.to_string()))
            .text("message", message.to_string())
            .text("method", method.to_string());

        let request = self
            .request(reqwest::Method::POST, "/api/v1/analysis/encode")
            .await
            .multipart(form);
        decode(request.send().await?).await
    }

    /// Download an encoded image by the filename `encode` returned.
    pub async fn fetch_image(&self, filename: &str) -> Result<Vec<u8>, ClientError> {
        let path = format!("/api/v1/analysis/images/{filename}");
        let request = self.request(reqwest::Method::GET, &path).await;
        let response = check(request.send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl JobSource for JobsClient {
    async fn fetch_job(&self, job_id: Uuid) -> Result<Job, ClientError> {
        self.get_job(job_id).await
    }
}

/// Pass successful responses through; turn error bodies into `ClientError::Api`.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await?;
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.code, body.error),
        Err(_) => ("UNKNOWN".to_string(), text),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    Ok(check(response).await?.json().await?)
}
