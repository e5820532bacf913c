//! Client tests against a live server on a random local port.
//!
//! Run with: cargo test --test client_test

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use helpers::*;
use stegnox::client::{ClientError, JobListView, JobWatcher, JobsClient, Session};
use stegnox::models::job::{JobPriority, JobStatus};
use stegnox::models::method_result::{Method, MethodResult};
use stegnox::services::engine::EncodeMethod;

struct LiveServer {
    app: TestApp,
    base_url: String,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveServer {
    async fn start() -> Self {
        let app = TestApp::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let shutdown = CancellationToken::new();
        let router = app.router.clone();
        let token = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            app,
            base_url,
            shutdown,
            tasks: vec![server],
        }
    }

    fn start_worker(&mut self, id: &str) {
        let worker = self.app.worker(id);
        let token = self.shutdown.clone();
        self.tasks
            .push(tokio::spawn(async move { worker.run_loop(token).await }));
    }

    fn client(&self) -> JobsClient {
        JobsClient::new(Session::new(&self.base_url))
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_watch_job_until_completed() {
    let mut server = LiveServer::start().await;
    server.start_worker("w1");
    let client = server.client();

    let submitted = client
        .submit_job(png(16, 16), "cover.png", Some(JobPriority::High))
        .await
        .unwrap();
    assert_eq!(submitted.status, JobStatus::Pending);
    assert_eq!(submitted.priority, JobPriority::High);

    let watcher = JobWatcher::new(Arc::new(client.clone())).with_interval(Duration::from_millis(20));
    let snapshots: Vec<_> = tokio::time::timeout(
        Duration::from_secs(10),
        watcher.watch(submitted.job_id).collect::<Vec<_>>(),
    )
    .await
    .unwrap();

    let last = snapshots.last().unwrap().as_ref().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.worker_id.as_deref(), Some("w1"));
    assert_eq!(last.results.as_ref().unwrap().len(), 6);
    assert!(snapshots.iter().all(|s| s.is_ok()));
    assert!(!watcher.is_watching(submitted.job_id));

    // the list view takes the server's terminal snapshot
    let mut view = JobListView::new();
    view.replace_all(client.list_jobs(None, None, None).await.unwrap());
    assert_eq!(view.len(), 1);
    assert_eq!(view.active().count(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_cancel_through_client() {
    // no workers: the job stays pending until cancelled
    let server = LiveServer::start().await;
    let client = server.client();

    let submitted = client.submit_job(png(8, 8), "a.png", None).await.unwrap();
    let mut view = JobListView::new();
    view.replace_all(client.list_jobs(Some(JobStatus::Pending), None, None).await.unwrap());
    assert_eq!(view.active().count(), 1);

    let cancelled = client.cancel_job(submitted.job_id).await.unwrap();
    assert!(cancelled.success);
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(view.record_cancel(submitted.job_id, cancelled.success));
    assert_eq!(view.active().count(), 0);

    let again = client.cancel_job(submitted.job_id).await.unwrap();
    assert!(!again.success);

    let job = client.get_job(submitted.job_id).await.unwrap();
    view.reconcile(job);
    assert_eq!(view.get(submitted.job_id).unwrap().status, JobStatus::Cancelled);

    server.stop().await;
}

#[tokio::test]
async fn test_api_errors_carry_status_and_code() {
    let server = LiveServer::start().await;
    let client = server.client();

    let err = client.get_job(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(matches!(err, ClientError::Api { ref code, .. } if code == "NOT_FOUND"));

    let err = client
        .submit_job(b"not an image".to_vec(), "a.txt", None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(415));

    server.stop().await;
}

#[tokio::test]
async fn test_encode_fetch_and_analyze() {
    let server = LiveServer::start().await;
    let client = server.client();
    client.sign_in("test-token").await;
    assert!(client.session().await.is_signed_in());

    let encoded = client
        .encode(png(32, 32), "cover.png", "secret", EncodeMethod::ParityEncoding)
        .await
        .unwrap();
    let stego = client.fetch_image(&encoded.filename).await.unwrap();

    let results = client
        .analyze(stego, "stego.png", &[Method::ParityBitExtraction])
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let parity = results.get("parity_bit_extraction").unwrap();
    assert!(matches!(parity, MethodResult::ParityBitExtraction(_)));
    assert_eq!(parity.message(), Some("secret"));

    client.sign_out().await;
    assert!(!client.session().await.is_signed_in());

    server.stop().await;
}
