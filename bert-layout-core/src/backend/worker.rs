//! Backend that talks to an external worker process.
//!
//! Messages are newline-delimited JSON (one object per line) on the
//! worker's stdin/stdout:
//!
//! ```text
//! -> {"id":1,"op":"train_step","params":{"step":0,"learning_rate":0.0,"kl_weight":0.0}}
//! <- {"id":1,"result":{"loss":5.43}}
//! <- {"id":2,"error":"out of memory"}
//! ```
//!
//! One request is in flight at a time. The worker's stderr is inherited so
//! its own logs reach the terminal.

use super::LayoutBackend;
use crate::config::{BackendConfig, ExperimentConfig};
use crate::error::TrainerError;
use crate::types::{
    EvalMetrics, EvalRequest, Objective, SampleOutput, SampleRequest, StepMetrics,
    TrainStepRequest, Topology,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    id: u64,
    op: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    id: u64,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

struct Connection {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    next_id: u64,
    /// Set after a timed-out exchange; a late reply may still be in the pipe.
    desynced: bool,
}

/// [`LayoutBackend`] backed by an NDJSON worker process.
pub struct WorkerBackend {
    conn: Mutex<Connection>,
    timeout: Duration,
    // Held so the worker is killed when the backend is dropped.
    _child: Option<Child>,
}

impl std::fmt::Debug for WorkerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerBackend")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WorkerBackend {
    /// Spawn the worker described by `config`, adding `extra_env` on top of
    /// the configured environment.
    pub fn spawn(
        config: &BackendConfig,
        extra_env: &HashMap<String, String>,
    ) -> Result<Self, TrainerError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .envs(extra_env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TrainerError::backend(format!("Failed to spawn {}: {e}", config.command))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TrainerError::backend("Failed to capture worker stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainerError::backend("Failed to capture worker stdout"))?;

        info!(command = %config.command, pid = ?child.id(), "Spawned backend worker");

        let mut backend = Self::from_streams(
            stdin,
            stdout,
            Duration::from_secs(config.request_timeout_secs),
        );
        backend._child = Some(child);
        Ok(backend)
    }

    /// Build a backend over arbitrary streams (used for in-process workers).
    pub fn from_streams<W, R>(writer: W, reader: R, timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            conn: Mutex::new(Connection {
                writer: Box::new(writer),
                reader: BufReader::new(reader),
                next_id: 1,
                desynced: false,
            }),
            timeout,
            _child: None,
        }
    }

    async fn call<P, T>(&self, op: &str, params: P) -> Result<T, TrainerError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let mut conn = self.conn.lock().await;
        if conn.desynced {
            return Err(TrainerError::backend(format!(
                "Worker connection is unusable after an earlier timeout; cannot send '{op}'"
            )));
        }
        let id = conn.next_id;
        conn.next_id += 1;

        let mut line = serde_json::to_string(&WorkerRequest {
            id,
            op,
            params: serde_json::to_value(params)?,
        })?;
        line.push('\n');
        debug!(id, op, "Sending worker request");

        let exchange = async {
            conn.writer.write_all(line.as_bytes()).await?;
            conn.writer.flush().await?;

            let mut response = String::new();
            let bytes_read = conn.reader.read_line(&mut response).await?;
            Ok::<_, TrainerError>((bytes_read, response))
        };

        let outcome = tokio::time::timeout(self.timeout, exchange).await;
        let (bytes_read, response) = match outcome {
            Ok(result) => result?,
            Err(_) => {
                conn.desynced = true;
                return Err(TrainerError::backend(format!(
                    "Worker did not answer '{op}' within {:?}",
                    self.timeout
                )));
            }
        };

        if bytes_read == 0 {
            return Err(TrainerError::backend(format!(
                "Worker closed its output before answering '{op}'"
            )));
        }

        let response: WorkerResponse = serde_json::from_str(response.trim_end())
            .map_err(|e| TrainerError::backend(format!("Malformed worker response: {e}")))?;
        if response.id != id {
            return Err(TrainerError::backend(format!(
                "Worker answered request {} while {id} was pending",
                response.id
            )));
        }
        if let Some(error) = response.error {
            return Err(TrainerError::backend(format!("{op} failed: {error}")));
        }
        serde_json::from_value(response.result)
            .map_err(|e| TrainerError::backend(format!("Unexpected result for '{op}': {e}")))
    }
}

#[async_trait]
impl LayoutBackend for WorkerBackend {
    async fn restrict_input_pipeline_devices(&self) -> Result<(), TrainerError> {
        self.call("restrict_input_pipeline_devices", serde_json::json!({}))
            .await
    }

    async fn topology(&self) -> Result<Topology, TrainerError> {
        self.call("topology", serde_json::json!({})).await
    }

    async fn initialize(
        &self,
        config: &ExperimentConfig,
        objective: Objective,
    ) -> Result<(), TrainerError> {
        self.call(
            "initialize",
            serde_json::json!({ "config": config, "objective": objective }),
        )
        .await
    }

    async fn train_step(&self, request: TrainStepRequest) -> Result<StepMetrics, TrainerError> {
        self.call("train_step", request).await
    }

    async fn evaluate(&self, request: EvalRequest) -> Result<EvalMetrics, TrainerError> {
        self.call("evaluate", request).await
    }

    async fn save_checkpoint(&self, path: &Path, step: u64) -> Result<(), TrainerError> {
        self.call(
            "save_checkpoint",
            serde_json::json!({ "path": path, "step": step }),
        )
        .await
    }

    async fn restore_checkpoint(&self, path: &Path) -> Result<u64, TrainerError> {
        #[derive(Deserialize)]
        struct Restored {
            step: u64,
        }
        let restored: Restored = self
            .call("restore_checkpoint", serde_json::json!({ "path": path }))
            .await?;
        Ok(restored.step)
    }

    async fn sample(&self, request: &SampleRequest) -> Result<SampleOutput, TrainerError> {
        self.call("sample", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Conditioning;
    use tokio::io::{DuplexStream, duplex};

    /// Run a fake worker that answers each request with `respond(op, params)`.
    fn fake_worker<F>(respond: F) -> WorkerBackend
    where
        F: Fn(u64, &str, &serde_json::Value) -> serde_json::Value + Send + 'static,
    {
        let (client_out, worker_in) = duplex(64 * 1024);
        let (worker_out, client_in) = duplex(64 * 1024);
        tokio::spawn(serve(worker_in, worker_out, respond));
        WorkerBackend::from_streams(client_out, client_in, Duration::from_secs(5))
    }

    async fn serve<F>(input: DuplexStream, mut output: DuplexStream, respond: F)
    where
        F: Fn(u64, &str, &serde_json::Value) -> serde_json::Value,
    {
        let mut lines = BufReader::new(input).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: serde_json::Value = serde_json::from_str(&line).unwrap();
            let id = request["id"].as_u64().unwrap();
            let op = request["op"].as_str().unwrap().to_string();
            let reply = respond(id, &op, &request["params"]);
            let mut text = reply.to_string();
            text.push('\n');
            if output.write_all(text.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_train_step_roundtrip() {
        let backend = fake_worker(|id, op, params| {
            assert_eq!(op, "train_step");
            let step = params["step"].as_u64().unwrap();
            serde_json::json!({ "id": id, "result": { "loss": 1.0 / (step as f64 + 1.0) } })
        });

        let metrics = backend
            .train_step(TrainStepRequest {
                step: 3,
                learning_rate: 1e-3,
                kl_weight: 0.5,
            })
            .await
            .unwrap();
        assert!((metrics.loss - 0.25).abs() < 1e-12);
        assert!(metrics.kl.is_none());
    }

    #[tokio::test]
    async fn test_timeout_makes_connection_unusable() {
        // The worker end stays open but never answers.
        let (client_out, _worker_in) = duplex(1024);
        let (_worker_out, client_in) = duplex(1024);
        let backend =
            WorkerBackend::from_streams(client_out, client_in, Duration::from_millis(50));

        let err = backend.topology().await.unwrap_err();
        assert!(err.to_string().contains("did not answer 'topology'"));

        let err = backend.restrict_input_pipeline_devices().await.unwrap_err();
        assert!(err.to_string().contains("unusable after an earlier timeout"));
    }

    #[tokio::test]
    async fn test_unit_result_accepts_missing_result() {
        let backend = fake_worker(|id, _, _| serde_json::json!({ "id": id }));
        backend.restrict_input_pipeline_devices().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_error_is_backend_error() {
        let backend =
            fake_worker(|id, _, _| serde_json::json!({ "id": id, "error": "out of memory" }));
        let err = backend
            .evaluate(EvalRequest {
                step: 0,
                num_steps: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TrainerError::Backend { ref message } if message.contains("out of memory")));
    }

    #[tokio::test]
    async fn test_mismatched_id_rejected() {
        let backend = fake_worker(|id, _, _| serde_json::json!({ "id": id + 10, "result": {} }));
        let err = backend.topology().await.unwrap_err();
        assert!(err.to_string().contains("while 1 was pending"));
    }

    #[tokio::test]
    async fn test_ids_increase_per_request() {
        let backend = fake_worker(|id, _, _| {
            serde_json::json!({ "id": id, "result": { "step": id * 100 } })
        });
        let first = backend.restore_checkpoint(Path::new("a")).await.unwrap();
        let second = backend.restore_checkpoint(Path::new("b")).await.unwrap();
        assert_eq!((first, second), (100, 200));
    }

    #[tokio::test]
    async fn test_sample_passes_schedule() {
        let backend = fake_worker(|id, op, params| {
            assert_eq!(op, "sample");
            assert_eq!(params["conditional"], "a+s");
            assert_eq!(params["iterative_nums"], serde_json::json!([22, 22, 22]));
            serde_json::json!({
                "id": id,
                "result": { "generated": [[[1], [2]]], "real": [[3]], "image_link": "img/5.png" }
            })
        });
        let output = backend
            .sample(&SampleRequest {
                conditional: Conditioning::AttributeSize,
                iterative_nums: vec![22, 22, 22],
                idx: 5,
            })
            .await
            .unwrap();
        assert_eq!(output.generated[0].len(), 2);
        assert_eq!(output.image_link.as_deref(), Some("img/5.png"));
    }

    #[tokio::test]
    async fn test_closed_worker_output() {
        let (client_out, _worker_in) = duplex(1024);
        let (worker_out, client_in) = duplex(1024);
        drop(worker_out);
        let backend = WorkerBackend::from_streams(client_out, client_in, Duration::from_secs(5));
        let err = backend.topology().await.unwrap_err();
        assert!(err.to_string().contains("closed its output"));
    }

    #[tokio::test]
    async fn test_spawn_missing_command() {
        let config = BackendConfig {
            command: "/nonexistent/bert-layout-worker".into(),
            ..BackendConfig::default()
        };
        let err = WorkerBackend::spawn(&config, &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
