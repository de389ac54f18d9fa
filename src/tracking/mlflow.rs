//! MLflow REST client
//!
//! Talks to the 2.0 REST API of a tracking server. Artifacts go through the
//! server's artifact proxy (`mlflow-artifacts`), so the client never needs
//! direct access to the artifact store.

use super::tracker::{check_key, ExperimentTracker, RunInfo, RunStatus, MODEL_ARTIFACT_FILE};
use crate::config::TrackingConfig;
use crate::error::{Result, TrainerError};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

#[derive(Clone)]
enum Auth {
    None,
    Basic { username: String, password: Option<String> },
    Bearer(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Basic { username, .. } => write!(f, "Basic({}:***)", username),
            Auth::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error_code: Option<String>,
}

#[derive(Deserialize)]
struct ExperimentWire {
    experiment_id: String,
}

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentWire,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct RunInfoWire {
    run_id: String,
    experiment_id: String,
    #[serde(default)]
    artifact_uri: Option<String>,
}

#[derive(Deserialize)]
struct RunWire {
    info: RunInfoWire,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunWire,
}

#[derive(Deserialize)]
struct ModelVersionWire {
    version: String,
}

#[derive(Deserialize)]
struct CreateModelVersionResponse {
    model_version: ModelVersionWire,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Append path segments to `base`, percent-encoding each one
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TrainerError::Config(format!("'{}' cannot be used as a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn parse_http(uri: &str) -> Result<Url> {
    let url = Url::parse(uri)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TrainerError::Config(format!(
            "MLflow REST client needs an http(s) URI, got scheme '{}'",
            other
        ))),
    }
}

/// Path of a run's artifact root below the artifact proxy
fn artifact_root(run: &RunInfo) -> String {
    match Url::parse(&run.artifact_uri) {
        Ok(parsed) if parsed.scheme() == "mlflow-artifacts" => {
            parsed.path().trim_matches('/').to_string()
        }
        _ => format!("{}/{}/artifacts", run.experiment_id, run.run_id),
    }
}

/// Client for an MLflow tracking server
#[derive(Debug, Clone)]
pub struct MlflowClient {
    http: Client,
    tracking: Url,
    registry: Url,
    auth: Auth,
    experiment_name: String,
    experiment_id: OnceCell<String>,
}

impl MlflowClient {
    pub fn new(config: &TrackingConfig) -> Result<Self> {
        let tracking = parse_http(&config.tracking_uri)?;
        let registry = match config.registry_uri.as_deref() {
            Some(uri) if config.registry_scheme().starts_with("http") => parse_http(uri)?,
            _ => tracking.clone(),
        };

        let auth = match (&config.token, &config.username) {
            (Some(token), _) => Auth::Bearer(token.clone()),
            (None, Some(username)) => Auth::Basic {
                username: username.clone(),
                password: config.password.clone(),
            },
            (None, None) => Auth::None,
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            tracking,
            registry,
            auth,
            experiment_name: config.experiment_name.clone(),
            experiment_id: OnceCell::new(),
        })
    }

    pub fn tracking_url(&self) -> &Url {
        &self.tracking
    }

    fn api(&self, base: &Url, path: &[&str]) -> Result<Url> {
        let mut segments = vec!["api", "2.0", "mlflow"];
        segments.extend_from_slice(path);
        endpoint(base, &segments)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
            Auth::Bearer(token) => request.bearer_auth(token),
        }
    }

    async fn post(&self, url: Url, body: serde_json::Value) -> Result<Response> {
        debug!(%url, "mlflow request");
        Ok(self.authorize(self.http.post(url)).json(&body).send().await?)
    }

    /// Turn a non-2xx response into a tracking error carrying the body
    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TrainerError::Tracking(format!(
            "{} failed with HTTP {}: {}",
            what,
            status.as_u16(),
            body
        )))
    }

    async fn resolve_experiment(&self) -> Result<String> {
        let url = self.api(&self.tracking, &["experiments", "get-by-name"])?;
        let response = self
            .authorize(self.http.get(url))
            .query(&[("experiment_name", self.experiment_name.as_str())])
            .send()
            .await?;

        if response.status() != StatusCode::NOT_FOUND {
            let found: GetExperimentResponse = Self::check(response, "experiments/get-by-name")
                .await?
                .json()
                .await?;
            return Ok(found.experiment.experiment_id);
        }

        let url = self.api(&self.tracking, &["experiments", "create"])?;
        let response = self.post(url, json!({ "name": self.experiment_name })).await?;
        let created: CreateExperimentResponse = Self::check(response, "experiments/create")
            .await?
            .json()
            .await?;
        debug!(experiment = %self.experiment_name, id = %created.experiment_id, "experiment created");
        Ok(created.experiment_id)
    }

    async fn experiment(&self) -> Result<&str> {
        self.experiment_id
            .get_or_try_init(|| self.resolve_experiment())
            .await
            .map(String::as_str)
    }
}

impl ExperimentTracker for MlflowClient {
    async fn start_run(&self, run_name: Option<&str>) -> Result<RunInfo> {
        let experiment_id = self.experiment().await?.to_string();
        let start_time = now_ms();

        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": start_time,
        });
        if let Some(name) = run_name {
            body["run_name"] = json!(name);
            body["tags"] = json!([{ "key": "mlflow.runName", "value": name }]);
        }

        let url = self.api(&self.tracking, &["runs", "create"])?;
        let response = self.post(url, body).await?;
        let created: CreateRunResponse = Self::check(response, "runs/create").await?.json().await?;
        let info = created.run.info;

        let artifact_uri = info
            .artifact_uri
            .unwrap_or_else(|| format!("mlflow-artifacts:/{}/{}/artifacts", info.experiment_id, info.run_id));

        Ok(RunInfo {
            run_id: info.run_id,
            experiment_id: info.experiment_id,
            run_name: run_name.map(str::to_string),
            artifact_uri,
            start_time,
        })
    }

    async fn log_metric(&self, run: &RunInfo, key: &str, value: f64) -> Result<()> {
        let url = self.api(&self.tracking, &["runs", "log-metric"])?;
        let body = json!({
            "run_id": run.run_id,
            "key": key,
            "value": value,
            "timestamp": now_ms(),
            "step": 0,
        });
        Self::check(self.post(url, body).await?, "runs/log-metric").await?;
        Ok(())
    }

    async fn log_param(&self, run: &RunInfo, key: &str, value: &str) -> Result<()> {
        let url = self.api(&self.tracking, &["runs", "log-parameter"])?;
        let body = json!({ "run_id": run.run_id, "key": key, "value": value });
        Self::check(self.post(url, body).await?, "runs/log-parameter").await?;
        Ok(())
    }

    async fn log_model(&self, run: &RunInfo, artifact_path: &str, bytes: Vec<u8>) -> Result<String> {
        check_key("artifact", artifact_path)?;
        let root = artifact_root(run);

        let mut segments = vec!["api", "2.0", "mlflow-artifacts", "artifacts"];
        segments.extend(root.split('/').filter(|s| !s.is_empty()));
        segments.extend(artifact_path.split('/'));
        segments.push(MODEL_ARTIFACT_FILE);
        let url = endpoint(&self.tracking, &segments)?;

        debug!(%url, bytes = bytes.len(), "uploading artifact");
        let response = self
            .authorize(self.http.put(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        Self::check(response, "artifact upload").await?;

        Ok(format!("{}/{}", run.artifact_uri.trim_end_matches('/'), artifact_path))
    }

    async fn register_model(&self, name: &str, run: &RunInfo, artifact_path: &str) -> Result<String> {
        let url = self.api(&self.registry, &["registered-models", "create"])?;
        let response = self.post(url, json!({ "name": name })).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let code = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.error_code);
            let exists = status == StatusCode::CONFLICT
                || code.as_deref() == Some("RESOURCE_ALREADY_EXISTS");
            if !exists {
                return Err(TrainerError::Tracking(format!(
                    "registered-models/create failed with HTTP {}: {}",
                    status.as_u16(),
                    text
                )));
            }
            debug!(model = name, "registered model already exists");
        }

        let url = self.api(&self.registry, &["model-versions", "create"])?;
        let body = json!({
            "name": name,
            "source": format!("{}/{}", run.artifact_uri.trim_end_matches('/'), artifact_path),
            "run_id": run.run_id,
        });
        let created: CreateModelVersionResponse =
            Self::check(self.post(url, body).await?, "model-versions/create")
                .await?
                .json()
                .await?;
        Ok(created.model_version.version)
    }

    async fn end_run(&self, run: &RunInfo, status: RunStatus) -> Result<()> {
        let url = self.api(&self.tracking, &["runs", "update"])?;
        let body = json!({
            "run_id": run.run_id,
            "status": status.as_str(),
            "end_time": now_ms(),
        });
        Self::check(self.post(url, body).await?, "runs/update").await?;
        Ok(())
    }

    fn supports_registry(&self) -> bool {
        true
    }
}
