//! Integration test: MLflow REST client against a mock tracking server

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use model_trainer::config::{ModelTrainerConfig, TrackingConfig};
use model_trainer::entity::{ClassificationMetricArtifact, DataTransformationArtifact};
use model_trainer::error::TrainerError;
use model_trainer::pipeline::ModelTrainer;
use model_trainer::tracking::{ExperimentTracker, MlflowClient, RunStatus};
use model_trainer::training::{Classifier, DecisionTree, Estimator, EvaluatedModel};
use ndarray::array;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    auth: Option<String>,
    body: Vec<u8>,
}

impl Recorded {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Clone, Default)]
struct MockServer {
    requests: Arc<Mutex<Vec<Recorded>>>,
    experiment_exists: Arc<Mutex<bool>>,
    fail_metrics: bool,
}

impl MockServer {
    fn paths(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.path.clone()).collect()
    }

    fn find(&self, suffix: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path.ends_with(suffix))
            .cloned()
            .collect()
    }
}

async fn handle(
    State(mock): State<MockServer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    mock.requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        auth: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    });

    if path.starts_with("/api/2.0/mlflow-artifacts/artifacts/") {
        return (StatusCode::OK, Json(json!({}))).into_response();
    }

    match path.trim_start_matches("/api/2.0/mlflow/") {
        "experiments/get-by-name" => {
            if *mock.experiment_exists.lock().unwrap() {
                Json(json!({ "experiment": { "experiment_id": "5", "name": "phishing" } })).into_response()
            } else {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error_code": "RESOURCE_DOES_NOT_EXIST", "message": "no such experiment" })),
                )
                    .into_response()
            }
        }
        "experiments/create" => {
            *mock.experiment_exists.lock().unwrap() = true;
            Json(json!({ "experiment_id": "5" })).into_response()
        }
        "runs/create" => Json(json!({
            "run": { "info": {
                "run_id": "r1",
                "experiment_id": "5",
                "artifact_uri": "mlflow-artifacts:/5/r1/artifacts",
                "status": "RUNNING"
            } }
        }))
        .into_response(),
        "runs/log-metric" if mock.fail_metrics => {
            (StatusCode::INTERNAL_SERVER_ERROR, "metric store down").into_response()
        }
        "runs/log-metric" | "runs/log-parameter" | "runs/update" => Json(json!({})).into_response(),
        "registered-models/create" => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error_code": "RESOURCE_ALREADY_EXISTS", "message": "exists" })),
        )
            .into_response(),
        "model-versions/create" => Json(json!({ "model_version": { "version": "3" } })).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_mock(mock: MockServer) -> String {
    let app = Router::new().fallback(handle).with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn tracking_config(uri: String) -> TrackingConfig {
    TrackingConfig {
        tracking_uri: uri,
        ..Default::default()
    }
    .with_experiment_name("phishing")
    .with_basic_auth("alice", "s3cret")
}

#[tokio::test]
async fn test_full_run_against_mock_server() {
    let mock = MockServer::default();
    let uri = spawn_mock(mock.clone()).await;
    let client = MlflowClient::new(&tracking_config(uri)).unwrap();

    let run = client.start_run(Some("train")).await.unwrap();
    assert_eq!(run.run_id, "r1");
    assert_eq!(run.experiment_id, "5");

    client.log_metric(&run, "f1_score", 0.91).await.unwrap();
    client.log_param(&run, "criterion", "gini").await.unwrap();
    let model_uri = client.log_model(&run, "model", vec![7u8; 16]).await.unwrap();
    assert_eq!(model_uri, "mlflow-artifacts:/5/r1/artifacts/model");
    let version = client.register_model("Best_Classification_Model", &run, "model").await.unwrap();
    assert_eq!(version, "3");
    client.end_run(&run, RunStatus::Finished).await.unwrap();

    assert_eq!(
        mock.paths(),
        [
            "/api/2.0/mlflow/experiments/get-by-name",
            "/api/2.0/mlflow/experiments/create",
            "/api/2.0/mlflow/runs/create",
            "/api/2.0/mlflow/runs/log-metric",
            "/api/2.0/mlflow/runs/log-parameter",
            "/api/2.0/mlflow-artifacts/artifacts/5/r1/artifacts/model/model.bin",
            "/api/2.0/mlflow/registered-models/create",
            "/api/2.0/mlflow/model-versions/create",
            "/api/2.0/mlflow/runs/update",
        ]
    );

    let requests = mock.requests.lock().unwrap().clone();
    assert!(requests
        .iter()
        .all(|r| r.auth.as_deref().is_some_and(|a| a.starts_with("Basic "))));

    let upload = &requests[5];
    assert_eq!(upload.method, Method::PUT);
    assert_eq!(upload.body, vec![7u8; 16]);

    let run_create = requests[2].json();
    assert_eq!(run_create["experiment_id"], "5");
    assert_eq!(run_create["run_name"], "train");

    let metric = requests[3].json();
    assert_eq!(metric["key"], "f1_score");
    assert_eq!(metric["value"], 0.91);

    let version_create = requests[7].json();
    assert_eq!(version_create["source"], "mlflow-artifacts:/5/r1/artifacts/model");
    assert_eq!(version_create["run_id"], "r1");

    assert_eq!(requests[8].json()["status"], "FINISHED");
}

#[tokio::test]
async fn test_experiment_resolved_once() {
    let mock = MockServer::default();
    let uri = spawn_mock(mock.clone()).await;
    let client = MlflowClient::new(&tracking_config(uri)).unwrap();

    client.start_run(None).await.unwrap();
    client.start_run(None).await.unwrap();

    assert_eq!(mock.find("experiments/get-by-name").len(), 1);
    assert_eq!(mock.find("experiments/create").len(), 1);
    assert_eq!(mock.find("runs/create").len(), 2);
}

#[tokio::test]
async fn test_server_error_carries_status_and_body() {
    let mock = MockServer {
        fail_metrics: true,
        ..Default::default()
    };
    let uri = spawn_mock(mock.clone()).await;
    let client = MlflowClient::new(&tracking_config(uri)).unwrap();

    let run = client.start_run(None).await.unwrap();
    match client.log_metric(&run, "f1_score", 1.0).await.unwrap_err() {
        TrainerError::Tracking(msg) => {
            assert!(msg.contains("500"));
            assert!(msg.contains("metric store down"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_failed_logging_marks_run_failed() {
    let mock = MockServer {
        fail_metrics: true,
        ..Default::default()
    };
    let uri = spawn_mock(mock.clone()).await;
    let dir = tempfile::tempdir().unwrap();

    let trainer = ModelTrainer::new(
        ModelTrainerConfig::from_artifact_dir(dir.path()),
        DataTransformationArtifact::new("p.bin", "train.npy", "test.npy"),
        MlflowClient::new(&tracking_config(uri)).unwrap(),
    );

    let x = array![[0.0], [1.0], [2.0], [3.0]];
    let y = array![0.0, 0.0, 1.0, 1.0];
    let mut model = Estimator::DecisionTree(DecisionTree::new_classifier());
    model.fit(&x, &y).unwrap();
    let evaluated = EvaluatedModel {
        name: "Decision Tree".into(),
        best_params: model.params(),
        model,
        cv_score: 1.0,
        test_score: 1.0,
        training_time_secs: 0.0,
    };

    let err = trainer
        .track_experiment(&evaluated, &ClassificationMetricArtifact::default(), "test")
        .await
        .unwrap_err();
    assert_eq!(err.stage(), "model_trainer");
    assert!(matches!(err.cause(), TrainerError::Tracking(_)));

    let updates = mock.find("runs/update");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].json()["status"], "FAILED");
    assert!(mock.find("model-versions/create").is_empty());
}
