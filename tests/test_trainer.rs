//! Integration test: model training stage end-to-end on a local tracking store

use model_trainer::config::ModelTrainerConfig;
use model_trainer::entity::DataTransformationArtifact;
use model_trainer::error::TrainerError;
use model_trainer::export::{load_object, save_object, ModelBundle};
use model_trainer::pipeline::ModelTrainer;
use model_trainer::preprocessing::Preprocessor;
use model_trainer::tracking::LocalTracker;
use model_trainer::training::{
    evaluate_models, AdaBoostClassifier, Candidate, Classifier, DecisionTree, Estimator,
    GradientBoostingClassifier, GridSearchCV, LogisticRegression, ParamGrid, RandomForest,
};
use model_trainer::utils::{save_numpy_array, split_features_target};
use ndarray::Array2;
use std::path::Path;

/// Rows of `[x0, noise, label]`; the label flips halfway along x0
fn dataset(n: usize, offset: f64) -> Array2<f64> {
    Array2::from_shape_fn((n, 3), |(i, j)| match j {
        0 => (i as f64 + offset) / n as f64,
        1 => ((i * 37) % 17) as f64 / 17.0,
        _ => {
            if i >= n / 2 {
                1.0
            } else {
                0.0
            }
        }
    })
}

fn small_candidates() -> Vec<Candidate> {
    vec![
        Candidate::new(
            "Decision Tree",
            Estimator::DecisionTree(DecisionTree::new_classifier().with_random_state(42)),
            ParamGrid::new().add("criterion", ["gini", "entropy", "log_loss"]),
        ),
        Candidate::new(
            "Logistic Regression",
            Estimator::LogisticRegression(LogisticRegression::new()),
            ParamGrid::new(),
        ),
    ]
}

struct Workspace {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    artifact: DataTransformationArtifact,
}

fn workspace(train: &Array2<f64>, test: &Array2<f64>) -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let artifact = DataTransformationArtifact::new(
        root.join("data_transformation/transformed_object/preprocessing.bin"),
        root.join("data_transformation/transformed/train.npy"),
        root.join("data_transformation/transformed/test.npy"),
    );
    save_numpy_array(&artifact.transformed_train_file_path, train).unwrap();
    save_numpy_array(&artifact.transformed_test_file_path, test).unwrap();
    save_object(&artifact.transformed_object_file_path, &Preprocessor::Identity).unwrap();
    Workspace {
        _dir: dir,
        root,
        artifact,
    }
}

fn trainer(ws: &Workspace) -> ModelTrainer<LocalTracker> {
    let config = ModelTrainerConfig::from_artifact_dir(ws.root.join("artifacts"))
        .with_final_model_file_path(ws.root.join("final_model/model.bin"));
    ModelTrainer::new(
        config,
        ws.artifact.clone(),
        LocalTracker::new(ws.root.join("mlruns"), "Default"),
    )
    .with_candidates(small_candidates())
}

fn run_dirs(experiment_dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(experiment_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect()
}

#[tokio::test]
async fn test_initiate_model_trainer_end_to_end() {
    let ws = workspace(&dataset(60, 0.0), &dataset(40, 0.25));
    let trainer = trainer(&ws);

    let artifact = trainer.initiate_model_trainer().await.unwrap();

    assert_eq!(artifact.trained_model_file_path, trainer.config().trained_model_file_path);
    assert!(artifact
        .trained_model_file_path
        .ends_with("artifacts/model_trainer/trained_model/model.bin"));
    assert!(artifact.test_metric_artifact.f1_score > 0.9);
    assert!(artifact.train_metric_artifact.f1_score > 0.9);

    let bundle: ModelBundle = load_object(&artifact.trained_model_file_path).unwrap();
    assert_eq!(bundle.metadata.model_name, "Decision Tree");
    assert_eq!(bundle.metadata.test_metrics, artifact.test_metric_artifact);
    assert_eq!(bundle.preprocessor.name(), "identity");

    let (x_test, y_test) = split_features_target(&dataset(40, 0.25)).unwrap();
    assert_eq!(bundle.predict(&x_test).unwrap(), y_test);

    let final_model: Estimator = load_object(ws.root.join("final_model/model.bin")).unwrap();
    assert_eq!(final_model.name(), "Decision Tree");
    assert_eq!(final_model.predict(&x_test).unwrap(), y_test);

    // one run for the train metrics, one for the test metrics
    let runs = run_dirs(&ws.root.join("mlruns/0"));
    assert_eq!(runs.len(), 2);
    for run in runs {
        let meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(run.join("meta.json")).unwrap()).unwrap();
        assert_eq!(meta["status"], "FINISHED");
        for metric in ["f1_score", "precision", "recall_score"] {
            assert!(run.join("metrics").join(metric).exists());
        }
        assert!(run.join("params/criterion").exists());
        assert!(run.join("artifacts/model/model.bin").exists());
    }
}

#[tokio::test]
async fn test_report_json_round_trips() {
    let ws = workspace(&dataset(30, 0.0), &dataset(20, 0.25));
    let artifact = trainer(&ws).initiate_model_trainer().await.unwrap();

    let json = serde_json::to_string(&artifact).unwrap();
    let parsed: model_trainer::entity::ModelTrainerArtifact = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, artifact);
}

#[tokio::test]
async fn test_target_only_array_rejected() {
    let ws = workspace(&Array2::zeros((10, 1)), &Array2::zeros((10, 1)));
    let err = trainer(&ws).initiate_model_trainer().await.unwrap_err();

    assert_eq!(err.stage(), "model_trainer");
    assert!(matches!(err.cause(), TrainerError::Validation(_)));
    assert!(err.to_string().starts_with("Error in stage [model_trainer] at "));
}

#[tokio::test]
async fn test_feature_count_mismatch_rejected() {
    let test = Array2::from_shape_fn((10, 2), |(i, j)| if j == 1 { (i % 2) as f64 } else { i as f64 });
    let ws = workspace(&dataset(30, 0.0), &test);
    let err = trainer(&ws).initiate_model_trainer().await.unwrap_err();
    assert!(matches!(err.cause(), TrainerError::Shape { .. }));
}

#[tokio::test]
async fn test_too_few_rows_for_folds() {
    let ws = workspace(&dataset(2, 0.0), &dataset(2, 0.25));
    let err = trainer(&ws).initiate_model_trainer().await.unwrap_err();
    assert!(matches!(err.cause(), TrainerError::Validation(_)));
}

#[test]
fn test_every_candidate_kind_trains() {
    let (x_train, y_train) = split_features_target(&dataset(48, 0.0)).unwrap();
    let (x_test, y_test) = split_features_target(&dataset(24, 0.25)).unwrap();

    let candidates = vec![
        Candidate::new(
            "Decision Tree",
            Estimator::DecisionTree(DecisionTree::new_classifier()),
            ParamGrid::new().add("criterion", ["gini"]),
        ),
        Candidate::new(
            "Random Forest",
            Estimator::RandomForest(RandomForest::default().with_random_state(42)),
            ParamGrid::new().add("n_estimators", [8usize]),
        ),
        Candidate::new(
            "Gradient Boosting",
            Estimator::GradientBoosting(GradientBoostingClassifier::default()),
            ParamGrid::new()
                .add("n_estimators", [8usize])
                .add("subsample", [0.75]),
        ),
        Candidate::new(
            "Logistic Regression",
            Estimator::LogisticRegression(LogisticRegression::new()),
            ParamGrid::new(),
        ),
        Candidate::new(
            "AdaBoost",
            Estimator::AdaBoost(AdaBoostClassifier::default()),
            ParamGrid::new().add("n_estimators", [8usize]),
        ),
    ];

    let report = evaluate_models(
        &x_train,
        &y_train,
        &x_test,
        &y_test,
        &candidates,
        &GridSearchCV::with_folds(3),
    )
    .unwrap();

    assert_eq!(report.models.len(), 5);
    for model in &report.models {
        assert!(model.test_score.is_finite(), "{} produced {}", model.name, model.test_score);
        assert!((0.0..=1.0).contains(&model.cv_score));
    }
    assert_eq!(report.best().unwrap().test_score, 1.0);
}
