use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use model_trainer::training::{
    Classifier, DecisionTree, GridSearchCV, ParamGrid, RandomForest,
};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn create_classification_data(n_rows: usize, n_features: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let x = Array2::from_shape_fn((n_rows, n_features), |_| rng.gen::<f64>() * 10.0);
    let y = x
        .rows()
        .into_iter()
        .map(|row| if row.sum() + rng.gen::<f64>() > 5.0 * n_features as f64 { 1.0 } else { 0.0 })
        .collect();
    (x, y)
}

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit");
    group.sample_size(10);

    for n_rows in [1000, 5000].iter() {
        let (x, y) = create_classification_data(*n_rows, 10);

        group.bench_with_input(BenchmarkId::new("decision_tree", n_rows), n_rows, |b, _| {
            b.iter(|| {
                let mut model = DecisionTree::new_classifier();
                model.fit(black_box(&x), black_box(&y)).unwrap();
                model
            });
        });

        group.bench_with_input(BenchmarkId::new("random_forest_32", n_rows), n_rows, |b, _| {
            b.iter(|| {
                let mut model = RandomForest::new(32).with_random_state(42);
                model.fit(black_box(&x), black_box(&y)).unwrap();
                model
            });
        });
    }

    group.finish();
}

fn bench_grid_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_search");
    group.sample_size(10);

    let (x, y) = create_classification_data(2000, 10);
    let grid = ParamGrid::new().add("criterion", ["gini", "entropy", "log_loss"]);
    let search = GridSearchCV::with_folds(3);
    let estimator = DecisionTree::new_classifier();

    group.bench_function("decision_tree_criteria", |b| {
        b.iter(|| search.fit(&estimator, &grid, black_box(&x), black_box(&y)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_fit, bench_grid_search);
criterion_main!(benches);
