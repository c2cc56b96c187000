use criterion::{BenchmarkId, Criterion};
use polytree::{config::Config, model::DecisionTreeModel, protocol::simulate_classification};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tokio::runtime::Runtime;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

const NUM_FEATURES: usize = 8;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .init();

    let mut c = Criterion::default()
        .significance_level(0.1)
        .sample_size(10)
        .configure_from_args();

    classification_benchmark(&mut c);

    c.final_summary();
}

/// Benchmark a 2-party classification for growing tree depths.
fn classification_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut rng = ChaCha20Rng::seed_from_u64(42);
    let config = Config::default();

    let mut g = c.benchmark_group("classify");
    for depth in [2, 4, 6, 8, 10] {
        let model = random_model(&mut rng, depth);
        let features: Vec<i64> = (0..NUM_FEATURES)
            .map(|_| rng.random_range(-1000..1000))
            .collect();
        g.throughput(criterion::Throughput::Elements(
            model.num_internal_nodes() as u64,
        ));
        let (model, features, config) = (&model, &features, &config);
        g.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, _| {
            b.to_async(&rt).iter(|| async move {
                let outputs = simulate_classification(model, features, 2, config)
                    .await
                    .unwrap();
                assert!(outputs.iter().all(Option::is_some));
            })
        });
    }
    g.finish();
}

fn random_model(rng: &mut ChaCha20Rng, depth: usize) -> DecisionTreeModel {
    let indexes = (0..depth - 1)
        .map(|layer| {
            (0..1 << layer)
                .map(|_| rng.random_range(0..NUM_FEATURES))
                .collect()
        })
        .collect();
    let thresholds = (0..depth - 1)
        .map(|layer| {
            (0..1 << layer)
                .map(|_| rng.random_range(-1000..1000))
                .collect()
        })
        .collect();
    let categories = (0..1 << (depth - 1)).map(|_| rng.random_range(0..100)).collect();
    DecisionTreeModel::from_feature_indexes(depth, NUM_FEATURES, indexes, thresholds, categories)
        .unwrap()
}
