use std::{fs, num::NonZeroUsize, path::PathBuf};

use accumulator::{
    Reduction,
    optimization::{Adam, GradientDescent},
};
use ndarray::{arr1, arr2};
use rand::{SeedableRng, rngs::StdRng};
use trainer::{Dataset, OptimizerConfig, Trainer, TrainingConfig, model::Linear};

fn checkpoint_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}-{}.json", std::process::id()))
}

fn config(replicas: usize, accum_steps: usize, epochs: usize) -> TrainingConfig {
    TrainingConfig {
        replicas: NonZeroUsize::new(replicas).unwrap(),
        accum_steps,
        epochs: NonZeroUsize::new(epochs).unwrap(),
        batch_size: NonZeroUsize::new(8).unwrap(),
        seed: Some(5),
        accumulation: Reduction::Sum,
        cross_replica: Reduction::Mean,
        ..TrainingConfig::default()
    }
}

fn datasets(seed: u64) -> (Dataset, Dataset) {
    let mut rng = StdRng::seed_from_u64(seed);
    let weights = arr2(&[[1.0, -1.0], [0.5, 2.0], [-1.5, 0.0]]);
    let bias = arr1(&[0.2, -0.1]);

    let train = Dataset::linear(&mut rng, 256, weights.view(), bias.view(), 0.).unwrap();
    let test = Dataset::linear(&mut rng, 64, weights.view(), bias.view(), 0.).unwrap();
    (train, test)
}

#[tokio::test(flavor = "multi_thread")]
async fn mirrored_training_reduces_the_loss() {
    let (train, test) = datasets(1);
    let model = Linear::new(3, 2);
    let mut trainer =
        Trainer::new(model, GradientDescent::new(0.05), &config(2, 2, 20)).unwrap();

    let before = trainer.evaluate(&test).unwrap();
    let history = trainer.fit(&train, Some(&test)).await.unwrap();
    let after = trainer.evaluate(&test).unwrap();

    assert_eq!(history.len(), 20);
    assert_eq!(history.last().unwrap().val_loss, Some(after));
    assert!(after < before / 2., "loss went from {before} to {after}");
}

#[tokio::test(flavor = "multi_thread")]
async fn save_load_evaluate_reproduces_the_loss() {
    let (train, test) = datasets(2);
    let path = checkpoint_path("save-load-evaluate");
    let config = config(2, 10, 3);

    let model = Linear::new(3, 2);
    let mut trainer = Trainer::new(model, GradientDescent::new(1e-2), &config).unwrap();
    trainer.fit(&train, Some(&test)).await.unwrap();
    trainer.save(&path).unwrap();
    let expected = trainer.evaluate(&test).unwrap();
    let params = trainer.params().clone();
    drop(trainer);

    let reloaded = Trainer::<Linear, GradientDescent>::load(&path, model, &config).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(reloaded.params(), &params);
    assert_eq!(reloaded.evaluate(&test).unwrap(), expected);
    assert_eq!(reloaded.epochs_run(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn resuming_mid_window_matches_an_uninterrupted_run() {
    let (train, _) = datasets(3);
    let path = checkpoint_path("resume-mid-window");
    let model = Linear::new(3, 2);

    let mut uninterrupted = Trainer::new(model, Adam::new(0.01, 0.9, 0.999, 1e-8), &config(2, 5, 2))
        .unwrap();
    uninterrupted.fit(&train, None).await.unwrap();

    let halfway = config(2, 5, 1);
    let mut first = Trainer::new(model, Adam::new(0.01, 0.9, 0.999, 1e-8), &halfway).unwrap();
    first.fit(&train, None).await.unwrap();

    // 128 rows per replica make 16 steps per epoch, leaving the window open
    assert_eq!(first.accumulator().pending(), 1);
    first.save(&path).unwrap();
    drop(first);

    let mut resumed = Trainer::<Linear, Adam>::load(&path, model, &halfway).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(resumed.accumulator().pending(), 1);
    resumed.fit(&train, None).await.unwrap();

    assert_eq!(resumed.accumulator().iterations(), 32);
    assert_eq!(
        resumed.accumulator().pending(),
        uninterrupted.accumulator().pending()
    );
    assert_eq!(resumed.params(), uninterrupted.params());
    assert_eq!(*resumed.optimizer().lock(), *uninterrupted.optimizer().lock());
}

#[tokio::test(flavor = "multi_thread")]
async fn single_and_mirrored_runs_agree_on_the_step_count() {
    let (train, _) = datasets(4);
    let model = Linear::new(3, 2);

    let mut single = Trainer::new(model, GradientDescent::new(0.01), &config(1, 4, 1)).unwrap();
    let mut mirrored = Trainer::new(model, GradientDescent::new(0.01), &config(4, 4, 1)).unwrap();

    single.fit(&train, None).await.unwrap();
    mirrored.fit(&train, None).await.unwrap();

    // every replica steps once per batch of its own shard
    assert_eq!(single.accumulator().iterations(), 32);
    assert_eq!(mirrored.accumulator().iterations(), 8);
}

#[test]
fn config_file_is_parsed_and_validated() {
    let path = checkpoint_path("training-config");
    fs::write(
        &path,
        r#"{
            "replicas": 4,
            "accum_steps": 10,
            "epochs": 3,
            "batch_size": 32,
            "cross_replica": "sum",
            "missing_gradients": "zero",
            "optimizer": {
                "adam": { "learning_rate": 0.001, "beta1": 0.9, "beta2": 0.999, "epsilon": 1e-8 }
            },
            "checkpoint": "/tmp/model.json"
        }"#,
    )
    .unwrap();

    let config = TrainingConfig::from_json_file(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(config.replicas.get(), 4);
    assert_eq!(config.cross_replica, Reduction::Sum);
    assert!(matches!(config.optimizer, OptimizerConfig::Adam { .. }));
    assert_eq!(config.seed, None);
}
