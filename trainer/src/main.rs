use std::{env, io};

use accumulator::{
    Optimizer,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum},
};
use log::info;
use ndarray::{arr1, arr2};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Serialize, de::DeserializeOwned};

use trainer::{
    Dataset, FromOptimizerConfig, OptimizerConfig, Trainer, TrainingConfig, model::Linear,
};

const TRAIN_SAMPLES: usize = 1024;
const TEST_SAMPLES: usize = 256;
const NOISE: f32 = 0.05;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => {
            info!("loading configuration from {path}");
            TrainingConfig::from_json_file(&path)?
        }
        None => TrainingConfig::default(),
    };

    match config.optimizer {
        OptimizerConfig::GradientDescent { .. } => run::<GradientDescent>(config).await?,
        OptimizerConfig::GradientDescentWithMomentum { .. } => {
            run::<GradientDescentWithMomentum>(config).await?
        }
        OptimizerConfig::Adam { .. } => run::<Adam>(config).await?,
    }

    Ok(())
}

async fn run<O>(config: TrainingConfig) -> trainer::Result<()>
where
    O: FromOptimizerConfig + Optimizer + Clone + Send + Serialize + DeserializeOwned + 'static,
{
    let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or_default());
    let weights = arr2(&[[1.5, -0.5], [-2.0, 1.0], [0.5, 0.25]]);
    let bias = arr1(&[0.1, -0.3]);

    let train = Dataset::linear(&mut rng, TRAIN_SAMPLES, weights.view(), bias.view(), NOISE)?;
    let test = Dataset::linear(&mut rng, TEST_SAMPLES, weights.view(), bias.view(), NOISE)?;
    let model = Linear::new(train.inputs(), train.outputs());

    info!(
        replicas = config.replicas.get(),
        accum_steps = config.accum_steps,
        batch_size = config.batch_size.get();
        "training on {} samples", train.len()
    );

    let mut trainer = Trainer::<Linear, O>::from_config(model, &config)?;
    trainer.fit(&train, Some(&test)).await?;
    trainer.save(&config.checkpoint)?;
    drop(trainer);

    let trainer = Trainer::<Linear, O>::load(&config.checkpoint, model, &config)?;
    let loss = trainer.evaluate(&test)?;

    info!(epochs = trainer.epochs_run(); "evaluated the reloaded model");
    println!("test loss: {loss:.6}");
    Ok(())
}
