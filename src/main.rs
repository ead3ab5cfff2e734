use anyhow::Result;
use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
use tracing_subscriber::EnvFilter;

use digit_mlp::config::TrainingConfig;
use digit_mlp::dataset::Dataset;
use digit_mlp::network::{self, Parameters};
use digit_mlp::persist;

const TRAIN_IMAGES: &str = "data/train-images-idx3-ubyte.gz";
const TRAIN_LABELS: &str = "data/train-labels-idx1-ubyte.gz";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("digit_mlp=info")),
        )
        .init();

    let config = TrainingConfig::default();
    config.validate()?;

    let dataset = Dataset::from_idx_files(TRAIN_IMAGES, TRAIN_LABELS, config.output_size)?;
    tracing::info!(examples = dataset.len(), "training data loaded");

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut params = Parameters::init(&config, &mut rng);

    let loss_trace = network::train(&mut params, &dataset, &config, &mut rng)?;
    tracing::info!(steps = loss_trace.len(), "training finished");

    // Accuracy is measured over the data the network trained on: a fit
    // measure, not a generalization estimate.
    let accuracy = network::evaluate(&params, &dataset)?;
    println!("Accuracy: {accuracy}");

    persist::save_parameters(&params, ".")?;
    tracing::info!("parameters written to W1.txt, b1.txt, W2.txt, b2.txt");

    Ok(())
}
