use crate::error::{Result, TrainerError};

/// Hyperparameters for a training run. Fixed at startup; nothing here
/// changes while the run is in flight.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Width of the input layer (flattened 28x28 image).
    pub input_size: usize,
    /// Width of the single hidden layer.
    pub hidden_size: usize,
    /// Number of output classes.
    pub output_size: usize,
    /// Fixed step size applied to the batch-summed gradient.
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed for both parameter initialization and per-epoch shuffling. Two
    /// runs with the same seed over the same data produce identical loss
    /// traces and final parameters.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> TrainingConfig {
        TrainingConfig {
            input_size: 28 * 28,
            hidden_size: 256,
            output_size: 10,
            learning_rate: 0.001,
            epochs: 10,
            batch_size: 50,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.hidden_size == 0 || self.output_size == 0 {
            return Err(TrainerError::Config(format!(
                "layer sizes must be nonzero (input={}, hidden={}, output={})",
                self.input_size, self.hidden_size, self.output_size
            )));
        }
        if self.batch_size == 0 {
            return Err(TrainerError::Config("batch size must be nonzero".into()));
        }
        Ok(())
    }
}
