use ndarray::{Array, Array1, Array2, ArrayView1, Axis};
use ndarray_rand::{
    RandomExt,
    rand::{Rng, seq::SliceRandom},
    rand_distr::Uniform,
};

use crate::config::TrainingConfig;
use crate::dataset::Dataset;
use crate::error::{Result, TrainerError};
use crate::ops;

/// The learnable state of the network: one weight matrix and one bias row
/// per layer. Shapes are fixed when the struct is built and never change;
/// the only writer is [`Parameters::apply_gradients`], once per mini-batch.
pub struct Parameters {
    /// (input x hidden)
    pub w1: Array2<f64>,
    /// (1 x hidden), broadcast across the batch dimension.
    pub b1: Array2<f64>,
    /// (hidden x output)
    pub w2: Array2<f64>,
    /// (1 x output)
    pub b2: Array2<f64>,
}

/// Intermediate values produced by one forward pass and consumed by the
/// paired backward call. Holding on to these (instead of recomputing them)
/// guarantees the backward pass differentiates the exact forward values.
pub struct ActivationCache {
    /// Pre-activation of the hidden layer, X.W1 + b1.
    pub pre_hidden: Array2<f64>,
    /// relu(pre_hidden).
    pub hidden: Array2<f64>,
    /// Pre-activation of the output layer, hidden.W2 + b2.
    pub pre_output: Array2<f64>,
    /// Row-wise softmax of `pre_output`; one probability distribution per
    /// batch row.
    pub output: Array2<f64>,
}

/// Gradients of the batch-summed loss with respect to each parameter
/// tensor. Same shapes as [`Parameters`].
pub struct Gradients {
    pub w1: Array2<f64>,
    pub b1: Array2<f64>,
    pub w2: Array2<f64>,
    pub b2: Array2<f64>,
}

impl Parameters {
    /// Draws every tensor i.i.d. uniform in [0,1), recenters to [-1,1), and
    /// scales by sqrt(1/fan_in), where fan_in is the width of the preceding
    /// layer. The draw order (w1, b1, w2, b2) is part of the deterministic
    /// replay contract, so don't reorder it.
    pub fn init<R: Rng + ?Sized>(config: &TrainingConfig, rng: &mut R) -> Parameters {
        let w1 = scaled_uniform((config.input_size, config.hidden_size), config.input_size, rng);
        let b1 = scaled_uniform((1, config.hidden_size), config.input_size, rng);
        let w2 = scaled_uniform((config.hidden_size, config.output_size), config.hidden_size, rng);
        let b2 = scaled_uniform((1, config.output_size), config.hidden_size, rng);
        Parameters { w1, b1, w2, b2 }
    }

    /// Runs the two-layer prediction function over a (batch x input) matrix
    /// and returns the full activation cache, output distributions included.
    pub fn forward(&self, x: &Array2<f64>) -> Result<ActivationCache> {
        if x.ncols() != self.w1.nrows() {
            return Err(TrainerError::ShapeMismatch {
                context: "forward pass input",
                expected: format!("{} columns", self.w1.nrows()),
                found: format!("{} columns", x.ncols()),
            });
        }
        let pre_hidden = x.dot(&self.w1) + &self.b1;
        let hidden = ops::relu(&pre_hidden);
        let pre_output = hidden.dot(&self.w2) + &self.b2;
        let output = ops::softmax_batch(&pre_output);
        Ok(ActivationCache {
            pre_hidden,
            hidden,
            pre_output,
            output,
        })
    }

    /// Chain-rule gradients of the batch-summed cross-entropy loss. The
    /// softmax and the loss differentiate jointly to the closed form
    /// Z - Y_onehot; everything else is matrix calculus over the cached
    /// forward values. Gradients are summed over the batch, matching the
    /// summed (not averaged) loss the trace records.
    pub fn backward(&self, x: &Array2<f64>, cache: &ActivationCache, labels: &[usize]) -> Gradients {
        let y_full = ops::one_hot(labels, self.w2.ncols());

        let d_pre_output = &cache.output - &y_full;
        let w2 = cache.hidden.t().dot(&d_pre_output);
        let b2 = d_pre_output.sum_axis(Axis(0)).insert_axis(Axis(0));

        let d_hidden = d_pre_output.dot(&self.w2.t());
        let d_pre_hidden = d_hidden * ops::relu_derivative(&cache.pre_hidden);
        let w1 = x.t().dot(&d_pre_hidden);
        let b1 = d_pre_hidden.sum_axis(Axis(0)).insert_axis(Axis(0));

        Gradients { w1, b1, w2, b2 }
    }

    /// Plain gradient descent: subtract learning_rate x gradient from each
    /// tensor in place.
    pub fn apply_gradients(&mut self, gradients: &Gradients, learning_rate: f64) {
        self.w1.scaled_add(-learning_rate, &gradients.w1);
        self.b1.scaled_add(-learning_rate, &gradients.b1);
        self.w2.scaled_add(-learning_rate, &gradients.w2);
        self.b2.scaled_add(-learning_rate, &gradients.b2);
    }
}

fn scaled_uniform<R: Rng + ?Sized>(
    shape: (usize, usize),
    fan_in: usize,
    rng: &mut R,
) -> Array2<f64> {
    let scale = (1.0 / fan_in as f64).sqrt();
    Array::random_using(shape, Uniform::new(0.0, 1.0), rng).mapv(|u| (u - 0.5) * 2.0 * scale)
}

/// Trains the network over the dataset with mini-batch gradient descent and
/// returns the loss trace: one batch-summed loss per training step, in step
/// order.
///
/// Each epoch shuffles an index permutation (the dataset itself stays in
/// load order), slices it into full-size batches, and runs
/// forward -> backward -> update per batch. Examples left over after the
/// last full batch sit out that epoch.
pub fn train<R: Rng + ?Sized>(
    params: &mut Parameters,
    dataset: &Dataset,
    config: &TrainingConfig,
    rng: &mut R,
) -> Result<Vec<f64>> {
    config.validate()?;
    if dataset.len() < config.batch_size {
        return Err(TrainerError::Config(format!(
            "dataset holds {} examples, fewer than one batch of {}",
            dataset.len(),
            config.batch_size
        )));
    }
    let input_dim = params.w1.nrows();
    if let Some(example) = dataset.iter().find(|e| e.input.len() != input_dim) {
        return Err(TrainerError::ShapeMismatch {
            context: "training example",
            expected: format!("input length {input_dim}"),
            found: format!("input length {}", example.input.len()),
        });
    }

    let batches_per_epoch = dataset.len() / config.batch_size;
    let mut loss_trace = Vec::with_capacity(batches_per_epoch * config.epochs);
    let mut order: Vec<usize> = (0..dataset.len()).collect();

    for epoch in 0..config.epochs {
        order.shuffle(rng);

        let mut epoch_loss = 0.0;
        for batch_indices in order.chunks_exact(config.batch_size) {
            let (x, labels) = stack_batch(dataset, batch_indices, input_dim);

            let cache = params.forward(&x)?;
            let batch_loss = ops::sparse_cross_entropy_batch(&cache.output, &labels)?.sum();
            let gradients = params.backward(&x, &cache, &labels);
            params.apply_gradients(&gradients, config.learning_rate);

            loss_trace.push(batch_loss);
            epoch_loss += batch_loss;
        }

        tracing::info!(
            epoch,
            batches = batches_per_epoch,
            mean_batch_loss = epoch_loss / batches_per_epoch as f64,
            "epoch complete"
        );
    }

    Ok(loss_trace)
}

// Stacks the selected examples into a (batch x input) matrix plus the
// matching label vector.
fn stack_batch(
    dataset: &Dataset,
    indices: &[usize],
    input_dim: usize,
) -> (Array2<f64>, Vec<usize>) {
    let examples = dataset.examples();
    let mut x = Array2::zeros((indices.len(), input_dim));
    let mut labels = Vec::with_capacity(indices.len());
    for (row, &index) in indices.iter().enumerate() {
        x.row_mut(row).assign(&examples[index].input);
        labels.push(examples[index].label);
    }
    (x, labels)
}

/// Greedy classification of a single example: forward pass, then the class
/// with the highest probability.
pub fn predict(params: &Parameters, input: &Array1<f64>) -> Result<usize> {
    let x = input.to_owned().insert_axis(Axis(0));
    let cache = params.forward(&x)?;
    Ok(argmax(cache.output.row(0)))
}

/// Fraction of examples the network classifies correctly, evaluated one
/// example at a time over the whole collection.
pub fn evaluate(params: &Parameters, dataset: &Dataset) -> Result<f64> {
    if dataset.is_empty() {
        return Err(TrainerError::Config(
            "cannot evaluate on an empty dataset".into(),
        ));
    }
    let mut correct = 0usize;
    for example in dataset.iter() {
        if predict(params, &example.input)? == example.label {
            correct += 1;
        }
    }
    Ok(correct as f64 / dataset.len() as f64)
}

fn argmax(row: ArrayView1<f64>) -> usize {
    row.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
        .expect("probability distribution has at least one class")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Example;
    use approx::assert_relative_eq;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            input_size: 4,
            hidden_size: 8,
            output_size: 3,
            learning_rate: 0.01,
            epochs: 150,
            batch_size: 10,
            seed: 5,
        }
    }

    // Each example's label is the argmax of its first `classes` components,
    // so the mapping from input to label is exact and learnable.
    fn synthetic_dataset<R: Rng + ?Sized>(
        count: usize,
        input_size: usize,
        classes: usize,
        rng: &mut R,
    ) -> Dataset {
        let examples = (0..count)
            .map(|_| {
                let input: Array1<f64> =
                    Array::random_using(input_size, Uniform::new(0.0, 1.0), rng);
                let label = argmax(input.slice(ndarray::s![..classes]));
                Example { input, label }
            })
            .collect();
        Dataset::new(examples)
    }

    fn batch_loss(params: &Parameters, x: &Array2<f64>, labels: &[usize]) -> f64 {
        let cache = params.forward(x).unwrap();
        ops::sparse_cross_entropy_batch(&cache.output, labels)
            .unwrap()
            .sum()
    }

    // Central finite differences of the batch loss with respect to one
    // parameter tensor, entry by entry.
    fn numeric_gradient(
        params: &mut Parameters,
        x: &Array2<f64>,
        labels: &[usize],
        select: fn(&mut Parameters) -> &mut Array2<f64>,
    ) -> Array2<f64> {
        const EPS: f64 = 1e-5;
        let dim = select(params).raw_dim();
        let mut grad = Array2::zeros(dim);
        for (i, j) in ndarray::indices(dim) {
            select(params)[[i, j]] += EPS;
            let plus = batch_loss(params, x, labels);
            select(params)[[i, j]] -= 2.0 * EPS;
            let minus = batch_loss(params, x, labels);
            select(params)[[i, j]] += EPS;
            grad[[i, j]] = (plus - minus) / (2.0 * EPS);
        }
        grad
    }

    fn assert_gradients_close(analytic: &Array2<f64>, numeric: &Array2<f64>) {
        assert_eq!(analytic.dim(), numeric.dim());
        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert_relative_eq!(*a, *n, epsilon = 1e-6, max_relative = 1e-4);
        }
    }

    #[test]
    fn initialization_bounds_follow_fan_in() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let params = Parameters::init(&config, &mut rng);

        let bound1 = (1.0 / config.input_size as f64).sqrt();
        assert!(params.w1.iter().all(|&v| v >= -bound1 && v < bound1));
        assert!(params.b1.iter().all(|&v| v >= -bound1 && v < bound1));
        let bound2 = (1.0 / config.hidden_size as f64).sqrt();
        assert!(params.w2.iter().all(|&v| v >= -bound2 && v < bound2));
        assert!(params.b2.iter().all(|&v| v >= -bound2 && v < bound2));
    }

    #[test]
    fn forward_rejects_wrong_input_width() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(1);
        let params = Parameters::init(&config, &mut rng);
        let x = Array2::zeros((2, config.input_size + 1));
        assert!(matches!(
            params.forward(&x),
            Err(TrainerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn forward_output_rows_are_distributions() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(2);
        let params = Parameters::init(&config, &mut rng);
        let x = Array::random_using((6, config.input_size), Uniform::new(0.0, 1.0), &mut rng);
        let cache = params.forward(&x).unwrap();
        assert_eq!(cache.output.dim(), (6, config.output_size));
        assert_eq!(cache.pre_output.dim(), (6, config.output_size));
        for row in cache.output.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn analytic_gradients_match_finite_differences() {
        let config = TrainingConfig {
            input_size: 3,
            hidden_size: 4,
            output_size: 2,
            learning_rate: 0.01,
            epochs: 1,
            batch_size: 5,
            seed: 11,
        };
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut params = Parameters::init(&config, &mut rng);
        let x = Array::random_using((5, 3), Uniform::new(0.0, 1.0), &mut rng);
        let labels = [0usize, 1, 1, 0, 1];

        let cache = params.forward(&x).unwrap();
        let analytic = params.backward(&x, &cache, &labels);

        let numeric = numeric_gradient(&mut params, &x, &labels, |p| &mut p.w1);
        assert_gradients_close(&analytic.w1, &numeric);
        let numeric = numeric_gradient(&mut params, &x, &labels, |p| &mut p.b1);
        assert_gradients_close(&analytic.b1, &numeric);
        let numeric = numeric_gradient(&mut params, &x, &labels, |p| &mut p.w2);
        assert_gradients_close(&analytic.w2, &numeric);
        let numeric = numeric_gradient(&mut params, &x, &labels, |p| &mut p.b2);
        assert_gradients_close(&analytic.b2, &numeric);
    }

    fn run_training(seed: u64) -> (Vec<f64>, Parameters) {
        let config = TrainingConfig {
            seed,
            epochs: 3,
            ..small_config()
        };
        let mut rng = StdRng::seed_from_u64(config.seed);
        let dataset = synthetic_dataset(60, config.input_size, config.output_size, &mut rng);
        let mut params = Parameters::init(&config, &mut rng);
        let trace = train(&mut params, &dataset, &config, &mut rng).unwrap();
        (trace, params)
    }

    #[test]
    fn training_is_deterministic_for_a_fixed_seed() {
        let (trace_a, params_a) = run_training(7);
        let (trace_b, params_b) = run_training(7);
        assert_eq!(trace_a, trace_b);
        assert_eq!(params_a.w1, params_b.w1);
        assert_eq!(params_a.b1, params_b.b1);
        assert_eq!(params_a.w2, params_b.w2);
        assert_eq!(params_a.b2, params_b.b2);
    }

    #[test]
    fn training_learns_the_synthetic_task() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let dataset = synthetic_dataset(100, config.input_size, config.output_size, &mut rng);
        let mut params = Parameters::init(&config, &mut rng);

        let trace = train(&mut params, &dataset, &config, &mut rng).unwrap();

        // 100 examples at batch size 10 gives 10 steps per epoch; nothing is
        // ever dropped here because the batch divides the dataset evenly.
        assert_eq!(trace.len(), 10 * config.epochs);

        // Parameter shapes must survive the whole run untouched.
        assert_eq!(params.w1.dim(), (config.input_size, config.hidden_size));
        assert_eq!(params.b1.dim(), (1, config.hidden_size));
        assert_eq!(params.w2.dim(), (config.hidden_size, config.output_size));
        assert_eq!(params.b2.dim(), (1, config.output_size));

        let accuracy = evaluate(&params, &dataset).unwrap();
        assert!(accuracy > 0.6, "training accuracy {accuracy} too low");

        let head: f64 = trace[..30].iter().sum::<f64>() / 30.0;
        let tail: f64 = trace[trace.len() - 30..].iter().sum::<f64>() / 30.0;
        assert!(
            tail < head,
            "loss did not trend down: head {head}, tail {tail}"
        );
    }

    #[test]
    fn undersized_dataset_is_a_configuration_error() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(3);
        let dataset = synthetic_dataset(
            config.batch_size - 1,
            config.input_size,
            config.output_size,
            &mut rng,
        );
        let mut params = Parameters::init(&config, &mut rng);
        assert!(matches!(
            train(&mut params, &dataset, &config, &mut rng),
            Err(TrainerError::Config(_))
        ));
    }

    #[test]
    fn evaluate_rejects_an_empty_dataset() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(4);
        let params = Parameters::init(&config, &mut rng);
        assert!(matches!(
            evaluate(&params, &Dataset::new(Vec::new())),
            Err(TrainerError::Config(_))
        ));
    }

    #[test]
    fn predict_returns_a_valid_class() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(6);
        let params = Parameters::init(&config, &mut rng);
        let input: Array1<f64> =
            Array::random_using(config.input_size, Uniform::new(0.0, 1.0), &mut rng);
        let class = predict(&params, &input).unwrap();
        assert!(class < config.output_size);
    }
}
