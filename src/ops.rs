use ndarray::{Array1, Array2};

use crate::error::{Result, TrainerError};

/// Elementwise max(t, 0).
pub fn relu(t: &Array2<f64>) -> Array2<f64> {
    t.mapv(|v| v.max(0.0))
}

/// Elementwise sub-gradient of [`relu`]: 1.0 where the input is >= 0, else
/// 0.0. The derivative at exactly zero is deliberately 1.0, matching the
/// convention the forward pass was trained against; changing it changes
/// which units receive gradient on the boundary.
pub fn relu_derivative(t: &Array2<f64>) -> Array2<f64> {
    t.mapv(|v| if v >= 0.0 { 1.0 } else { 0.0 })
}

/// Row-wise softmax over a (batch x classes) matrix. Each row of the result
/// is a probability distribution over classes.
///
/// The largest entry of each row is subtracted before exponentiating, so
/// arbitrarily large logits cannot overflow. Since the shift cancels in the
/// normalization, results agree with the unshifted form for bounded inputs.
pub fn softmax_batch(t: &Array2<f64>) -> Array2<f64> {
    let mut out = t.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Per-example negative log-likelihood of the true class: for each row j of
/// the probability matrix `z`, returns -ln(z[j, y[j]]). The result is one
/// loss per example, not yet reduced; the training loop sums it.
pub fn sparse_cross_entropy_batch(z: &Array2<f64>, y: &[usize]) -> Result<Array1<f64>> {
    if z.nrows() != y.len() {
        return Err(TrainerError::ShapeMismatch {
            context: "cross-entropy labels",
            expected: format!("{} labels", z.nrows()),
            found: format!("{} labels", y.len()),
        });
    }
    let classes = z.ncols();
    let mut losses = Array1::zeros(y.len());
    for (j, (&label, row)) in y.iter().zip(z.rows()).enumerate() {
        if label >= classes {
            return Err(TrainerError::ShapeMismatch {
                context: "cross-entropy labels",
                expected: format!("label < {classes}"),
                found: format!("label {label}"),
            });
        }
        losses[j] = -row[label].ln();
    }
    Ok(losses)
}

/// One-hot expansion of integer labels into a (batch x classes) indicator
/// matrix. Callers must have validated the labels against the class count.
pub fn one_hot(y: &[usize], num_classes: usize) -> Array2<f64> {
    let mut full = Array2::zeros((y.len(), num_classes));
    for (j, &label) in y.iter().enumerate() {
        full[[j, label]] = 1.0;
    }
    full
}
