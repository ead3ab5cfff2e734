//! A two-layer perceptron for handwritten digit classification, trained with
//! mini-batch gradient descent and hand-derived backpropagation.
//!
//! The numeric pipeline lives in [`ops`] (activation, softmax, loss) and
//! [`network`] (parameters, forward/backward passes, training driver).
//! [`dataset`] decodes the gzip-compressed IDX image corpus, and [`persist`]
//! dumps the learned tensors to flat text files for external consumers.

pub mod config;
pub mod dataset;
pub mod error;
pub mod network;
pub mod ops;
pub mod persist;

pub use error::{Result, TrainerError};
