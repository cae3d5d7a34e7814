pub mod faer_ndarray;

pub use faer_ndarray::{LinalgError, SpdFactor};
