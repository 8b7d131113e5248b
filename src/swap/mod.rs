//! Trading primitives: router quotes and swaps, and batched multi-mint conversions

mod convert;
mod estimator;

pub use convert::{ConversionBatcher, ConversionOutcome};
pub use estimator::SwapEstimator;
