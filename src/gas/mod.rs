//! Network fee sampling
//!
//! The oracle answers "what does a transaction of tier X cost right now" and
//! fails closed: without data it reports fees no ceiling can admit.

mod oracle;
mod sample;

pub use oracle::{GasOracle, GasSampler};
pub use sample::FeeTier;
