//! Transaction submission module with nonce management and gas optimization

pub(crate) mod actions;
mod classify;
mod gas;
mod nonce;
mod sender;

pub use actions::{call_template, WalletActions};
pub use classify::describe;
pub use gas::FeeStrategy;
pub use sender::{BroadcastOutcome, TransactionBroadcaster};
