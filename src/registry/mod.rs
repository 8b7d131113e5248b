//! Read-through registries for the static and slowly changing data the keeper needs:
//! token metadata, contract ABIs, conversion routes and signers.

pub mod abi;
pub mod cache;
pub mod routes;
pub mod signer;
pub mod tokens;

pub use abi::AbiStore;
pub use routes::{ConversionCall, ConversionRoute, RouteTable};
pub use signer::SignerSource;
pub use tokens::TokenRegistry;
