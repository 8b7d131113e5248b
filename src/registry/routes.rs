//! Typed conversion route table
//!
//! `routes.json` maps each multi-mint contract to the source tokens it accepts:
//!
//! ```json
//! {
//!   "0x81fcd03D2100A0fE9767C0CfC68050bdc6a2969d": {
//!     "label": "Multi AFFECTION",
//!     "max_iterations": 100,
//!     "mints": 1,
//!     "functions": { "0x2fc636E7fDF9f3E8d61033103052079781a6e7D2": "multiMintG5(uint256)" },
//!     "costs": { "0x2fc636E7fDF9f3E8d61033103052079781a6e7D2": 0.6 }
//!   }
//! }
//! ```
//!
//! A function entry starting with `#` is disabled. A bare function name is resolved
//! against the contract ABI when one is available, and assumed batched otherwise.

use crate::chain::calls;
use crate::error::{ArbError, ArbResult};

use ethers::abi::{Abi, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// How a conversion contract is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionCall {
    /// `fn(uint256 iterations)`, one call per batch
    Batched { signature: String },
    /// `fn()`, one call per iteration
    PerUnit { signature: String },
}

impl ConversionCall {
    pub fn signature(&self) -> &str {
        match self {
            ConversionCall::Batched { signature } | ConversionCall::PerUnit { signature } => signature,
        }
    }

    pub fn calldata(&self, iterations: u64) -> Bytes {
        match self {
            ConversionCall::Batched { signature } => {
                calls::encode(signature, &[Token::Uint(U256::from(iterations))])
            }
            ConversionCall::PerUnit { signature } => calls::encode(signature, &[]),
        }
    }
}

/// One source token accepted by one conversion contract
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRoute {
    pub source_token: Address,
    pub target_contract: Address,
    pub cost_per_unit: f64,
    pub max_iterations_per_call: u64,
    pub mints_per_iteration: u64,
    pub label: String,
    pub enabled: bool,
    pub call: ConversionCall,
    /// Signature written out in the table rather than inferred from a bare name
    explicit: bool,
}

impl ConversionRoute {
    /// Source tokens consumed by one iteration
    pub fn unit_cost(&self) -> f64 {
        self.cost_per_unit * self.mints_per_iteration as f64
    }
}

#[derive(Debug, Deserialize)]
struct RawContract {
    label: String,
    max_iterations: u64,
    #[serde(default = "default_mints")]
    mints: u64,
    functions: HashMap<Address, String>,
    #[serde(default)]
    costs: HashMap<Address, f64>,
}

fn default_mints() -> u64 {
    1
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<(Address, Address), ConversionRoute>,
}

impl RouteTable {
    pub fn load(path: &Path) -> ArbResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ArbError::Config(format!("Failed to read route table {:?}: {}", path, e)))?;
        let table = Self::parse(&contents)?;
        info!("Loaded {} conversion routes from {:?}", table.routes.len(), path);
        Ok(table)
    }

    /// Parse and validate every entry; any malformed entry fails the whole table
    pub fn parse(input: &str) -> ArbResult<Self> {
        let raw: HashMap<Address, RawContract> = serde_json::from_str(input)
            .map_err(|e| ArbError::InvalidRoute(format!("route table: {}", e)))?;

        let mut routes = BTreeMap::new();
        for (contract, entry) in raw {
            if entry.max_iterations == 0 {
                return Err(ArbError::InvalidRoute(format!(
                    "{}: max_iterations must be positive",
                    entry.label
                )));
            }
            if entry.mints == 0 {
                return Err(ArbError::InvalidRoute(format!(
                    "{}: mints must be positive",
                    entry.label
                )));
            }

            for (source, function) in &entry.functions {
                let (enabled, function) = match function.strip_prefix('#') {
                    Some(rest) => (false, rest),
                    None => (true, function.as_str()),
                };
                let (call, explicit) = parse_function(function)
                    .map_err(|e| ArbError::InvalidRoute(format!("{}: {}", entry.label, e)))?;

                let cost = entry.costs.get(source).copied();
                let cost_per_unit = match cost {
                    Some(cost) if cost.is_finite() && cost > 0.0 => cost,
                    _ if !enabled => cost.unwrap_or(0.0),
                    _ => {
                        return Err(ArbError::InvalidRoute(format!(
                            "{}: no valid cost for {:?}",
                            entry.label, source
                        )))
                    }
                };

                routes.insert(
                    (contract, *source),
                    ConversionRoute {
                        source_token: *source,
                        target_contract: contract,
                        cost_per_unit,
                        max_iterations_per_call: entry.max_iterations,
                        mints_per_iteration: entry.mints,
                        label: entry.label.clone(),
                        enabled,
                        call,
                        explicit,
                    },
                );
            }
        }

        Ok(Self { routes })
    }

    /// Route for `source` on `contract`; unknown and disabled routes are configuration faults
    pub fn route(&self, contract: Address, source: Address, target: Address) -> ArbResult<&ConversionRoute> {
        let route = self
            .routes
            .get(&(contract, source))
            .ok_or_else(|| ArbError::RouteUnavailable {
                source_token: format!("{:?}", source),
                target: format!("{:?}", target),
                contract: format!("{:?}", contract),
            })?;

        if !route.enabled {
            return Err(ArbError::RouteDisabled {
                source_token: format!("{:?}", source),
                target: format!("{:?}", target),
                contract: format!("{:?}", contract),
            });
        }
        Ok(route)
    }

    /// Distinct conversion contracts in the table
    pub fn contracts(&self) -> Vec<Address> {
        let mut contracts: Vec<Address> = self.routes.keys().map(|(c, _)| *c).collect();
        contracts.dedup();
        contracts
    }

    /// Whether an enabled route on `contract` names its function without a signature
    pub fn needs_abi(&self, contract: Address) -> bool {
        self.routes
            .iter()
            .any(|((c, _), route)| *c == contract && route.enabled && !route.explicit)
    }

    /// Check every route on `contract` against its ABI and resolve bare function names
    pub fn verify_against_abi(&mut self, contract: Address, abi: &Abi) -> ArbResult<()> {
        for ((c, _), route) in self.routes.iter_mut() {
            if *c != contract || !route.enabled {
                continue;
            }

            let name = function_name(route.call.signature()).to_string();
            let candidates = abi.functions_by_name(&name).map_err(|_| {
                ArbError::InvalidRoute(format!("{}: {} is not in the contract ABI", route.label, name))
            })?;

            let batched = candidates
                .iter()
                .any(|f| f.inputs.len() == 1 && f.inputs[0].kind == ParamType::Uint(256));
            let per_unit = candidates.iter().any(|f| f.inputs.is_empty());

            let resolved = match (&route.call, route.explicit) {
                (ConversionCall::Batched { .. }, true) if batched => route.call.clone(),
                (ConversionCall::PerUnit { .. }, true) if per_unit => route.call.clone(),
                (_, false) if batched => ConversionCall::Batched {
                    signature: format!("{}(uint256)", name),
                },
                (_, false) if per_unit => ConversionCall::PerUnit {
                    signature: format!("{}()", name),
                },
                _ => {
                    return Err(ArbError::InvalidRoute(format!(
                        "{}: {} has no matching overload",
                        route.label,
                        route.call.signature()
                    )))
                }
            };

            if resolved != route.call {
                debug!("Resolved {} to {:?}", route.call.signature(), resolved);
            }
            route.call = resolved;
            route.explicit = true;
        }
        Ok(())
    }
}

fn function_name(signature: &str) -> &str {
    signature.split('(').next().unwrap_or(signature)
}

/// `name(uint256)` is batched, `name()` is per-unit, a bare `name` is batched until resolved
fn parse_function(function: &str) -> Result<(ConversionCall, bool), String> {
    let function = function.trim();
    let valid_name = |name: &str| {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    match function.split_once('(') {
        None if valid_name(function) => Ok((
            ConversionCall::Batched {
                signature: format!("{}(uint256)", function),
            },
            false,
        )),
        Some((name, args)) if valid_name(name) => match args {
            "uint256)" => Ok((
                ConversionCall::Batched {
                    signature: function.to_string(),
                },
                true,
            )),
            ")" => Ok((
                ConversionCall::PerUnit {
                    signature: function.to_string(),
                },
                true,
            )),
            _ => Err(format!("unsupported call signature {}", function)),
        },
        _ => Err(format!("malformed function {:?}", function)),
    }
}
