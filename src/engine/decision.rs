//! Pure trading and rebalancing decisions

use ethers::types::{Address, U256};
use std::collections::HashMap;

/// Balances of one wallet, read fresh every tick. Token balances are only
/// filled in for the wallet running the tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletBalanceSnapshot {
    pub address: Address,
    pub native_balance: U256,
    pub token_balances: HashMap<Address, U256>,
}

/// Relative gap of a sampled price to the reference, in percent
pub fn percent_diff(sampled: f64, reference: f64) -> f64 {
    (sampled - reference) / reference * 100.0
}

/// Buy only when the sampled token is strictly cheaper by at least `threshold` percent
pub fn buy_eligible(percent_diff: f64, threshold: f64) -> bool {
    percent_diff < 0.0 && percent_diff.abs() >= threshold
}

/// Sell when the price rose since the last tick by at least `threshold` percent.
/// A zero threshold sells unconditionally.
pub fn sell_eligible(current: f64, last: f64, threshold: f64) -> bool {
    if threshold == 0.0 {
        return true;
    }
    if current <= last {
        return false;
    }
    let diff = (last - current) / current * 100.0;
    diff < 0.0 && diff.abs() >= threshold
}

/// Split a balance into fixed chunks plus a remainder chunk floored to whole tokens.
/// An empty remainder is dropped.
pub fn sell_chunks(balance: U256, chunk: U256, one_token: U256) -> Vec<U256> {
    if chunk.is_zero() {
        return Vec::new();
    }
    let full = (balance / chunk).min(U256::from(u32::MAX)).as_u64();
    let mut chunks = vec![chunk; full as usize];

    let rest = balance - chunk * U256::from(full);
    let rest = if one_token.is_zero() {
        rest
    } else {
        rest - rest % one_token
    };
    if !rest.is_zero() {
        chunks.push(rest);
    }
    chunks
}

/// Whether a buy of `amount` keeps the wallet at or above its floor
pub fn can_afford(balance: U256, amount: U256, floor: U256) -> bool {
    balance >= amount + floor
}

/// A dependent wallet's state as seen by the source wallet
#[derive(Debug, Clone, PartialEq)]
pub struct Dependent {
    pub address: Address,
    pub balance: U256,
    pub floor: U256,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceStep {
    /// Top up exactly the shortfall
    Send { to: Address, amount: U256 },
    /// Shortfall exists but paying it would take the source to or below its floor
    Skip { to: Address, shortfall: U256 },
}

/// Plan top-ups for dependents below their floor, in order.
///
/// The source balance is tracked as a ledger so each decision sees the balance left
/// after earlier transfers.
pub fn plan_rebalance(source_balance: U256, source_floor: U256, dependents: &[Dependent]) -> Vec<RebalanceStep> {
    let mut remaining = source_balance;
    let mut steps = Vec::new();

    for dependent in dependents {
        if dependent.balance >= dependent.floor {
            continue;
        }
        let shortfall = dependent.floor - dependent.balance;
        if remaining > shortfall && remaining - shortfall > source_floor {
            remaining -= shortfall;
            steps.push(RebalanceStep::Send {
                to: dependent.address,
                amount: shortfall,
            });
        } else {
            steps.push(RebalanceStep::Skip {
                to: dependent.address,
                shortfall,
            });
        }
    }
    steps
}

/// Split native surplus above `floor`: a quarter to the minter, the rest to the buyer,
/// both rounded to `granularity`. Only distributes once the surplus itself exceeds the floor.
pub fn split_surplus(balance: U256, floor: U256, granularity: U256) -> Option<(U256, U256)> {
    if balance <= floor {
        return None;
    }
    let surplus = balance - floor;
    if surplus <= floor {
        return None;
    }
    let round = |value: U256| {
        if granularity.is_zero() {
            value
        } else {
            (value + granularity / 2) / granularity * granularity
        }
    };
    let to_minter = round(surplus / 4);
    let to_buyer = round(surplus - to_minter);
    Some((to_minter, to_buyer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn test_buy_threshold_boundary() {
        let reference = 100.0;
        let at_threshold = percent_diff(80.0, reference);
        assert_eq!(at_threshold, -20.0);
        assert!(buy_eligible(at_threshold, 20.0));

        let just_inside = percent_diff(80.0 + 1e-9, reference);
        assert!(!buy_eligible(just_inside, 20.0));
    }

    #[test]
    fn test_buy_requires_cheaper_token() {
        assert!(!buy_eligible(percent_diff(130.0, 100.0), 20.0));
        assert!(!buy_eligible(0.0, 0.0));
        assert!(buy_eligible(percent_diff(8e17, 1e18), 20.0));
    }

    #[test]
    fn test_sell_eligibility() {
        assert!(sell_eligible(1.0, 2.0, 0.0));
        assert!(!sell_eligible(100.0, 100.0, 5.0));
        // (100 - 200) / 200 = -50%
        assert!(sell_eligible(200.0, 100.0, 50.0));
        assert!(!sell_eligible(150.0, 100.0, 50.0));
    }

    #[test]
    fn test_sell_chunks_with_remainder() {
        let chunks = sell_chunks(units(1_234) + U256::exp10(17), units(500), units(1));
        assert_eq!(chunks, vec![units(500), units(500), units(234)]);

        let even = sell_chunks(units(1_000), units(500), units(1));
        assert_eq!(even, vec![units(500), units(500)]);
    }

    #[test]
    fn test_rebalance_scenario_keeps_buy_affordable() {
        let buyer = units(50_000);
        let floor = units(20_000);
        let minter = Dependent {
            address: Address::repeat_byte(0xb),
            balance: units(15_000),
            floor: units(20_000),
        };
        let seller = Dependent {
            address: Address::repeat_byte(0xc),
            balance: units(7_000),
            floor: units(10_000),
        };

        let steps = plan_rebalance(buyer, floor, &[minter.clone(), seller.clone()]);
        assert_eq!(
            steps,
            vec![
                RebalanceStep::Send {
                    to: minter.address,
                    amount: units(5_000)
                },
                RebalanceStep::Send {
                    to: seller.address,
                    amount: units(3_000)
                },
            ]
        );

        let sent = units(5_000) + units(3_000);
        let post_transfer = buyer - sent;
        assert_eq!(post_transfer, units(42_000));
        assert!(can_afford(post_transfer, units(10_000), floor));
    }

    #[test]
    fn test_rebalance_skips_when_source_would_hit_floor() {
        let dependent = Dependent {
            address: Address::repeat_byte(0xb),
            balance: units(0),
            floor: units(10_000),
        };
        let steps = plan_rebalance(units(30_000), units(20_000), &[dependent.clone()]);
        assert_eq!(
            steps,
            vec![RebalanceStep::Skip {
                to: dependent.address,
                shortfall: units(10_000)
            }]
        );
    }

    #[test]
    fn test_split_surplus() {
        let floor = units(20_000);
        assert_eq!(split_surplus(units(30_000), floor, U256::exp10(16)), None);

        let (minter, buyer) = split_surplus(units(60_000), floor, U256::exp10(16)).unwrap();
        assert_eq!(minter, units(10_000));
        assert_eq!(buyer, units(30_000));
    }
}
