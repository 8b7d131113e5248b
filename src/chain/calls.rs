//! Calldata encoding and return decoding for the contracts the keeper talks to
//!
//! Covers the Uniswap-v2 style router and ERC20 tokens.

use crate::error::{ArbError, ArbResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;

pub const GET_AMOUNTS_OUT: &str = "getAmountsOut(uint256,address[])";
pub const SWAP_EXACT_TOKENS_FOR_ETH: &str =
    "swapExactTokensForETH(uint256,uint256,address[],address,uint256)";
pub const SWAP_EXACT_ETH_FOR_TOKENS: &str =
    "swapExactETHForTokens(uint256,address[],address,uint256)";
pub const SWAP_EXACT_ETH_FOR_TOKENS_TAXED: &str =
    "swapExactETHForTokensSupportingFeeOnTransferTokens(uint256,address[],address,uint256)";
pub const SWAP_EXACT_TOKENS_FOR_TOKENS: &str =
    "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)";
pub const SWAP_EXACT_TOKENS_FOR_TOKENS_TAXED: &str =
    "swapExactTokensForTokensSupportingFeeOnTransferTokens(uint256,uint256,address[],address,uint256)";

pub const BALANCE_OF: &str = "balanceOf(address)";
pub const ALLOWANCE: &str = "allowance(address,address)";
pub const APPROVE: &str = "approve(address,uint256)";
pub const TRANSFER: &str = "transfer(address,uint256)";
pub const TOTAL_SUPPLY: &str = "totalSupply()";
pub const DECIMALS: &str = "decimals()";
pub const NAME: &str = "name()";
pub const SYMBOL: &str = "symbol()";

/// Selector followed by the ABI-encoded arguments
pub fn encode(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(args));
    data.into()
}

pub fn path_token(path: &[Address]) -> Token {
    Token::Array(path.iter().copied().map(Token::Address).collect())
}

pub fn get_amounts_out(amount_in: U256, path: &[Address]) -> Bytes {
    encode(GET_AMOUNTS_OUT, &[Token::Uint(amount_in), path_token(path)])
}

pub fn balance_of(owner: Address) -> Bytes {
    encode(BALANCE_OF, &[Token::Address(owner)])
}

pub fn allowance(owner: Address, spender: Address) -> Bytes {
    encode(ALLOWANCE, &[Token::Address(owner), Token::Address(spender)])
}

pub fn approve(spender: Address, amount: U256) -> Bytes {
    encode(APPROVE, &[Token::Address(spender), Token::Uint(amount)])
}

pub fn transfer(to: Address, amount: U256) -> Bytes {
    encode(TRANSFER, &[Token::Address(to), Token::Uint(amount)])
}

pub fn decode_uint(data: &[u8]) -> ArbResult<U256> {
    let tokens = decode(&[ParamType::Uint(256)], data)?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| ArbError::Decode("expected uint256".to_string()))
}

pub fn decode_uint_array(data: &[u8]) -> ArbResult<Vec<U256>> {
    let tokens = decode(&[ParamType::Array(Box::new(ParamType::Uint(256)))], data)?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_array)
        .map(|items| items.into_iter().filter_map(Token::into_uint).collect())
        .ok_or_else(|| ArbError::Decode("expected uint256[]".to_string()))
}

pub fn decode_string(data: &[u8]) -> ArbResult<String> {
    let tokens = decode(&[ParamType::String], data)?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_string)
        .ok_or_else(|| ArbError::Decode("expected string".to_string()))
}

fn decode(types: &[ParamType], data: &[u8]) -> ArbResult<Vec<Token>> {
    abi::decode(types, data).map_err(|e| ArbError::Decode(e.to_string()))
}
