//! Classification of transaction submission errors
//!
//! Nodes only report failure reasons as free text. Every substring heuristic the
//! broadcaster relies on lives here.

use std::fmt;

/// What the broadcaster should do about a failed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitErrorKind {
    /// Network blip or unknown failure: spend an attempt, back off, resubmit unchanged
    Transient,
    /// Local nonce is behind the network: refresh and resubmit
    NonceStale,
    /// A transaction with this nonce is pending at a higher price: bump fees and resubmit
    Underpriced,
    /// The node already has this exact transaction: wait for its receipt
    AlreadyKnown,
    /// The wallet cannot pay for gas and value: abort
    InsufficientFunds,
    /// Resubmitting the same transaction can never succeed: abort
    Fatal,
}

impl fmt::Display for SubmitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmitErrorKind::Transient => "transient",
            SubmitErrorKind::NonceStale => "nonce too low",
            SubmitErrorKind::Underpriced => "replacement underpriced",
            SubmitErrorKind::AlreadyKnown => "already known",
            SubmitErrorKind::InsufficientFunds => "insufficient funds",
            SubmitErrorKind::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

const NONCE_STALE: &[&str] = &["nonce too low", "nonce has already been used"];
const UNDERPRICED: &[&str] = &[
    "replacement transaction underpriced",
    "could not replace existing tx",
    "transaction underpriced",
];
const ALREADY_KNOWN: &[&str] = &["already known", "known transaction"];
const INSUFFICIENT_FUNDS: &[&str] = &["insufficient funds"];
const FATAL: &[&str] = &[
    "intrinsic gas too low",
    "exceeds block gas limit",
    "invalid sender",
    "invalid chain id",
];

/// Map a node error message onto a retry decision
pub fn classify(message: &str) -> SubmitErrorKind {
    let message = message.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if any(INSUFFICIENT_FUNDS) {
        SubmitErrorKind::InsufficientFunds
    } else if any(NONCE_STALE) {
        SubmitErrorKind::NonceStale
    } else if any(UNDERPRICED) {
        SubmitErrorKind::Underpriced
    } else if any(ALREADY_KNOWN) {
        SubmitErrorKind::AlreadyKnown
    } else if any(FATAL) {
        SubmitErrorKind::Fatal
    } else {
        SubmitErrorKind::Transient
    }
}

/// Human-readable reason for errors surfaced in operation-level logs
pub fn describe(message: &str) -> &str {
    if message.contains("insufficient funds for gas * price + value") {
        "Not enough native balance for gas"
    } else if message.contains("transfer amount exceeds balance") {
        "Not enough tokens"
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_node_messages() {
        assert_eq!(
            classify("(code: -32000, message: nonce too low, data: None)"),
            SubmitErrorKind::NonceStale
        );
        assert_eq!(
            classify("replacement transaction underpriced"),
            SubmitErrorKind::Underpriced
        );
        assert_eq!(
            classify("could not replace existing tx"),
            SubmitErrorKind::Underpriced
        );
        assert_eq!(
            classify("insufficient funds for gas * price + value"),
            SubmitErrorKind::InsufficientFunds
        );
        assert_eq!(classify("ALREADY KNOWN"), SubmitErrorKind::AlreadyKnown);
        assert_eq!(classify("intrinsic gas too low"), SubmitErrorKind::Fatal);
        assert_eq!(
            classify("error sending request: connection reset by peer"),
            SubmitErrorKind::Transient
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            describe("insufficient funds for gas * price + value: have 1 want 2"),
            "Not enough native balance for gas"
        );
        assert_eq!(describe("execution reverted"), "execution reverted");
    }
}
