//! Transaction validation for the Beck protocol.
//!
//! Two levels of validation:
//!
//! - **Structural** ([`validate_transaction_structure`]): context-free checks on
//!   transaction format and internal consistency. No external state required.
//! - **Contextual** ([`validate_transaction`]): UTXO-aware checks including
//!   input availability, coinbase maturity, and value conservation. Produces
//!   the fee and sigcheck totals the mempool caches per entry.
//!
//! Signature *verification* does not happen here: the script engine runs it
//! in parallel worker threads, budgeted through [`SigCheckLimiter`]. This
//! module only counts the checks a transaction will require.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::constants::{
    MAX_COINBASE_DATA, MAX_INPUTS, MAX_OUTPUTS, MAX_TX_SIG_CHECKS, MAX_TX_SIZE,
};
use crate::error::TransactionError;
use crate::types::Transaction;
use crate::utxo::UtxoView;

/// Summary of a successfully validated transaction.
///
/// Returned by [`validate_transaction`] after all checks pass. Contains
/// the computed fee and sigcheck totals the mempool stores per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransaction {
    /// Total value of all spent inputs in becks.
    pub total_input: u64,
    /// Total value of all created outputs in becks.
    pub total_output: u64,
    /// Transaction fee in becks (`total_input - total_output`).
    pub fee: u64,
    /// Number of signature checks the transaction requires.
    pub sig_checks: i64,
    /// Whether any input spends a coinbase output.
    pub spends_coinbase: bool,
}

/// Count the signature checks a transaction requires.
///
/// One check per input carrying a signature. Coinbase inputs carry none.
pub fn count_sig_checks(tx: &Transaction) -> i64 {
    tx.inputs
        .iter()
        .filter(|input| !input.signature.is_empty())
        .count() as i64
}

/// Validate transaction structure (context-free).
///
/// Checks that apply to both coinbase and regular transactions:
/// - Non-empty inputs and outputs, within count limits
/// - All output values are non-zero
/// - Total output value does not overflow
/// - Serialized size is within [`MAX_TX_SIZE`]
/// - Sigcheck count is within [`MAX_TX_SIG_CHECKS`]
///
/// Regular transactions additionally must not contain null or duplicate
/// outpoints; coinbase transactions must have exactly one null-outpoint
/// input with bounded coinbase data.
pub fn validate_transaction_structure(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }

    if tx.inputs.len() > MAX_INPUTS || tx.outputs.len() > MAX_OUTPUTS {
        return Err(TransactionError::TooManyInputsOrOutputs);
    }

    for (i, output) in tx.outputs.iter().enumerate() {
        if output.value == 0 {
            return Err(TransactionError::ZeroValueOutput(i));
        }
    }

    if tx.total_output_value().is_none() {
        return Err(TransactionError::ValueOverflow);
    }

    let size = tx.serialized_size()?;
    if size > MAX_TX_SIZE {
        return Err(TransactionError::OversizedTransaction { size, max: MAX_TX_SIZE });
    }

    let sig_checks = count_sig_checks(tx);
    if sig_checks > MAX_TX_SIG_CHECKS {
        return Err(TransactionError::TooManySigChecks {
            got: sig_checks,
            max: MAX_TX_SIG_CHECKS,
        });
    }

    if tx.is_coinbase() {
        validate_coinbase_structure(tx)?;
    } else {
        validate_regular_structure(tx)?;
    }

    Ok(())
}

/// Validate coinbase-specific structure.
fn validate_coinbase_structure(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs[0].signature.len() > MAX_COINBASE_DATA {
        return Err(TransactionError::InvalidCoinbase(format!(
            "coinbase data too large: {} > {}",
            tx.inputs[0].signature.len(),
            MAX_COINBASE_DATA
        )));
    }
    Ok(())
}

/// Validate regular-transaction structure: no null or duplicate outpoints.
fn validate_regular_structure(tx: &Transaction) -> Result<(), TransactionError> {
    let mut seen = HashSet::new();
    for (i, input) in tx.inputs.iter().enumerate() {
        if input.previous_output.is_null() {
            return Err(TransactionError::NullOutpointInRegularTx(i));
        }
        if !seen.insert(&input.previous_output) {
            return Err(TransactionError::DuplicateInput(
                input.previous_output.to_string(),
            ));
        }
    }
    Ok(())
}

/// Validate a regular transaction against a UTXO view (contextual).
///
/// Runs the structural checks, then verifies every input references a known
/// unspent output, coinbase inputs are mature at `spend_height`, and input
/// value covers output value. Returns the computed fee and sigcheck totals.
///
/// Coinbase transactions are rejected here; their reward is checked during
/// block validation, not mempool admission.
pub fn validate_transaction(
    tx: &Transaction,
    view: &impl UtxoView,
    spend_height: u64,
) -> Result<ValidatedTransaction, TransactionError> {
    validate_transaction_structure(tx)?;

    if tx.is_coinbase() {
        return Err(TransactionError::InvalidCoinbase(
            "coinbase cannot be relayed".into(),
        ));
    }

    let mut total_input: u64 = 0;
    let mut spends_coinbase = false;
    for (i, input) in tx.inputs.iter().enumerate() {
        let coin = view
            .get_coin(&input.previous_output)
            .ok_or_else(|| TransactionError::UnknownUtxo(input.previous_output.to_string()))?;

        if coin.is_coinbase {
            spends_coinbase = true;
            if !coin.is_mature(spend_height) {
                return Err(TransactionError::ImmatureCoinbase { index: i });
            }
        }

        total_input = total_input
            .checked_add(coin.output.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    let total_output = tx.total_output_value().ok_or(TransactionError::ValueOverflow)?;
    if total_input < total_output {
        return Err(TransactionError::InsufficientFunds {
            have: total_input,
            need: total_output,
        });
    }

    Ok(ValidatedTransaction {
        total_input,
        total_output,
        fee: total_input - total_output,
        sig_checks: count_sig_checks(tx),
        spends_coinbase,
    })
}

/// Shared signature-check budget for parallel script verification.
///
/// Script workers subtract the checks they perform from a common counter;
/// once the counter goes negative the whole verification batch fails. The
/// counter is atomic so workers need no lock.
#[derive(Debug)]
pub struct SigCheckLimiter {
    remaining: AtomicI64,
}

impl SigCheckLimiter {
    /// Create a limiter with the given budget.
    pub fn new(limit: i64) -> Self {
        Self { remaining: AtomicI64::new(limit) }
    }

    /// Consume `consumed` checks. Returns false once the budget is exhausted.
    pub fn consume_and_check(&self, consumed: i64) -> bool {
        self.remaining.fetch_sub(consumed, Ordering::AcqRel) - consumed >= 0
    }

    /// Whether the budget is still non-negative.
    pub fn check(&self) -> bool {
        self.remaining.load(Ordering::Acquire) >= 0
    }
}

/// Per-transaction sigcheck limiter, pre-loaded with [`MAX_TX_SIG_CHECKS`].
pub fn tx_sig_check_limiter() -> SigCheckLimiter {
    SigCheckLimiter::new(MAX_TX_SIG_CHECKS)
}
