//! Deterministic transaction execution.
//!
//! Four actions, a flat gas schedule and no VM. Enough to make blocks touch
//! balances, nonces, storage, code and account deletion.

use dsync_crypto::keccak256;
use dsync_store::StoreError;
use dsync_types::{Address, ChainParams};

use crate::block::{Receipt, Transaction, TxAction};
use crate::error::ChainError;
use crate::state::StateDb;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    pub receipts: Vec<Receipt>,
    pub gas_used: u64,
}

/// Gas charged for `action` under `params`.
pub fn intrinsic_gas(params: &ChainParams, action: &TxAction) -> u64 {
    let extra = match action {
        TxAction::Transfer { .. } => 0,
        TxAction::Store { .. } => params.store_gas,
        TxAction::Deploy { code } => params.deploy_byte_gas.saturating_mul(code.len() as u64),
        TxAction::Destruct { .. } => params.destruct_gas,
    };
    params.tx_base_gas.saturating_add(extra)
}

/// Execute `txs` in order on `state`, then pay the block reward.
///
/// Any invalid transaction invalidates the whole block.
pub fn execute_block(
    state: &mut StateDb<'_>,
    params: &ChainParams,
    coinbase: Address,
    txs: &[Transaction],
) -> Result<ExecutionResult, ChainError> {
    let mut receipts = Vec::with_capacity(txs.len());
    let mut cumulative = 0u64;

    for (index, tx) in txs.iter().enumerate() {
        let gas = intrinsic_gas(params, &tx.action);
        cumulative = cumulative
            .checked_add(gas)
            .filter(|total| *total <= params.block_gas_limit)
            .ok_or(ChainError::GasLimitExceeded {
                used: cumulative.saturating_add(gas),
                limit: params.block_gas_limit,
            })?;

        let fee = execute_transaction(state, tx, gas).map_err(|e| e.at(index))?;
        credit(state, coinbase, fee).map_err(|e| e.at(index))?;

        receipts.push(Receipt {
            tx_hash: tx.hash(),
            gas_used: gas,
            cumulative_gas_used: cumulative,
        });
    }

    credit(state, coinbase, params.block_reward).map_err(|e| e.at(txs.len()))?;

    Ok(ExecutionResult {
        receipts,
        gas_used: cumulative,
    })
}

enum TxError {
    Invalid(String),
    Store(StoreError),
}

impl TxError {
    fn at(self, index: usize) -> ChainError {
        match self {
            Self::Invalid(reason) => ChainError::InvalidTransaction { index, reason },
            Self::Store(e) => ChainError::Store(e),
        }
    }
}

impl From<StoreError> for TxError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<&str> for TxError {
    fn from(reason: &str) -> Self {
        Self::Invalid(reason.to_string())
    }
}

/// Apply one transaction, returning the fee owed to the coinbase.
fn execute_transaction(
    state: &mut StateDb<'_>,
    tx: &Transaction,
    gas: u64,
) -> Result<u128, TxError> {
    let mut sender = state
        .account(&tx.from)?
        .ok_or_else(|| TxError::Invalid(format!("unknown sender {}", tx.from)))?;

    if sender.nonce != tx.nonce {
        return Err(TxError::Invalid(format!(
            "nonce {} expected {}",
            tx.nonce, sender.nonce
        )));
    }
    let fee = (gas as u128)
        .checked_mul(tx.gas_price)
        .ok_or("fee overflow")?;
    let cost = fee.checked_add(tx.action.value()).ok_or("cost overflow")?;
    if sender.balance < cost {
        return Err(TxError::Invalid(format!(
            "balance {} below cost {}",
            sender.balance, cost
        )));
    }

    sender.nonce = sender.nonce.checked_add(1).ok_or("nonce overflow")?;
    sender.balance -= fee;

    match &tx.action {
        TxAction::Transfer { to, value } => {
            sender.balance -= value;
            state.set_account(tx.from, sender);
            credit(state, *to, *value)?;
        }
        TxAction::Store { key, value } => {
            state.set_account(tx.from, sender);
            state.set_storage(tx.from, *key, *value);
        }
        TxAction::Deploy { code } => {
            let code_hash = keccak256(code);
            sender.code_hash = code_hash;
            state.set_account(tx.from, sender);
            state.put_code(code_hash, code.clone());
        }
        TxAction::Destruct { beneficiary } => {
            let remaining = sender.balance;
            sender.balance = 0;
            state.set_account(tx.from, sender);
            credit(state, *beneficiary, remaining)?;
            state.destruct(tx.from);
        }
    }
    Ok(fee)
}

/// Add `amount` to `address`, creating the account if needed.
fn credit(state: &mut StateDb<'_>, address: Address, amount: u128) -> Result<(), TxError> {
    let mut account = state.account(&address)?.unwrap_or_default();
    account.balance = account
        .balance
        .checked_add(amount)
        .ok_or("balance overflow")?;
    state.set_account(address, account);
    Ok(())
}
