//! Chain parameters: block reward, gas schedule and gas limit.

use serde::{Deserialize, Serialize};

/// Parameters every node on a chain must agree on.
///
/// A light-processing node uses them only when it falls back to full
/// execution, but they still have to match the producing node exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    /// Amount credited to the coinbase of every block.
    #[serde(default = "default_block_reward")]
    pub block_reward: u128,

    /// Upper bound on the gas a single block may consume.
    #[serde(default = "default_block_gas_limit")]
    pub block_gas_limit: u64,

    /// Gas charged for every transaction.
    #[serde(default = "default_tx_base_gas")]
    pub tx_base_gas: u64,

    /// Extra gas for writing one storage slot.
    #[serde(default = "default_store_gas")]
    pub store_gas: u64,

    /// Extra gas per byte of deployed code.
    #[serde(default = "default_deploy_byte_gas")]
    pub deploy_byte_gas: u64,

    /// Extra gas for self-destructing an account.
    #[serde(default = "default_destruct_gas")]
    pub destruct_gas: u64,
}

fn default_block_reward() -> u128 {
    2_000_000_000_000_000_000
}

fn default_block_gas_limit() -> u64 {
    30_000_000
}

fn default_tx_base_gas() -> u64 {
    21_000
}

fn default_store_gas() -> u64 {
    20_000
}

fn default_deploy_byte_gas() -> u64 {
    200
}

fn default_destruct_gas() -> u64 {
    5_000
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            block_reward: default_block_reward(),
            block_gas_limit: default_block_gas_limit(),
            tx_base_gas: default_tx_base_gas(),
            store_gas: default_store_gas(),
            deploy_byte_gas: default_deploy_byte_gas(),
            destruct_gas: default_destruct_gas(),
        }
    }
}
