//! Block production on top of the current head.

use std::collections::HashMap;

use dsync_types::{Address, Hash256, Timestamp};

use crate::block::{receipts_root, transactions_root, Block, Header, Transaction, TxAction};
use crate::blockchain::BlockChain;
use crate::error::ChainError;
use crate::executor::execute_block;
use crate::state::StateDb;

/// Seconds between generated blocks.
pub const BLOCK_INTERVAL_SECS: u64 = 3;

impl BlockChain {
    /// Execute `txs` on the current head and seal the resulting header.
    /// The block is returned, not inserted.
    pub fn build_block(
        &self,
        coinbase: Address,
        timestamp: Timestamp,
        txs: Vec<Transaction>,
    ) -> Result<Block, ChainError> {
        let _guard = self.lock_insert();
        let parent_hash = self.head_hash();
        let parent = self.head_header();

        let mut state = StateDb::new(self.store());
        let result = execute_block(&mut state, &self.config().params, coinbase, &txs)?;
        let header = Header {
            parent_hash,
            number: parent.number + 1,
            timestamp,
            coinbase,
            state_root: state.state_root()?,
            transactions_root: transactions_root(&txs)?,
            receipts_root: receipts_root(&result.receipts)?,
            gas_used: result.gas_used,
        };
        Ok(Block {
            header,
            transactions: txs,
        })
    }
}

/// Collects the transactions of one block under construction, tracking
/// sender nonces across them.
pub struct BlockGen<'a> {
    chain: &'a BlockChain,
    index: usize,
    number: u64,
    coinbase: Address,
    timestamp: Timestamp,
    gas_price: u128,
    txs: Vec<Transaction>,
    nonces: HashMap<Address, u64>,
}

impl<'a> BlockGen<'a> {
    fn new(chain: &'a BlockChain, index: usize) -> Self {
        let parent = chain.head_header();
        Self {
            chain,
            index,
            number: parent.number + 1,
            coinbase: Address::ZERO,
            timestamp: parent.timestamp.plus(BLOCK_INTERVAL_SECS),
            gas_price: 1,
            txs: Vec::new(),
            nonces: HashMap::new(),
        }
    }

    /// Position of this block in the generated sequence, from zero.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn set_coinbase(&mut self, coinbase: Address) {
        self.coinbase = coinbase;
    }

    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
    }

    pub fn set_gas_price(&mut self, gas_price: u128) {
        self.gas_price = gas_price;
    }

    /// Next unused nonce of `from`, counting transactions already added.
    pub fn nonce(&mut self, from: Address) -> Result<u64, ChainError> {
        if let Some(nonce) = self.nonces.get(&from) {
            return Ok(*nonce);
        }
        let nonce = self.chain.account(&from)?.map_or(0, |a| a.nonce);
        self.nonces.insert(from, nonce);
        Ok(nonce)
    }

    /// Add a pre-built transaction as is.
    pub fn add_tx(&mut self, tx: Transaction) {
        self.nonces.insert(tx.from, tx.nonce + 1);
        self.txs.push(tx);
    }

    pub fn transfer(&mut self, from: Address, to: Address, value: u128) -> Result<(), ChainError> {
        self.push(from, TxAction::Transfer { to, value })
    }

    pub fn store(&mut self, from: Address, key: Hash256, value: Hash256) -> Result<(), ChainError> {
        self.push(from, TxAction::Store { key, value })
    }

    pub fn deploy(&mut self, from: Address, code: Vec<u8>) -> Result<(), ChainError> {
        self.push(from, TxAction::Deploy { code })
    }

    pub fn destruct(&mut self, from: Address, beneficiary: Address) -> Result<(), ChainError> {
        self.push(from, TxAction::Destruct { beneficiary })
    }

    fn push(&mut self, from: Address, action: TxAction) -> Result<(), ChainError> {
        let nonce = self.nonce(from)?;
        self.add_tx(Transaction {
            from,
            nonce,
            gas_price: self.gas_price,
            action,
        });
        Ok(())
    }
}

/// Build and insert `n` blocks on `chain`, letting `fill` add the
/// transactions of each. Returns the blocks in order.
pub fn generate_chain<F>(chain: &BlockChain, n: usize, mut fill: F) -> Result<Vec<Block>, ChainError>
where
    F: FnMut(&mut BlockGen<'_>) -> Result<(), ChainError>,
{
    let mut blocks = Vec::with_capacity(n);
    for index in 0..n {
        let mut block_gen = BlockGen::new(chain, index);
        fill(&mut block_gen)?;
        let block = chain.build_block(block_gen.coinbase, block_gen.timestamp, block_gen.txs)?;
        chain
            .insert_chain(std::slice::from_ref(&block))
            .map_err(|e| e.source)?;
        blocks.push(block);
    }
    Ok(blocks)
}
