//! Genesis block construction from an allocation list.

use dsync_store::ChainStore;
use dsync_types::{Address, BlockHash, Timestamp};

use crate::block::{receipts_root, transactions_root, Block, Header};
use crate::error::ChainError;
use crate::state::StateDb;

/// Initial state of a chain. Every node on a network must use the same one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Genesis {
    pub timestamp: Timestamp,
    /// Pre-funded accounts.
    pub alloc: Vec<(Address, u128)>,
}

impl Genesis {
    pub fn new(timestamp: Timestamp, alloc: Vec<(Address, u128)>) -> Self {
        Self { timestamp, alloc }
    }

    /// Build the genesis overlay and block on top of `store`, which must be
    /// empty. Nothing is written.
    pub fn build<'a>(&self, store: &'a dyn ChainStore) -> Result<(Block, StateDb<'a>), ChainError> {
        let mut state = StateDb::new(store);
        for (address, balance) in &self.alloc {
            let mut account = state.account(address)?.unwrap_or_default();
            account.balance = account
                .balance
                .checked_add(*balance)
                .ok_or_else(|| ChainError::Corrupt(format!("genesis balance overflow for {address}")))?;
            state.set_account(*address, account);
        }
        let header = Header {
            parent_hash: BlockHash::ZERO,
            number: 0,
            timestamp: self.timestamp,
            coinbase: Address::ZERO,
            state_root: state.state_root()?,
            transactions_root: transactions_root(&[])?,
            receipts_root: receipts_root(&[])?,
            gas_used: 0,
        };
        Ok((
            Block {
                header,
                transactions: Vec::new(),
            },
            state,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsync_nullables::NullStore;

    fn genesis() -> Genesis {
        Genesis::new(
            Timestamp::new(1_700_000_000),
            vec![(Address::repeat_byte(1), 1_000), (Address::repeat_byte(2), 2_000)],
        )
    }

    fn genesis_hash(genesis: &Genesis) -> BlockHash {
        let store = NullStore::new();
        genesis.build(&store).unwrap().0.hash()
    }

    #[test]
    fn genesis_hash_is_deterministic() {
        assert_eq!(genesis_hash(&genesis()), genesis_hash(&genesis()));
    }

    #[test]
    fn allocation_changes_hash() {
        let mut other = genesis();
        other.alloc[0].1 += 1;
        assert_ne!(genesis_hash(&genesis()), genesis_hash(&other));
    }

    #[test]
    fn genesis_block_carries_allocation() {
        let store = NullStore::new();
        let (block, state) = genesis().build(&store).unwrap();
        assert_eq!(block.number(), 0);
        assert!(block.parent_hash().is_zero());
        assert_eq!(
            state.account(&Address::repeat_byte(2)).unwrap().unwrap().balance,
            2_000
        );
    }
}
