//! Canonical chain, block insertion and the light processor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use dsync_store::{Account, ChainStore, StoreError, WriteBatch, HEAD_BLOCK_KEY};
use dsync_types::{Address, BlockHash, ChainParams, Hash256};
use tracing::{debug, info, warn};

use crate::block::{receipts_root, transactions_root, Block, Header};
use crate::diff_cache::{DiffCache, DiffSource, PutOutcome};
use crate::diff_layer::DiffLayer;
use crate::encoding;
use crate::error::{ChainError, DiffError, InsertError};
use crate::executor::execute_block;
use crate::fault::{DiffFault, DiffFaultReporter};
use crate::genesis::Genesis;
use crate::state::StateDb;
use crate::stats::ChainStats;

/// Default number of diff layers kept in memory.
pub const DEFAULT_MAX_DIFF_LIMIT: usize = 128;

/// Default upper bound on one encoded diff layer.
pub const DEFAULT_MAX_DIFF_SIZE: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    /// Capacity of the diff cache.
    pub max_diff_limit: usize,
    /// Largest encoded diff accepted from a peer, in bytes.
    pub max_diff_size: usize,
    /// Start with the light processor enabled.
    pub light_process: bool,
    pub params: ChainParams,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_diff_limit: DEFAULT_MAX_DIFF_LIMIT,
            max_diff_size: DEFAULT_MAX_DIFF_SIZE,
            light_process: false,
            params: ChainParams::default(),
        }
    }
}

#[derive(Clone)]
struct Head {
    hash: BlockHash,
    header: Header,
}

/// Result of trying a cached diff against a block.
enum LightOutcome<'a> {
    Applied(StateDb<'a>),
    Rejected(DiffError),
}

pub struct BlockChain {
    store: Arc<dyn ChainStore>,
    config: ChainConfig,
    genesis_hash: BlockHash,
    head: RwLock<Head>,
    diff_cache: DiffCache,
    light_process: AtomicBool,
    /// Held for the whole of every `insert_chain*` call.
    insert_lock: Mutex<()>,
    reporter: RwLock<Option<Arc<dyn DiffFaultReporter>>>,
    stats: ChainStats,
}

impl BlockChain {
    /// Open the chain in `store`, writing `genesis` first if the store is
    /// empty.
    pub fn new(
        store: Arc<dyn ChainStore>,
        config: ChainConfig,
        genesis: &Genesis,
    ) -> Result<Self, ChainError> {
        let (genesis_hash, head) = match store.get_meta(HEAD_BLOCK_KEY)? {
            Some(bytes) => {
                let hash = decode_hash(&bytes)?;
                let block = load_block(store.as_ref(), &hash)?
                    .ok_or_else(|| ChainError::Corrupt(format!("head block {hash} missing")))?;
                let genesis_hash = store
                    .get_canonical_hash(0)?
                    .ok_or_else(|| ChainError::Corrupt("no canonical genesis".into()))?;
                info!(number = block.number(), head = %hash, "loaded existing chain");
                (
                    genesis_hash,
                    Head {
                        hash,
                        header: block.header,
                    },
                )
            }
            None => {
                let (block, state) = genesis.build(store.as_ref())?;
                let hash = block.hash();
                write_block(store.as_ref(), &block, hash, &state)?;
                info!(genesis = %hash, accounts = genesis.alloc.len(), "initialized genesis");
                (
                    hash,
                    Head {
                        hash,
                        header: block.header,
                    },
                )
            }
        };

        Ok(Self {
            diff_cache: DiffCache::new(config.max_diff_limit),
            light_process: AtomicBool::new(config.light_process),
            store,
            config,
            genesis_hash,
            head: RwLock::new(head),
            insert_lock: Mutex::new(()),
            reporter: RwLock::new(None),
            stats: ChainStats::new(),
        })
    }

    /// Route diff faults to `reporter`.
    pub fn set_fault_reporter(&self, reporter: Arc<dyn DiffFaultReporter>) {
        *self.reporter.write().expect("reporter lock poisoned") = Some(reporter);
    }

    /// Switch this instance to light processing. There is no way back.
    pub fn enable_light_processor(&self) {
        if !self.light_process.swap(true, Ordering::SeqCst) {
            info!("light processor enabled");
        }
    }

    pub fn light_processor_enabled(&self) -> bool {
        self.light_process.load(Ordering::SeqCst)
    }

    /// Insert blocks in order using this instance's processing mode.
    pub fn insert_chain(&self, blocks: &[Block]) -> Result<usize, InsertError> {
        self.insert_chain_with_mode(blocks, self.light_processor_enabled())
    }

    /// Insert blocks in order, applying cached diffs when `light` is set.
    ///
    /// Stops at the first failure; blocks before it stay committed.
    pub fn insert_chain_with_mode(&self, blocks: &[Block], light: bool) -> Result<usize, InsertError> {
        let _guard = self.lock_insert();
        for (index, block) in blocks.iter().enumerate() {
            if let Err(source) = self.insert_block(block, light) {
                warn!(
                    number = block.number(),
                    block = %block.hash(),
                    error = %source,
                    "block insertion failed"
                );
                return Err(InsertError {
                    inserted: index,
                    source,
                });
            }
        }
        Ok(blocks.len())
    }

    /// Cache a decoded diff layer received from `peer_id`.
    pub fn handle_diff_layer(&self, layer: DiffLayer, peer_id: &str) -> Result<(), DiffError> {
        let block = layer.block_hash;
        let raw = match layer.encode() {
            Ok(raw) => raw,
            Err(e) => return Err(self.reject(peer_id, block, e)),
        };
        if raw.len() > self.config.max_diff_size {
            let err = DiffError::TooLarge {
                size: raw.len(),
                max: self.config.max_diff_size,
            };
            return Err(self.reject(peer_id, block, err));
        }
        self.cache_peer_diff(layer, raw, peer_id).map(|_| ())
    }

    /// Decode and cache a raw diff layer received from `peer_id`. Returns the
    /// block hash it was filed under.
    pub fn handle_raw_diff_layer(&self, raw: Vec<u8>, peer_id: &str) -> Result<BlockHash, DiffError> {
        match DiffLayer::decode(&raw, self.config.max_diff_size) {
            Ok(layer) => self.cache_peer_diff(layer, raw, peer_id),
            Err(e) => Err(self.reject(peer_id, BlockHash::ZERO, e)),
        }
    }

    /// Like [`BlockChain::handle_raw_diff_layer`], for a diff that answers a
    /// request for `expected`.
    pub fn handle_requested_diff_layer(
        &self,
        raw: Vec<u8>,
        peer_id: &str,
        expected: BlockHash,
    ) -> Result<BlockHash, DiffError> {
        let layer = match DiffLayer::decode(&raw, self.config.max_diff_size) {
            Ok(layer) => layer,
            Err(e) => return Err(self.reject(peer_id, expected, e)),
        };
        if layer.block_hash != expected {
            self.stats.inc_diffs_rejected();
            self.report(peer_id, expected, DiffFault::HashMismatch);
            return Err(DiffError::HashMismatch {
                expected,
                got: layer.block_hash,
            });
        }
        self.cache_peer_diff(layer, raw, peer_id)
    }

    /// Exact bytes of the cached diff for `hash`, for serving peers.
    pub fn get_diff_layer_raw(&self, hash: &BlockHash) -> Option<Vec<u8>> {
        self.diff_cache.get_raw(hash)
    }

    pub fn diff_cache(&self) -> &DiffCache {
        &self.diff_cache
    }

    pub fn stats(&self) -> &ChainStats {
        &self.stats
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ChainStore {
        self.store.as_ref()
    }

    pub fn genesis_hash(&self) -> BlockHash {
        self.genesis_hash
    }

    pub fn head_hash(&self) -> BlockHash {
        self.read_head().hash
    }

    pub fn head_number(&self) -> u64 {
        self.read_head().header.number
    }

    pub fn head_header(&self) -> Header {
        self.read_head().header.clone()
    }

    pub fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>, ChainError> {
        load_block(self.store.as_ref(), hash)
    }

    pub fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, ChainError> {
        match self.store.get_canonical_hash(number)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    pub fn account(&self, address: &Address) -> Result<Option<Account>, StoreError> {
        self.store.get_account(address)
    }

    pub fn storage(&self, address: &Address, key: &Hash256) -> Result<Hash256, StoreError> {
        self.store.get_storage(address, key)
    }

    /// Recompute the root of the committed state.
    pub fn state_root(&self) -> Result<Hash256, StoreError> {
        StateDb::new(self.store.as_ref()).state_root()
    }

    pub(crate) fn lock_insert(&self) -> MutexGuard<'_, ()> {
        self.insert_lock.lock().expect("insert lock poisoned")
    }

    fn insert_block(&self, block: &Block, light: bool) -> Result<(), ChainError> {
        let hash = block.hash();
        if self.store.exists(&hash)? {
            debug!(number = block.number(), block = %hash, "skipping known block");
            return Ok(());
        }
        let head = self.read_head().clone();
        self.validate_header(&head, block, hash)?;

        if light {
            if let Some(cached) = self.diff_cache.get(&hash) {
                match self.apply_diff_layer(block, hash, &cached.layer)? {
                    LightOutcome::Applied(state) => {
                        self.commit(block, hash, &state)?;
                        self.stats.inc_light_applied();
                        debug!(number = block.number(), block = %hash, "inserted block from diff layer");
                        return Ok(());
                    }
                    LightOutcome::Rejected(err) => {
                        warn!(
                            number = block.number(),
                            block = %hash,
                            diff_hash = %cached.diff_hash,
                            error = %err,
                            "diff layer rejected, falling back to full execution"
                        );
                        self.diff_cache.remove(&hash);
                        if let Some(peer) = cached.source.peer_id() {
                            self.report(peer, hash, DiffFault::StateMismatch);
                        }
                        self.stats.inc_light_fallbacks();
                    }
                }
            }
        }

        self.execute_and_commit(block, hash)
    }

    fn validate_header(&self, head: &Head, block: &Block, hash: BlockHash) -> Result<(), ChainError> {
        let header = &block.header;
        if header.parent_hash != head.hash {
            if self.store.exists(&header.parent_hash)? {
                return Err(ChainError::SideChain {
                    hash,
                    number: header.number,
                });
            }
            return Err(ChainError::UnknownParent {
                hash,
                parent: header.parent_hash,
            });
        }
        let expected = head.header.number + 1;
        if header.number != expected {
            return Err(ChainError::InvalidNumber {
                expected,
                got: header.number,
            });
        }
        if header.timestamp < head.header.timestamp {
            return Err(ChainError::InvalidTimestamp {
                parent: head.header.timestamp,
                got: header.timestamp,
            });
        }
        let computed = transactions_root(&block.transactions)?;
        if computed != header.transactions_root {
            return Err(ChainError::TransactionsRootMismatch {
                expected: header.transactions_root,
                computed,
            });
        }
        if header.gas_used > self.config.params.block_gas_limit {
            return Err(ChainError::GasLimitExceeded {
                used: header.gas_used,
                limit: self.config.params.block_gas_limit,
            });
        }
        Ok(())
    }

    /// Replay `diff` over the parent state and check it reproduces `block`.
    ///
    /// Only storage failures are errors; every disagreement with the header
    /// is a rejection.
    fn apply_diff_layer(
        &self,
        block: &Block,
        hash: BlockHash,
        diff: &DiffLayer,
    ) -> Result<LightOutcome<'_>, StoreError> {
        let header = &block.header;
        if diff.block_hash != hash || diff.number != header.number {
            return Ok(LightOutcome::Rejected(DiffError::ReceiptsMismatch(format!(
                "diff describes block {} at height {}",
                diff.block_hash, diff.number
            ))));
        }
        if let Err(reason) = check_receipts(block, diff) {
            return Ok(LightOutcome::Rejected(DiffError::ReceiptsMismatch(reason)));
        }

        let mut state = StateDb::new(self.store.as_ref());
        state.apply_diff(diff)?;
        if let Some(reason) = state.find_unanchored(diff)? {
            return Ok(LightOutcome::Rejected(DiffError::Unanchored(reason)));
        }
        let computed = state.state_root()?;
        if computed != header.state_root {
            return Ok(LightOutcome::Rejected(DiffError::StateRootMismatch {
                expected: header.state_root,
                computed,
            }));
        }
        Ok(LightOutcome::Applied(state))
    }

    fn execute_and_commit(&self, block: &Block, hash: BlockHash) -> Result<(), ChainError> {
        let header = &block.header;
        let mut state = StateDb::new(self.store.as_ref());
        let result = execute_block(
            &mut state,
            &self.config.params,
            header.coinbase,
            &block.transactions,
        )?;

        if result.gas_used != header.gas_used {
            return Err(ChainError::GasUsedMismatch {
                expected: header.gas_used,
                computed: result.gas_used,
            });
        }
        let computed = receipts_root(&result.receipts)?;
        if computed != header.receipts_root {
            return Err(ChainError::ReceiptsRootMismatch {
                expected: header.receipts_root,
                computed,
            });
        }
        let computed = state.state_root()?;
        if computed != header.state_root {
            return Err(ChainError::StateRootMismatch {
                expected: header.state_root,
                computed,
            });
        }

        let diff = state.to_diff(hash, header.number, result.receipts);
        self.commit(block, hash, &state)?;
        self.stats.inc_full_executed();
        debug!(number = header.number, block = %hash, "inserted block by execution");
        self.cache_local_diff(hash, diff);
        Ok(())
    }

    fn commit(&self, block: &Block, hash: BlockHash, state: &StateDb<'_>) -> Result<(), ChainError> {
        write_block(self.store.as_ref(), block, hash, state)?;
        *self.head.write().expect("head lock poisoned") = Head {
            hash,
            header: block.header.clone(),
        };
        Ok(())
    }

    /// Keep our own diff so peers can fetch it. A peer diff that disagrees
    /// with what execution produced is replaced and its sender reported.
    fn cache_local_diff(&self, hash: BlockHash, diff: DiffLayer) {
        let raw = match diff.encode() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(block = %hash, error = %e, "failed to encode local diff layer");
                return;
            }
        };
        match self
            .diff_cache
            .put(hash, diff.clone(), raw.clone(), DiffSource::Local)
        {
            Ok(_) => {}
            Err(DiffError::ConflictingDiff { .. }) => {
                if let Some(stale) = self.diff_cache.remove(&hash) {
                    if let Some(peer) = stale.source.peer_id() {
                        self.report(peer, hash, DiffFault::Conflicting);
                    }
                }
                if let Err(e) = self.diff_cache.put(hash, diff, raw, DiffSource::Local) {
                    warn!(block = %hash, error = %e, "failed to cache local diff layer");
                }
            }
            Err(e) => warn!(block = %hash, error = %e, "failed to cache local diff layer"),
        }
    }

    fn cache_peer_diff(&self, layer: DiffLayer, raw: Vec<u8>, peer_id: &str) -> Result<BlockHash, DiffError> {
        let block = layer.block_hash;
        let number = layer.number;
        match self
            .diff_cache
            .put(block, layer, raw, DiffSource::Peer(peer_id.to_string()))
        {
            Ok(outcome) => {
                if let PutOutcome::Inserted { evicted: Some(old) } = outcome {
                    debug!(evicted = %old, "diff cache full, evicted oldest layer");
                }
                self.stats.inc_diffs_accepted();
                debug!(peer = peer_id, number, block = %block, ?outcome, "cached diff layer");
                Ok(block)
            }
            Err(e) => {
                let fault = match e {
                    DiffError::ConflictingDiff { .. } => DiffFault::Conflicting,
                    _ => DiffFault::Malformed,
                };
                warn!(peer = peer_id, block = %block, error = %e, "diff layer refused");
                self.stats.inc_diffs_rejected();
                self.report(peer_id, block, fault);
                Err(e)
            }
        }
    }

    fn reject(&self, peer_id: &str, block: BlockHash, err: DiffError) -> DiffError {
        debug!(peer = peer_id, error = %err, "malformed diff layer");
        self.stats.inc_diffs_rejected();
        self.report(peer_id, block, DiffFault::Malformed);
        err
    }

    fn report(&self, peer_id: &str, block: BlockHash, fault: DiffFault) {
        let reporter = self.reporter.read().expect("reporter lock poisoned").clone();
        if let Some(reporter) = reporter {
            reporter.report(peer_id, block, fault);
        }
    }

    fn read_head(&self) -> std::sync::RwLockReadGuard<'_, Head> {
        self.head.read().expect("head lock poisoned")
    }
}

/// Receipts in the diff must line up with the block's transactions.
fn check_receipts(block: &Block, diff: &DiffLayer) -> Result<(), String> {
    if diff.receipts.len() != block.transactions.len() {
        return Err(format!(
            "{} receipts for {} transactions",
            diff.receipts.len(),
            block.transactions.len()
        ));
    }
    let mut cumulative = 0u64;
    for (index, (receipt, tx)) in diff.receipts.iter().zip(&block.transactions).enumerate() {
        if receipt.tx_hash != tx.hash() {
            return Err(format!("receipt #{index} is for another transaction"));
        }
        cumulative = cumulative.saturating_add(receipt.gas_used);
        if receipt.cumulative_gas_used != cumulative {
            return Err(format!("receipt #{index} has inconsistent cumulative gas"));
        }
    }
    if diff.gas_used() != block.header.gas_used {
        return Err(format!(
            "gas used {} differs from header {}",
            diff.gas_used(),
            block.header.gas_used
        ));
    }
    let computed = receipts_root(&diff.receipts).map_err(|e| e.to_string())?;
    if computed != block.header.receipts_root {
        return Err(format!("receipts root {computed} differs from header"));
    }
    Ok(())
}

/// Commit `state` and `block` as the new head in one batch.
fn write_block(
    store: &dyn ChainStore,
    block: &Block,
    hash: BlockHash,
    state: &StateDb<'_>,
) -> Result<(), ChainError> {
    let mut batch = WriteBatch::new();
    state.write_into(&mut batch);
    batch.put_block(hash, encoding::encode(block)?);
    batch.put_canonical(block.number(), hash);
    batch.put_meta(HEAD_BLOCK_KEY, hash.as_bytes().to_vec());
    store.write_batch(batch)?;
    Ok(())
}

fn load_block(store: &dyn ChainStore, hash: &BlockHash) -> Result<Option<Block>, ChainError> {
    if !store.exists(hash)? {
        return Ok(None);
    }
    let bytes = store.get_block(hash)?;
    Ok(Some(encoding::decode(&bytes, bytes.len() as u64)?))
}

fn decode_hash(bytes: &[u8]) -> Result<BlockHash, ChainError> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ChainError::Corrupt(format!("head pointer has {} bytes", bytes.len())))?;
    Ok(BlockHash::new(array))
}
