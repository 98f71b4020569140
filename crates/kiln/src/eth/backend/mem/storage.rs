//! Persisted blocks, transactions and receipts

use crate::eth::backend::db::{DatabaseResult, KeyValueStore};
use alloy_primitives::B256;
use kiln_core::block::{Block, MinedTransaction, TransactionReceipt};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

const BLOCKS: u8 = b'b';
const BLOCK_HASHES: u8 = b'h';
const TRANSACTIONS: u8 = b't';
const RECEIPTS: u8 = b'r';

/// Big-endian block number with leading zero bytes stripped, zero is a single zero byte
pub fn block_number_key(number: u64) -> Vec<u8> {
    if number == 0 {
        return vec![0]
    }
    let bytes = number.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    bytes[start..].to_vec()
}

fn table_key(table: u8, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.push(table);
    out.extend_from_slice(key);
    out
}

/// Stores the chain, indexed by block number and block hash
#[derive(Debug)]
pub struct BlockchainStorage {
    db: Arc<dyn KeyValueStore>,
    /// the most recent block, kept in memory
    latest: Option<Block>,
}

// === impl BlockchainStorage ===

impl BlockchainStorage {
    pub fn new(db: Arc<dyn KeyValueStore>) -> Self {
        Self { db, latest: None }
    }

    pub fn latest(&self) -> Option<&Block> {
        self.latest.as_ref()
    }

    pub fn latest_number(&self) -> u64 {
        self.latest.as_ref().map(Block::number).unwrap_or_default()
    }

    pub fn latest_hash(&self) -> B256 {
        self.latest.as_ref().map(|block| block.hash).unwrap_or_default()
    }

    /// Stores the block and makes it the latest one
    pub fn insert_block(&mut self, block: Block) -> DatabaseResult<()> {
        let number = block_number_key(block.number());
        self.db.put(&table_key(BLOCK_HASHES, block.hash.as_slice()), number.clone())?;
        self.put(BLOCKS, &number, &block)?;
        self.latest = Some(block);
        Ok(())
    }

    pub fn insert_transaction(&self, tx: &MinedTransaction) -> DatabaseResult<()> {
        self.put(TRANSACTIONS, tx.hash.as_slice(), tx)
    }

    pub fn insert_receipt(&self, receipt: &TransactionReceipt) -> DatabaseResult<()> {
        self.put(RECEIPTS, receipt.transaction_hash.as_slice(), receipt)
    }

    pub fn block_by_number(&self, number: u64) -> DatabaseResult<Option<Block>> {
        if let Some(latest) = self.latest.as_ref().filter(|block| block.number() == number) {
            return Ok(Some(latest.clone()))
        }
        self.get(BLOCKS, &block_number_key(number))
    }

    pub fn block_by_hash(&self, hash: B256) -> DatabaseResult<Option<Block>> {
        match self.db.get(&table_key(BLOCK_HASHES, hash.as_slice()))? {
            Some(number) => self.get(BLOCKS, &number),
            None => Ok(None),
        }
    }

    pub fn transaction(&self, hash: B256) -> DatabaseResult<Option<MinedTransaction>> {
        self.get(TRANSACTIONS, hash.as_slice())
    }

    pub fn receipt(&self, hash: B256) -> DatabaseResult<Option<TransactionReceipt>> {
        self.get(RECEIPTS, hash.as_slice())
    }

    /// Deletes the block with all its transactions and receipts.
    ///
    /// Does not touch the latest block pointer, see [`Self::set_latest`].
    pub fn remove_block(&self, number: u64) -> DatabaseResult<Option<Block>> {
        let key = block_number_key(number);
        let Some(block) = self.get::<Block>(BLOCKS, &key)? else { return Ok(None) };
        for hash in block.transaction_hashes() {
            self.db.delete(&table_key(TRANSACTIONS, hash.as_slice()))?;
            self.db.delete(&table_key(RECEIPTS, hash.as_slice()))?;
        }
        self.db.delete(&table_key(BLOCK_HASHES, block.hash.as_slice()))?;
        self.db.delete(&table_key(BLOCKS, &key))?;
        trace!(target: "storage", number, hash=?block.hash, "removed block");
        Ok(Some(block))
    }

    pub fn set_latest(&mut self, block: Block) {
        self.latest = Some(block);
    }

    pub fn close(&self) {
        self.db.close();
    }

    fn put<T: Serialize>(&self, table: u8, key: &[u8], value: &T) -> DatabaseResult<()> {
        self.db.put(&table_key(table, key), serde_json::to_vec(value)?)
    }

    fn get<T: DeserializeOwned>(&self, table: u8, key: &[u8]) -> DatabaseResult<Option<T>> {
        match self.db.get(&table_key(table, key))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}
