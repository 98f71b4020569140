use crate::transaction::Transaction;
use alloy_primitives::{Address, B256, Bloom, Bytes, U256, keccak256};
use alloy_rlp::{Encodable, RlpDecodable, RlpEncodable};
use alloy_trie::{HashBuilder, Nibbles};
use serde::{Deserialize, Serialize};

/// A block header
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub parent_hash: B256,
    pub coinbase: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
}

impl Header {
    /// Hashes the header, this is not cached
    pub fn hash_slow(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }
}

/// A sealed block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: B256,
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Seals the header and transactions into a block
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self { hash: header.hash_slow(), header, transactions }
    }

    pub const fn number(&self) -> u64 {
        self.header.number
    }

    pub fn transaction_hashes(&self) -> impl Iterator<Item = B256> + '_ {
        self.transactions.iter().map(Transaction::hash)
    }
}

/// A log emitted during execution
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Consensus receipt, the part that goes into the receipts trie
#[derive(Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub status: bool,
    pub cumulative_gas_used: u64,
    pub logs_bloom: Bloom,
    pub logs: Vec<Log>,
}

/// A log as exposed to clients, with its block position
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockLog {
    #[serde(flatten)]
    pub inner: Log,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub log_index: u64,
}

/// Receipt of a mined transaction as exposed to clients
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub effective_gas_price: U256,
    pub contract_address: Option<Address>,
    pub logs: Vec<BlockLog>,
    pub logs_bloom: Bloom,
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A mined transaction together with its position in the chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinedTransaction {
    pub hash: B256,
    pub block_hash: B256,
    pub block_number: u64,
    pub transaction_index: u64,
    #[serde(flatten)]
    pub transaction: Transaction,
}

/// Root of a trie keyed by `rlp(index)`, as used for transactions and receipts.
pub fn ordered_trie_root<T: Encodable>(items: &[T]) -> B256 {
    let mut leaves = items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            (Nibbles::unpack(alloy_rlp::encode(idx as u64)), alloy_rlp::encode(item))
        })
        .collect::<Vec<_>>();
    leaves.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut builder = HashBuilder::default();
    for (key, value) in leaves {
        builder.add_leaf(key, &value);
    }
    builder.root()
}
