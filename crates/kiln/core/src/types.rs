use alloy_primitives::{B256, U256, b256};
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use std::{fmt, str::FromStr};

/// Root hash of an empty trie, `keccak256(rlp(""))`
pub const EMPTY_ROOT_HASH: B256 =
    b256!("0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// `keccak256("")`, the code hash of accounts without code
pub const KECCAK_EMPTY: B256 =
    b256!("0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Gas charged for every transaction
pub const MIN_TRANSACTION_GAS: u64 = 21_000;

/// Additional gas charged for contract creation
pub const TX_CREATE_GAS: u64 = 32_000;

const TX_DATA_ZERO_GAS: u64 = 4;
const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Returns the gas a transaction costs before any execution happens.
pub fn intrinsic_gas(data: &[u8], is_create: bool) -> u64 {
    let zeros = data.iter().filter(|b| **b == 0).count() as u64;
    let non_zeros = data.len() as u64 - zeros;
    let base = if is_create { MIN_TRANSACTION_GAS + TX_CREATE_GAS } else { MIN_TRANSACTION_GAS };
    base + zeros * TX_DATA_ZERO_GAS + non_zeros * TX_DATA_NON_ZERO_GAS
}

/// An account as stored in the state trie
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub nonce: U256,
    pub balance: U256,
    pub storage_root: B256,
    pub code_hash: B256,
}

impl Account {
    pub fn with_balance(balance: U256) -> Self {
        Self { balance, ..Default::default() }
    }

    /// Whether this account has no nonce, balance, code or storage
    pub fn is_empty(&self) -> bool {
        self.nonce.is_zero() &&
            self.balance.is_zero() &&
            self.code_hash == KECCAK_EMPTY &&
            self.storage_root == EMPTY_ROOT_HASH
    }
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: U256::ZERO,
            balance: U256::ZERO,
            storage_root: EMPTY_ROOT_HASH,
            code_hash: KECCAK_EMPTY,
        }
    }
}

/// A block identifier as accepted by the read methods
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlockTag {
    #[default]
    Latest,
    Earliest,
    Pending,
    Number(u64),
}

impl BlockTag {
    pub const fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(num) => Some(*num),
            _ => None,
        }
    }
}

impl From<u64> for BlockTag {
    fn from(num: u64) -> Self {
        Self::Number(num)
    }
}

impl FromStr for BlockTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Self::Latest),
            "earliest" => Ok(Self::Earliest),
            "pending" => Ok(Self::Pending),
            num => {
                let parsed = match num.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => num.parse(),
                };
                parsed.map(Self::Number).map_err(|err| format!("invalid block tag `{s}`: {err}"))
            }
        }
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Earliest => f.write_str("earliest"),
            Self::Pending => f.write_str("pending"),
            Self::Number(num) => write!(f, "{num:#x}"),
        }
    }
}

impl Serialize for BlockTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Lenient {
            Num(u64),
            Str(String),
        }
        match Lenient::deserialize(deserializer)? {
            Lenient::Num(num) => Ok(Self::Number(num)),
            Lenient::Str(s) => s.parse().map_err(D::Error::custom),
        }
    }
}

/// How many transactions a single block may hold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capacity {
    /// One transaction per block
    Single,
    /// As many transactions as the block gas limit allows
    FillBlock,
}

impl Capacity {
    pub const fn max_transactions(&self) -> usize {
        match self {
            Self::Single => 1,
            Self::FillBlock => usize::MAX,
        }
    }
}

/// Options for `evm_mine`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MineOptions {
    /// Timestamp of the first mined block, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// How many blocks to mine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<u64>,
}

impl MineOptions {
    pub fn blocks(&self) -> u64 {
        self.blocks.unwrap_or(1).max(1)
    }
}

/// Either a plain timestamp or [`MineOptions`], `evm_mine` accepts both
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EvmMineParams {
    Timestamp(u64),
    Options(MineOptions),
}

impl From<EvmMineParams> for MineOptions {
    fn from(params: EvmMineParams) -> Self {
        match params {
            EvmMineParams::Timestamp(timestamp) => {
                Self { timestamp: Some(timestamp), blocks: None }
            }
            EvmMineParams::Options(opts) => opts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;

    #[test]
    fn empty_constants() {
        assert_eq!(KECCAK_EMPTY, keccak256([]));
        assert_eq!(EMPTY_ROOT_HASH, keccak256([0x80]));
        assert!(Account::default().is_empty());
    }

    #[test]
    fn intrinsic_gas_counts_bytes() {
        assert_eq!(intrinsic_gas(&[], false), 21_000);
        assert_eq!(intrinsic_gas(&[0, 0, 1], false), 21_000 + 8 + 16);
        assert_eq!(intrinsic_gas(&[], true), 53_000);
    }

    #[test]
    fn parse_block_tags() {
        let tag: BlockTag = serde_json::from_str("\"latest\"").unwrap();
        assert_eq!(tag, BlockTag::Latest);
        let tag: BlockTag = serde_json::from_str("\"0x1a\"").unwrap();
        assert_eq!(tag, BlockTag::Number(26));
        let tag: BlockTag = serde_json::from_str("7").unwrap();
        assert_eq!(tag, BlockTag::Number(7));
        assert!(serde_json::from_str::<BlockTag>("\"safe-ish\"").is_err());
    }

    #[test]
    fn mine_params() {
        let opts: MineOptions =
            serde_json::from_str::<EvmMineParams>("{\"blocks\": 3}").unwrap().into();
        assert_eq!(opts.blocks(), 3);
        let opts: MineOptions = serde_json::from_str::<EvmMineParams>("1700000000").unwrap().into();
        assert_eq!(opts.timestamp, Some(1_700_000_000));
        assert_eq!(opts.blocks(), 1);
    }
}
