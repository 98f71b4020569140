//! custom serde helper functions for JSON-RPC params

pub mod sequence {
    use serde::{Deserialize, Deserializer, de::DeserializeOwned};

    /// Deserializes a params sequence with exactly one element.
    pub fn deserialize<'de, T, D>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let mut seq = Vec::<T>::deserialize(d)?;
        if seq.len() != 1 {
            return Err(serde::de::Error::custom(format!(
                "expected params sequence with length 1 but got {}",
                seq.len()
            )))
        }
        seq.pop().ok_or_else(|| serde::de::Error::custom("empty params sequence"))
    }
}

/// Deserializes `[]` or no params at all
pub mod empty_params {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(d: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        let seq = Option::<Vec<()>>::deserialize(d)?.unwrap_or_default();
        if !seq.is_empty() {
            return Err(serde::de::Error::custom(format!(
                "expected params sequence with length 0 but got {}",
                seq.len()
            )))
        }
        Ok(())
    }
}

/// Accepts and discards whatever params were sent, `miner_start` takes an unused thread count
pub mod ignored_params {
    use serde::{Deserializer, de::IgnoredAny};

    pub fn deserialize<'de, D>(d: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        serde::Deserialize::deserialize(d).map(|_: IgnoredAny| ())
    }
}

/// `evm_mine` params: nothing, `[timestamp]` or `[{ timestamp, blocks }]`
pub mod evm_mine_params {
    use crate::types::{EvmMineParams, MineOptions};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(d: D) -> Result<Option<MineOptions>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut seq = Option::<Vec<Option<EvmMineParams>>>::deserialize(d)?.unwrap_or_default();
        if seq.len() > 1 {
            return Err(serde::de::Error::custom(format!(
                "expected at most one evm_mine param but got {}",
                seq.len()
            )))
        }
        Ok(seq.pop().flatten().map(Into::into))
    }
}
