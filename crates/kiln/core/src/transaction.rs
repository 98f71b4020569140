//! Legacy (EIP-155) transactions

use crate::types::intrinsic_gas;
use alloy_primitives::{Address, B256, Bytes, Signature, SignatureError, U256, keccak256};
use alloy_rlp::{BufMut, EMPTY_STRING_CODE, Encodable, Header};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};

/// A transaction as submitted by `eth_sendTransaction`, fields the caller omitted are `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(default, alias = "input", skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
}

/// A legacy transaction with EIP-155 replay protection.
///
/// Transactions sent from unlocked accounts carry no signature, they are bound to `from` instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub from: Address,
    pub to: Option<Address>,
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub value: U256,
    pub input: Bytes,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

// === impl Transaction ===

impl Transaction {
    /// Whether this transaction deploys a contract
    pub const fn is_create(&self) -> bool {
        self.to.is_none()
    }

    pub fn intrinsic_gas(&self) -> u64 {
        intrinsic_gas(&self.input, self.is_create())
    }

    /// Upfront cost: `gas_limit * gas_price + value`
    pub fn max_cost(&self) -> U256 {
        U256::from(self.gas_limit).saturating_mul(self.gas_price).saturating_add(self.value)
    }

    /// The hash that gets signed, see EIP-155
    pub fn signature_hash(&self) -> B256 {
        let mut out = Vec::new();
        let tail = self.chain_id.length() + 2;
        Header { list: true, payload_length: self.fields_len() + tail }.encode(&mut out);
        self.encode_fields(&mut out);
        self.chain_id.encode(&mut out);
        out.put_u8(EMPTY_STRING_CODE);
        out.put_u8(EMPTY_STRING_CODE);
        keccak256(out)
    }

    /// Signs the transaction with the sender's key.
    pub fn sign(&mut self, signer: &PrivateKeySigner) -> alloy_signer::Result<()> {
        let signature = signer.sign_hash_sync(&self.signature_hash())?;
        self.signature = Some(signature);
        Ok(())
    }

    /// Recovers the signer of a signed transaction
    pub fn recover(&self) -> Result<Address, SignatureError> {
        match &self.signature {
            Some(signature) => signature.recover_address_from_prehash(&self.signature_hash()),
            None => Err(SignatureError::FromBytes("transaction is not signed")),
        }
    }

    /// The transaction hash, `keccak256` of the encoded transaction.
    pub fn hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    /// EIP-155 `v` value
    fn v(&self) -> u64 {
        let parity = self.signature.map(|sig| sig.v() as u64).unwrap_or_default();
        self.chain_id * 2 + 35 + parity
    }

    /// `r` and `s`, unsigned transactions use the sender in place of `r`
    fn rs(&self) -> (U256, U256) {
        match &self.signature {
            Some(signature) => (signature.r(), signature.s()),
            None => (U256::from_be_slice(self.from.as_slice()), U256::ZERO),
        }
    }

    fn to_len(&self) -> usize {
        self.to.map(|to| to.length()).unwrap_or(1)
    }

    fn fields_len(&self) -> usize {
        self.nonce.length() +
            self.gas_price.length() +
            self.gas_limit.length() +
            self.to_len() +
            self.value.length() +
            self.input.length()
    }

    fn encode_fields(&self, out: &mut dyn BufMut) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        match &self.to {
            Some(to) => to.encode(out),
            None => out.put_u8(EMPTY_STRING_CODE),
        }
        self.value.encode(out);
        self.input.encode(out);
    }

    fn payload_len(&self) -> usize {
        let (r, s) = self.rs();
        self.fields_len() + self.v().length() + r.length() + s.length()
    }
}

impl Encodable for Transaction {
    fn encode(&self, out: &mut dyn BufMut) {
        Header { list: true, payload_length: self.payload_len() }.encode(out);
        self.encode_fields(out);
        let (r, s) = self.rs();
        self.v().encode(out);
        r.encode(out);
        s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_len();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}
