pub mod api;
pub use api::EthApi;

pub mod backend;

pub mod error;

pub mod miner;

pub mod pool;
