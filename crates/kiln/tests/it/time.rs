//! clock manipulation tests

use futures::StreamExt;
use kiln::{NodeConfig, spawn};
use kiln_core::types::{BlockTag, MineOptions};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn negative_increase_is_ignored() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    assert_eq!(api.evm_increase_time(-5).unwrap(), api.evm_increase_time(0).unwrap());
    assert_eq!(api.evm_increase_time(60).unwrap(), 60);
}

#[tokio::test(flavor = "multi_thread")]
async fn increase_time_moves_block_timestamps() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    let genesis = api.block_by_number(BlockTag::Earliest, false).unwrap().unwrap();

    api.evm_increase_time(3_600).unwrap();
    api.evm_mine(None).await.unwrap();
    let block = api.block_by_number(BlockTag::Latest, false).unwrap().unwrap();
    assert!(block.header.timestamp >= genesis.header.timestamp + 3_600);
}

#[tokio::test(flavor = "multi_thread")]
async fn set_time_can_go_backwards() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    let genesis = api.block_by_number(BlockTag::Earliest, false).unwrap().unwrap();

    api.evm_set_time(1_000_000).unwrap();
    api.evm_mine(None).await.unwrap();
    let block = api.block_by_number(BlockTag::Latest, false).unwrap().unwrap();
    assert!(block.header.timestamp >= 1_000_000);
    assert!(block.header.timestamp < genesis.header.timestamp);
}

#[tokio::test(flavor = "multi_thread")]
async fn evm_mine_at_timestamp() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    let opts = MineOptions { timestamp: Some(2_000_000_000), blocks: Some(2) };
    api.evm_mine(Some(opts)).await.unwrap();

    let first = api.block_by_number(BlockTag::Number(1), false).unwrap().unwrap();
    let second = api.block_by_number(BlockTag::Number(2), false).unwrap().unwrap();
    assert_eq!(first.header.timestamp, 2_000_000_000);
    assert!(second.header.timestamp >= first.header.timestamp);
}

#[tokio::test(flavor = "multi_thread")]
async fn genesis_timestamp_is_configurable() {
    let config = NodeConfig::test().with_genesis_timestamp(Some(1_500_000_000));
    let (api, _handle) = spawn(config).await;
    let genesis = api.block_by_number(BlockTag::Earliest, false).unwrap().unwrap();
    assert_eq!(genesis.header.timestamp, 1_500_000_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn interval_mining_produces_empty_blocks() {
    crate::init_tracing();
    let config = NodeConfig::test().with_blocktime(Some(Duration::from_millis(200)));
    let (api, _handle) = spawn(config).await;
    let mut blocks = api.backend().new_block_notifications();

    let notifications = tokio::time::timeout(Duration::from_secs(10), async {
        let first = blocks.next().await.unwrap();
        let second = blocks.next().await.unwrap();
        (first, second)
    })
    .await
    .unwrap();
    let (first, second) = notifications;
    assert_eq!(second.header.number, first.header.number + 1);
    assert_eq!(second.header.parent_hash, first.hash);
    assert_eq!(first.header.gas_used, 0);
}
