use std::time::Duration;

use anyhow::Result;
use storage_host::{
    consensus_follower, reactor,
    test_utils::{Renter, apply_change, form_contract, gen_blocks, new_test_host},
};
use tempfile::TempDir;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_follower_drives_host() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (host, node, _) = new_test_host(temp_dir.path()).await?;
    form_contract(&host, &Renter::default(), &[5u8; 64], 100, 120).await?;
    node.push_change(apply_change(1, gen_blocks(1, 50)));
    node.push_change(apply_change(2, gen_blocks(51, 110)));

    let cancel_token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(10);
    let reactor_handle = reactor::run(host.clone(), cancel_token.clone(), rx);
    let follower_handle = consensus_follower::run(
        node.clone(),
        cancel_token.clone(),
        Duration::from_millis(10),
        host.last_change_id().await,
        tx,
    );

    timeout(Duration::from_secs(10), async {
        while host.last_change_id().await != Some(2) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(host.block_height().await, 110);
    assert_eq!(node.broadcast_transactions().len(), 1);

    node.push_change(apply_change(3, gen_blocks(111, 115)));
    timeout(Duration::from_secs(10), async {
        while host.block_height().await != 115 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    cancel_token.cancel();
    follower_handle.await?;
    reactor_handle.await?;

    let (reloaded, _, _) = new_test_host(temp_dir.path()).await?;
    assert_eq!(reloaded.block_height().await, 115);
    assert_eq!(reloaded.last_change_id().await, Some(3));
    Ok(())
}

#[tokio::test]
async fn test_closed_feed_is_fatal() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (host, _, _) = new_test_host(temp_dir.path()).await?;
    let cancel_token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(10);
    let handle = reactor::run(host.clone(), cancel_token.clone(), rx);

    tx.send(apply_change(1, gen_blocks(1, 5))).await?;
    drop(tx);
    handle.await?;

    assert!(cancel_token.is_cancelled());
    assert_eq!(host.block_height().await, 5);
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_change_is_fatal() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (host, _, _) = new_test_host(temp_dir.path()).await?;
    let cancel_token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(10);
    let handle = reactor::run(host.clone(), cancel_token.clone(), rx);

    tx.send(apply_change(1, gen_blocks(1, 5))).await?;
    tx.send(apply_change(2, gen_blocks(7, 8))).await?;
    handle.await?;

    assert!(cancel_token.is_cancelled());
    assert_eq!(host.block_height().await, 5);
    Ok(())
}
