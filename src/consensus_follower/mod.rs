//! Polls the consensus feed and hands ordered changes to the reactor.

use std::time::Duration;

use tokio::{select, sync::mpsc::Sender, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    collaborators::ConsensusFeed,
    retry::{new_backoff_limited, retry},
    types::ConsensusChange,
};

/// Spawns the follower. Changes after `after` are sent on `tx` in feed
/// order. If the feed stays unreachable through the retry budget the
/// follower exits and drops `tx`, which the reactor treats as fatal.
pub fn run<C: ConsensusFeed>(
    feed: C,
    cancel_token: CancellationToken,
    poll_interval: Duration,
    mut after: Option<u64>,
    tx: Sender<ConsensusChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let result = select! {
                _ = cancel_token.cancelled() => break,
                result = retry(
                    || feed.consensus_changes(after),
                    "consensus changes",
                    new_backoff_limited(),
                    cancel_token.clone(),
                ) => result,
            };

            let changes = match result {
                Ok(changes) => changes,
                Err(e) => {
                    if !cancel_token.is_cancelled() {
                        error!("Consensus feed disconnected: {:#}", e);
                    }
                    break;
                }
            };

            let caught_up = changes.is_empty();
            for change in changes {
                if after.is_some_and(|last| change.id <= last) {
                    continue;
                }
                debug!(
                    "Consensus change {}: -{} +{} blocks",
                    change.id,
                    change.reverted_blocks.len(),
                    change.applied_blocks.len()
                );
                after = Some(change.id);
                if tx.send(change).await.is_err() {
                    info!("Receiver dropped, exiting");
                    return;
                }
            }

            if caught_up {
                select! {
                    _ = cancel_token.cancelled() => break,
                    _ = sleep(poll_interval) => {}
                }
            }
        }
        info!("Exited");
    })
}
