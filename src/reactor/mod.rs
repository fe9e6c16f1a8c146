//! The single consensus-processing task.

use anyhow::{Result, bail};
use tokio::{
    select,
    sync::mpsc::Receiver,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    collaborators::{FileStore, Node, ProofBuilder},
    host::Host,
    types::ConsensusChange,
};

struct Reactor<N, F, P> {
    host: Host<N, F, P>,
    cancel_token: CancellationToken,
    rx: Receiver<ConsensusChange>,
}

impl<N: Node, F: FileStore, P: ProofBuilder> Reactor<N, F, P> {
    async fn run_event_loop(&mut self) -> Result<()> {
        loop {
            select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Cancelled");
                    return Ok(());
                }
                option_change = self.rx.recv() => {
                    match option_change {
                        Some(change) => {
                            self.host.process_consensus_change(&change).await?;
                            info!(
                                "Processed consensus change {}, height {}",
                                change.id,
                                self.host.block_height().await
                            );
                        }
                        None => bail!("Consensus feed closed"),
                    }
                }
            }
        }
    }

    async fn run(&mut self) -> Result<()> {
        let res = self.run_event_loop().await;

        self.rx.close();
        while self.rx.recv().await.is_some() {}

        res
    }
}

/// Spawns the reactor. A closed feed or a change that cannot be applied
/// cancels `cancel_token`. Host state is flushed before the task exits.
pub fn run<N: Node, F: FileStore, P: ProofBuilder>(
    host: Host<N, F, P>,
    cancel_token: CancellationToken,
    rx: Receiver<ConsensusChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reactor = Reactor {
            host: host.clone(),
            cancel_token: cancel_token.clone(),
            rx,
        };

        if let Err(e) = reactor.run().await {
            error!("Reactor error: {:#}, exiting", e);
            cancel_token.cancel();
        }

        if let Err(e) = host.close().await {
            error!("Failed to flush host state: {:#}", e);
        }

        info!("Exited");
    })
}
