pub mod env;
pub mod error;
pub mod handlers;
pub mod result;
pub mod router;

use std::net::SocketAddr;

use anyhow::Result;
pub use env::Env;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info};

use crate::collaborators::{FileStore, Node, ProofBuilder};

pub async fn run<N: Node, F: FileStore, P: ProofBuilder>(
    port: u16,
    env: Env<N, F, P>,
) -> Result<JoinHandle<()>> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let cancel_token = env.cancel_token.clone();
    info!("Server running @ http://{}", addr);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router::new(env))
            .with_graceful_shutdown(cancel_token.cancelled_owned())
            .await
        {
            error!("Server error: {}", e);
        }

        info!("Exited");
    }))
}
