use axum::{Json, extract::State};

use crate::{
    collaborators::{FileStore, Node, ProofBuilder},
    types::{HostSettings, HostStatus},
};

use super::{Env, error::HttpError, result::Result};

pub async fn get_status<N: Node, F: FileStore, P: ProofBuilder>(
    State(env): State<Env<N, F, P>>,
) -> Result<HostStatus> {
    Ok(env.host.status_snapshot().await.into())
}

pub async fn get_settings<N: Node, F: FileStore, P: ProofBuilder>(
    State(env): State<Env<N, F, P>>,
) -> Result<HostSettings> {
    Ok(env.host.current_settings().await.into())
}

pub async fn put_settings<N: Node, F: FileStore, P: ProofBuilder>(
    State(env): State<Env<N, F, P>>,
    Json(settings): Json<HostSettings>,
) -> Result<HostSettings> {
    if settings.total_storage < 0 {
        return Err(HttpError::BadRequest(format!(
            "total storage must not be negative, got {}",
            settings.total_storage
        ))
        .into());
    }
    if env.cancel_token.is_cancelled() {
        return Err(HttpError::Unavailable("host is shutting down".to_string()).into());
    }
    env.host.update_settings(settings).await?;
    Ok(env.host.current_settings().await.into())
}
