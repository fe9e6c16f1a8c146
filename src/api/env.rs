use tokio_util::sync::CancellationToken;

use crate::host::Host;

#[derive(Clone)]
pub struct Env<N, F, P> {
    pub cancel_token: CancellationToken,
    pub host: Host<N, F, P>,
}
