use gateway::error::GatewayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("An executor task failed to complete: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
