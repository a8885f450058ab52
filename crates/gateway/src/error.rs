use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Transport failure while talking to the broker: {0}")]
    Transport(String),

    #[error("The broker rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("This operation is only available against a sandbox endpoint")]
    SandboxOnly,

    #[error("Invalid data from broker: {0}")]
    InvalidData(String),
}
