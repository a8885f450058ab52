use executor::ExecutorError;
use gateway::GatewayError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Insufficient {currency} balance: {available} available, {required} required")]
    InsufficientBalance {
        currency: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("Failed to look up instrument '{uid}': {reason}")]
    InstrumentLookup { uid: String, reason: String },

    #[error("The bot has already been started")]
    AlreadyStarted,
}
