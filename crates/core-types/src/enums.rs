use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
}

/// Status carried by a broker execution report.
///
/// Only `Fill` changes the bot's view of an instrument; every other status is
/// treated as "nothing happened".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Fill,
    PartiallyFill,
    New,
    Rejected,
    Cancelled,
    Unspecified,
}

impl ExecutionStatus {
    pub fn is_filled(&self) -> bool {
        matches!(self, ExecutionStatus::Fill)
    }
}
