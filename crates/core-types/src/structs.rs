use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Static metadata for a tradable instrument, as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub uid: String,
    pub figi: String,
    pub ticker: String,
    /// Shares per lot. Always strictly positive.
    pub lot: i32,
    /// ISO currency code the instrument trades in.
    pub currency: String,
}

impl InstrumentInfo {
    pub fn new(
        uid: impl Into<String>,
        figi: impl Into<String>,
        ticker: impl Into<String>,
        lot: i32,
        currency: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let uid = uid.into();
        if lot <= 0 {
            return Err(CoreError::InvalidInput(
                "lot".to_string(),
                format!("instrument {uid} reports a lot size of {lot}"),
            ));
        }
        Ok(Self {
            uid,
            figi: figi.into(),
            ticker: ticker.into(),
            lot,
            currency: currency.into(),
        })
    }
}

/// A single price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub price: Decimal,
    /// Number of lots resting at this price.
    pub quantity: i64,
}

/// A point-in-time order book snapshot for one instrument.
///
/// Bids and asks keep the order in which the broker delivered them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub figi: String,
    pub instrument_uid: String,
    pub depth: i32,
    pub is_consistent: bool,
    pub time: DateTime<Utc>,
    pub limit_up: Decimal,
    pub limit_down: Decimal,
    pub bids: Vec<Order>,
    pub asks: Vec<Order>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&Order> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&Order> {
        self.asks.first()
    }

    /// Best ask minus best bid, if both sides are populated.
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }
}

/// The most recent traded price of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastPriceTick {
    pub instrument_uid: String,
    pub figi: String,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

/// Money held in one currency, split into what can be spent and what is reserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyBalance {
    pub currency: String,
    pub available: Decimal,
    pub blocked: Decimal,
}

/// Securities held, counted in underlying units (not lots). Negative means short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityHolding {
    pub figi: String,
    pub instrument_uid: String,
    pub balance: i64,
    pub blocked: i64,
}

/// Futures and options holdings. Carried for completeness, never traded by the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivativeHolding {
    pub figi: String,
    pub instrument_uid: String,
    pub balance: i64,
    pub blocked: i64,
}

/// The latest known account state. Always replaced as a whole, never patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub account_id: String,
    pub money: Vec<MoneyBalance>,
    pub securities: Vec<SecurityHolding>,
    pub futures: Vec<DerivativeHolding>,
    pub options: Vec<DerivativeHolding>,
    pub as_of: DateTime<Utc>,
}

impl PositionSnapshot {
    /// Available money in `currency`, compared case-insensitively.
    /// A currency with no entry has nothing available.
    pub fn available_in(&self, currency: &str) -> Decimal {
        self.money
            .iter()
            .filter(|m| m.currency.eq_ignore_ascii_case(currency))
            .last()
            .map(|m| m.available)
            .unwrap_or(Decimal::ZERO)
    }
}

/// The broker's answer to an order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: String,
    pub status: crate::enums::ExecutionStatus,
    /// Price per instrument unit the order executed at. Zero unless filled.
    pub executed_price: Decimal,
    pub instrument_uid: String,
    pub figi: String,
    pub lots_executed: i64,
}
