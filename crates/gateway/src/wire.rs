use chrono::{DateTime, Utc};
use core_types::{ExecutionStatus, OrderSide, OrderType};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

// Using `#[serde(rename_all = "camelCase")]` to map the broker's camelCase JSON onto snake_case fields.

const NANO_SCALE: u32 = 9;
const NANOS_PER_UNIT: i64 = 1_000_000_000;

/// A fixed-point number as the broker sends it: whole `units` plus billionths in `nano`.
/// Both parts carry the sign of the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    pub units: i64,
    pub nano: i32,
}

impl Quotation {
    pub fn to_decimal(&self) -> Decimal {
        (Decimal::from(self.units) + Decimal::new(i64::from(self.nano), NANO_SCALE)).normalize()
    }

    /// Splits a decimal into units and nano. Precision beyond nine fractional
    /// digits is truncated. Returns `None` if the value does not fit.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let units = value.trunc();
        let nano = ((value - units) * Decimal::from(NANOS_PER_UNIT)).trunc();
        Some(Self {
            units: units.to_i64()?,
            nano: nano.to_i32()?,
        })
    }
}

/// A fixed-point money amount in a given currency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyValue {
    pub currency: String,
    pub units: i64,
    pub nano: i32,
}

impl MoneyValue {
    pub fn to_decimal(&self) -> Decimal {
        Quotation { units: self.units, nano: self.nano }.to_decimal()
    }

    pub fn from_decimal(currency: impl Into<String>, value: Decimal) -> Option<Self> {
        let q = Quotation::from_decimal(value)?;
        Some(Self {
            currency: currency.into(),
            units: q.units,
            nano: q.nano,
        })
    }
}

/// Response of the instrument metadata lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentResponse {
    pub uid: String,
    pub figi: String,
    pub ticker: String,
    pub lot: i32,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WireOrder {
    pub price: Quotation,
    pub quantity: i64,
}

/// An order book snapshot from the market-data stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOrderBook {
    pub figi: String,
    pub instrument_uid: String,
    pub depth: i32,
    pub is_consistent: bool,
    pub bids: Vec<WireOrder>,
    pub asks: Vec<WireOrder>,
    pub time: DateTime<Utc>,
    pub limit_up: Quotation,
    pub limit_down: Quotation,
}

/// A last-trade price from the market-data stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLastPrice {
    pub figi: String,
    pub instrument_uid: String,
    pub price: Quotation,
    pub time: DateTime<Utc>,
}

/// A holding of securities, futures or options, counted in units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsInstrument {
    #[serde(default)]
    pub figi: String,
    pub instrument_uid: String,
    pub balance: i64,
    #[serde(default)]
    pub blocked: i64,
}

/// Response of the one-shot positions request. Available and blocked money
/// are listed separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    #[serde(default)]
    pub money: Vec<MoneyValue>,
    #[serde(default)]
    pub blocked: Vec<MoneyValue>,
    #[serde(default)]
    pub securities: Vec<PositionsInstrument>,
    #[serde(default)]
    pub futures: Vec<PositionsInstrument>,
    #[serde(default)]
    pub options: Vec<PositionsInstrument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsMoney {
    pub available_value: Option<MoneyValue>,
    pub blocked_value: Option<MoneyValue>,
}

/// A full account state pushed by the positions stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePositionData {
    pub account_id: String,
    #[serde(default)]
    pub money: Vec<PositionsMoney>,
    #[serde(default)]
    pub securities: Vec<PositionsInstrument>,
    #[serde(default)]
    pub futures: Vec<PositionsInstrument>,
    #[serde(default)]
    pub options: Vec<PositionsInstrument>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderRequest {
    pub instrument_id: String,
    /// Number of lots.
    pub quantity: i64,
    /// Limit price. Always `None` for market orders.
    pub price: Option<Quotation>,
    pub direction: OrderSide,
    pub account_id: String,
    pub order_type: OrderType,
    /// Caller-supplied idempotency key.
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderResponse {
    pub order_id: String,
    pub execution_report_status: ExecutionStatus,
    pub lots_requested: i64,
    pub lots_executed: i64,
    /// Average executed price of one instrument unit.
    pub executed_order_price: MoneyValue,
    pub figi: String,
    pub instrument_uid: String,
    #[serde(default)]
    pub message: Option<String>,
}
