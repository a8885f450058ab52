use core_types::InstrumentInfo;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Trading state of one instrument the bot is allowed to trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instrument {
    /// Lots per order.
    pub quantity: i64,
    /// Shares per lot.
    pub lot: i32,
    pub currency: String,
    /// Whether the bot currently holds a position it opened itself.
    pub in_stock: bool,
    /// Fill price of the buy that opened the current position.
    /// Only meaningful while `in_stock` is true.
    pub entry_price: Decimal,
}

impl Instrument {
    pub fn new(info: &InstrumentInfo, quantity: i64) -> Self {
        Self {
            quantity,
            lot: info.lot,
            currency: info.currency.clone(),
            in_stock: false,
            entry_price: Decimal::ZERO,
        }
    }

    /// Units of the underlying bought or sold by one order of `lots`.
    pub fn units(&self, lots: i64) -> i64 {
        lots * i64::from(self.lot)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstrumentLedger {
    instruments: HashMap<String, Instrument>,
}

impl InstrumentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instrument_uid: impl Into<String>, instrument: Instrument) {
        self.instruments.insert(instrument_uid.into(), instrument);
    }

    pub fn get(&self, instrument_uid: &str) -> Option<&Instrument> {
        self.instruments.get(instrument_uid)
    }

    pub(crate) fn get_mut(&mut self, instrument_uid: &str) -> Option<&mut Instrument> {
        self.instruments.get_mut(instrument_uid)
    }

    /// Instrument ids in a stable order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instruments.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl FromIterator<(String, Instrument)> for InstrumentLedger {
    fn from_iter<I: IntoIterator<Item = (String, Instrument)>>(iter: I) -> Self {
        Self {
            instruments: iter.into_iter().collect(),
        }
    }
}
