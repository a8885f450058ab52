//! Conversions from wire messages into the domain shapes the bot trades on.

use crate::wire::{
    InstrumentResponse, PositionsInstrument, PositionsResponse, PostOrderResponse, WireLastPrice,
    WireOrder, WireOrderBook, WirePositionData,
};
use chrono::{DateTime, Utc};
use core_types::{
    CoreError, DerivativeHolding, ExecutionReport, InstrumentInfo, LastPriceTick, MoneyBalance,
    Order, OrderBook, PositionSnapshot, SecurityHolding,
};
use rust_decimal::Decimal;

pub fn transform_order_book(input: WireOrderBook) -> OrderBook {
    OrderBook {
        figi: input.figi,
        instrument_uid: input.instrument_uid,
        depth: input.depth,
        is_consistent: input.is_consistent,
        time: input.time,
        limit_up: input.limit_up.to_decimal(),
        limit_down: input.limit_down.to_decimal(),
        bids: transform_orders(&input.bids),
        asks: transform_orders(&input.asks),
    }
}

fn transform_orders(levels: &[WireOrder]) -> Vec<Order> {
    levels
        .iter()
        .map(|o| Order {
            price: o.price.to_decimal(),
            quantity: o.quantity,
        })
        .collect()
}

pub fn transform_last_price(input: WireLastPrice) -> LastPriceTick {
    LastPriceTick {
        instrument_uid: input.instrument_uid,
        figi: input.figi,
        price: input.price.to_decimal(),
        time: input.time,
    }
}

/// A streamed position update is a complete account state and becomes a
/// replacement snapshot as-is.
pub fn transform_position_data(input: WirePositionData) -> PositionSnapshot {
    let money = input
        .money
        .into_iter()
        .filter_map(|m| {
            let currency = m
                .available_value
                .as_ref()
                .or(m.blocked_value.as_ref())?
                .currency
                .clone();
            Some(MoneyBalance {
                currency,
                available: m.available_value.map(|v| v.to_decimal()).unwrap_or_default(),
                blocked: m.blocked_value.map(|v| v.to_decimal()).unwrap_or_default(),
            })
        })
        .collect();

    PositionSnapshot {
        account_id: input.account_id,
        money,
        securities: input.securities.into_iter().map(security).collect(),
        futures: input.futures.into_iter().map(derivative).collect(),
        options: input.options.into_iter().map(derivative).collect(),
        as_of: input.date,
    }
}

/// Builds a snapshot from the one-shot positions response, pairing the
/// available and blocked amounts of each currency. Currencies keep the order
/// in which they first appear.
pub fn transform_positions_response(
    account_id: &str,
    input: PositionsResponse,
    as_of: DateTime<Utc>,
) -> PositionSnapshot {
    let mut money: Vec<MoneyBalance> = Vec::with_capacity(input.money.len());

    for available in &input.money {
        money.push(MoneyBalance {
            currency: available.currency.clone(),
            available: available.to_decimal(),
            blocked: Decimal::ZERO,
        });
    }

    for blocked in &input.blocked {
        match money
            .iter_mut()
            .find(|m| m.currency.eq_ignore_ascii_case(&blocked.currency))
        {
            Some(entry) => entry.blocked = blocked.to_decimal(),
            None => money.push(MoneyBalance {
                currency: blocked.currency.clone(),
                available: Decimal::ZERO,
                blocked: blocked.to_decimal(),
            }),
        }
    }

    PositionSnapshot {
        account_id: account_id.to_string(),
        money,
        securities: input.securities.into_iter().map(security).collect(),
        futures: input.futures.into_iter().map(derivative).collect(),
        options: input.options.into_iter().map(derivative).collect(),
        as_of,
    }
}

pub fn transform_execution_report(input: PostOrderResponse) -> ExecutionReport {
    ExecutionReport {
        executed_price: input.executed_order_price.to_decimal(),
        order_id: input.order_id,
        status: input.execution_report_status,
        instrument_uid: input.instrument_uid,
        figi: input.figi,
        lots_executed: input.lots_executed,
    }
}

pub fn transform_instrument(input: InstrumentResponse) -> Result<InstrumentInfo, CoreError> {
    InstrumentInfo::new(input.uid, input.figi, input.ticker, input.lot, input.currency)
}

fn security(p: PositionsInstrument) -> SecurityHolding {
    SecurityHolding {
        figi: p.figi,
        instrument_uid: p.instrument_uid,
        balance: p.balance,
        blocked: p.blocked,
    }
}

fn derivative(p: PositionsInstrument) -> DerivativeHolding {
    DerivativeHolding {
        figi: p.figi,
        instrument_uid: p.instrument_uid,
        balance: p.balance,
        blocked: p.blocked,
    }
}
