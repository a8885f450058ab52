//! In-memory sandbox broker. Orders fill at the current mark, account state
//! is kept per account id, and every price or fill is pushed to subscribers.

use crate::connector::shutdown_requested;
use crate::error::GatewayError;
use crate::wire::{
    InstrumentResponse, MoneyValue, PositionsInstrument, PositionsMoney, PositionsResponse,
    PostOrderRequest, PostOrderResponse, Quotation, WireLastPrice, WireOrder, WireOrderBook,
    WirePositionData,
};
use crate::{BrokerGateway, WireStream};
use async_trait::async_trait;
use chrono::Utc;
use core_types::{ExecutionStatus, OrderSide};
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const BROADCAST_CAPACITY: usize = 1024;
const BOOK_LEVELS: i64 = 10;

/// One of the paper broker's server-push subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperFeed {
    LastPrices,
    OrderBooks,
    Positions,
}

type FeedFailures = HashMap<PaperFeed, GatewayError>;

#[derive(Debug, Default)]
struct PaperAccount {
    /// Available money keyed by lower-cased currency code.
    money: BTreeMap<String, Decimal>,
    blocked: BTreeMap<String, Decimal>,
    /// Holdings in units, keyed by instrument uid.
    securities: BTreeMap<String, i64>,
}

#[derive(Debug, Default)]
struct PaperState {
    instruments: HashMap<String, InstrumentResponse>,
    marks: BTreeMap<String, Decimal>,
    accounts: HashMap<String, PaperAccount>,
    forced_status: Option<ExecutionStatus>,
    fail_orders: bool,
    submitted: Vec<PostOrderRequest>,
}

pub struct PaperGateway {
    sandbox: bool,
    state: Mutex<PaperState>,
    last_prices: broadcast::Sender<WireLastPrice>,
    order_books: broadcast::Sender<WireOrderBook>,
    positions: broadcast::Sender<WirePositionData>,
    closed: watch::Sender<bool>,
    failures: watch::Sender<FeedFailures>,
}

impl PaperGateway {
    /// Creates an empty paper broker. `sandbox` controls whether balance
    /// top-ups are accepted.
    pub fn new(sandbox: bool) -> Self {
        let (last_prices, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (order_books, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (positions, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (closed, _) = watch::channel(false);
        let (failures, _) = watch::channel(FeedFailures::new());
        Self {
            sandbox,
            state: Mutex::new(PaperState::default()),
            last_prices,
            order_books,
            positions,
            closed,
            failures,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register_instrument(&self, instrument: InstrumentResponse, start_price: Option<Decimal>) {
        let mut state = self.lock();
        if let Some(price) = start_price {
            state.marks.insert(instrument.uid.clone(), price);
        }
        state.instruments.insert(instrument.uid.clone(), instrument);
    }

    pub fn set_money(&self, account_id: &str, currency: &str, amount: Decimal) {
        let mut state = self.lock();
        let account = state.accounts.entry(account_id.to_string()).or_default();
        account.money.insert(currency.to_lowercase(), amount);
    }

    pub fn set_security(&self, account_id: &str, instrument_uid: &str, balance: i64) {
        let mut state = self.lock();
        let account = state.accounts.entry(account_id.to_string()).or_default();
        account.securities.insert(instrument_uid.to_string(), balance);
    }

    pub fn money(&self, account_id: &str, currency: &str) -> Decimal {
        let state = self.lock();
        state
            .accounts
            .get(account_id)
            .and_then(|a| a.money.get(&currency.to_lowercase()).copied())
            .unwrap_or_default()
    }

    pub fn security(&self, account_id: &str, instrument_uid: &str) -> i64 {
        let state = self.lock();
        state
            .accounts
            .get(account_id)
            .and_then(|a| a.securities.get(instrument_uid).copied())
            .unwrap_or_default()
    }

    /// Moves the mark without notifying subscribers.
    pub fn set_mark(&self, instrument_uid: &str, price: Decimal) {
        self.lock().marks.insert(instrument_uid.to_string(), price);
    }

    /// Moves the mark and pushes a last-price tick and a synthetic order book
    /// around it to subscribers.
    pub fn publish_last_price(&self, instrument_uid: &str, price: Decimal) {
        let figi = {
            let mut state = self.lock();
            state.marks.insert(instrument_uid.to_string(), price);
            state
                .instruments
                .get(instrument_uid)
                .map(|i| i.figi.clone())
                .unwrap_or_default()
        };

        let now = Utc::now();
        let price_q = Quotation::from_decimal(price).unwrap_or_default();
        let _ = self.last_prices.send(WireLastPrice {
            figi: figi.clone(),
            instrument_uid: instrument_uid.to_string(),
            price: price_q,
            time: now,
        });
        let _ = self.order_books.send(synthetic_book(figi, instrument_uid, price, now));
    }

    /// Every later order reports `status` instead of being simulated.
    pub fn force_execution_status(&self, status: Option<ExecutionStatus>) {
        self.lock().forced_status = status;
    }

    /// Makes every later order submission fail with a transport error.
    pub fn fail_order_submission(&self, fail: bool) {
        self.lock().fail_orders = fail;
    }

    pub fn submitted_orders(&self) -> Vec<PostOrderRequest> {
        self.lock().submitted.clone()
    }

    /// Ends every open subscription, as if the broker closed them.
    pub fn close_streams(&self) {
        self.closed.send_replace(true);
    }

    /// Breaks every subscription to `feed`: each yields `error` once and then
    /// ends. Subscriptions opened afterwards fail the same way.
    pub fn fail_stream(&self, feed: PaperFeed, error: GatewayError) {
        tracing::debug!(?feed, %error, "Failing paper subscriptions.");
        self.failures.send_modify(|failures| {
            failures.insert(feed, error);
        });
    }

    /// Drives a random walk of every mark, publishing a tick per instrument
    /// each `interval`, until `shutdown` fires.
    pub fn spawn_random_walk(
        self: &Arc<Self>,
        volatility: f64,
        interval: Duration,
        seed: Option<u64>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        let volatility = volatility.abs();
        tokio::spawn(async move {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let mut timer = tokio::time::interval(interval);
            let floor = Decimal::new(1, 4);
            tracing::info!(volatility, ?interval, "Paper market random walk started.");
            loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = timer.tick() => {}
                }
                let marks: Vec<(String, Decimal)> = gateway
                    .lock()
                    .marks
                    .iter()
                    .map(|(uid, price)| (uid.clone(), *price))
                    .collect();
                for (uid, mark) in marks {
                    let step: f64 = rng.random_range(-volatility..=volatility);
                    let factor = Decimal::from_f64(1.0 + step).unwrap_or(Decimal::ONE);
                    let next = (mark * factor).round_dp(4).max(floor);
                    gateway.publish_last_price(&uid, next);
                }
            }
            tracing::info!("Paper market random walk stopped.");
        })
    }

    fn fill(
        state: &mut PaperState,
        request: &PostOrderRequest,
        instrument: &InstrumentResponse,
        price: Decimal,
    ) -> ExecutionStatus {
        let units = request.quantity * i64::from(instrument.lot);
        let cost = price * Decimal::from(units);
        let currency = instrument.currency.to_lowercase();
        let forced = state.forced_status;
        let account = state.accounts.entry(request.account_id.clone()).or_default();
        let cash = account.money.get(&currency).copied().unwrap_or_default();

        let status = match forced {
            Some(status) => status,
            None if request.direction == OrderSide::Buy && cash < cost => ExecutionStatus::Rejected,
            None => ExecutionStatus::Fill,
        };
        if !status.is_filled() {
            return status;
        }

        let held = account.securities.entry(request.instrument_id.clone()).or_default();
        match request.direction {
            OrderSide::Buy => {
                *held += units;
                account.money.insert(currency, cash - cost);
            }
            OrderSide::Sell => {
                *held -= units;
                account.money.insert(currency, cash + cost);
            }
        }
        status
    }

    fn position_data(account_id: &str, account: &PaperAccount) -> WirePositionData {
        let mut money: Vec<PositionsMoney> = account
            .money
            .iter()
            .map(|(currency, amount)| PositionsMoney {
                available_value: MoneyValue::from_decimal(currency.clone(), *amount),
                blocked_value: account
                    .blocked
                    .get(currency)
                    .and_then(|b| MoneyValue::from_decimal(currency.clone(), *b)),
            })
            .collect();
        money.extend(
            account
                .blocked
                .iter()
                .filter(|(currency, _)| !account.money.contains_key(*currency))
                .map(|(currency, amount)| PositionsMoney {
                    available_value: None,
                    blocked_value: MoneyValue::from_decimal(currency.clone(), *amount),
                }),
        );
        WirePositionData {
            account_id: account_id.to_string(),
            money,
            securities: holdings(account),
            futures: Vec::new(),
            options: Vec::new(),
            date: Utc::now(),
        }
    }

    fn subscription<T>(
        &self,
        feed: PaperFeed,
        receiver: broadcast::Receiver<T>,
        keep: impl Fn(&T) -> Option<T> + Send + 'static,
    ) -> WireStream<T>
    where
        T: Clone + Send + 'static,
    {
        let closed = self.closed.subscribe();
        let failures = self.failures.subscribe();
        futures::stream::unfold(
            (receiver, closed, failures, keep, false),
            move |(mut receiver, mut closed, mut failures, keep, failed)| async move {
                if failed {
                    return None;
                }
                loop {
                    let received = tokio::select! {
                        _ = shutdown_requested(&mut closed) => return None,
                        Some(error) = injected_failure(&mut failures, feed) => Err(error),
                        received = receiver.recv() => Ok(received),
                    };
                    let received = match received {
                        Ok(received) => received,
                        Err(error) => {
                            return Some((Err(error), (receiver, closed, failures, keep, true)));
                        }
                    };
                    match received {
                        Ok(item) => {
                            if let Some(item) = keep(&item) {
                                return Some((Ok(item), (receiver, closed, failures, keep, false)));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Paper subscriber lagged behind.");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        )
        .boxed()
    }
}

/// Resolves with the error injected for `feed`, or `None` once the gateway
/// is gone.
async fn injected_failure(
    failures: &mut watch::Receiver<FeedFailures>,
    feed: PaperFeed,
) -> Option<GatewayError> {
    let failures = failures.wait_for(|failures| failures.contains_key(&feed)).await.ok()?;
    failures.get(&feed).cloned()
}

fn holdings(account: &PaperAccount) -> Vec<PositionsInstrument> {
    account
        .securities
        .iter()
        .filter(|(_, balance)| **balance != 0)
        .map(|(uid, balance)| PositionsInstrument {
            figi: String::new(),
            instrument_uid: uid.clone(),
            balance: *balance,
            blocked: 0,
        })
        .collect()
}

fn synthetic_book(
    figi: String,
    instrument_uid: &str,
    price: Decimal,
    time: chrono::DateTime<Utc>,
) -> WireOrderBook {
    let tick = (price / Decimal::from(1000)).round_dp(4).max(Decimal::new(1, 4));
    let level = |k: i64, sign: Decimal| WireOrder {
        price: Quotation::from_decimal(price + sign * tick * Decimal::from(k)).unwrap_or_default(),
        quantity: (k + 1) * 3,
    };
    WireOrderBook {
        figi,
        instrument_uid: instrument_uid.to_string(),
        depth: BOOK_LEVELS as i32,
        is_consistent: true,
        bids: (1..=BOOK_LEVELS).map(|k| level(k, Decimal::NEGATIVE_ONE)).collect(),
        asks: (1..=BOOK_LEVELS).map(|k| level(k, Decimal::ONE)).collect(),
        time,
        limit_up: Quotation::from_decimal(price * Decimal::new(11, 1)).unwrap_or_default(),
        limit_down: Quotation::from_decimal(price * Decimal::new(9, 1)).unwrap_or_default(),
    }
}

#[async_trait]
impl BrokerGateway for PaperGateway {
    async fn instrument_by_uid(&self, uid: &str) -> Result<InstrumentResponse, GatewayError> {
        self.lock()
            .instruments
            .get(uid)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("instrument {uid}")))
    }

    async fn subscribe_order_books(
        &self,
        instrument_ids: &[String],
        depth: i32,
    ) -> Result<WireStream<WireOrderBook>, GatewayError> {
        if depth <= 0 {
            return Err(GatewayError::Rejected {
                code: "depth".to_string(),
                message: format!("order book depth must be positive, got {depth}"),
            });
        }
        let ids = instrument_ids.to_vec();
        let levels = depth as usize;
        Ok(self.subscription(PaperFeed::OrderBooks, self.order_books.subscribe(), move |book: &WireOrderBook| {
            if !ids.contains(&book.instrument_uid) {
                return None;
            }
            let mut book = book.clone();
            book.bids.truncate(levels);
            book.asks.truncate(levels);
            book.depth = depth;
            Some(book)
        }))
    }

    async fn subscribe_last_prices(
        &self,
        instrument_ids: &[String],
    ) -> Result<WireStream<WireLastPrice>, GatewayError> {
        let ids = instrument_ids.to_vec();
        Ok(self.subscription(PaperFeed::LastPrices, self.last_prices.subscribe(), move |tick: &WireLastPrice| {
            ids.contains(&tick.instrument_uid).then(|| tick.clone())
        }))
    }

    async fn subscribe_positions(
        &self,
        account_id: &str,
    ) -> Result<WireStream<WirePositionData>, GatewayError> {
        let account_id = account_id.to_string();
        Ok(self.subscription(PaperFeed::Positions, self.positions.subscribe(), move |data: &WirePositionData| {
            (data.account_id == account_id).then(|| data.clone())
        }))
    }

    async fn get_positions(&self, account_id: &str) -> Result<PositionsResponse, GatewayError> {
        let state = self.lock();
        let account = state
            .accounts
            .get(account_id)
            .ok_or_else(|| GatewayError::NotFound(format!("account {account_id}")))?;

        let to_money = |(currency, amount): (&String, &Decimal)| {
            MoneyValue::from_decimal(currency.clone(), *amount)
        };
        Ok(PositionsResponse {
            money: account.money.iter().filter_map(to_money).collect(),
            blocked: account.blocked.iter().filter_map(to_money).collect(),
            securities: holdings(account),
            futures: Vec::new(),
            options: Vec::new(),
        })
    }

    async fn post_order(
        &self,
        request: &PostOrderRequest,
    ) -> Result<PostOrderResponse, GatewayError> {
        let (response, update) = {
            let mut state = self.lock();
            state.submitted.push(request.clone());
            if state.fail_orders {
                return Err(GatewayError::Transport(
                    "paper gateway: order submission disabled".to_string(),
                ));
            }
            let instrument = state
                .instruments
                .get(&request.instrument_id)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(format!("instrument {}", request.instrument_id)))?;
            let price = state.marks.get(&request.instrument_id).copied().ok_or_else(|| {
                GatewayError::Rejected {
                    code: "no_market".to_string(),
                    message: format!("no price for {}", request.instrument_id),
                }
            })?;
            if request.quantity <= 0 {
                return Err(GatewayError::Rejected {
                    code: "quantity".to_string(),
                    message: format!("quantity must be positive, got {}", request.quantity),
                });
            }

            let status = Self::fill(&mut state, request, &instrument, price);
            let filled = status.is_filled();
            let update = match state.accounts.get(&request.account_id) {
                Some(account) if filled => Some(Self::position_data(&request.account_id, account)),
                _ => None,
            };

            let executed = if filled { price } else { Decimal::ZERO };
            let response = PostOrderResponse {
                order_id: request.order_id.clone(),
                execution_report_status: status,
                lots_requested: request.quantity,
                lots_executed: if filled { request.quantity } else { 0 },
                executed_order_price: MoneyValue::from_decimal(instrument.currency.clone(), executed)
                    .unwrap_or_default(),
                figi: instrument.figi.clone(),
                instrument_uid: instrument.uid.clone(),
                message: None,
            };
            (response, update)
        };

        if let Some(update) = update {
            let _ = self.positions.send(update);
        }
        Ok(response)
    }

    async fn sandbox_pay_in(
        &self,
        account_id: &str,
        amount: &MoneyValue,
    ) -> Result<MoneyValue, GatewayError> {
        if !self.sandbox {
            return Err(GatewayError::SandboxOnly);
        }
        let currency = amount.currency.to_lowercase();
        let balance = {
            let mut state = self.lock();
            let account = state.accounts.entry(account_id.to_string()).or_default();
            let balance = account.money.entry(currency.clone()).or_default();
            *balance += amount.to_decimal();
            *balance
        };
        MoneyValue::from_decimal(currency, balance)
            .ok_or_else(|| GatewayError::InvalidData(format!("balance {balance} out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::OrderType;
    use rust_decimal_macros::dec;

    fn gateway() -> PaperGateway {
        let gateway = PaperGateway::new(true);
        gateway.register_instrument(
            InstrumentResponse {
                uid: "uid-x".into(),
                figi: "BBG-X".into(),
                ticker: "X".into(),
                lot: 10,
                currency: "usd".into(),
            },
            Some(dec!(50)),
        );
        gateway.set_money("acc", "USD", dec!(1000));
        gateway
    }

    fn order(direction: OrderSide, quantity: i64) -> PostOrderRequest {
        PostOrderRequest {
            instrument_id: "uid-x".into(),
            quantity,
            price: None,
            direction,
            account_id: "acc".into(),
            order_type: OrderType::Market,
            order_id: "key".into(),
        }
    }

    #[tokio::test]
    async fn market_buy_fills_at_mark_and_moves_money() {
        let gateway = gateway();
        let response = gateway.post_order(&order(OrderSide::Buy, 1)).await.unwrap();
        assert!(response.execution_report_status.is_filled());
        assert_eq!(response.executed_order_price.to_decimal(), dec!(50));
        assert_eq!(gateway.money("acc", "usd"), dec!(500));
        assert_eq!(gateway.security("acc", "uid-x"), 10);
    }

    #[tokio::test]
    async fn unaffordable_buy_is_rejected_without_error() {
        let gateway = gateway();
        let response = gateway.post_order(&order(OrderSide::Buy, 3)).await.unwrap();
        assert_eq!(response.execution_report_status, ExecutionStatus::Rejected);
        assert_eq!(response.lots_executed, 0);
        assert_eq!(gateway.money("acc", "usd"), dec!(1000));
    }

    #[tokio::test]
    async fn sandbox_pay_in_only_on_sandbox() {
        let gateway = gateway();
        let credited = gateway
            .sandbox_pay_in("acc", &MoneyValue::from_decimal("usd", dec!(250.5)).unwrap())
            .await
            .unwrap();
        assert_eq!(credited.to_decimal(), dec!(1250.5));

        let production = PaperGateway::new(false);
        let err = production
            .sandbox_pay_in("acc", &MoneyValue::from_decimal("usd", dec!(1)).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::SandboxOnly);
    }

    #[tokio::test]
    async fn fill_publishes_position_update() {
        let gateway = gateway();
        let mut updates = gateway.subscribe_positions("acc").await.unwrap();
        gateway.post_order(&order(OrderSide::Buy, 1)).await.unwrap();

        let update = updates.next().await.unwrap().unwrap();
        assert_eq!(update.securities[0].balance, 10);
        let usd = update.money[0].available_value.as_ref().unwrap();
        assert_eq!(usd.to_decimal(), dec!(500));
    }

    #[tokio::test]
    async fn failed_feed_yields_its_error_once_then_ends() {
        let gateway = gateway();
        let mut positions = gateway.subscribe_positions("acc").await.unwrap();
        let mut ticks = gateway.subscribe_last_prices(&["uid-x".to_string()]).await.unwrap();

        let reset = GatewayError::Transport("connection reset".into());
        gateway.fail_stream(PaperFeed::Positions, reset.clone());

        assert_eq!(positions.next().await.unwrap().unwrap_err(), reset);
        assert!(positions.next().await.is_none());

        gateway.publish_last_price("uid-x", dec!(52));
        let tick = ticks.next().await.unwrap().unwrap();
        assert_eq!(tick.price.to_decimal(), dec!(52));
    }

    #[tokio::test]
    async fn random_walk_publishes_ticks_until_shutdown() {
        let gateway = Arc::new(gateway());
        let mut ticks = gateway.subscribe_last_prices(&["uid-x".to_string()]).await.unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let walk = gateway.spawn_random_walk(0.01, Duration::from_millis(5), Some(7), stop_rx);

        let tick = ticks.next().await.unwrap().unwrap();
        let price = tick.price.to_decimal();
        assert!(price >= dec!(49.5) && price <= dec!(50.5));

        stop_tx.send(true).unwrap();
        walk.await.unwrap();
    }
}
