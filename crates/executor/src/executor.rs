use crate::cache::StateCache;
use crate::error::ExecutorError;
use crate::ledger::InstrumentLedger;
use chrono::Utc;
use core_types::{ExecutionReport, LastPriceTick, OrderSide, OrderType, PositionSnapshot};
use gateway::normalize::{transform_execution_report, transform_positions_response};
use gateway::{BrokerGateway, PostOrderRequest, spawn_last_price_adapter, spawn_position_adapter};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// True when moving from `entry` to `price` gains strictly more than
/// `min_profit` percent.
pub fn is_profitable(entry: Decimal, price: Decimal, min_profit: Decimal) -> bool {
    if entry <= Decimal::ZERO {
        return false;
    }
    (price - entry) / entry * Decimal::ONE_HUNDRED > min_profit
}

/// The decision engine for a basket of instruments.
pub struct Executor {
    // --- Collaborators ---
    gateway: Arc<dyn BrokerGateway>,
    account_id: String,

    // --- Trading State ---
    ledger: InstrumentLedger,
    state: Arc<StateCache>,
    min_profit: Decimal,
    realized_profit: Decimal,
}

impl Executor {
    /// `min_profit` is the minimum gain, in percent of the entry price, a
    /// position must show before it is sold.
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        account_id: impl Into<String>,
        ledger: InstrumentLedger,
        min_profit: Decimal,
    ) -> Self {
        Self {
            gateway,
            account_id: account_id.into(),
            ledger,
            state: Arc::new(StateCache::new()),
            min_profit,
            realized_profit: Decimal::ZERO,
        }
    }

    pub fn ledger(&self) -> &InstrumentLedger {
        &self.ledger
    }

    pub fn state(&self) -> Arc<StateCache> {
        Arc::clone(&self.state)
    }

    /// Profit realised by sells the decision loop made so far.
    pub fn realized_profit(&self) -> Decimal {
        self.realized_profit
    }

    /// Fetches the account state once and replaces the cached snapshot.
    pub async fn refresh_positions(&self) -> Result<(), ExecutorError> {
        let snapshot = self.fetch_positions().await?;
        self.state.update_positions(snapshot);
        Ok(())
    }

    async fn fetch_positions(&self) -> Result<PositionSnapshot, ExecutorError> {
        let response = self.gateway.get_positions(&self.account_id).await?;
        Ok(transform_positions_response(&self.account_id, response, Utc::now()))
    }

    /// Opens a position in `instrument_uid` if there is none yet and the
    /// account can pay for it.
    pub async fn buy(&mut self, instrument_uid: &str) -> Result<(), ExecutorError> {
        let Some(instrument) = self.ledger.get(instrument_uid) else {
            tracing::info!(instrument = instrument_uid, "Not a traded instrument. Skipping buy.");
            return Ok(());
        };
        if instrument.in_stock {
            tracing::debug!(instrument = instrument_uid, "Already in stock. Skipping buy.");
            return Ok(());
        }
        let Some(price) = self.state.price(instrument_uid) else {
            tracing::info!(instrument = instrument_uid, "No last price yet. Skipping buy.");
            return Ok(());
        };

        let quantity = instrument.quantity;
        let required = Decimal::from(instrument.units(quantity)) * price;
        let available = self.state.positions().available_in(&instrument.currency);
        if available <= required {
            tracing::info!(
                instrument = instrument_uid,
                %required,
                %available,
                currency = %instrument.currency,
                "Not enough money to buy."
            );
            return Ok(());
        }

        let report = self.submit(instrument_uid, OrderSide::Buy, quantity).await?;
        if !report.status.is_filled() {
            tracing::info!(instrument = instrument_uid, status = ?report.status, "Buy order was not filled.");
            return Ok(());
        }

        if let Some(instrument) = self.ledger.get_mut(instrument_uid) {
            instrument.in_stock = true;
            instrument.entry_price = report.executed_price;
        }
        tracing::info!(
            instrument = instrument_uid,
            price = %report.executed_price,
            lots = quantity,
            "Bought."
        );
        Ok(())
    }

    /// Closes the position in `instrument_uid` if the last price beats the
    /// entry price by more than the minimum profit. Returns the realised
    /// profit, or zero when nothing was sold.
    pub async fn sell(&mut self, instrument_uid: &str) -> Result<Decimal, ExecutorError> {
        let Some(instrument) = self.ledger.get(instrument_uid) else {
            tracing::info!(instrument = instrument_uid, "Not a traded instrument. Skipping sell.");
            return Ok(Decimal::ZERO);
        };
        if !instrument.in_stock {
            tracing::debug!(instrument = instrument_uid, "Nothing in stock. Skipping sell.");
            return Ok(Decimal::ZERO);
        }
        let Some(price) = self.state.price(instrument_uid) else {
            return Ok(Decimal::ZERO);
        };
        let entry = instrument.entry_price;
        if !is_profitable(entry, price, self.min_profit) {
            tracing::debug!(instrument = instrument_uid, %entry, %price, "Not profitable yet.");
            return Ok(Decimal::ZERO);
        }

        let quantity = instrument.quantity;
        let units = Decimal::from(instrument.units(quantity));
        let report = self.submit(instrument_uid, OrderSide::Sell, quantity).await?;
        if !report.status.is_filled() {
            tracing::info!(instrument = instrument_uid, status = ?report.status, "Sell order was not filled.");
            return Ok(Decimal::ZERO);
        }

        let profit = (report.executed_price - entry) * units;
        if let Some(instrument) = self.ledger.get_mut(instrument_uid) {
            instrument.in_stock = false;
        }
        tracing::info!(
            instrument = instrument_uid,
            price = %report.executed_price,
            %entry,
            %profit,
            "Sold."
        );
        Ok(profit)
    }

    /// Flattens every holding in an instrument the bot trades, using a freshly
    /// fetched account state. Holdings in other instruments are left alone.
    /// The first failed submission aborts the rest and is returned.
    pub async fn sell_out(&mut self) -> Result<Decimal, ExecutorError> {
        let snapshot = self.fetch_positions().await?;
        let mut profit = Decimal::ZERO;

        for holding in &snapshot.securities {
            let uid = holding.instrument_uid.as_str();
            let Some(instrument) = self.ledger.get(uid) else {
                tracing::debug!(instrument = uid, balance = holding.balance, "Holding not managed by the bot.");
                continue;
            };

            let lots = holding.balance / i64::from(instrument.lot);
            if lots == 0 {
                continue;
            }
            let (side, quantity) = if lots < 0 {
                (OrderSide::Buy, -lots)
            } else {
                (OrderSide::Sell, lots)
            };
            let opened = instrument.in_stock;
            let entry = instrument.entry_price;
            // Only the lots the bot bought itself carry its entry price.
            let own_units = Decimal::from(instrument.units(instrument.quantity.min(quantity)));

            let report = self.submit(uid, side, quantity).await?;
            if !report.status.is_filled() {
                tracing::warn!(instrument = uid, ?side, status = ?report.status, "Sell-out order was not filled.");
                continue;
            }

            if side == OrderSide::Sell && opened {
                profit += (report.executed_price - entry) * own_units;
            }
            if let Some(instrument) = self.ledger.get_mut(uid) {
                instrument.in_stock = false;
            }
            tracing::info!(instrument = uid, ?side, lots = quantity, price = %report.executed_price, "Position flattened.");
        }

        tracing::info!(%profit, "Sell-out complete.");
        Ok(profit)
    }

    /// Handles one last-price tick: records the price, then buys when flat or
    /// sells when holding a profitable position.
    pub async fn on_last_price(&mut self, tick: &LastPriceTick) -> Result<(), ExecutorError> {
        self.state.update_price(&tick.instrument_uid, tick.price);

        let Some(instrument) = self.ledger.get(&tick.instrument_uid) else {
            tracing::info!(instrument = %tick.instrument_uid, "Tick for an instrument the bot does not trade.");
            return Ok(());
        };

        if instrument.in_stock {
            let profit = self.sell(&tick.instrument_uid).await?;
            self.realized_profit += profit;
        } else {
            self.buy(&tick.instrument_uid).await?;
        }
        Ok(())
    }

    async fn submit(
        &self,
        instrument_uid: &str,
        side: OrderSide,
        quantity: i64,
    ) -> Result<ExecutionReport, ExecutorError> {
        let request = PostOrderRequest {
            instrument_id: instrument_uid.to_string(),
            quantity,
            price: None,
            direction: side,
            account_id: self.account_id.clone(),
            order_type: OrderType::Market,
            order_id: Uuid::new_v4().to_string(),
        };

        match self.gateway.post_order(&request).await {
            Ok(response) => Ok(transform_execution_report(response)),
            Err(e) => {
                tracing::error!(instrument = instrument_uid, ?side, error = %e, "Order submission failed.");
                Err(e.into())
            }
        }
    }

    /// Starts trading: seeds the account snapshot, then launches the
    /// position stream with its cache writer and the last-price stream with
    /// the decision loop. The decision loop owns the executor until
    /// [`ExecutorHandle::stop`] hands it back.
    pub async fn start(self) -> Result<ExecutorHandle, ExecutorError> {
        // 1. Never decide against an empty snapshot.
        self.refresh_positions().await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = self.state();

        // 2. Position stream folded into the cache.
        let positions = spawn_position_adapter(
            Arc::clone(&self.gateway),
            &self.account_id,
            shutdown_rx.clone(),
        )
        .await?;
        let fold = tokio::spawn(fold_positions(positions.events, Arc::clone(&state)));

        // 3. Last-price stream driving the decision loop.
        let ids = self.ledger.ids();
        let prices = match spawn_last_price_adapter(Arc::clone(&self.gateway), &ids, shutdown_rx).await {
            Ok(adapter) => adapter,
            Err(e) => {
                shutdown.send_replace(true);
                positions.task.await?;
                fold.await?;
                return Err(e.into());
            }
        };
        let decision = tokio::spawn(self.run_decisions(prices.events));

        tracing::info!(instruments = ids.len(), "Executor started.");
        Ok(ExecutorHandle {
            shutdown,
            adapters: vec![positions.task, prices.task],
            fold,
            decision,
        })
    }

    async fn run_decisions(mut self, mut ticks: mpsc::Receiver<LastPriceTick>) -> Executor {
        while let Some(tick) = ticks.recv().await {
            if let Err(e) = self.on_last_price(&tick).await {
                tracing::error!(instrument = %tick.instrument_uid, error = %e, "Failed to act on price tick.");
            }
        }
        tracing::debug!("Decision loop finished.");
        self
    }
}

async fn fold_positions(mut snapshots: mpsc::Receiver<PositionSnapshot>, state: Arc<StateCache>) {
    while let Some(snapshot) = snapshots.recv().await {
        state.update_positions(snapshot);
    }
}

/// A running [`Executor`].
pub struct ExecutorHandle {
    shutdown: watch::Sender<bool>,
    adapters: Vec<JoinHandle<()>>,
    fold: JoinHandle<()>,
    decision: JoinHandle<Executor>,
}

impl ExecutorHandle {
    /// Stops both streams, waits for every task to finish and returns the
    /// executor with its ledger.
    pub async fn stop(self) -> Result<Executor, ExecutorError> {
        self.shutdown.send_replace(true);
        for adapter in self.adapters {
            adapter.await?;
        }
        self.fold.await?;
        let executor = self.decision.await?;
        tracing::info!("Executor stopped.");
        Ok(executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Instrument;
    use core_types::{ExecutionStatus, InstrumentInfo};
    use gateway::{GatewayError, InstrumentResponse, PaperGateway};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const ACCOUNT: &str = "acc";

    fn paper(money: Decimal) -> Arc<PaperGateway> {
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
        gateway.set_money(ACCOUNT, "USD", money);
        Arc::new(gateway)
    }

    fn ledger(currency: &str) -> InstrumentLedger {
        let info = InstrumentInfo::new("uid-x", "BBG-X", "X", 10, currency).unwrap();
        [("uid-x".to_string(), Instrument::new(&info, 1))]
            .into_iter()
            .collect()
    }

    async fn executor(gateway: &Arc<PaperGateway>, currency: &str) -> Executor {
        let executor = Executor::new(gateway.clone(), ACCOUNT, ledger(currency), dec!(2));
        executor.refresh_positions().await.unwrap();
        executor
    }

    #[test]
    fn profitability_is_a_strict_percentage_gain() {
        assert!(is_profitable(dec!(49.8), dec!(51.0), dec!(2)));
        assert!(!is_profitable(dec!(50), dec!(51), dec!(2)));
        assert!(!is_profitable(dec!(50), dec!(49), dec!(0)));
        assert!(!is_profitable(dec!(0), dec!(49), dec!(0)));
    }

    #[tokio::test]
    async fn buy_then_profitable_sell() {
        let gateway = paper(dec!(1000));
        let mut executor = executor(&gateway, "USD").await;

        // Decided at 50, filled at 49.8.
        executor.state.update_price("uid-x", dec!(50));
        gateway.set_mark("uid-x", dec!(49.8));
        executor.buy("uid-x").await.unwrap();

        let instrument = executor.ledger().get("uid-x").unwrap();
        assert!(instrument.in_stock);
        assert_eq!(instrument.entry_price, dec!(49.8));

        executor.state.update_price("uid-x", dec!(51.0));
        gateway.set_mark("uid-x", dec!(51.0));
        let profit = executor.sell("uid-x").await.unwrap();

        assert_eq!(profit, dec!(12.0));
        assert!(!executor.ledger().get("uid-x").unwrap().in_stock);
        assert_eq!(gateway.submitted_orders().len(), 2);
    }

    #[tokio::test]
    async fn second_buy_while_in_stock_submits_nothing() {
        let gateway = paper(dec!(1000));
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-x", dec!(50));

        executor.buy("uid-x").await.unwrap();
        executor.buy("uid-x").await.unwrap();

        assert_eq!(gateway.submitted_orders().len(), 1);
    }

    #[tokio::test]
    async fn sell_when_flat_returns_zero_without_orders() {
        let gateway = paper(dec!(1000));
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-x", dec!(80));

        assert_eq!(executor.sell("uid-x").await.unwrap(), Decimal::ZERO);
        assert!(gateway.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn unprofitable_sell_keeps_position() {
        let gateway = paper(dec!(1000));
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-x", dec!(50));
        executor.buy("uid-x").await.unwrap();

        executor.state.update_price("uid-x", dec!(51));
        assert_eq!(executor.sell("uid-x").await.unwrap(), Decimal::ZERO);
        assert!(executor.ledger().get("uid-x").unwrap().in_stock);
        assert_eq!(gateway.submitted_orders().len(), 1);
    }

    #[tokio::test]
    async fn buy_requires_strictly_more_than_the_order_cost() {
        let gateway = paper(dec!(500));
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-x", dec!(50));

        executor.buy("uid-x").await.unwrap();
        assert!(gateway.submitted_orders().is_empty());

        gateway.set_money(ACCOUNT, "usd", dec!(500.01));
        executor.refresh_positions().await.unwrap();
        executor.buy("uid-x").await.unwrap();
        assert_eq!(gateway.submitted_orders().len(), 1);
    }

    #[tokio::test]
    async fn buy_without_money_in_the_instrument_currency_is_refused() {
        let gateway = paper(dec!(1000000));
        let mut executor = executor(&gateway, "EUR").await;
        executor.state.update_price("uid-x", dec!(50));

        executor.buy("uid-x").await.unwrap();
        assert!(gateway.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn unfilled_buy_is_a_quiet_no_op() {
        let gateway = paper(dec!(1000));
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-x", dec!(50));
        gateway.force_execution_status(Some(ExecutionStatus::Rejected));

        executor.buy("uid-x").await.unwrap();
        assert!(!executor.ledger().get("uid-x").unwrap().in_stock);
        assert_eq!(gateway.submitted_orders().len(), 1);
    }

    #[tokio::test]
    async fn unfilled_sell_returns_zero_and_keeps_position() {
        let gateway = paper(dec!(1000));
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-x", dec!(50));
        executor.buy("uid-x").await.unwrap();

        executor.state.update_price("uid-x", dec!(60));
        gateway.set_mark("uid-x", dec!(60));
        gateway.force_execution_status(Some(ExecutionStatus::New));
        let profit = executor.sell("uid-x").await.unwrap();

        assert_eq!(profit, Decimal::ZERO);
        let instrument = executor.ledger().get("uid-x").unwrap();
        assert!(instrument.in_stock);
        assert_eq!(instrument.entry_price, dec!(50));
        assert_eq!(gateway.submitted_orders().len(), 2);
        assert_eq!(gateway.security(ACCOUNT, "uid-x"), 10);
    }

    #[tokio::test]
    async fn submission_failure_is_returned() {
        let gateway = paper(dec!(1000));
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-x", dec!(50));
        gateway.fail_order_submission(true);

        let err = executor.buy("uid-x").await.unwrap_err();
        assert!(matches!(err, ExecutorError::Gateway(GatewayError::Transport(_))));
        assert!(!executor.ledger().get("uid-x").unwrap().in_stock);
    }

    #[tokio::test]
    async fn unknown_instrument_is_ignored() {
        let gateway = paper(dec!(1000));
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-y", dec!(50));

        executor.buy("uid-y").await.unwrap();
        assert_eq!(executor.sell("uid-y").await.unwrap(), Decimal::ZERO);
        assert!(gateway.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn sell_out_covers_a_short_with_a_buy() {
        let gateway = paper(dec!(10000));
        gateway.set_security(ACCOUNT, "uid-x", -50);
        let mut executor = executor(&gateway, "USD").await;

        let profit = executor.sell_out().await.unwrap();

        let orders = gateway.submitted_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].direction, OrderSide::Buy);
        assert_eq!(orders[0].quantity, 5);
        assert_eq!(profit, Decimal::ZERO);
        assert_eq!(gateway.security(ACCOUNT, "uid-x"), 0);
    }

    #[tokio::test]
    async fn sell_out_leaves_foreign_holdings_alone() {
        let gateway = paper(dec!(1000));
        gateway.set_security(ACCOUNT, "uid-other", 30);
        gateway.set_security(ACCOUNT, "uid-x", 5);
        let mut executor = executor(&gateway, "USD").await;

        executor.sell_out().await.unwrap();

        // uid-x holds less than one lot, uid-other is not ours.
        assert!(gateway.submitted_orders().is_empty());
        assert_eq!(gateway.security(ACCOUNT, "uid-other"), 30);
    }

    #[tokio::test]
    async fn sell_out_realises_profit_on_opened_positions() {
        let gateway = paper(dec!(1000));
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-x", dec!(50));
        executor.buy("uid-x").await.unwrap();

        gateway.set_mark("uid-x", dec!(48));
        let profit = executor.sell_out().await.unwrap();

        assert_eq!(profit, dec!(-20));
        assert!(!executor.ledger().get("uid-x").unwrap().in_stock);
        assert_eq!(gateway.security(ACCOUNT, "uid-x"), 0);
    }

    #[tokio::test]
    async fn sell_out_books_profit_only_on_the_lots_the_bot_bought() {
        let gateway = paper(dec!(1000));
        gateway.set_security(ACCOUNT, "uid-x", 20);
        let mut executor = executor(&gateway, "USD").await;
        executor.state.update_price("uid-x", dec!(50));
        executor.buy("uid-x").await.unwrap();

        gateway.set_mark("uid-x", dec!(60));
        let profit = executor.sell_out().await.unwrap();

        // All 3 lots are flattened, but only 1 lot was opened at 50.
        let orders = gateway.submitted_orders();
        assert_eq!(orders[1].direction, OrderSide::Sell);
        assert_eq!(orders[1].quantity, 3);
        assert_eq!(profit, dec!(100));
        assert_eq!(gateway.security(ACCOUNT, "uid-x"), 0);
    }

    #[tokio::test]
    async fn sell_out_stops_at_the_first_failed_order() {
        let gateway = paper(dec!(1000));
        gateway.set_security(ACCOUNT, "uid-x", 20);
        let mut executor = executor(&gateway, "USD").await;
        gateway.fail_order_submission(true);

        assert!(executor.sell_out().await.is_err());
    }

    async fn wait_for_orders(gateway: &PaperGateway, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.submitted_orders().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn running_executor_trades_on_ticks_and_hands_back_its_ledger() {
        let gateway = paper(dec!(1000));
        let executor = Executor::new(gateway.clone(), ACCOUNT, ledger("USD"), dec!(2));
        let handle = executor.start().await.unwrap();

        gateway.publish_last_price("uid-x", dec!(50));
        wait_for_orders(&gateway, 1).await;
        gateway.publish_last_price("uid-x", dec!(60));
        wait_for_orders(&gateway, 2).await;

        let executor = handle.stop().await.unwrap();
        assert!(!executor.ledger().get("uid-x").unwrap().in_stock);
        assert_eq!(executor.realized_profit(), dec!(100));
        assert_eq!(gateway.security(ACCOUNT, "uid-x"), 0);
    }

    #[tokio::test]
    async fn start_fails_when_positions_cannot_be_fetched() {
        let gateway = paper(dec!(1000));
        let executor = Executor::new(gateway, "missing", ledger("USD"), dec!(2));
        let err = executor.start().await.err().unwrap();
        assert!(matches!(err, ExecutorError::Gateway(GatewayError::NotFound(_))));
    }
}
