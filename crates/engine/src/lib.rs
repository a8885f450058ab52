use configuration::{GatewaySettings, StrategySettings};
use core_types::OrderBook;
use executor::{Executor, ExecutorError, Instrument, InstrumentLedger};
use gateway::normalize::transform_instrument;
use gateway::{BrokerGateway, MoneyValue, shutdown_requested, spawn_order_book_adapter};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;

pub mod error;
pub mod order_books;
pub mod paper;

pub use error::BotError;
pub use order_books::OrderBookCache;
pub use paper::paper_gateway;

/// Lots bought or sold per order.
pub const ORDER_QUANTITY: i64 = 1;

/// Lifecycle of a [`Bot`]. It only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// What a finished run earned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Profit of the sells made while trading.
    pub strategy_profit: Decimal,
    /// Profit of closing positions at the end of the run.
    pub sell_out_profit: Decimal,
}

impl RunSummary {
    pub fn total(&self) -> Decimal {
        self.strategy_profit + self.sell_out_profit
    }
}

/// Requests a running [`Bot`] to stop. Can be cloned and sent to other tasks.
#[derive(Clone)]
pub struct BotStopper {
    shutdown: Arc<watch::Sender<bool>>,
}

impl BotStopper {
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// The orchestrator for one trading session.
pub struct Bot {
    // --- Configuration ---
    gateway_settings: GatewaySettings,
    strategy: StrategySettings,

    // --- Collaborators ---
    gateway: Arc<dyn BrokerGateway>,
    /// Present before `run` and again once the run has finished.
    executor: Option<Executor>,
    order_books: OrderBookCache,

    // --- Lifecycle ---
    state: watch::Sender<BotState>,
    shutdown: Arc<watch::Sender<bool>>,
    parent_shutdown: watch::Receiver<bool>,
}

impl Bot {
    /// Creates a bot trading `strategy.instruments`, looking up the lot size and
    /// currency of each one.
    ///
    /// The run also ends when `parent_shutdown` turns true or its sender is
    /// dropped.
    pub async fn new(
        gateway: Arc<dyn BrokerGateway>,
        gateway_settings: GatewaySettings,
        strategy: StrategySettings,
        parent_shutdown: watch::Receiver<bool>,
    ) -> Result<Self, BotError> {
        if strategy.instruments.is_empty() {
            return Err(BotError::Configuration("no instruments to trade".to_string()));
        }

        let mut ledger = InstrumentLedger::new();
        for uid in &strategy.instruments {
            let lookup_failed = |reason: String| BotError::InstrumentLookup {
                uid: uid.clone(),
                reason,
            };
            let response = gateway
                .instrument_by_uid(uid)
                .await
                .map_err(|e| lookup_failed(e.to_string()))?;
            let info = transform_instrument(response).map_err(|e| lookup_failed(e.to_string()))?;
            tracing::info!(instrument = %uid, ticker = %info.ticker, lot = info.lot, currency = %info.currency, "Instrument loaded.");
            ledger.insert(uid.clone(), Instrument::new(&info, ORDER_QUANTITY));
        }

        let executor = Executor::new(
            Arc::clone(&gateway),
            gateway_settings.account_id.clone(),
            ledger,
            strategy.min_profit,
        );
        let (state, _) = watch::channel(BotState::Created);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            gateway_settings,
            strategy,
            gateway,
            executor: Some(executor),
            order_books: OrderBookCache::default(),
            state,
            shutdown: Arc::new(shutdown),
            parent_shutdown,
        })
    }

    pub fn state(&self) -> BotState {
        *self.state.borrow()
    }

    /// Observes lifecycle transitions from another task.
    pub fn watch_state(&self) -> watch::Receiver<BotState> {
        self.state.subscribe()
    }

    /// Ends a running session. Calling it again, or before `run`, is harmless;
    /// a bot stopped before `run` stops as soon as it has started.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn stopper(&self) -> BotStopper {
        BotStopper {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn latest_order_book(&self, instrument_uid: &str) -> Option<OrderBook> {
        self.order_books.latest(instrument_uid)
    }

    pub fn order_books(&self) -> OrderBookCache {
        self.order_books.clone()
    }

    /// The executor, while the bot is not running.
    pub fn executor(&self) -> Option<&Executor> {
        self.executor.as_ref()
    }

    fn set_state(&self, state: BotState) {
        tracing::debug!(?state, "Bot state changed.");
        self.state.send_replace(state);
    }

    /// Trades until stopped, then drains every task and optionally closes
    /// every position the bot opened.
    pub async fn run(&mut self) -> Result<RunSummary, BotError> {
        let executor = match (self.state(), self.executor.take()) {
            (BotState::Created, Some(executor)) => executor,
            (_, executor) => {
                self.executor = executor;
                return Err(BotError::AlreadyStarted);
            }
        };
        self.set_state(BotState::Running);

        let result = self.trade(executor).await;
        self.set_state(BotState::Stopped);
        result
    }

    async fn trade(&mut self, executor: Executor) -> Result<RunSummary, BotError> {
        // 1. Make sure there is money to trade with.
        if let Err(e) = self.ensure_balance(&executor).await {
            self.executor = Some(executor);
            return Err(e);
        }

        // 2. Order books, kept for inspection.
        let (books_shutdown, books_shutdown_rx) = watch::channel(false);
        let books = match spawn_order_book_adapter(
            Arc::clone(&self.gateway),
            &self.strategy.instruments,
            self.strategy.depth,
            books_shutdown_rx,
        )
        .await
        {
            Ok(adapter) => adapter,
            Err(e) => {
                self.executor = Some(executor);
                return Err(e.into());
            }
        };
        let consumer = tokio::spawn(self.order_books.clone().consume(books.events));

        // 3. The executor takes over trading decisions.
        let handle = match executor.start().await {
            Ok(handle) => handle,
            Err(e) => {
                books_shutdown.send_replace(true);
                books.task.await.map_err(ExecutorError::from)?;
                consumer.await.map_err(ExecutorError::from)?;
                return Err(e.into());
            }
        };
        tracing::info!(
            instruments = self.strategy.instruments.len(),
            account = %self.gateway_settings.account_id,
            "Bot is running."
        );

        // 4. Until our own stop or the parent's.
        let mut own = self.shutdown.subscribe();
        let mut parent = self.parent_shutdown.clone();
        tokio::select! {
            _ = shutdown_requested(&mut own) => tracing::info!("Stop requested."),
            _ = shutdown_requested(&mut parent) => tracing::info!("Session cancelled."),
        }
        self.set_state(BotState::Stopping);

        // 5. Drain the order book stream, then the executor's streams and
        //    decision loop. Nothing writes account state after this point.
        books_shutdown.send_replace(true);
        books.task.await.map_err(ExecutorError::from)?;
        consumer.await.map_err(ExecutorError::from)?;
        let mut executor = handle.stop().await?;

        // 6. Liquidate.
        let strategy_profit = executor.realized_profit();
        let sell_out = if self.strategy.sell_out {
            executor.sell_out().await
        } else {
            Ok(Decimal::ZERO)
        };
        self.executor = Some(executor);
        let summary = RunSummary {
            strategy_profit,
            sell_out_profit: sell_out?,
        };

        tracing::info!(
            strategy_profit = %summary.strategy_profit,
            sell_out_profit = %summary.sell_out_profit,
            total = %summary.total(),
            "Bot stopped."
        );
        Ok(summary)
    }

    /// Checks the account holds at least the required balance. A sandbox
    /// account is topped up by the shortfall; any other account fails.
    async fn ensure_balance(&self, executor: &Executor) -> Result<(), BotError> {
        executor.refresh_positions().await?;

        let currency = &self.strategy.currency;
        let required = self.strategy.required_money_balance;
        let available = executor.state().positions().available_in(currency);
        if available >= required {
            tracing::info!(%currency, %available, "Balance check passed.");
            return Ok(());
        }

        if !self.gateway_settings.is_sandbox() {
            return Err(BotError::InsufficientBalance {
                currency: currency.clone(),
                required,
                available,
            });
        }

        let shortfall = required - available;
        let amount = MoneyValue::from_decimal(currency.as_str(), shortfall).ok_or_else(|| {
            BotError::Configuration(format!("top-up amount {shortfall} is out of range"))
        })?;
        let balance = self
            .gateway
            .sandbox_pay_in(&self.gateway_settings.account_id, &amount)
            .await?;
        tracing::info!(%currency, %shortfall, balance = %balance.to_decimal(), "Sandbox account topped up.");

        executor.refresh_positions().await?;
        Ok(())
    }
}
