use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod connector;
pub mod error;
pub mod normalize;
pub mod paper;
pub mod wire;

// --- Public API ---
pub use connector::{
    shutdown_requested, spawn_last_price_adapter, spawn_order_book_adapter,
    spawn_position_adapter, StreamAdapter,
};
pub use error::GatewayError;
pub use paper::{PaperFeed, PaperGateway};
pub use wire::{
    InstrumentResponse, MoneyValue, PositionsInstrument, PositionsMoney, PositionsResponse,
    PostOrderRequest, PostOrderResponse, Quotation, WireLastPrice, WireOrder, WireOrderBook,
    WirePositionData,
};

/// A server-push subscription. Dropping the stream cancels it; the end of the
/// stream means the broker closed it cleanly.
pub type WireStream<T> = BoxStream<'static, Result<T, GatewayError>>;

/// The generic, abstract interface to the brokerage.
/// This trait is the contract that the bot and executor use, allowing the
/// underlying implementation (live or paper) to be swapped out.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Looks up lot size and currency of an instrument by its uid.
    async fn instrument_by_uid(&self, uid: &str) -> Result<InstrumentResponse, GatewayError>;

    /// Subscribes to order book snapshots of the given depth.
    async fn subscribe_order_books(
        &self,
        instrument_ids: &[String],
        depth: i32,
    ) -> Result<WireStream<WireOrderBook>, GatewayError>;

    /// Subscribes to last-trade prices.
    async fn subscribe_last_prices(
        &self,
        instrument_ids: &[String],
    ) -> Result<WireStream<WireLastPrice>, GatewayError>;

    /// Subscribes to account state updates.
    async fn subscribe_positions(
        &self,
        account_id: &str,
    ) -> Result<WireStream<WirePositionData>, GatewayError>;

    /// Fetches the current account state once.
    async fn get_positions(&self, account_id: &str) -> Result<PositionsResponse, GatewayError>;

    /// Submits an order and waits for its execution report.
    async fn post_order(&self, request: &PostOrderRequest)
    -> Result<PostOrderResponse, GatewayError>;

    /// Credits (or, with a negative amount, debits) a sandbox account and
    /// returns the new balance in that currency.
    async fn sandbox_pay_in(
        &self,
        account_id: &str,
        amount: &MoneyValue,
    ) -> Result<MoneyValue, GatewayError>;
}
