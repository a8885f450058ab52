use core_types::OrderBook;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// The most recent order book of each instrument. Cloning shares the same books.
#[derive(Debug, Clone, Default)]
pub struct OrderBookCache {
    books: Arc<Mutex<HashMap<String, OrderBook>>>,
}

impl OrderBookCache {
    pub fn latest(&self, instrument_uid: &str) -> Option<OrderBook> {
        let books = self.books.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        books.get(instrument_uid).cloned()
    }

    fn store(&self, book: OrderBook) {
        let mut books = self.books.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        books.insert(book.instrument_uid.clone(), book);
    }

    /// Consumes order books until the producing adapter stops.
    pub async fn consume(self, mut books: mpsc::Receiver<OrderBook>) {
        while let Some(book) = books.recv().await {
            tracing::debug!(
                instrument = %book.instrument_uid,
                best_bid = ?book.best_bid().map(|o| o.price),
                best_ask = ?book.best_ask().map(|o| o.price),
                spread = ?book.spread(),
                consistent = book.is_consistent,
                "Order book update."
            );
            self.store(book);
        }
    }
}
