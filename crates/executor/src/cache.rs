use core_types::PositionSnapshot;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Last traded prices and the latest account snapshot, shared between the
/// stream tasks that write them and the decision loop that reads them.
///
/// Every lock is held only for the map access or pointer swap itself, so a
/// caller never blocks on a network call made by another task.
#[derive(Debug, Default)]
pub struct StateCache {
    prices: Mutex<HashMap<String, Decimal>>,
    positions: Mutex<Arc<PositionSnapshot>>,
}

// A poisoned lock still holds a whole value: every write is a single insert or swap.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_price(&self, instrument_uid: &str, price: Decimal) {
        lock(&self.prices).insert(instrument_uid.to_string(), price);
    }

    pub fn price(&self, instrument_uid: &str) -> Option<Decimal> {
        lock(&self.prices).get(instrument_uid).copied()
    }

    /// Replaces the account snapshot wholesale.
    pub fn update_positions(&self, snapshot: PositionSnapshot) {
        *lock(&self.positions) = Arc::new(snapshot);
    }

    /// The most recent snapshot. It is never modified after being stored.
    pub fn positions(&self) -> Arc<PositionSnapshot> {
        Arc::clone(&lock(&self.positions))
    }
}
