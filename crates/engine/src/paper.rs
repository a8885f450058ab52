//! Builds the paper broker a configured session trades against.

use configuration::{Config, PaperInstrument};
use gateway::{InstrumentResponse, PaperGateway};

/// A paper broker holding the configured instruments at their start prices,
/// with the configured starting balance credited to the trading account in
/// the strategy currency.
pub fn paper_gateway(config: &Config) -> PaperGateway {
    let gateway = PaperGateway::new(config.gateway.is_sandbox());
    for instrument in &config.paper.instruments {
        gateway.register_instrument(wire_instrument(instrument), Some(instrument.start_price));
    }
    gateway.set_money(
        &config.gateway.account_id,
        &config.strategy.currency,
        config.paper.initial_balance,
    );
    tracing::debug!(
        instruments = config.paper.instruments.len(),
        balance = %config.paper.initial_balance,
        "Paper broker prepared."
    );
    gateway
}

fn wire_instrument(instrument: &PaperInstrument) -> InstrumentResponse {
    // A missing FIGI falls back to the uid.
    let figi = if instrument.figi.is_empty() { &instrument.uid } else { &instrument.figi };
    InstrumentResponse {
        uid: instrument.uid.clone(),
        figi: figi.clone(),
        ticker: instrument.ticker.clone(),
        lot: instrument.lot,
        currency: instrument.currency.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configuration::load_config_from_str;
    use gateway::{BrokerGateway, GatewayError, MoneyValue};
    use rust_decimal_macros::dec;

    const CONFIG: &str = r#"
        [gateway]
        account_id = "paper-1"
        endpoint = "invest-public-api"

        [strategy]
        instruments = ["uid-x"]
        currency = "USD"
        required_money_balance = 500
        depth = 5
        min_profit = 1

        [paper]
        initial_balance = 750

        [[paper.instruments]]
        uid = "uid-x"
        lot = 10
        currency = "usd"
        start_price = 50
    "#;

    #[tokio::test]
    async fn configured_instruments_and_balance_are_loaded() {
        let config = load_config_from_str(CONFIG).unwrap();
        let gateway = paper_gateway(&config);

        let instrument = gateway.instrument_by_uid("uid-x").await.unwrap();
        assert_eq!(instrument.figi, "uid-x");
        assert_eq!(instrument.lot, 10);
        assert_eq!(gateway.money("paper-1", "usd"), dec!(750));

        // A production endpoint refuses top-ups.
        let err = gateway
            .sandbox_pay_in("paper-1", &MoneyValue::from_decimal("usd", dec!(1)).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::SandboxOnly);
    }
}
