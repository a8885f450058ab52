use crate::error::ConfigError;
use rust_decimal::Decimal;
use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gateway: GatewaySettings,
    pub strategy: StrategySettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub paper: PaperSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// How to reach the broker and which account to trade on.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub account_id: String,
    /// Broker endpoint. Endpoints starting with `sandbox` get synthetic balance top-ups.
    pub endpoint: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

impl GatewaySettings {
    pub fn is_sandbox(&self) -> bool {
        self.endpoint.starts_with("sandbox")
    }
}

/// Parameters of the order-book trading strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategySettings {
    /// Instrument uids the bot trades.
    pub instruments: Vec<String>,
    /// ISO code of the currency the instruments trade in.
    pub currency: String,
    /// Minimum available balance in `currency` required to start trading.
    /// Sandbox accounts are topped up automatically.
    pub required_money_balance: Decimal,
    /// Order book depth to subscribe to.
    pub depth: i32,
    /// Bid/ask volume ratio above which the book reads as a buy signal.
    #[serde(default)]
    pub buy_ratio: Decimal,
    /// Ask/bid volume ratio above which the book reads as a sell signal.
    #[serde(default)]
    pub sell_ratio: Decimal,
    /// Minimum gain, in percent of the entry price, before a position is closed.
    pub min_profit: Decimal,
    /// Close every position the bot opened when the session ends.
    #[serde(default)]
    pub sell_out: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSettings {
    /// Stop the bot after this many minutes. Runs until interrupted when unset.
    pub duration_minutes: Option<u64>,
}

/// Market simulation used by the paper gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperSettings {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Maximum relative price move per tick, e.g. 0.002 for 0.2%.
    #[serde(default = "default_volatility")]
    pub volatility: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    pub seed: Option<u64>,
    #[serde(default)]
    pub instruments: Vec<PaperInstrument>,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            volatility: default_volatility(),
            tick_interval_ms: default_tick_interval_ms(),
            seed: None,
            instruments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperInstrument {
    pub uid: String,
    #[serde(default)]
    pub figi: String,
    #[serde(default)]
    pub ticker: String,
    pub lot: i32,
    pub currency: String,
    pub start_price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// An `EnvFilter` directive. `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            directory: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let strategy = &self.strategy;
        if strategy.instruments.is_empty() {
            return Err(ConfigError::ValidationError(
                "strategy.instruments must list at least one instrument".to_string(),
            ));
        }
        if strategy.currency.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "strategy.currency must not be empty".to_string(),
            ));
        }
        if !(1..=50).contains(&strategy.depth) {
            return Err(ConfigError::ValidationError(format!(
                "strategy.depth must be between 1 and 50, got {}",
                strategy.depth
            )));
        }
        if strategy.min_profit.is_sign_negative() {
            return Err(ConfigError::ValidationError(format!(
                "strategy.min_profit must not be negative, got {}",
                strategy.min_profit
            )));
        }
        if strategy.required_money_balance.is_sign_negative() {
            return Err(ConfigError::ValidationError(format!(
                "strategy.required_money_balance must not be negative, got {}",
                strategy.required_money_balance
            )));
        }
        if self.gateway.account_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "gateway.account_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_app_name() -> String {
    "obbot".to_string()
}

fn default_initial_balance() -> Decimal {
    Decimal::from(100_000)
}

fn default_volatility() -> f64 {
    0.002
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use crate::load_config_from_str;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
        [gateway]
        account_id = "acc-1"
        endpoint = "sandbox-invest-public-api.tinkoff.ru:443"

        [strategy]
        instruments = ["uid-a", "uid-b"]
        currency = "RUB"
        required_money_balance = 200000
        depth = 20
        buy_ratio = 2
        sell_ratio = 2
        min_profit = 0.5
        sell_out = true

        [[paper.instruments]]
        uid = "uid-a"
        lot = 10
        currency = "rub"
        start_price = 250.5
    "#;

    #[test]
    fn parses_full_document() {
        let config = load_config_from_str(SAMPLE).unwrap();
        assert!(config.gateway.is_sandbox());
        assert_eq!(config.gateway.app_name, "obbot");
        assert_eq!(config.strategy.instruments, vec!["uid-a", "uid-b"]);
        assert_eq!(config.strategy.required_money_balance, dec!(200000));
        assert_eq!(config.strategy.min_profit, dec!(0.5));
        assert!(config.strategy.sell_out);
        assert_eq!(config.paper.instruments.len(), 1);
        assert_eq!(config.paper.instruments[0].start_price, dec!(250.5));
        assert_eq!(config.paper.tick_interval_ms, 500);
        assert_eq!(config.logging.filter, "info");
        assert!(config.session.duration_minutes.is_none());
    }

    #[test]
    fn rejects_empty_instrument_list() {
        let doc = SAMPLE.replace(r#"instruments = ["uid-a", "uid-b"]"#, "instruments = []");
        assert!(load_config_from_str(&doc).is_err());
    }

    #[test]
    fn rejects_out_of_range_depth() {
        let doc = SAMPLE.replace("depth = 20", "depth = 0");
        assert!(load_config_from_str(&doc).is_err());
    }

    #[test]
    fn production_endpoint_is_not_sandbox() {
        let doc = SAMPLE.replace("sandbox-invest-public-api", "invest-public-api");
        let config = load_config_from_str(&doc).unwrap();
        assert!(!config.gateway.is_sandbox());
    }
}
