use configuration::{Config, load_config_from_str};
use core_types::OrderSide;
use engine::{Bot, BotError, BotState, BotStopper, RunSummary, paper_gateway};
use gateway::PaperGateway;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

const CONFIG: &str = r#"
    [gateway]
    account_id = "paper-1"
    endpoint = "sandbox-invest-public-api"

    [strategy]
    instruments = ["uid-x"]
    currency = "USD"
    required_money_balance = 1000
    depth = 5
    min_profit = 2
    sell_out = true

    [paper]
    initial_balance = 1000

    [[paper.instruments]]
    uid = "uid-x"
    figi = "BBG-X"
    ticker = "X"
    lot = 10
    currency = "usd"
    start_price = 50
"#;

fn config() -> Config {
    load_config_from_str(CONFIG).unwrap()
}

struct Session {
    gateway: Arc<PaperGateway>,
    run: tokio::task::JoinHandle<(Bot, Result<RunSummary, BotError>)>,
    stopper: BotStopper,
    _parent: watch::Sender<bool>,
}

async fn start(config: Config) -> Session {
    let gateway = Arc::new(paper_gateway(&config));
    let (parent, parent_rx) = watch::channel(false);
    let mut bot = Bot::new(gateway.clone(), config.gateway, config.strategy, parent_rx)
        .await
        .unwrap();
    let stopper = bot.stopper();
    let mut state = bot.watch_state();

    let run = tokio::spawn(async move {
        let summary = bot.run().await;
        (bot, summary)
    });
    timeout(Duration::from_secs(5), state.wait_for(|s| *s == BotState::Running))
        .await
        .unwrap()
        .unwrap();

    Session {
        gateway,
        run,
        stopper,
        _parent: parent,
    }
}

async fn wait_for_orders(gateway: &PaperGateway, count: usize) {
    timeout(Duration::from_secs(5), async {
        while gateway.submitted_orders().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

async fn finish(session: Session) -> (Bot, RunSummary) {
    session.stopper.stop();
    let (bot, summary) = timeout(Duration::from_secs(5), session.run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bot.state(), BotState::Stopped);
    (bot, summary.unwrap())
}

#[tokio::test]
async fn open_position_is_sold_out_when_the_bot_stops() {
    let session = start(config()).await;
    let gateway = session.gateway.clone();

    gateway.publish_last_price("uid-x", dec!(50));
    wait_for_orders(&gateway, 1).await;
    // 1% up: below the 2% minimum profit, the position stays open.
    gateway.publish_last_price("uid-x", dec!(50.5));

    let (bot, summary) = finish(session).await;

    assert_eq!(summary.strategy_profit, dec!(0));
    assert_eq!(summary.sell_out_profit, dec!(5));
    let orders = gateway.submitted_orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].direction, OrderSide::Buy);
    assert_eq!(orders[1].direction, OrderSide::Sell);
    assert_eq!(gateway.security("paper-1", "uid-x"), 0);
    let ledger = bot.executor().unwrap().ledger();
    assert!(!ledger.get("uid-x").unwrap().in_stock);
}

#[tokio::test]
async fn profitable_tick_is_sold_while_running() {
    let session = start(config()).await;
    let gateway = session.gateway.clone();

    gateway.publish_last_price("uid-x", dec!(50));
    wait_for_orders(&gateway, 1).await;
    gateway.publish_last_price("uid-x", dec!(60));
    wait_for_orders(&gateway, 2).await;

    let (_bot, summary) = finish(session).await;

    assert_eq!(summary.strategy_profit, dec!(100));
    assert_eq!(summary.sell_out_profit, dec!(0));
    assert_eq!(summary.total(), dec!(100));
    assert_eq!(gateway.submitted_orders().len(), 2);
    assert_eq!(gateway.money("paper-1", "usd"), dec!(1100));
}

#[tokio::test]
async fn positions_are_kept_without_sell_out() {
    let mut config = config();
    config.strategy.sell_out = false;
    let session = start(config).await;
    let gateway = session.gateway.clone();

    gateway.publish_last_price("uid-x", dec!(50));
    wait_for_orders(&gateway, 1).await;

    let (bot, summary) = finish(session).await;

    assert_eq!(summary, RunSummary::default());
    assert_eq!(gateway.submitted_orders().len(), 1);
    assert_eq!(gateway.security("paper-1", "uid-x"), 10);
    assert!(bot.executor().unwrap().ledger().get("uid-x").unwrap().in_stock);
}

#[tokio::test]
async fn holdings_the_bot_did_not_open_survive_sell_out() {
    let config = config();
    let session = start(config).await;
    let gateway = session.gateway.clone();
    gateway.set_security("paper-1", "uid-foreign", 40);

    let (_bot, summary) = finish(session).await;

    assert_eq!(summary, RunSummary::default());
    assert!(gateway.submitted_orders().is_empty());
    assert_eq!(gateway.security("paper-1", "uid-foreign"), 40);
}
