// trading-core/src/bin/balance_check.rs
// Account check: loads settings, resolves the universe, prints equity,
// positions and resting orders for the configured wallet.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;
use trading_core::config::Settings;
use trading_core::exchange::{ExchangeRestClient, HyperliquidConnector, RateLimiter};
use trading_core::runtime::TimerRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::new().context("loading settings")?;
    settings.init_logging();

    let Some(signer) = settings.signer().context("building signer")? else {
        bail!("no wallet configured, set HL_WALLET__PRIVATE_KEY");
    };

    let timers = TimerRegistry::new(settings.timer_config());
    let limiter = RateLimiter::new(settings.rate_limiter_config(), timers.clone());
    let rest = ExchangeRestClient::new(
        settings.network,
        Some(signer),
        limiter,
        settings.rest_config(),
    )?
    .with_base_url(settings.api_url());

    let connector = HyperliquidConnector::new(Arc::new(rest), settings.directory_config());

    println!("Network: {} ({})", settings.network, settings.api_url());
    println!("Address: {}", connector.address().unwrap_or("-"));

    connector
        .initialize()
        .await
        .context("loading asset directory")?;
    println!("Assets:  {}", connector.directory().len());

    let account = connector
        .account_state()
        .await
        .context("fetching account state")?;
    println!();
    println!("Account value:  {}", account.account_value);
    println!("Margin used:    {}", account.total_margin_used);
    println!("Withdrawable:   {}", account.withdrawable);

    if account.positions.is_empty() {
        println!("No open positions");
    } else {
        println!();
        println!(
            "{:<10} {:>14} {:>14} {:>14} {:>14}",
            "COIN", "SIZE", "ENTRY", "UPNL", "LIQ"
        );
        for p in &account.positions {
            println!(
                "{:<10} {:>14} {:>14} {:>14} {:>14}",
                p.coin,
                p.size,
                p.entry_px.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                p.unrealized_pnl,
                p.liquidation_px
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".into()),
            );
        }
    }

    let orders = connector
        .open_orders()
        .await
        .context("fetching open orders")?;
    println!();
    if orders.is_empty() {
        println!("No resting orders");
    } else {
        println!("{:<10} {:>6} {:>14} {:>14} {:>14}", "COIN", "SIDE", "PRICE", "SIZE", "OID");
        for o in &orders {
            println!(
                "{:<10} {:>6} {:>14} {:>14} {:>14}",
                o.coin,
                if o.side.is_buy() { "BUY" } else { "SELL" },
                o.limit_px,
                o.sz,
                o.oid
            );
        }
    }

    info!(positions = account.positions.len(), orders = orders.len(), "Balance check done");
    timers.shutdown().await;
    Ok(())
}
