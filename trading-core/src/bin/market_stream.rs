// trading-core/src/bin/market_stream.rs
// Live feed: books and candles for the symbols on the command line
// (default BTC ETH), plus the wallet's fills when a key is configured.
// Runs until Ctrl-C or until reconnects are exhausted.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::{info, warn};
use trading_core::config::Settings;
use trading_core::exchange::utils::validate_hyperliquid_symbol;
use trading_core::exchange::{ConnectionSupervisor, StreamEvent, Subscription};
use trading_core::runtime::TimerRegistry;

const DEFAULT_SYMBOLS: [&str; 2] = ["BTC", "ETH"];

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::new().context("loading settings")?;
    settings.init_logging();

    let mut symbols = std::env::args()
        .skip(1)
        .map(|s| validate_hyperliquid_symbol(&s))
        .collect::<Result<Vec<_>, _>>()?;
    if symbols.is_empty() {
        symbols = DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect();
    }
    let interval = std::env::var("MARKET_STREAM_INTERVAL").unwrap_or_else(|_| "1m".to_string());

    let timers = TimerRegistry::new(settings.timer_config());
    let (supervisor, mut events) =
        ConnectionSupervisor::spawn(settings.supervisor_config(), timers.clone());

    for symbol in &symbols {
        supervisor.subscribe(Subscription::l2_book(symbol))?;
        supervisor.subscribe(Subscription::candle(symbol, &interval))?;
    }
    if let Some(signer) = settings.signer()? {
        supervisor.subscribe(Subscription::user_fills(signer.address()))?;
    }

    println!("Connecting to {} ...", settings.ws_url());
    supervisor.connect().await.context("opening stream")?;
    info!(symbols = ?symbols, interval = %interval, "Stream open");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("Event channel closed");
                    break;
                };
                match event {
                    StreamEvent::L2Book(book) => {
                        let mid = book.mid_price().map(|m| m.to_string()).unwrap_or_else(|| "-".into());
                        let spread_bps = book
                            .spread()
                            .map(|s| (s * Decimal::from(10_000)).round_dp(2).to_string())
                            .unwrap_or_else(|| "-".into());
                        println!("[BOOK]   {:<8} mid {:>14}  spread {:>8} bps", book.coin, mid, spread_bps);
                    }
                    StreamEvent::Candle(candle) => {
                        println!(
                            "[CANDLE] {:<8} {} o {} h {} l {} c {} v {}",
                            candle.coin.as_deref().unwrap_or("?"),
                            candle.timestamp,
                            candle.open,
                            candle.high,
                            candle.low,
                            candle.close,
                            candle.volume
                        );
                    }
                    StreamEvent::UserFills(fills) => {
                        for fill in &fills.fills {
                            println!(
                                "[FILL]   {:<8} {} {} @ {} (snapshot: {})",
                                fill.coin,
                                if fill.side.is_buy() { "BUY" } else { "SELL" },
                                fill.sz, fill.px, fills.is_snapshot
                            );
                        }
                    }
                    fatal @ StreamEvent::Fatal { .. } => {
                        if let Some(err) = fatal.fatal_error() {
                            warn!(error = %err, "Stream gave up");
                        }
                        break;
                    }
                }
            }
        }
    }

    supervisor.disconnect().await;
    timers.shutdown().await;
    Ok(())
}
