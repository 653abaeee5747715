// trading-core/tests/rest.rs
// REST client and connector against a mock axum server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use trading_core::exchange::signing::agent_typed_data;
use trading_core::exchange::types::{Action, OrderStatus};
use trading_core::exchange::wallet::recover_address;
use trading_core::exchange::{
    action_hash, ActionSigner, DirectoryConfig, ExchangeError, ExchangeRestClient,
    HyperliquidConnector, Network, RateLimiter, RestConfig, Signature,
};
use trading_core::runtime::TimerRegistry;

const KEY: &str = "0x0123456789012345678901234567890123456789012345678901234567890123";

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn signer() -> ActionSigner {
    ActionSigner::from_private_key(KEY, Network::Testnet).unwrap()
}

fn client(base_url: &str, signer: Option<ActionSigner>, config: RestConfig) -> ExchangeRestClient {
    let limiter = RateLimiter::new(Default::default(), TimerRegistry::default());
    ExchangeRestClient::new(Network::Testnet, signer, limiter, config)
        .unwrap()
        .with_base_url(base_url)
}

fn fast_config() -> RestConfig {
    RestConfig {
        request_timeout: Duration::from_millis(200),
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
    }
}

/// Info endpoint with a two-asset universe and a small account
async fn mock_info(Json(body): Json<Value>) -> Response {
    let reply = match body["type"].as_str() {
        Some("meta") => json!({
            "universe": [
                { "name": "BTC", "szDecimals": 5, "maxLeverage": 50 },
                { "name": "ETH", "szDecimals": 4, "maxLeverage": 50 }
            ]
        }),
        Some("clearinghouseState") => json!({
            "marginSummary": {
                "accountValue": "10250.75",
                "totalNtlPos": "1800.0",
                "totalRawUsd": "8450.75",
                "totalMarginUsed": "180.0"
            },
            "withdrawable": "10070.75",
            "assetPositions": [{
                "type": "oneWay",
                "position": {
                    "coin": "ETH",
                    "szi": "-1.0",
                    "entryPx": "1800.0",
                    "unrealizedPnl": "-12.5",
                    "liquidationPx": null,
                    "leverage": { "type": "cross", "value": 10 }
                }
            }]
        }),
        Some("openOrders") => json!([
            { "coin": "BTC", "limitPx": "41000.0", "oid": 91, "side": "B", "sz": "0.01", "timestamp": 1700000000000u64 }
        ]),
        Some("l2Book") => json!({
            "coin": body["coin"],
            "time": 1700000000000u64,
            "levels": [
                [{ "px": "1799", "sz": "3", "n": 2 }],
                [{ "px": "1801", "sz": "2", "n": 1 }]
            ]
        }),
        _ => return (StatusCode::BAD_REQUEST, "unknown info type").into_response(),
    };
    Json(reply).into_response()
}

#[tokio::test]
async fn test_connector_reads_universe_and_account() {
    let base_url = serve(Router::new().route("/info", post(mock_info))).await;
    let rest = client(&base_url, Some(signer()), fast_config());
    let connector = HyperliquidConnector::new(Arc::new(rest), DirectoryConfig::default());

    connector.initialize().await.unwrap();
    let directory = connector.directory();
    assert_eq!(directory.len(), 2);
    assert_eq!(directory.resolve_index("ETH").unwrap(), 1);
    assert_eq!(directory.resolve_symbol(0).unwrap(), "BTC");
    assert!(matches!(
        directory.resolve_index("DOGE"),
        Err(ExchangeError::AssetNotFound(_))
    ));

    let account = connector.account_state().await.unwrap();
    assert_eq!(account.account_value, dec!(10250.75));
    assert_eq!(account.withdrawable, dec!(10070.75));
    assert_eq!(account.positions.len(), 1);
    assert_eq!(account.positions[0].size, dec!(-1.0));
    assert_eq!(account.positions[0].liquidation_px, None);

    let orders = connector.open_orders().await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].oid, 91);
    assert!(orders[0].side.is_buy());
}

#[tokio::test]
async fn test_signed_order_body_and_signature() {
    let bodies: Arc<Mutex<Vec<Value>>> = Arc::default();
    let recorded = bodies.clone();
    let app = Router::new().route("/info", post(mock_info)).route(
        "/exchange",
        post(move |Json(body): Json<Value>| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().await.push(body);
                Json(json!({
                    "status": "ok",
                    "response": { "type": "order", "data": { "statuses": [{ "resting": { "oid": 77 } }] } }
                }))
            }
        }),
    );
    let base_url = serve(app).await;

    let signer = signer();
    let address = signer.address().to_string();
    let connector = HyperliquidConnector::new(
        Arc::new(client(&base_url, Some(signer), fast_config())),
        DirectoryConfig::default(),
    );
    connector.initialize().await.unwrap();

    let status = connector
        .place_limit_order("ETH", true, dec!(1800.123456), dec!(0.123456), false)
        .await
        .unwrap();
    assert!(matches!(status, OrderStatus::Resting(ref r) if r.oid == 77));

    let bodies = bodies.lock().await;
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];

    assert_eq!(
        body["action"],
        json!({
            "type": "order",
            "orders": [{
                "a": 1, "b": true, "p": "1800.1", "s": "0.1234", "r": false,
                "t": { "limit": { "tif": "Gtc" } }
            }],
            "grouping": "na"
        })
    );
    assert!(body["vaultAddress"].is_null());
    let nonce = body["nonce"].as_u64().unwrap();
    assert!(nonce > 1_600_000_000_000);

    let signature: Signature = serde_json::from_value(body["signature"].clone()).unwrap();
    assert_eq!(signature.r.len(), 66);
    assert_eq!(signature.s.len(), 66);
    assert!(signature.v == 27 || signature.v == 28);

    // The server can recover the wallet from what was sent
    let action: Action = serde_json::from_value(body["action"].clone()).unwrap();
    let hash = action_hash(&action, nonce, None).unwrap();
    let digest = agent_typed_data(&hash, Network::Testnet).signing_hash().unwrap();
    let recovered = recover_address(&digest, &signature).unwrap();
    assert_eq!(recovered.to_lowercase(), address.to_lowercase());
}

#[tokio::test]
async fn test_exchange_error_status_is_rejected() {
    let app = Router::new().route("/info", post(mock_info)).route(
        "/exchange",
        post(|| async { Json(json!({ "status": "err", "response": "Insufficient margin to place order." })) }),
    );
    let base_url = serve(app).await;
    let connector = HyperliquidConnector::new(
        Arc::new(client(&base_url, Some(signer()), fast_config())),
        DirectoryConfig::default(),
    );
    connector.initialize().await.unwrap();

    match connector.cancel_order("BTC", 5).await {
        Err(ExchangeError::ApiRejected { action, body }) => {
            assert_eq!(action, "cancel");
            assert!(body.contains("Insufficient margin"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_per_order_error_is_rejected() {
    let app = Router::new().route("/info", post(mock_info)).route(
        "/exchange",
        post(|| async {
            Json(json!({
                "status": "ok",
                "response": { "type": "cancel", "data": { "statuses": [{ "error": "Order was never placed, already canceled, or filled." }] } }
            }))
        }),
    );
    let base_url = serve(app).await;
    let connector = HyperliquidConnector::new(
        Arc::new(client(&base_url, Some(signer()), fast_config())),
        DirectoryConfig::default(),
    );
    connector.initialize().await.unwrap();

    let result = connector.cancel_order("ETH", 12).await;
    assert!(matches!(result, Err(ExchangeError::ApiRejected { .. })));
}

#[tokio::test]
async fn test_timeouts_are_retried_then_reported() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let app = Router::new().route(
        "/info",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({ "universe": [] }))
            }
        }),
    );
    let base_url = serve(app).await;
    let rest = client(&base_url, None, fast_config());

    match rest.meta().await {
        Err(ExchangeError::RequestTimeout { endpoint, attempts }) => {
            assert_eq!(endpoint, "/info");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_http_error_is_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let app = Router::new().route(
        "/info",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::TOO_MANY_REQUESTS, "rate limited")
            }
        }),
    );
    let base_url = serve(app).await;
    let rest = client(&base_url, None, fast_config());

    match rest.meta().await {
        Err(ExchangeError::HttpStatus { status, body, .. }) => {
            assert_eq!(status, 429);
            assert_eq!(body, "rate limited");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_info_response() {
    let app = Router::new().route("/info", post(|| async { "<html>maintenance</html>" }));
    let base_url = serve(app).await;
    let rest = client(&base_url, None, fast_config());

    match rest.meta().await {
        Err(ExchangeError::MalformedResponse { endpoint, body, .. }) => {
            assert_eq!(endpoint, "/info (meta)");
            assert!(body.contains("maintenance"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_market_order_prices_off_the_book() {
    let bodies: Arc<Mutex<Vec<Value>>> = Arc::default();
    let recorded = bodies.clone();
    let app = Router::new().route("/info", post(mock_info)).route(
        "/exchange",
        post(move |Json(body): Json<Value>| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().await.push(body);
                Json(json!({
                    "status": "ok",
                    "response": { "type": "order", "data": { "statuses": [
                        { "filled": { "oid": 8, "totalSz": "0.5", "avgPx": "1801" } }
                    ] } }
                }))
            }
        }),
    );
    let base_url = serve(app).await;
    let connector = HyperliquidConnector::new(
        Arc::new(client(&base_url, Some(signer()), fast_config())),
        DirectoryConfig::default(),
    );
    connector.initialize().await.unwrap();

    let status = connector
        .place_market_order("ETH", false, dec!(0.5), dec!(0.05))
        .await
        .unwrap();
    assert!(matches!(status, OrderStatus::Filled(_)));

    // mid 1800, 5% below, Ioc
    let bodies = bodies.lock().await;
    let order = &bodies[0]["action"]["orders"][0];
    assert_eq!(order["p"], "1710");
    assert_eq!(order["b"], false);
    assert_eq!(order["t"], json!({ "limit": { "tif": "Ioc" } }));
}

#[tokio::test]
async fn test_update_leverage_body() {
    let bodies: Arc<Mutex<Vec<Value>>> = Arc::default();
    let recorded = bodies.clone();
    let app = Router::new().route("/info", post(mock_info)).route(
        "/exchange",
        post(move |Json(body): Json<Value>| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().await.push(body);
                Json(json!({ "status": "ok", "response": { "type": "default" } }))
            }
        }),
    );
    let base_url = serve(app).await;
    let connector = HyperliquidConnector::new(
        Arc::new(client(&base_url, Some(signer()), fast_config())),
        DirectoryConfig::default(),
    );
    connector.initialize().await.unwrap();

    connector.update_leverage("ETH", 10, true).await.unwrap();

    let bodies = bodies.lock().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0]["action"],
        json!({ "type": "updateLeverage", "asset": 1, "isCross": true, "leverage": 10 })
    );
    assert!(matches!(
        connector.update_leverage("DOGE", 10, true).await,
        Err(ExchangeError::AssetNotFound(_))
    ));
}

#[tokio::test]
async fn test_meta_and_asset_ctxs_decoding() {
    let app = Router::new().route(
        "/info",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body, json!({ "type": "metaAndAssetCtxs" }));
            Json(json!([
                { "universe": [
                    { "name": "BTC", "szDecimals": 5, "maxLeverage": 50 },
                    { "name": "ETH", "szDecimals": 4, "maxLeverage": 50, "onlyIsolated": false }
                ] },
                [
                    {
                        "funding": "0.0000125", "openInterest": "1520.3", "markPx": "42001.0",
                        "midPx": "42000.5", "oraclePx": "41998.0", "prevDayPx": "41000.0",
                        "dayNtlVlm": "120000000.0"
                    },
                    {
                        "funding": "-0.00001", "openInterest": "30210.7", "markPx": "1800.2",
                        "midPx": null, "oraclePx": "1800.0", "prevDayPx": "1750.0",
                        "dayNtlVlm": "45000000.0"
                    }
                ]
            ]))
        }),
    );
    let base_url = serve(app).await;
    let rest = client(&base_url, None, fast_config());

    let (meta, ctxs) = rest.meta_and_asset_ctxs().await.unwrap();
    assert_eq!(meta.universe.len(), 2);
    assert_eq!(meta.universe[1].name, "ETH");
    assert_eq!(meta.universe[1].sz_decimals, 4);
    assert_eq!(meta.universe[1].only_isolated, Some(false));
    assert_eq!(ctxs.len(), 2);
    assert_eq!(ctxs[0].mark_px, "42001.0");
    assert_eq!(ctxs[0].mid_px.as_deref(), Some("42000.5"));
    assert_eq!(ctxs[1].oracle_px, "1800.0");
    assert_eq!(ctxs[1].mid_px, None);
}

#[tokio::test]
async fn test_candle_snapshot_request_and_decoding() {
    let bodies: Arc<Mutex<Vec<Value>>> = Arc::default();
    let recorded = bodies.clone();
    let app = Router::new().route(
        "/info",
        post(move |Json(body): Json<Value>| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().await.push(body);
                Json(json!([
                    {
                        "t": 1_700_000_000_000u64, "T": 1_700_000_059_999u64, "s": "ETH", "i": "1m",
                        "o": "1800.0", "h": "1810.5", "l": "1795.0", "c": "1805.0", "v": "12.5", "n": 40
                    },
                    {
                        "t": 1_700_000_060_000u64, "T": 1_700_000_119_999u64, "s": "ETH", "i": "1m",
                        "o": "1805.0", "h": "1806.0", "l": "1801.0", "c": "1802.5", "v": "3.25", "n": 11
                    }
                ]))
            }
        }),
    );
    let base_url = serve(app).await;
    let rest = client(&base_url, None, fast_config());

    let candles = rest
        .candle_snapshot("ETH", "1m", 1_700_000_000_000, 1_700_000_120_000)
        .await
        .unwrap();

    assert_eq!(
        bodies.lock().await[0],
        json!({
            "type": "candleSnapshot",
            "req": {
                "coin": "ETH",
                "interval": "1m",
                "startTime": 1_700_000_000_000u64,
                "endTime": 1_700_000_120_000u64
            }
        })
    );
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].timestamp, 1_700_000_000_000);
    assert_eq!(candles[0].high, dec!(1810.5));
    assert_eq!(candles[0].coin.as_deref(), Some("ETH"));
    assert_eq!(candles[1].close, dec!(1802.5));
    assert_eq!(candles[1].volume, dec!(3.25));
    assert_eq!(candles[1].interval.as_deref(), Some("1m"));
}
