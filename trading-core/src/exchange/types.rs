// exchange/types.rs
// Wire types for the info and exchange endpoints and the stream payloads.
//
// Field declaration order of every action struct is its canonical encoding
// order: the same struct is MessagePack-encoded for the signature and
// JSON-encoded for transmission.

use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trading_common::data::types::parse_decimal;
use trading_common::{Candle, DataError, DataResult, Fill, L2Book, Level, Side, UserFills};

// ====================================================================
// ACTIONS (signed, POST /exchange)
// ====================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Order(BulkOrder),
    Cancel(BulkCancel),
    UpdateLeverage(UpdateLeverage),
}

impl Action {
    /// Wire name of the action, used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Order(_) => "order",
            Action::Cancel(_) => "cancel",
            Action::UpdateLeverage(_) => "updateLeverage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOrder {
    pub orders: Vec<OrderWire>,
    pub grouping: Grouping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Grouping {
    Na,
    NormalTpsl,
    PositionTpsl,
}

/// One order entry in compact wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderWire {
    /// Asset index
    #[serde(rename = "a")]
    pub asset: u32,
    #[serde(rename = "b")]
    pub is_buy: bool,
    #[serde(rename = "p")]
    pub limit_px: String,
    #[serde(rename = "s")]
    pub sz: String,
    #[serde(rename = "r")]
    pub reduce_only: bool,
    #[serde(rename = "t")]
    pub order_type: OrderTypeWire,
    /// Client order id (0x + 16 bytes hex)
    #[serde(rename = "c", skip_serializing_if = "Option::is_none", default)]
    pub cloid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderTypeWire {
    Limit(LimitWire),
    Trigger(TriggerWire),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitWire {
    pub tif: Tif,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerWire {
    pub is_market: bool,
    pub trigger_px: String,
    pub tpsl: Tpsl,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tif {
    /// Add liquidity only (post only)
    Alo,
    /// Immediate or cancel
    Ioc,
    /// Good til cancelled
    Gtc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tpsl {
    Tp,
    Sl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkCancel {
    pub cancels: Vec<CancelWire>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelWire {
    #[serde(rename = "a")]
    pub asset: u32,
    #[serde(rename = "o")]
    pub oid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLeverage {
    pub asset: u32,
    pub is_cross: bool,
    pub leverage: u32,
}

/// Body of POST /exchange
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePayload<'a> {
    pub action: &'a Action,
    pub nonce: u64,
    pub signature: &'a super::wallet::Signature,
    pub vault_address: Option<String>,
}

/// `{status: "ok"|"err", response: ...}`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    pub status: String,
    #[serde(default)]
    pub response: Value,
}

impl ExchangeResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Per-entry statuses of an order/cancel response
    pub fn statuses(&self) -> Vec<Value> {
        self.response["data"]["statuses"]
            .as_array()
            .cloned()
            .unwrap_or_default()
    }

    /// Decodes order statuses; entries that are neither resting, filled nor
    /// error (e.g. "waitingForFill") are skipped.
    pub fn order_statuses(&self) -> Vec<OrderStatus> {
        self.statuses()
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Resting(RestingOrder),
    Filled(FilledOrder),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RestingOrder {
    pub oid: u64,
    #[serde(default)]
    pub cloid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledOrder {
    pub oid: u64,
    #[serde(deserialize_with = "de_decimal")]
    pub total_sz: Decimal,
    #[serde(deserialize_with = "de_decimal")]
    pub avg_px: Decimal,
}

// ====================================================================
// INFO (unsigned, POST /info)
// ====================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InfoRequest {
    Meta,
    MetaAndAssetCtxs,
    ClearinghouseState { user: String },
    OpenOrders { user: String },
    L2Book { coin: String },
    CandleSnapshot { req: CandleSnapshotRequest },
}

impl InfoRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            InfoRequest::Meta => "meta",
            InfoRequest::MetaAndAssetCtxs => "metaAndAssetCtxs",
            InfoRequest::ClearinghouseState { .. } => "clearinghouseState",
            InfoRequest::OpenOrders { .. } => "openOrders",
            InfoRequest::L2Book { .. } => "l2Book",
            InfoRequest::CandleSnapshot { .. } => "candleSnapshot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleSnapshotRequest {
    pub coin: String,
    pub interval: String,
    pub start_time: u64,
    pub end_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    pub sz_decimals: u32,
    #[serde(default)]
    pub max_leverage: Option<u32>,
    #[serde(default)]
    pub only_isolated: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub universe: Vec<AssetMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtx {
    pub funding: String,
    pub open_interest: String,
    pub mark_px: String,
    #[serde(default)]
    pub mid_px: Option<String>,
    pub oracle_px: String,
    pub prev_day_px: String,
    pub day_ntl_vlm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummary {
    pub account_value: String,
    pub total_ntl_pos: String,
    pub total_raw_usd: String,
    pub total_margin_used: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseState {
    pub margin_summary: MarginSummary,
    pub withdrawable: String,
    pub asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPosition {
    pub position: PositionData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub coin: String,
    /// Signed size, negative = short
    pub szi: String,
    #[serde(default)]
    pub entry_px: Option<String>,
    pub unrealized_pnl: String,
    #[serde(default)]
    pub liquidation_px: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub coin: String,
    pub limit_px: String,
    pub oid: u64,
    pub side: Side,
    pub sz: String,
    pub timestamp: u64,
}

// ====================================================================
// MARKET DATA (stream payloads and info snapshots)
// ====================================================================

/// Flexible numeric: JSON number or numeric string
fn de_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => parse_decimal("value", &s).map_err(de::Error::custom),
        Value::Number(n) => parse_decimal("value", &n.to_string()).map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected number, got {}", other))),
    }
}

fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("expected unsigned integer, got {}", n))),
        Value::String(s) => s.trim().parse::<u64>().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected integer, got {}", other))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireLevel {
    pub px: String,
    pub sz: String,
    pub n: u32,
}

impl WireLevel {
    fn into_level(self) -> DataResult<Level> {
        Ok(Level {
            px: parse_decimal("px", &self.px)?,
            sz: parse_decimal("sz", &self.sz)?,
            n: self.n,
        })
    }
}

/// `{coin, time, levels: [bids[], asks[]]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireL2Book {
    pub coin: String,
    pub time: u64,
    pub levels: Vec<Vec<WireLevel>>,
}

impl WireL2Book {
    pub fn into_book(self) -> DataResult<L2Book> {
        if self.coin.is_empty() {
            return Err(DataError::InvalidBook("empty coin".to_string()));
        }
        if self.levels.len() != 2 {
            return Err(DataError::InvalidBook(format!(
                "expected 2 sides, got {}",
                self.levels.len()
            )));
        }

        let mut sides = self.levels.into_iter().map(|side| {
            side.into_iter()
                .map(WireLevel::into_level)
                .collect::<DataResult<Vec<Level>>>()
        });
        let bids = sides.next().unwrap_or_else(|| Ok(Vec::new()))?;
        let asks = sides.next().unwrap_or_else(|| Ok(Vec::new()))?;

        Ok(L2Book {
            coin: self.coin,
            time: self.time,
            bids,
            asks,
        })
    }
}

/// Candle in either the long (`timestamp/open/...`) or the exchange's
/// short (`t/o/h/l/c/v`) spelling
#[derive(Debug, Clone, Deserialize)]
pub struct WireCandle {
    #[serde(alias = "t", deserialize_with = "de_u64")]
    pub timestamp: u64,
    #[serde(alias = "o", deserialize_with = "de_decimal")]
    pub open: Decimal,
    #[serde(alias = "h", deserialize_with = "de_decimal")]
    pub high: Decimal,
    #[serde(alias = "l", deserialize_with = "de_decimal")]
    pub low: Decimal,
    #[serde(alias = "c", deserialize_with = "de_decimal")]
    pub close: Decimal,
    #[serde(alias = "v", deserialize_with = "de_decimal")]
    pub volume: Decimal,
    #[serde(alias = "s", default)]
    pub coin: Option<String>,
    #[serde(alias = "i", default)]
    pub interval: Option<String>,
}

impl WireCandle {
    pub fn into_candle(self) -> DataResult<Candle> {
        let candle = Candle {
            coin: self.coin,
            interval: self.interval,
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        };
        candle.validate()?;
        Ok(candle)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFill {
    pub coin: String,
    pub px: String,
    pub sz: String,
    pub side: String,
    pub time: u64,
    pub dir: String,
    pub closed_pnl: String,
    pub fee: String,
    pub oid: u64,
    #[serde(default)]
    pub start_position: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub crossed: Option<bool>,
    #[serde(default)]
    pub tid: Option<u64>,
    #[serde(default)]
    pub fee_token: Option<String>,
}

impl WireFill {
    pub fn into_fill(self) -> DataResult<Fill> {
        if self.coin.is_empty() {
            return Err(DataError::InvalidFill("empty coin".to_string()));
        }
        let start_position = self
            .start_position
            .as_deref()
            .map(|raw| parse_decimal("startPosition", raw))
            .transpose()?;

        Ok(Fill {
            px: parse_decimal("px", &self.px)?,
            sz: parse_decimal("sz", &self.sz)?,
            side: self.side.parse()?,
            closed_pnl: parse_decimal("closedPnl", &self.closed_pnl)?,
            fee: parse_decimal("fee", &self.fee)?,
            coin: self.coin,
            time: self.time,
            dir: self.dir,
            oid: self.oid,
            start_position,
            hash: self.hash,
            crossed: self.crossed,
            tid: self.tid,
            fee_token: self.fee_token,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUserFills {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub is_snapshot: bool,
    pub fills: Vec<WireFill>,
}

impl WireUserFills {
    pub fn into_user_fills(self) -> DataResult<UserFills> {
        let fills = self
            .fills
            .into_iter()
            .map(WireFill::into_fill)
            .collect::<DataResult<Vec<Fill>>>()?;
        Ok(UserFills {
            user: self.user,
            is_snapshot: self.is_snapshot,
            fills,
        })
    }
}
