// ====
// Hyperliquid API Connector
// ====
// Trading facade over the REST client and the asset directory.
// Symbols in, typed statuses out; all wire details stay below this layer.
// ====

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use super::directory::{AssetDirectory, DirectoryConfig};
use super::errors::ExchangeError;
use super::rest::ExchangeRestClient;
use super::types::*;
use super::utils::{
    format_decimal, parse_price, parse_size, round_price, round_size, slippage_price,
    validate_cloid,
};

/// How an order rests on the book
#[derive(Debug, Clone, PartialEq)]
pub enum OrderKind {
    Limit(Tif),
    Trigger {
        trigger_px: Decimal,
        is_market: bool,
        tpsl: Tpsl,
    },
}

/// Order in caller terms (symbol, decimals)
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub is_buy: bool,
    pub price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
    pub kind: OrderKind,
    pub cloid: Option<String>,
}

impl OrderRequest {
    pub fn limit(symbol: &str, is_buy: bool, price: Decimal, size: Decimal, tif: Tif) -> Self {
        Self {
            symbol: symbol.to_string(),
            is_buy,
            price,
            size,
            reduce_only: false,
            kind: OrderKind::Limit(tif),
            cloid: None,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_cloid(mut self, cloid: impl Into<String>) -> Self {
        self.cloid = Some(cloid.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub coin: String,
    /// Signed, negative = short
    pub size: Decimal,
    pub entry_px: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub liquidation_px: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    pub account_value: Decimal,
    pub total_margin_used: Decimal,
    pub withdrawable: Decimal,
    pub positions: Vec<Position>,
}

impl AccountState {
    fn from_wire(state: ClearinghouseState) -> Result<Self, ExchangeError> {
        let optional = |raw: &Option<String>| raw.as_deref().map(parse_price).transpose();

        let positions = state
            .asset_positions
            .iter()
            .map(|p| {
                Ok(Position {
                    coin: p.position.coin.clone(),
                    size: parse_size(&p.position.szi)?,
                    entry_px: optional(&p.position.entry_px)?,
                    unrealized_pnl: parse_price(&p.position.unrealized_pnl)?,
                    liquidation_px: optional(&p.position.liquidation_px)?,
                })
            })
            .collect::<Result<Vec<_>, ExchangeError>>()?;

        Ok(Self {
            account_value: parse_price(&state.margin_summary.account_value)?,
            total_margin_used: parse_price(&state.margin_summary.total_margin_used)?,
            withdrawable: parse_price(&state.withdrawable)?,
            positions,
        })
    }
}

/// Hyperliquid Connector
pub struct HyperliquidConnector {
    rest: Arc<ExchangeRestClient>,
    directory: AssetDirectory,
}

impl HyperliquidConnector {
    /// Directory backed by the REST client's `meta` query
    pub fn new(rest: Arc<ExchangeRestClient>, directory_config: DirectoryConfig) -> Self {
        let directory = AssetDirectory::new(rest.clone(), directory_config);
        Self { rest, directory }
    }

    pub fn with_directory(rest: Arc<ExchangeRestClient>, directory: AssetDirectory) -> Self {
        Self { rest, directory }
    }

    /// Loads the asset directory; call once before trading
    pub async fn initialize(&self) -> Result<(), ExchangeError> {
        self.directory.initialize().await?;
        info!(
            network = %self.rest.network(),
            assets = self.directory.len(),
            address = self.address().unwrap_or("-"),
            "Connector ready"
        );
        Ok(())
    }

    /// Get wallet address
    pub fn address(&self) -> Option<&str> {
        self.rest.address()
    }

    pub fn rest(&self) -> &ExchangeRestClient {
        &self.rest
    }

    pub fn directory(&self) -> &AssetDirectory {
        &self.directory
    }

    // ====================================================================
    // ORDERS
    // ====================================================================

    /// Builds the wire entry: resolves the asset and rounds to its decimals
    pub fn order_wire(&self, order: &OrderRequest) -> Result<OrderWire, ExchangeError> {
        let asset = self.directory.resolve_index(&order.symbol)?;
        let sz_decimals = self.directory.sz_decimals(asset)?;

        let size = round_size(order.size, sz_decimals);
        if size <= Decimal::ZERO {
            return Err(ExchangeError::ParseError(format!(
                "order size {} rounds to zero for {}",
                order.size, order.symbol
            )));
        }
        let price = positive_price("order", order.price, sz_decimals, &order.symbol)?;
        if let Some(cloid) = &order.cloid {
            validate_cloid(cloid)?;
        }

        let order_type = match &order.kind {
            OrderKind::Limit(tif) => OrderTypeWire::Limit(LimitWire { tif: *tif }),
            OrderKind::Trigger {
                trigger_px,
                is_market,
                tpsl,
            } => OrderTypeWire::Trigger(TriggerWire {
                is_market: *is_market,
                trigger_px: format_decimal(positive_price(
                    "trigger",
                    *trigger_px,
                    sz_decimals,
                    &order.symbol,
                )?),
                tpsl: *tpsl,
            }),
        };

        Ok(OrderWire {
            asset,
            is_buy: order.is_buy,
            limit_px: format_decimal(price),
            sz: format_decimal(size),
            reduce_only: order.reduce_only,
            order_type,
            cloid: order.cloid.clone(),
        })
    }

    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderStatus, ExchangeError> {
        let mut statuses = self.place_orders(std::slice::from_ref(order)).await?;
        if statuses.is_empty() {
            return Err(ExchangeError::MalformedResponse {
                endpoint: "/exchange".to_string(),
                reason: "no order status in response".to_string(),
                body: String::new(),
            });
        }
        Ok(statuses.remove(0))
    }

    /// Sends a batch as one signed action
    pub async fn place_orders(&self, orders: &[OrderRequest]) -> Result<Vec<OrderStatus>, ExchangeError> {
        let wires = orders
            .iter()
            .map(|o| self.order_wire(o))
            .collect::<Result<Vec<_>, _>>()?;

        let action = Action::Order(BulkOrder {
            orders: wires,
            grouping: Grouping::Na,
        });
        let response = self.rest.exchange(&action).await?;
        let statuses = response.order_statuses();
        debug!(orders = orders.len(), statuses = statuses.len(), "Orders placed");
        Ok(statuses)
    }

    /// Place limit order (Gtc, or Alo when `post_only`)
    pub async fn place_limit_order(
        &self,
        symbol: &str,
        is_buy: bool,
        price: Decimal,
        size: Decimal,
        post_only: bool,
    ) -> Result<OrderStatus, ExchangeError> {
        let tif = if post_only { Tif::Alo } else { Tif::Gtc };
        self.place_order(&OrderRequest::limit(symbol, is_buy, price, size, tif))
            .await
    }

    /// Market order as an Ioc limit at mid ± `slippage` (e.g. 0.05 = 5%)
    pub async fn place_market_order(
        &self,
        symbol: &str,
        is_buy: bool,
        size: Decimal,
        slippage: Decimal,
    ) -> Result<OrderStatus, ExchangeError> {
        let book = self.rest.l2_snapshot(symbol).await?;
        let mid = book.mid_price().ok_or_else(|| {
            ExchangeError::ParseError(format!("no two-sided book for {}", symbol))
        })?;
        let price = slippage_price(mid, is_buy, slippage);
        debug!(symbol, %mid, %price, "Market order price");

        self.place_order(&OrderRequest::limit(symbol, is_buy, price, size, Tif::Ioc))
            .await
    }

    /// Cancel order
    pub async fn cancel_order(&self, symbol: &str, oid: u64) -> Result<(), ExchangeError> {
        let asset = self.directory.resolve_index(symbol)?;
        let action = Action::Cancel(BulkCancel {
            cancels: vec![CancelWire { asset, oid }],
        });

        let response = self.rest.exchange(&action).await?;
        reject_on_error_status(&action, &response)
    }

    /// Set leverage for symbol
    pub async fn update_leverage(
        &self,
        symbol: &str,
        leverage: u32,
        is_cross: bool,
    ) -> Result<(), ExchangeError> {
        let asset = self.directory.resolve_index(symbol)?;
        let action = Action::UpdateLeverage(UpdateLeverage {
            asset,
            is_cross,
            leverage,
        });
        self.rest.exchange(&action).await?;
        Ok(())
    }

    // ====================================================================
    // ACCOUNT
    // ====================================================================

    pub async fn account_state(&self) -> Result<AccountState, ExchangeError> {
        let user = self.require_address()?;
        let state = self.rest.clearinghouse_state(user).await?;
        AccountState::from_wire(state)
    }

    pub async fn open_orders(&self) -> Result<Vec<OpenOrder>, ExchangeError> {
        let user = self.require_address()?;
        self.rest.open_orders(user).await
    }

    fn require_address(&self) -> Result<&str, ExchangeError> {
        self.address()
            .ok_or_else(|| ExchangeError::ConfigError("no wallet configured".to_string()))
    }
}

/// `status: ok` can still carry per-entry errors
fn reject_on_error_status(action: &Action, response: &ExchangeResponse) -> Result<(), ExchangeError> {
    let failed = response
        .statuses()
        .iter()
        .any(|s| s.get("error").map_or(false, |e| !e.is_null()));
    if failed {
        return Err(ExchangeError::ApiRejected {
            action: action.kind().to_string(),
            body: response.response.to_string(),
        });
    }
    Ok(())
}

/// Rounds to the asset's tick and rejects prices that end up non-positive
fn positive_price(
    what: &str,
    price: Decimal,
    sz_decimals: u32,
    symbol: &str,
) -> Result<Decimal, ExchangeError> {
    let rounded = round_price(price, sz_decimals);
    if price <= Decimal::ZERO || rounded <= Decimal::ZERO {
        return Err(ExchangeError::ParseError(format!(
            "{} price {} is not positive after rounding for {}",
            what, price, symbol
        )));
    }
    Ok(rounded)
}
