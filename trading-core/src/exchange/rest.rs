// ====
// Hyperliquid REST Client
// ====
// POST /info     unsigned queries, public rate class
// POST /exchange signed actions, private rate class
// ====

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use trading_common::{Candle, L2Book};

use super::directory::UniverseSource;
use super::errors::ExchangeError;
use super::rate_limit::{RateClass, RateLimiter};
use super::signing::{ActionSigner, Network, NonceGenerator};
use super::types::*;

/// Request timeout and retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RestConfig {
    pub request_timeout: Duration,
    /// Ceiling on total attempts for timed-out requests
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(10_000),
            max_retries: 5,
            retry_delay: Duration::from_millis(1_000),
        }
    }
}

/// Rate-limited, retrying client for the info and exchange endpoints
pub struct ExchangeRestClient {
    /// HTTP client
    client: Client,
    /// API base URL
    base_url: String,
    network: Network,
    /// Absent for read-only use
    signer: Option<ActionSigner>,
    limiter: RateLimiter,
    nonces: NonceGenerator,
    config: RestConfig,
}

impl ExchangeRestClient {
    pub fn new(
        network: Network,
        signer: Option<ActionSigner>,
        limiter: RateLimiter,
        config: RestConfig,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: network.api_url().to_string(),
            network,
            signer,
            limiter,
            nonces: NonceGenerator::new(),
            config,
        })
    }

    /// Points the client at another host (local node, test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Wallet address, if a signer is configured
    pub fn address(&self) -> Option<&str> {
        self.signer.as_ref().map(ActionSigner::address)
    }

    // ====================================================================
    // INFO
    // ====================================================================

    /// Unsigned query against `/info`
    pub async fn info<T: DeserializeOwned>(&self, request: &InfoRequest) -> Result<T, ExchangeError> {
        let body = serde_json::to_value(request)?;
        let text = self.post_with_retry("/info", RateClass::Public, &body).await?;

        serde_json::from_str(&text).map_err(|e| ExchangeError::MalformedResponse {
            endpoint: format!("/info ({})", request.kind()),
            reason: e.to_string(),
            body: text,
        })
    }

    pub async fn meta(&self) -> Result<Meta, ExchangeError> {
        self.info(&InfoRequest::Meta).await
    }

    pub async fn meta_and_asset_ctxs(&self) -> Result<(Meta, Vec<AssetCtx>), ExchangeError> {
        self.info(&InfoRequest::MetaAndAssetCtxs).await
    }

    pub async fn clearinghouse_state(&self, user: &str) -> Result<ClearinghouseState, ExchangeError> {
        self.info(&InfoRequest::ClearinghouseState {
            user: user.to_string(),
        })
        .await
    }

    pub async fn open_orders(&self, user: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        self.info(&InfoRequest::OpenOrders {
            user: user.to_string(),
        })
        .await
    }

    pub async fn l2_snapshot(&self, coin: &str) -> Result<L2Book, ExchangeError> {
        let book: WireL2Book = self
            .info(&InfoRequest::L2Book {
                coin: coin.to_string(),
            })
            .await?;
        Ok(book.into_book()?)
    }

    pub async fn candle_snapshot(
        &self,
        coin: &str,
        interval: &str,
        start_time: u64,
        end_time: u64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let candles: Vec<WireCandle> = self
            .info(&InfoRequest::CandleSnapshot {
                req: CandleSnapshotRequest {
                    coin: coin.to_string(),
                    interval: interval.to_string(),
                    start_time,
                    end_time,
                },
            })
            .await?;

        candles
            .into_iter()
            .map(|c| c.into_candle().map_err(ExchangeError::from))
            .collect()
    }

    // ====================================================================
    // EXCHANGE
    // ====================================================================

    /// Signs `action` with a fresh nonce and sends it to `/exchange`.
    ///
    /// Retries re-send the identical signed body.
    pub async fn exchange(&self, action: &Action) -> Result<ExchangeResponse, ExchangeError> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            ExchangeError::ConfigError("signed request without a configured wallet".to_string())
        })?;

        let nonce = self.nonces.next();
        let signature = signer.sign_action(action, nonce)?;
        let payload = ExchangePayload {
            action,
            nonce,
            signature: &signature,
            vault_address: None,
        };
        let body = serde_json::to_value(&payload)?;
        debug!(action = action.kind(), nonce, "Sending signed action");

        let text = self.post_with_retry("/exchange", RateClass::Private, &body).await?;
        let response: ExchangeResponse =
            serde_json::from_str(&text).map_err(|e| ExchangeError::MalformedResponse {
                endpoint: "/exchange".to_string(),
                reason: e.to_string(),
                body: text.clone(),
            })?;

        if !response.is_ok() {
            return Err(ExchangeError::ApiRejected {
                action: action.kind().to_string(),
                body: text,
            });
        }
        Ok(response)
    }

    // ====================================================================
    // INTERNAL
    // ====================================================================

    /// Sends `body`, retrying timeouts and connect failures only
    async fn post_with_retry(
        &self,
        endpoint: &str,
        class: RateClass,
        body: &Value,
    ) -> Result<String, ExchangeError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let max_attempts = self.config.max_retries.max(1);

        for attempt in 1..=max_attempts {
            self.limiter.acquire(class).await;

            let error = match self.client.post(&url).json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    match response.text().await {
                        Ok(text) if status.is_success() => return Ok(text),
                        Ok(text) => {
                            return Err(ExchangeError::HttpStatus {
                                endpoint: endpoint.to_string(),
                                status: status.as_u16(),
                                body: text,
                            })
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            if !(error.is_timeout() || error.is_connect()) {
                return Err(ExchangeError::NetworkError(error.to_string()));
            }

            warn!(
                endpoint,
                attempt,
                max_attempts,
                error = %error,
                "Request timed out"
            );
            if attempt < max_attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(ExchangeError::RequestTimeout {
            endpoint: endpoint.to_string(),
            attempts: max_attempts,
        })
    }
}

#[async_trait]
impl UniverseSource for ExchangeRestClient {
    async fn fetch_universe(&self) -> Result<Vec<AssetMeta>, ExchangeError> {
        Ok(self.meta().await?.universe)
    }
}

impl std::fmt::Debug for ExchangeRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRestClient")
            .field("base_url", &self.base_url)
            .field("network", &self.network)
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TimerRegistry;

    #[test]
    fn test_default_config() {
        let config = RestConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_base_url_and_read_only_client() {
        let limiter = RateLimiter::new(Default::default(), TimerRegistry::default());
        let client = ExchangeRestClient::new(Network::Testnet, None, limiter, RestConfig::default())
            .unwrap();
        assert_eq!(client.base_url(), "https://api.hyperliquid-testnet.xyz");
        assert!(client.address().is_none());

        let client = client.with_base_url("http://127.0.0.1:9000/");
        assert_eq!(client.base_url(), "http://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_exchange_without_wallet_is_config_error() {
        let limiter = RateLimiter::new(Default::default(), TimerRegistry::default());
        let client = ExchangeRestClient::new(Network::Testnet, None, limiter, RestConfig::default())
            .unwrap()
            .with_base_url("http://127.0.0.1:1");

        let action = Action::Cancel(BulkCancel { cancels: vec![] });
        let result = client.exchange(&action).await;
        assert!(matches!(result, Err(ExchangeError::ConfigError(_))));
    }
}
