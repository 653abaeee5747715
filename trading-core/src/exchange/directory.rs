// exchange/directory.rs
//! Cached symbol ↔ asset index directory.
//!
//! The whole mapping is rebuilt and validated off to the side and swapped in
//! as one `Arc`, so readers always see a consistent pair of maps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::errors::ExchangeError;
use super::types::AssetMeta;

/// Where the asset universe comes from (the info endpoint in production)
#[async_trait]
pub trait UniverseSource: Send + Sync {
    /// Assets in index order: position `i` is asset index `i`
    async fn fetch_universe(&self) -> Result<Vec<AssetMeta>, ExchangeError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryConfig {
    /// `None` disables the staleness check
    pub ttl: Option<Duration>,
    pub max_init_attempts: u32,
    pub retry_base: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            ttl: None,
            max_init_attempts: 3,
            retry_base: Duration::from_millis(1000),
        }
    }
}

/// Validated bidirectional mapping
#[derive(Debug, Clone)]
pub struct AssetMapping {
    by_symbol: HashMap<String, u32>,
    by_index: HashMap<u32, String>,
    sz_decimals: HashMap<u32, u32>,
    refreshed_at: DateTime<Utc>,
    loaded_at: Instant,
}

impl AssetMapping {
    pub fn build(universe: &[AssetMeta]) -> Result<Self, ExchangeError> {
        let invalid = |reason: String| ExchangeError::DirectoryValidationFailed(reason);

        if universe.is_empty() {
            return Err(invalid("empty universe".to_string()));
        }

        let mut by_symbol = HashMap::with_capacity(universe.len());
        let mut by_index = HashMap::with_capacity(universe.len());
        let mut sz_decimals = HashMap::with_capacity(universe.len());

        for (position, asset) in universe.iter().enumerate() {
            let index = u32::try_from(position)
                .map_err(|_| invalid(format!("index {} out of range", position)))?;
            let symbol = asset.name.trim();
            if symbol.is_empty() {
                return Err(invalid(format!("empty symbol at index {}", index)));
            }
            if by_symbol.insert(symbol.to_string(), index).is_some() {
                return Err(invalid(format!("duplicate symbol {}", symbol)));
            }
            by_index.insert(index, symbol.to_string());
            sz_decimals.insert(index, asset.sz_decimals);
        }

        if by_symbol.len() != universe.len() || by_index.len() != universe.len() {
            return Err(invalid(format!(
                "size mismatch: {} symbols, {} indices, {} assets",
                by_symbol.len(),
                by_index.len(),
                universe.len()
            )));
        }

        let inverse = by_symbol
            .iter()
            .all(|(symbol, index)| by_index.get(index) == Some(symbol));
        if !inverse {
            return Err(invalid("maps are not mutual inverses".to_string()));
        }

        Ok(Self {
            by_symbol,
            by_index,
            sz_decimals,
            refreshed_at: Utc::now(),
            loaded_at: Instant::now(),
        })
    }

    pub fn index_of(&self, symbol: &str) -> Option<u32> {
        self.by_symbol.get(symbol.trim()).copied()
    }

    pub fn symbol_of(&self, index: u32) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

struct DirectoryInner {
    source: Arc<dyn UniverseSource>,
    config: DirectoryConfig,
    cache: RwLock<Option<Arc<AssetMapping>>>,
    refreshing: AtomicBool,
}

/// Symbol directory. Cloning shares the cache.
#[derive(Clone)]
pub struct AssetDirectory {
    inner: Arc<DirectoryInner>,
}

impl AssetDirectory {
    pub fn new(source: Arc<dyn UniverseSource>, config: DirectoryConfig) -> Self {
        Self {
            inner: Arc::new(DirectoryInner {
                source,
                config,
                cache: RwLock::new(None),
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    /// Loads the universe, retrying with exponential backoff
    pub async fn initialize(&self) -> Result<(), ExchangeError> {
        let count = self.load_with_retry().await?;
        info!(assets = count, "Asset directory initialized");
        Ok(())
    }

    /// Re-fetches and swaps the mapping. On failure the previous mapping
    /// stays in place.
    pub async fn refresh(&self) -> Result<(), ExchangeError> {
        let count = self.load_with_retry().await?;
        debug!(assets = count, "Asset directory refreshed");
        Ok(())
    }

    pub fn resolve_index(&self, symbol: &str) -> Result<u32, ExchangeError> {
        let mapping = self.current()?;
        mapping
            .index_of(symbol)
            .ok_or_else(|| ExchangeError::AssetNotFound(symbol.to_string()))
    }

    pub fn resolve_symbol(&self, index: u32) -> Result<String, ExchangeError> {
        let mapping = self.current()?;
        mapping
            .symbol_of(index)
            .map(str::to_string)
            .ok_or_else(|| ExchangeError::AssetNotFound(format!("index {}", index)))
    }

    /// Size decimals of an asset, used to round order sizes
    pub fn sz_decimals(&self, index: u32) -> Result<u32, ExchangeError> {
        let mapping = self.current()?;
        mapping
            .sz_decimals
            .get(&index)
            .copied()
            .ok_or_else(|| ExchangeError::AssetNotFound(format!("index {}", index)))
    }

    /// Symbols in index order
    pub fn symbols(&self) -> Vec<String> {
        let Some(mapping) = self.inner.cache.read().clone() else {
            return Vec::new();
        };
        let mut entries: Vec<(u32, String)> = mapping
            .by_index
            .iter()
            .map(|(i, s)| (*i, s.clone()))
            .collect();
        entries.sort_unstable_by_key(|(i, _)| *i);
        entries.into_iter().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.cache.read().as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.cache.read().is_some()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.inner.cache.read().as_ref().map(|m| m.refreshed_at)
    }

    /// Current mapping; kicks off a background refresh when it is past TTL
    fn current(&self) -> Result<Arc<AssetMapping>, ExchangeError> {
        let mapping = self
            .inner
            .cache
            .read()
            .clone()
            .ok_or(ExchangeError::DirectoryNotInitialized)?;

        if let Some(ttl) = self.inner.config.ttl {
            if mapping.loaded_at.elapsed() >= ttl {
                self.spawn_refresh();
            }
        }
        Ok(mapping)
    }

    fn spawn_refresh(&self) {
        if self.inner.refreshing.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.refreshing.store(false, Ordering::Release);
            return;
        };

        let directory = self.clone();
        handle.spawn(async move {
            if let Err(e) = directory.refresh().await {
                warn!(error = %e, "Background directory refresh failed, serving stale mapping");
            }
            directory.inner.refreshing.store(false, Ordering::Release);
        });
    }

    async fn load_with_retry(&self) -> Result<usize, ExchangeError> {
        let max_attempts = self.inner.config.max_init_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = self
                .inner
                .source
                .fetch_universe()
                .await
                .and_then(|universe| AssetMapping::build(&universe));

            match result {
                Ok(mapping) => {
                    let count = mapping.len();
                    *self.inner.cache.write() = Some(Arc::new(mapping));
                    return Ok(count);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(attempt, error = %e, "Giving up loading asset directory");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self
                        .inner
                        .config
                        .retry_base
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(attempt, ?delay, error = %e, "Asset directory load failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn meta(names: &[&str]) -> Vec<AssetMeta> {
        names
            .iter()
            .map(|name| AssetMeta {
                name: name.to_string(),
                sz_decimals: 3,
                max_leverage: None,
                only_isolated: None,
            })
            .collect()
    }

    /// Replays scripted responses; repeats the last one when exhausted
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Vec<AssetMeta>, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<AssetMeta>, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UniverseSource for ScriptedSource {
        async fn fetch_universe(&self) -> Result<Vec<AssetMeta>, ExchangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock();
            let next = if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            };
            match next {
                Some(Ok(universe)) => Ok(universe),
                Some(Err(e)) => Err(ExchangeError::NetworkError(e)),
                None => Err(ExchangeError::NetworkError("no response".to_string())),
            }
        }
    }

    fn config(ttl: Option<Duration>) -> DirectoryConfig {
        DirectoryConfig {
            ttl,
            max_init_attempts: 3,
            retry_base: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_resolve_both_directions() {
        let source = ScriptedSource::new(vec![Ok(meta(&["BTC", "ETH"]))]);
        let directory = AssetDirectory::new(source, config(None));
        directory.initialize().await.unwrap();

        assert_eq!(directory.resolve_index("ETH").unwrap(), 1);
        assert_eq!(directory.resolve_symbol(0).unwrap(), "BTC");
        assert_eq!(directory.symbols(), vec!["BTC", "ETH"]);
        assert!(directory.last_refresh().is_some());
        assert!(matches!(
            directory.resolve_index("DOGE"),
            Err(ExchangeError::AssetNotFound(_))
        ));
        assert!(matches!(
            directory.resolve_symbol(7),
            Err(ExchangeError::AssetNotFound(_))
        ));
    }

    #[test]
    fn test_lookup_before_initialize() {
        let source = ScriptedSource::new(vec![Ok(meta(&["BTC"]))]);
        let directory = AssetDirectory::new(source, config(None));
        assert!(!directory.is_initialized());
        assert!(matches!(
            directory.resolve_index("BTC"),
            Err(ExchangeError::DirectoryNotInitialized)
        ));
        assert!(directory.symbols().is_empty());
    }

    #[test]
    fn test_build_rejects_inconsistent_universe() {
        assert!(AssetMapping::build(&meta(&["BTC", "ETH", "BTC"])).is_err());
        assert!(AssetMapping::build(&meta(&["BTC", " "])).is_err());
        assert!(AssetMapping::build(&[]).is_err());

        let mapping = AssetMapping::build(&meta(&["BTC", "ETH", "SOL"])).unwrap();
        for index in 0..3 {
            let symbol = mapping.symbol_of(index).unwrap();
            assert_eq!(mapping.index_of(symbol), Some(index));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_retries_then_succeeds() {
        let source = ScriptedSource::new(vec![
            Err("connection reset".to_string()),
            Ok(meta(&["BTC", "BTC"])),
            Ok(meta(&["BTC", "ETH"])),
        ]);
        let directory = AssetDirectory::new(source.clone(), config(None));

        let start = Instant::now();
        directory.initialize().await.unwrap();
        assert_eq!(source.calls(), 3);
        // 100ms + 200ms of backoff
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        assert_eq!(directory.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_gives_up() {
        let source = ScriptedSource::new(vec![Err("down".to_string())]);
        let directory = AssetDirectory::new(source.clone(), config(None));

        let result = directory.initialize().await;
        assert!(matches!(result, Err(ExchangeError::NetworkError(_))));
        assert_eq!(source.calls(), 3);
        assert!(!directory.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_mapping() {
        let source = ScriptedSource::new(vec![Ok(meta(&["BTC", "ETH"])), Ok(meta(&["", "ETH"]))]);
        let directory = AssetDirectory::new(source, config(None));
        directory.initialize().await.unwrap();

        let result = directory.refresh().await;
        assert!(matches!(
            result,
            Err(ExchangeError::DirectoryValidationFailed(_))
        ));
        assert_eq!(directory.resolve_index("BTC").unwrap(), 0);
        assert_eq!(directory.resolve_symbol(1).unwrap(), "ETH");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_lookup_serves_cache_and_refreshes() {
        let source = ScriptedSource::new(vec![Ok(meta(&["BTC"])), Ok(meta(&["BTC", "ETH"]))]);
        let directory = AssetDirectory::new(source.clone(), config(Some(Duration::from_secs(60))));
        directory.initialize().await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        // Stale value served on this call
        assert!(directory.resolve_index("ETH").is_err());
        assert_eq!(directory.resolve_index("BTC").unwrap(), 0);

        // Let the background refresh run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(source.calls(), 2);
        assert_eq!(directory.resolve_index("ETH").unwrap(), 1);
    }
}
