//! Spot and reference price resolution with degraded-mode fallback

use super::cache::PriceCache;
use crate::collaborators::{bounded, MarketData};
use crate::models::{PriceQuote, PriceSource};
use crate::observability::OptimizerMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reference prices older than this are not trusted from cache
pub const REFERENCE_FRESHNESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Trailing window of spot price history to consult
pub const SPOT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Last-known on-demand prices, used when neither the live source nor the cache can answer
pub fn last_known_reference_prices() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("g4dn.xlarge".to_string(), 1.19),
        ("g4dn.2xlarge".to_string(), 2.38),
        ("g4ad.xlarge".to_string(), 0.95),
        ("g5.xlarge".to_string(), 1.21),
    ])
}

/// How a set of reference prices was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceOrigin {
    Live,
    Cache,
    Fallback,
}

impl PriceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceOrigin::Live => "live",
            PriceOrigin::Cache => "cache",
            PriceOrigin::Fallback => "fallback",
        }
    }
}

/// Best-effort reference prices, labelled with their origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePrices {
    pub prices: BTreeMap<String, f64>,
    pub origin: PriceOrigin,
    /// When the prices were fetched; `None` for the built-in table
    pub observed_at: Option<DateTime<Utc>>,
    /// Classes the live source did not answer for, filled from the built-in table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filled_from_table: Vec<String>,
}

impl ReferencePrices {
    pub fn get(&self, class: &str) -> Option<f64> {
        self.prices.get(class).copied()
    }

    /// Anything not fetched live during this call is stale
    pub fn is_stale(&self) -> bool {
        self.origin != PriceOrigin::Live
    }

    /// Expand into per-class quotes
    pub fn quotes(&self) -> Vec<PriceQuote> {
        let observed_at = self.observed_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.prices
            .iter()
            .map(|(class, price)| PriceQuote {
                instance_class: class.clone(),
                price_per_hour: *price,
                observed_at,
                source: PriceSource::Reference,
                stale: self.is_stale() || self.filled_from_table.contains(class),
            })
            .collect()
    }
}

/// Resolves current spot prices and reference prices per instance class.
///
/// Never returns an error: failures are logged and answered with cached or
/// built-in data.
pub struct PriceOracle {
    market: Arc<dyn MarketData>,
    cache: PriceCache,
    region: String,
    timeout: Duration,
    spot_freshness: Duration,
    fallback: BTreeMap<String, f64>,
    /// Latest spot quote handed out per class
    latest_spot: RwLock<HashMap<String, PriceQuote>>,
    metrics: OptimizerMetrics,
}

impl PriceOracle {
    pub fn new(
        market: Arc<dyn MarketData>,
        cache: PriceCache,
        region: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            market,
            cache,
            region: region.into(),
            timeout,
            spot_freshness: SPOT_WINDOW,
            fallback: last_known_reference_prices(),
            latest_spot: RwLock::new(HashMap::new()),
            metrics: OptimizerMetrics::new(),
        }
    }

    /// Replace the built-in last-known table
    pub fn with_fallback_table(mut self, table: BTreeMap<String, f64>) -> Self {
        self.fallback = table;
        self
    }

    /// Age after which a spot quote is marked stale
    pub fn with_spot_freshness(mut self, freshness: Duration) -> Self {
        self.spot_freshness = freshness;
        self
    }

    /// Current spot price per class. Classes without data are omitted.
    pub async fn current_spot_prices(&self, classes: &[String]) -> HashMap<String, PriceQuote> {
        let quotes = match bounded(
            "market-data",
            self.timeout,
            self.market.spot_prices(classes, SPOT_WINDOW),
        )
        .await
        {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!(error = %e, "Error getting spot prices");
                Vec::new()
            }
        };

        let mut newest: HashMap<String, PriceQuote> = HashMap::new();
        for quote in quotes {
            if !classes.contains(&quote.instance_class) || !quote.price_per_hour.is_finite() {
                continue;
            }
            match newest.get(&quote.instance_class) {
                Some(existing) if existing.observed_at >= quote.observed_at => {}
                _ => {
                    newest.insert(quote.instance_class.clone(), quote);
                }
            }
        }

        let now = Utc::now();
        let freshness =
            chrono::Duration::from_std(self.spot_freshness).unwrap_or(chrono::Duration::MAX);
        let mut latest = self
            .latest_spot
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for (class, quote) in newest.iter_mut() {
            // observed_at never moves backwards for a class
            if let Some(previous) = latest.get(class) {
                if previous.observed_at > quote.observed_at {
                    debug!(class = %class, "Ignoring spot quote older than one already seen");
                    *quote = previous.clone();
                }
            }
            quote.source = PriceSource::Market;
            quote.stale = now.signed_duration_since(quote.observed_at) > freshness;
            latest.insert(class.clone(), quote.clone());
        }

        newest
    }

    /// Reference (on-demand) prices, falling back to cache then the built-in table
    pub async fn reference_prices(&self, classes: &[String]) -> ReferencePrices {
        let now = Utc::now();
        if classes.is_empty() {
            return ReferencePrices {
                prices: BTreeMap::new(),
                origin: PriceOrigin::Live,
                observed_at: Some(now),
                filled_from_table: Vec::new(),
            };
        }

        let mut live = BTreeMap::new();
        for class in classes {
            match bounded(
                "market-data",
                self.timeout,
                self.market.reference_price(class, &self.region),
            )
            .await
            {
                Ok(price) if price.is_finite() && price > 0.0 => {
                    live.insert(class.clone(), price);
                }
                Ok(price) => {
                    warn!(class = %class, price = price, "Ignoring invalid reference price");
                }
                Err(e) => {
                    warn!(class = %class, error = %e, "Could not get reference price");
                }
            }
        }

        if !live.is_empty() {
            // Only prices fetched live are cached; table fills stay labelled
            if let Err(e) = self.cache.store(&live) {
                warn!(error = %e, "Failed to refresh price cache");
            }

            let mut filled = Vec::new();
            for class in classes {
                if !live.contains_key(class) {
                    if let Some(price) = self.fallback.get(class) {
                        live.insert(class.clone(), *price);
                        filled.push(class.clone());
                    }
                }
            }

            return ReferencePrices {
                prices: live,
                origin: PriceOrigin::Live,
                observed_at: Some(now),
                filled_from_table: filled,
            };
        }

        warn!("Error getting reference prices from live source");

        match self.cache.load_fresh(now) {
            Ok(Some(cached)) => {
                info!(
                    written_at = %cached.written_at,
                    "Using cached pricing data"
                );
                self.metrics.inc_price_fallback(PriceOrigin::Cache.as_str());
                return ReferencePrices {
                    prices: cached.prices,
                    origin: PriceOrigin::Cache,
                    observed_at: Some(cached.written_at),
                    filled_from_table: Vec::new(),
                };
            }
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "Price cache unreadable");
            }
        }

        warn!("Using fallback pricing data - may be inaccurate");
        self.metrics
            .inc_price_fallback(PriceOrigin::Fallback.as_str());
        ReferencePrices {
            prices: self.fallback.clone(),
            origin: PriceOrigin::Fallback,
            observed_at: None,
            filled_from_table: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{async_trait, CollabResult};
    use crate::error::CollaboratorError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Market stub with switchable failure
    struct StubMarket {
        spot: Mutex<Vec<PriceQuote>>,
        reference: BTreeMap<String, f64>,
        failing: AtomicBool,
    }

    impl StubMarket {
        fn new(reference: &[(&str, f64)]) -> Self {
            Self {
                spot: Mutex::new(Vec::new()),
                reference: reference
                    .iter()
                    .map(|(c, p)| (c.to_string(), *p))
                    .collect(),
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl MarketData for StubMarket {
        async fn spot_prices(
            &self,
            _classes: &[String],
            _window: Duration,
        ) -> CollabResult<Vec<PriceQuote>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CollaboratorError::transport("market-data", "connection refused"));
            }
            Ok(self.spot.lock().unwrap().clone())
        }

        async fn reference_price(&self, class: &str, _region: &str) -> CollabResult<f64> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CollaboratorError::transport("market-data", "connection refused"));
            }
            self.reference
                .get(class)
                .copied()
                .ok_or_else(|| CollaboratorError::unavailable("market-data", "no product"))
        }
    }

    fn spot(class: &str, price: f64, minutes_ago: i64) -> PriceQuote {
        PriceQuote {
            instance_class: class.to_string(),
            price_per_hour: price,
            observed_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            source: PriceSource::Market,
            stale: false,
        }
    }

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn oracle(market: Arc<StubMarket>, dir: &TempDir) -> PriceOracle {
        PriceOracle::new(
            market,
            PriceCache::new(dir.path().join("prices.json"), REFERENCE_FRESHNESS),
            "us-east-1",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_spot_prices_keep_newest_per_class() {
        let dir = TempDir::new().unwrap();
        let market = Arc::new(StubMarket::new(&[]));
        *market.spot.lock().unwrap() = vec![
            spot("g4dn.xlarge", 0.50, 40),
            spot("g4dn.xlarge", 0.52, 5),
            spot("g5.xlarge", 0.61, 10),
            spot("p3.2xlarge", 0.90, 1),
        ];
        let oracle = oracle(market, &dir);

        let prices = oracle
            .current_spot_prices(&classes(&["g4dn.xlarge", "g5.xlarge", "g4ad.xlarge"]))
            .await;

        assert_eq!(prices.len(), 2);
        assert_eq!(prices["g4dn.xlarge"].price_per_hour, 0.52);
        assert!(!prices.contains_key("g4ad.xlarge"));
        assert!(!prices.contains_key("p3.2xlarge"));
    }

    #[tokio::test]
    async fn test_spot_observed_at_never_regresses() {
        let dir = TempDir::new().unwrap();
        let market = Arc::new(StubMarket::new(&[]));
        *market.spot.lock().unwrap() = vec![spot("g4dn.xlarge", 0.52, 5)];
        let oracle = oracle(market.clone(), &dir);
        let wanted = classes(&["g4dn.xlarge"]);

        let first = oracle.current_spot_prices(&wanted).await;

        *market.spot.lock().unwrap() = vec![spot("g4dn.xlarge", 0.40, 30)];
        let second = oracle.current_spot_prices(&wanted).await;

        assert_eq!(
            second["g4dn.xlarge"].observed_at,
            first["g4dn.xlarge"].observed_at
        );
        assert_eq!(second["g4dn.xlarge"].price_per_hour, 0.52);
    }

    #[tokio::test]
    async fn test_spot_quote_older_than_freshness_is_stale() {
        let dir = TempDir::new().unwrap();
        let market = Arc::new(StubMarket::new(&[]));
        *market.spot.lock().unwrap() =
            vec![spot("g4dn.xlarge", 0.52, 20), spot("g5.xlarge", 0.61, 2)];
        let oracle = oracle(market, &dir).with_spot_freshness(Duration::from_secs(10 * 60));

        let prices = oracle
            .current_spot_prices(&classes(&["g4dn.xlarge", "g5.xlarge"]))
            .await;

        assert!(prices["g4dn.xlarge"].stale);
        assert!(!prices["g5.xlarge"].stale);
        assert_eq!(prices["g4dn.xlarge"].source, PriceSource::Market);
    }

    #[tokio::test]
    async fn test_spot_failure_yields_empty_map() {
        let dir = TempDir::new().unwrap();
        let market = Arc::new(StubMarket::new(&[]));
        market.failing.store(true, Ordering::SeqCst);

        let prices = oracle(market, &dir)
            .current_spot_prices(&classes(&["g4dn.xlarge"]))
            .await;
        assert!(prices.is_empty());
    }

    #[tokio::test]
    async fn test_live_reference_refreshes_cache_and_fills_gaps() {
        let dir = TempDir::new().unwrap();
        let market = Arc::new(StubMarket::new(&[("g4dn.xlarge", 1.10)]));
        let oracle = oracle(market, &dir);

        let prices = oracle
            .reference_prices(&classes(&["g4dn.xlarge", "g5.xlarge"]))
            .await;

        assert_eq!(prices.origin, PriceOrigin::Live);
        assert_eq!(prices.get("g4dn.xlarge"), Some(1.10));
        assert_eq!(prices.get("g5.xlarge"), Some(1.21));
        assert_eq!(prices.filled_from_table, vec!["g5.xlarge".to_string()]);
        assert!(dir.path().join("prices.json").exists());
    }

    #[tokio::test]
    async fn test_table_fills_are_not_cached_as_live() {
        let dir = TempDir::new().unwrap();
        let market = Arc::new(StubMarket::new(&[("g4dn.xlarge", 1.10)]));
        let oracle = oracle(market.clone(), &dir);
        let wanted = classes(&["g4dn.xlarge", "g5.xlarge"]);

        oracle.reference_prices(&wanted).await;
        market.failing.store(true, Ordering::SeqCst);
        let prices = oracle.reference_prices(&wanted).await;

        assert_eq!(prices.origin, PriceOrigin::Cache);
        assert_eq!(
            prices.prices,
            BTreeMap::from([("g4dn.xlarge".to_string(), 1.10)])
        );
    }

    #[tokio::test]
    async fn test_reference_falls_back_to_fresh_cache() {
        let dir = TempDir::new().unwrap();
        let market = Arc::new(StubMarket::new(&[]));
        market.failing.store(true, Ordering::SeqCst);
        let oracle = oracle(market, &dir);

        let cached = BTreeMap::from([("g4dn.xlarge".to_string(), 1.07)]);
        PriceCache::new(dir.path().join("prices.json"), REFERENCE_FRESHNESS)
            .store_at(&cached, Utc::now() - chrono::Duration::hours(3))
            .unwrap();

        let prices = oracle.reference_prices(&classes(&["g4dn.xlarge"])).await;

        assert_eq!(prices.origin, PriceOrigin::Cache);
        assert_eq!(prices.prices, cached);
        assert!(prices.is_stale());
    }

    #[tokio::test]
    async fn test_reference_falls_back_to_table_without_cache() {
        let dir = TempDir::new().unwrap();
        let market = Arc::new(StubMarket::new(&[]));
        market.failing.store(true, Ordering::SeqCst);

        let prices = oracle(market, &dir)
            .reference_prices(&classes(&["g4dn.xlarge"]))
            .await;

        assert_eq!(prices.origin, PriceOrigin::Fallback);
        assert_eq!(prices.prices, last_known_reference_prices());
        assert!(prices.quotes().iter().all(|q| q.stale));
    }

    #[tokio::test]
    async fn test_expired_cache_skipped() {
        let dir = TempDir::new().unwrap();
        let market = Arc::new(StubMarket::new(&[]));
        market.failing.store(true, Ordering::SeqCst);
        let oracle = oracle(market, &dir);

        PriceCache::new(dir.path().join("prices.json"), REFERENCE_FRESHNESS)
            .store_at(
                &BTreeMap::from([("g4dn.xlarge".to_string(), 9.99)]),
                Utc::now() - chrono::Duration::hours(30),
            )
            .unwrap();

        let prices = oracle.reference_prices(&classes(&["g4dn.xlarge"])).await;
        assert_eq!(prices.origin, PriceOrigin::Fallback);
        assert_eq!(prices.get("g4dn.xlarge"), Some(1.19));
    }
}
