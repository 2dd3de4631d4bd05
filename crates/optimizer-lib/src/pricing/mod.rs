//! Price acquisition and spot arbitrage

mod cache;
mod oracle;
mod savings;

pub use cache::{CachedPrices, PriceCache};
pub use oracle::{
    last_known_reference_prices, PriceOracle, PriceOrigin, ReferencePrices, REFERENCE_FRESHNESS,
    SPOT_WINDOW,
};
pub use savings::{
    analyze_savings, best_spot_option, SavingsAnalysis, SpotPricingOptimizer, SpotPricingReport,
};
