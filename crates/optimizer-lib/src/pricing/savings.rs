//! Spot versus reference savings and the spot-pricing optimization step

use super::oracle::{PriceOracle, ReferencePrices};
use crate::models::PriceQuote;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Savings of running one class on spot instead of on-demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsAnalysis {
    pub spot_price: f64,
    pub reference_price: f64,
    pub hourly_savings: f64,
    pub daily_savings: f64,
    pub monthly_savings: f64,
    pub savings_percentage: f64,
}

/// Savings per class that has both a spot and a positive reference price
pub fn analyze_savings(
    spot: &HashMap<String, PriceQuote>,
    reference: &ReferencePrices,
) -> BTreeMap<String, SavingsAnalysis> {
    spot.iter()
        .filter_map(|(class, quote)| {
            let reference_price = reference.get(class).filter(|p| *p > 0.0)?;
            let hourly = reference_price - quote.price_per_hour;
            Some((
                class.clone(),
                SavingsAnalysis {
                    spot_price: quote.price_per_hour,
                    reference_price,
                    hourly_savings: hourly,
                    daily_savings: hourly * 24.0,
                    monthly_savings: hourly * 24.0 * 30.0,
                    savings_percentage: hourly / reference_price * 100.0,
                },
            ))
        })
        .collect()
}

/// Class with the highest savings percentage whose spot price is within the ceiling.
///
/// Ties are broken by class name so the result is deterministic.
pub fn best_spot_option<'a>(
    savings: &'a BTreeMap<String, SavingsAnalysis>,
    max_spot_price: f64,
) -> Option<(&'a str, &'a SavingsAnalysis)> {
    savings
        .iter()
        .filter(|(_, s)| s.spot_price <= max_spot_price)
        .fold(None, |best: Option<(&String, &SavingsAnalysis)>, candidate| match best {
            Some(current) if current.1.savings_percentage >= candidate.1.savings_percentage => {
                Some(current)
            }
            _ => Some(candidate),
        })
        .map(|(class, s)| (class.as_str(), s))
}

/// Outcome of one spot-pricing optimization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotPricingReport {
    pub spot_prices: BTreeMap<String, f64>,
    pub reference: ReferencePrices,
    pub savings: BTreeMap<String, SavingsAnalysis>,
    pub best_class: Option<String>,
    /// Set when a better class than the configured one is available
    pub recommended_switch: Option<String>,
}

/// Runs price arbitrage across candidate classes. Recommendation only.
pub struct SpotPricingOptimizer {
    oracle: Arc<PriceOracle>,
    classes: Vec<String>,
    current_class: String,
    max_spot_price: f64,
}

impl SpotPricingOptimizer {
    pub fn new(
        oracle: Arc<PriceOracle>,
        classes: Vec<String>,
        current_class: impl Into<String>,
        max_spot_price: f64,
    ) -> Self {
        Self {
            oracle,
            classes,
            current_class: current_class.into(),
            max_spot_price,
        }
    }

    pub async fn optimize(&self) -> SpotPricingReport {
        let spot = self.oracle.current_spot_prices(&self.classes).await;
        let reference = self.oracle.reference_prices(&self.classes).await;
        let savings = analyze_savings(&spot, &reference);

        let best_class = best_spot_option(&savings, self.max_spot_price).map(|(class, s)| {
            info!(
                class = %class,
                spot_price = s.spot_price,
                savings_pct = s.savings_percentage,
                "Best spot option"
            );
            class.to_string()
        });

        let recommended_switch = best_class
            .as_ref()
            .filter(|class| **class != self.current_class)
            .cloned();
        if let Some(class) = &recommended_switch {
            info!(
                from = %self.current_class,
                to = %class,
                "Recommend switching instance class for better pricing"
            );
        }

        SpotPricingReport {
            spot_prices: spot
                .iter()
                .map(|(class, quote)| (class.clone(), quote.price_per_hour))
                .collect(),
            reference,
            savings,
            best_class,
            recommended_switch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceSource;
    use crate::pricing::PriceOrigin;
    use chrono::Utc;

    fn quote(class: &str, price: f64) -> (String, PriceQuote) {
        (
            class.to_string(),
            PriceQuote {
                instance_class: class.to_string(),
                price_per_hour: price,
                observed_at: Utc::now(),
                source: PriceSource::Market,
                stale: false,
            },
        )
    }

    fn reference(prices: &[(&str, f64)]) -> ReferencePrices {
        ReferencePrices {
            prices: prices.iter().map(|(c, p)| (c.to_string(), *p)).collect(),
            origin: PriceOrigin::Live,
            observed_at: Some(Utc::now()),
            filled_from_table: Vec::new(),
        }
    }

    #[test]
    fn test_savings_math() {
        let spot = HashMap::from([quote("g4dn.xlarge", 0.5)]);
        let savings = analyze_savings(&spot, &reference(&[("g4dn.xlarge", 1.0)]));

        let s = &savings["g4dn.xlarge"];
        assert!((s.hourly_savings - 0.5).abs() < 1e-9);
        assert!((s.daily_savings - 12.0).abs() < 1e-9);
        assert!((s.monthly_savings - 360.0).abs() < 1e-9);
        assert!((s.savings_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_class_without_reference_skipped() {
        let spot = HashMap::from([quote("g4dn.xlarge", 0.5), quote("p3.2xlarge", 0.9)]);
        let savings = analyze_savings(&spot, &reference(&[("g4dn.xlarge", 1.0)]));
        assert_eq!(savings.len(), 1);
    }

    #[test]
    fn test_best_option_respects_ceiling() {
        let spot = HashMap::from([quote("g4dn.xlarge", 0.5), quote("g4dn.2xlarge", 0.8)]);
        let savings = analyze_savings(
            &spot,
            &reference(&[("g4dn.xlarge", 1.0), ("g4dn.2xlarge", 2.4)]),
        );

        // 2xlarge saves more but costs above the ceiling
        let (class, _) = best_spot_option(&savings, 0.75).unwrap();
        assert_eq!(class, "g4dn.xlarge");

        let (class, _) = best_spot_option(&savings, 1.0).unwrap();
        assert_eq!(class, "g4dn.2xlarge");

        assert!(best_spot_option(&savings, 0.1).is_none());
    }
}
