use crate::catalog::ProductRecord;
use serde::Serialize;

/// Week-over-week variability bucket. Computed on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyLevel {
    None,
    Anomaly,
    Extreme,
}

const EXTREME_SPREAD: f64 = 3.0;
const ANOMALY_SPREAD: f64 = 1.0;

/// Unparsable or non-finite quantities count as 0.
fn quantity(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub fn weekly_values(product: &ProductRecord) -> [f64; 4] {
    product.weeks().map(quantity)
}

/// max - min across the four weekly quantities.
pub fn spread(product: &ProductRecord) -> f64 {
    let values = weekly_values(product);
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let min = values.iter().copied().fold(f64::MAX, f64::min);
    max - min
}

pub fn level_for_spread(spread: f64) -> AnomalyLevel {
    if spread > EXTREME_SPREAD {
        AnomalyLevel::Extreme
    } else if spread > ANOMALY_SPREAD {
        AnomalyLevel::Anomaly
    } else {
        AnomalyLevel::None
    }
}

pub fn anomaly_level(product: &ProductRecord) -> AnomalyLevel {
    level_for_spread(spread(product))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalySummary {
    pub critical: usize,
    pub attention_required: usize,
    pub no_discrepancy: usize,
}

impl AnomalySummary {
    pub fn from_products(products: &[ProductRecord]) -> Self {
        let mut summary = Self::default();
        for product in products {
            match anomaly_level(product) {
                AnomalyLevel::Extreme => summary.critical += 1,
                AnomalyLevel::Anomaly => summary.attention_required += 1,
                AnomalyLevel::None => summary.no_discrepancy += 1,
            }
        }
        summary
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.critical + self.attention_required + self.no_discrepancy
    }
}
