//! Split-test statistics: conversion rates, Wilson intervals, relative
//! improvement and 2x2 chi-squared significance
//!
//! The first variant in creation order is the control/baseline everywhere.
//!
//! Two reports exist with deliberately different interval rules:
//! - [`StatisticsEngine::test_results`] reports an interval only once a variant
//!   has more than [`MIN_VISITORS_FOR_INTERVAL`] visitors and one conversion
//! - [`StatisticsEngine::statistical_significance`] reports one for every
//!   variant with visitors
//!
//! References:
//! - Wilson (1927): Probable inference, the law of succession, and statistical inference
//! - Yates (1934): Contingency tables involving small numbers and the χ² test

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::sync::Arc;
use tracing::debug;

use crate::experiment::{SplitTest, TestId, VariantId};
use crate::store::SplitTestStore;
use crate::Result;

/// z-score for a two-sided 95% interval.
pub const Z_95: f64 = 1.96;

/// p-value below which a difference is reported as significant.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// `test_results` computes intervals only above this many visitors.
pub const MIN_VISITORS_FOR_INTERVAL: u64 = 10;

/// Lower/upper bounds of a confidence interval, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Lower bound (%)
    pub lower: f64,
    /// Upper bound (%)
    pub upper: f64,
}

/// Conversion rate in percent; 0 when there are no visitors.
#[must_use]
pub fn conversion_rate(conversions: u64, visitors: u64) -> f64 {
    if visitors == 0 {
        return 0.0;
    }
    (conversions as f64 * 100.0) / visitors as f64
}

/// Wilson score interval for a rate (in percent) observed over `n` trials.
///
/// `n` must be positive.
#[must_use]
pub fn wilson_interval(rate_percent: f64, n: u64) -> ConfidenceInterval {
    let n = n as f64;
    let p = rate_percent / 100.0;
    let z2 = Z_95 * Z_95;

    let denominator = 1.0 + z2 / n;
    let center = p + z2 / (2.0 * n);
    let sd = ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt();

    ConfidenceInterval {
        lower: (center - Z_95 * sd) / denominator * 100.0,
        upper: (center + Z_95 * sd) / denominator * 100.0,
    }
}

/// Percentage change of `rate` over `baseline`; 0 when the baseline is 0.
#[must_use]
pub fn relative_improvement(rate: f64, baseline: f64) -> f64 {
    if baseline > 0.0 {
        (rate - baseline) / baseline * 100.0
    } else {
        0.0
    }
}

/// Outcome of a chi-squared test of independence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChiSquaredTest {
    /// Test statistic (Yates-corrected)
    pub statistic: f64,
    /// Upper-tail probability with one degree of freedom
    pub p_value: f64,
}

/// Chi-squared test of independence on a 2x2 table with Yates' continuity
/// correction.
///
/// Each observed cell moves toward its expected count by at most 0.5.
/// Returns `None` when an expected count is zero (a whole row or column is
/// empty), where the statistic is undefined.
#[must_use]
pub fn chi_squared_2x2(table: [[u64; 2]; 2]) -> Option<ChiSquaredTest> {
    let observed = table.map(|row| row.map(|c| c as f64));
    let row_totals = [observed[0][0] + observed[0][1], observed[1][0] + observed[1][1]];
    let col_totals = [observed[0][0] + observed[1][0], observed[0][1] + observed[1][1]];
    let total = row_totals[0] + row_totals[1];

    let mut statistic = 0.0;
    for (i, row) in observed.iter().enumerate() {
        for (j, &obs) in row.iter().enumerate() {
            let expected = row_totals[i] * col_totals[j] / total;
            if expected <= 0.0 || !expected.is_finite() {
                return None;
            }
            let diff = expected - obs;
            let corrected = obs + diff.signum() * diff.abs().min(0.5);
            statistic += (corrected - expected).powi(2) / expected;
        }
    }

    let distribution = ChiSquared::new(1.0).ok()?;
    let p_value = (1.0 - distribution.cdf(statistic)).clamp(0.0, 1.0);
    Some(ChiSquaredTest { statistic, p_value })
}

/// Per-variant row of [`TestResults`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    /// Variant
    pub variant_id: VariantId,
    /// Variant name
    pub name: String,
    /// Visitors assigned
    pub visitors: u64,
    /// Conversions credited
    pub conversions: u64,
    /// Conversion rate (%)
    pub conversion_rate: f64,
    /// Wilson interval, zeros below the sample gate
    pub confidence_interval: ConfidenceInterval,
    /// Change versus the baseline (%); absent on the baseline itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_improvement: Option<f64>,
}

/// Full report for one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    /// The test
    pub test: SplitTest,
    /// One row per variant, baseline first
    pub results: Vec<VariantResult>,
    /// Sum of visitors
    pub total_visitors: u64,
    /// Sum of conversions
    pub total_conversions: u64,
    /// Overall conversion rate (%)
    pub avg_conversion_rate: f64,
}

/// Per-variant row of the significance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceRow {
    /// Variant
    pub variant_id: VariantId,
    /// Variant name
    pub name: String,
    /// Visitors assigned
    pub visitors: u64,
    /// Conversions credited
    pub conversions: u64,
    /// Conversion rate (%)
    pub conversion_rate: f64,
    /// Wilson interval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<ConfidenceInterval>,
    /// Change versus the control (%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_improvement: Option<f64>,
    /// Chi-squared p-value versus the control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    /// `p_value < 0.05`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significant: Option<bool>,
}

struct VariantCounts {
    variant_id: VariantId,
    name: String,
    visitors: u64,
    conversions: u64,
}

/// Read-only reporting over a store.
pub struct StatisticsEngine<S> {
    store: Arc<S>,
}

impl<S: SplitTestStore> StatisticsEngine<S> {
    /// Create an engine over a store.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn counts(&self, test_id: TestId) -> Result<Vec<VariantCounts>> {
        let variants = self.store.variants_for_test(test_id).await?;
        let mut counts = Vec::with_capacity(variants.len());
        for variant in variants {
            counts.push(VariantCounts {
                variant_id: variant.id(),
                visitors: self.store.count_sessions(test_id, variant.id()).await?,
                conversions: self.store.count_conversions(test_id, variant.id()).await?,
                name: variant.name,
            });
        }
        Ok(counts)
    }

    /// Visitors, conversions, rates and intervals for every variant.
    ///
    /// Returns `Ok(None)` for an unknown test.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn test_results(&self, test_id: TestId) -> Result<Option<TestResults>> {
        let Some(test) = self.store.get_test(test_id).await? else {
            return Ok(None);
        };

        let mut results: Vec<VariantResult> = self
            .counts(test_id)
            .await?
            .into_iter()
            .map(|c| {
                let rate = conversion_rate(c.conversions, c.visitors);
                let confidence_interval =
                    if c.visitors > MIN_VISITORS_FOR_INTERVAL && c.conversions > 0 {
                        wilson_interval(rate, c.visitors)
                    } else {
                        ConfidenceInterval::default()
                    };
                VariantResult {
                    variant_id: c.variant_id,
                    name: c.name,
                    visitors: c.visitors,
                    conversions: c.conversions,
                    conversion_rate: rate,
                    confidence_interval,
                    relative_improvement: None,
                }
            })
            .collect();

        if results.len() > 1 && results[0].visitors > 0 {
            let baseline = results[0].conversion_rate;
            for row in results.iter_mut().skip(1) {
                row.relative_improvement = Some(relative_improvement(row.conversion_rate, baseline));
            }
        }

        let total_visitors = results.iter().map(|r| r.visitors).sum();
        let total_conversions = results.iter().map(|r| r.conversions).sum();
        debug!(%test_id, total_visitors, total_conversions, "computed test results");

        Ok(Some(TestResults {
            test,
            results,
            total_visitors,
            total_conversions,
            avg_conversion_rate: conversion_rate(total_conversions, total_visitors),
        }))
    }

    /// Compare every variant with visitors against the control.
    ///
    /// Returns `Ok(None)` for an unknown test or one with fewer than two
    /// variants. Variants without visitors are left out; if fewer than two
    /// remain, the remaining rows come back without any statistics.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn statistical_significance(
        &self,
        test_id: TestId,
    ) -> Result<Option<Vec<SignificanceRow>>> {
        if self.store.get_test(test_id).await?.is_none() {
            return Ok(None);
        }
        let counts = self.counts(test_id).await?;
        if counts.len() < 2 {
            return Ok(None);
        }

        let mut rows: Vec<SignificanceRow> = counts
            .into_iter()
            .filter(|c| c.visitors > 0)
            .map(|c| SignificanceRow {
                conversion_rate: conversion_rate(c.conversions, c.visitors),
                variant_id: c.variant_id,
                name: c.name,
                visitors: c.visitors,
                conversions: c.conversions,
                confidence_interval: None,
                relative_improvement: None,
                p_value: None,
                significant: None,
            })
            .collect();

        if rows.len() < 2 {
            return Ok(Some(rows));
        }

        let control = (rows[0].visitors, rows[0].conversions, rows[0].conversion_rate);
        for (idx, row) in rows.iter_mut().enumerate() {
            row.confidence_interval = Some(wilson_interval(row.conversion_rate, row.visitors));
            if idx == 0 {
                continue;
            }
            let (control_visitors, control_conversions, control_rate) = control;
            let table = [
                [row.conversions, row.visitors.saturating_sub(row.conversions)],
                [
                    control_conversions,
                    control_visitors.saturating_sub(control_conversions),
                ],
            ];
            let p_value = chi_squared_2x2(table).map_or(1.0, |t| t.p_value);
            row.relative_improvement = Some(relative_improvement(row.conversion_rate, control_rate));
            row.p_value = Some(p_value);
            row.significant = Some(p_value < SIGNIFICANCE_LEVEL);
        }

        Ok(Some(rows))
    }

    /// Variant-level results as CSV with a trailing `TOTAL` row.
    ///
    /// Returns `Ok(None)` for an unknown test.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn export_csv(&self, test_id: TestId) -> Result<Option<String>> {
        if self.store.get_test(test_id).await?.is_none() {
            return Ok(None);
        }
        let counts = self.counts(test_id).await?;

        let mut out = String::from("Variant,Visitors,Conversions,Conversion Rate\r\n");
        let (mut total_visitors, mut total_conversions) = (0, 0);
        for c in &counts {
            total_visitors += c.visitors;
            total_conversions += c.conversions;
            push_csv_row(&mut out, &c.name, c.visitors, c.conversions);
        }
        push_csv_row(&mut out, "TOTAL", total_visitors, total_conversions);
        Ok(Some(out))
    }
}

fn push_csv_row(out: &mut String, name: &str, visitors: u64, conversions: u64) {
    let rate = conversion_rate(conversions, visitors);
    out.push_str(&format!(
        "{},{visitors},{conversions},{rate:.2}%\r\n",
        csv_field(name)
    ));
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_conversion_rate_zero_visitors() {
        assert!(approx(conversion_rate(0, 0), 0.0));
        assert!(approx(conversion_rate(12, 40), 30.0));
    }

    #[test]
    fn test_wilson_interval_known_values() {
        let ci = wilson_interval(20.0, 100);
        assert!((ci.lower - 13.336_592_255_909_88).abs() < 1e-9);
        assert!((ci.upper - 28.883_096_192_650_235).abs() < 1e-9);
    }

    #[test]
    fn test_wilson_interval_contains_rate() {
        let ci = wilson_interval(0.0, 25);
        assert!(ci.lower.abs() < 1e-9);
        assert!(ci.upper > 0.0);
    }

    #[test]
    fn test_relative_improvement() {
        assert!(approx(relative_improvement(30.0, 20.0), 50.0));
        assert!(approx(relative_improvement(30.0, 0.0), 0.0));
    }

    #[test]
    fn test_chi_squared_yates() {
        let result = chi_squared_2x2([[30, 70], [20, 80]]).unwrap();
        assert!((result.statistic - 2.16).abs() < 1e-9);
        assert!((result.p_value - 0.141_644_690_295_136_7).abs() < 1e-6);
    }

    #[test]
    fn test_chi_squared_identical_rows() {
        let result = chi_squared_2x2([[10, 90], [10, 90]]).unwrap();
        assert!(approx(result.statistic, 0.0));
        assert!(approx(result.p_value, 1.0));
    }

    #[test]
    fn test_chi_squared_undefined_for_empty_column() {
        assert!(chi_squared_2x2([[0, 50], [0, 40]]).is_none());
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_rows_append() {
        let mut out = String::from("Variant,Visitors,Conversions,Conversion Rate\r\n");
        push_csv_row(&mut out, "A", 40, 12);
        push_csv_row(&mut out, "Wide, blue", 0, 0);
        assert_eq!(
            out,
            "Variant,Visitors,Conversions,Conversion Rate\r\nA,40,12,30.00%\r\n\"Wide, blue\",0,0,0.00%\r\n"
        );
    }
}
