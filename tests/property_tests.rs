//! Property-based tests for splitpage
//!
//! - Test mathematical invariants of the statistics helpers
//! - Test assignment distribution and anonymization properties
//! - Run with ProptestConfig::with_cases(100)

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use splitpage::anonymize::anonymize_ip;
use splitpage::assignment::pick_weighted;
use splitpage::stats::{chi_squared_2x2, conversion_rate, relative_improvement, wilson_interval};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Generate (conversions, visitors) with conversions <= visitors
fn arb_counts() -> impl Strategy<Value = (u64, u64)> {
    (1u64..5_000).prop_flat_map(|visitors| (0..=visitors, Just(visitors)))
}

/// Generate a non-empty weight vector
fn arb_weights() -> impl Strategy<Value = Vec<u32>> {
    proptest::collection::vec(1u32..20, 1..8)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: conversion rate is a percentage
    #[test]
    fn prop_conversion_rate_in_range((conversions, visitors) in arb_counts()) {
        let rate = conversion_rate(conversions, visitors);
        prop_assert!((0.0..=100.0).contains(&rate));
    }

    /// Property: Wilson interval brackets the observed rate and stays in [0, 100]
    #[test]
    fn prop_wilson_interval_brackets_rate((conversions, visitors) in arb_counts()) {
        let rate = conversion_rate(conversions, visitors);
        let ci = wilson_interval(rate, visitors);
        prop_assert!(ci.lower >= -1e-9);
        prop_assert!(ci.upper <= 100.0 + 1e-9);
        prop_assert!(ci.lower <= rate + 1e-9);
        prop_assert!(rate <= ci.upper + 1e-9);
    }

    /// Property: p-value is a probability
    #[test]
    fn prop_chi_squared_p_value_is_probability(
        (c1, n1) in arb_counts(),
        (c2, n2) in arb_counts(),
    ) {
        if let Some(result) = chi_squared_2x2([[c1, n1 - c1], [c2, n2 - c2]]) {
            prop_assert!(result.statistic >= 0.0);
            prop_assert!((0.0..=1.0).contains(&result.p_value));
        }
    }

    /// Property: swapping the two rows does not change the test
    #[test]
    fn prop_chi_squared_symmetric(
        (c1, n1) in arb_counts(),
        (c2, n2) in arb_counts(),
    ) {
        let forward = chi_squared_2x2([[c1, n1 - c1], [c2, n2 - c2]]);
        let backward = chi_squared_2x2([[c2, n2 - c2], [c1, n1 - c1]]);
        match (forward, backward) {
            (Some(f), Some(b)) => {
                prop_assert!((f.statistic - b.statistic).abs() <= 1e-9 * f.statistic.max(1.0));
            }
            (None, None) => {}
            _ => prop_assert!(false, "definedness differs"),
        }
    }

    /// Property: improvement over itself is zero
    #[test]
    fn prop_relative_improvement_identity(rate in 0.0f64..100.0) {
        prop_assert!(relative_improvement(rate, rate).abs() < 1e-9);
    }

    /// Property: pick_weighted always returns a valid index
    #[test]
    fn prop_pick_weighted_in_bounds(weights in arb_weights(), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..50 {
            let idx = pick_weighted(&weights, &mut rng).unwrap();
            prop_assert!(idx < weights.len());
        }
    }

    /// Property: IPv4 anonymization keeps the /16 prefix
    #[test]
    fn prop_anonymize_ipv4_keeps_prefix(a in any::<u8>(), b in any::<u8>(), c in any::<u8>(), d in any::<u8>()) {
        let masked = anonymize_ip(Some(&format!("{a}.{b}.{c}.{d}")));
        prop_assert_eq!(masked, Some(format!("{a}.{b}.0.0")));
    }

    /// Property: anonymization is idempotent
    #[test]
    fn prop_anonymize_idempotent(a in any::<u8>(), b in any::<u8>(), c in any::<u8>(), d in any::<u8>()) {
        let once = anonymize_ip(Some(&format!("{a}.{b}.{c}.{d}")));
        let twice = anonymize_ip(once.as_deref());
        prop_assert_eq!(once, twice);
    }
}

// ============================================================================
// Distribution checks (seeded, deterministic)
// ============================================================================

#[test]
fn test_weighted_frequencies_converge() {
    let weights = [1, 2, 5];
    let total: u32 = weights.iter().sum();
    let draws = 40_000;
    let mut rng = StdRng::seed_from_u64(2024);
    let mut counts = [0u32; 3];
    for _ in 0..draws {
        counts[pick_weighted(&weights, &mut rng).unwrap()] += 1;
    }
    for (count, weight) in counts.iter().zip(weights) {
        let observed = f64::from(*count) / f64::from(draws);
        let expected = f64::from(weight) / f64::from(total);
        assert!(
            (observed - expected).abs() < 0.015,
            "observed {observed}, expected {expected}"
        );
    }
}

#[test]
fn test_anonymize_ipv6_keeps_prefix() {
    assert_eq!(
        anonymize_ip(Some("2001:db8:85a3:8d3:1319:8a2e:370:7348")).as_deref(),
        Some("2001:db8:85a3:0000:0000:0000:0000:0000")
    );
    assert_eq!(anonymize_ip(None), None);
    assert_eq!(anonymize_ip(Some("192.168.1.1")).as_deref(), Some("192.168.0.0"));
}
