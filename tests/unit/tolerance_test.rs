// Property-based tests for the money tolerance comparator and rounding.

use apflow::core::money::{parse_amount, round_money, within_tolerance};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[test]
fn test_exact_tolerance_boundary_passes() {
    let eps = dec!(0.01);
    // |total - (subtotal + tax)| == eps passes
    assert!(within_tolerance(dec!(220.01), dec!(200.00) + dec!(20.00), eps));
    // eps + 1e-4 fails
    assert!(!within_tolerance(dec!(220.0101), dec!(200.00) + dec!(20.00), eps));
}

#[test]
fn test_half_to_even_tie_break() {
    assert_eq!(round_money(dec!(0.00005)), dec!(0.0000));
    assert_eq!(round_money(dec!(0.00015)), dec!(0.0002));
    assert_eq!(round_money(dec!(2.00025)), dec!(2.0002));
    assert_eq!(round_money(dec!(2.00035)), dec!(2.0004));
}

proptest! {
    #[test]
    fn test_tolerance_is_symmetric(a in -1_000_000_00i64..1_000_000_00, b in -1_000_000_00i64..1_000_000_00) {
        let a = Decimal::new(a, 2);
        let b = Decimal::new(b, 2);
        let eps = dec!(0.01);
        prop_assert_eq!(within_tolerance(a, b, eps), within_tolerance(b, a, eps));
    }

    #[test]
    fn test_tolerance_is_reflexive(a in -1_000_000_00i64..1_000_000_00) {
        let a = Decimal::new(a, 2);
        prop_assert!(within_tolerance(a, a, dec!(0.01)));
        prop_assert!(within_tolerance(a, a, Decimal::ZERO));
    }

    #[test]
    fn test_tolerance_matches_abs_difference(a in -1_000_000_00i64..1_000_000_00, b in -1_000_000_00i64..1_000_000_00) {
        let a = Decimal::new(a, 2);
        let b = Decimal::new(b, 2);
        let eps = dec!(0.01);
        prop_assert_eq!(within_tolerance(a, b, eps), (a - b).abs() <= eps);
    }

    #[test]
    fn test_rounding_is_idempotent(cents in -1_000_000_0000i64..1_000_000_0000) {
        let amount = Decimal::new(cents, 4);
        prop_assert_eq!(round_money(amount), round_money(round_money(amount)));
    }

    #[test]
    fn test_parse_round_trips_plain_decimals(units in 0i64..1_000_000, cents in 0i64..100) {
        let rendered = format!("{units}.{cents:02}");
        let parsed = parse_amount(&rendered);
        prop_assert_eq!(parsed, Some(Decimal::new(units * 100 + cents, 2)));
    }
}
