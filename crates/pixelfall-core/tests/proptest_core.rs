//! Property-based tests for the Pixelfall core crate.
//!
//! Uses proptest to generate random numbers, bonus stacks, condition
//! trees, and hostile save blobs, then verify structural invariants
//! hold.

use pixelfall_core::bignum::BigNum;
use pixelfall_core::condition::{self, Condition};
use pixelfall_core::id::ResourceId;
use pixelfall_core::migration::MigrationRegistry;
use pixelfall_core::pipeline::{BonusEntry, BonusSource, ProductionPipeline};
use pixelfall_core::save::{self, SaveEnvelope};
use pixelfall_core::test_utils::StubCtx;
use proptest::prelude::*;
use serde_json::{Value, json};

// ===========================================================================
// Generators
// ===========================================================================

/// Positive finite magnitudes spanning many orders of magnitude.
fn arb_bignum() -> impl Strategy<Value = BigNum> {
    (1.0..10.0f64, -50i64..200).prop_map(|(mantissa, exponent)| {
        BigNum::from_parts(mantissa, exponent)
    })
}

/// A pipeline bonus with a random mode and magnitude.
fn arb_bonus(index: usize) -> impl Strategy<Value = BonusEntry> {
    (0.1..10.0f64, proptest::bool::ANY).prop_map(move |(value, multiplicative)| {
        let id = format!("bonus-{index}");
        if multiplicative {
            BonusEntry::multiplier(id, BonusSource::Upgrade, BigNum::from_f64(value))
        } else {
            BonusEntry::additive(id, BonusSource::Upgrade, BigNum::from_f64(value))
        }
    })
}

fn arb_bonus_stack(max: usize) -> impl Strategy<Value = Vec<BonusEntry>> {
    (1..=max).prop_flat_map(|n| {
        (0..n).map(arb_bonus).collect::<Vec<_>>()
    })
}

/// Condition trees over a single resource, a few levels deep.
fn arb_condition() -> impl Strategy<Value = Condition> {
    let leaf = prop_oneof![
        Just(Condition::Always),
        Just(Condition::Never),
        (0.0..1000.0f64).prop_map(|amount| {
            Condition::resource_at_least(ResourceId(0), BigNum::from_f64(amount))
        }),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Condition::All),
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Condition::Any),
            inner.prop_map(|c| Condition::Not(Box::new(c))),
        ]
    })
}

/// Arbitrary JSON values, the kind a corrupted or tampered save can hold.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        proptest::bool::ANY.prop_map(Value::Bool),
        proptest::num::f64::NORMAL.prop_map(|f| json!(f)),
        "[a-z0-9:. -]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::btree_map("[a-z_]{1,10}", inner, 0..4)
                .prop_map(|map| json!(map)),
        ]
    })
}

// ===========================================================================
// Helpers
// ===========================================================================

/// Relative comparison that tolerates the last-bit drift of folding
/// floats in different orders.
fn approx_eq(a: BigNum, b: BigNum) -> bool {
    if a == b {
        return true;
    }
    let shift = a.exponent() - b.exponent();
    if shift.abs() > 1 {
        return false;
    }
    let aligned = a.mantissa() * 10f64.powi(shift as i32);
    (aligned - b.mantissa()).abs() <= 1e-9 * b.mantissa().abs().max(1.0)
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Addition is commutative and keeps the mantissa normalized.
    #[test]
    fn bignum_add_commutes((a, b) in (arb_bignum(), arb_bignum())) {
        prop_assert_eq!(a + b, b + a);
        let sum = a + b;
        prop_assert!(sum == BigNum::ZERO || (1.0..10.0).contains(&sum.mantissa()));
    }

    /// Decimal-string round trips recover the value.
    #[test]
    fn bignum_string_round_trip(n in arb_bignum()) {
        let parsed: BigNum = n.to_string().parse().unwrap();
        prop_assert!(approx_eq(parsed, n), "{parsed} != {n}");
    }

    /// Multiplying magnitudes sums exponents without drifting more than
    /// the mantissa carry.
    #[test]
    fn bignum_mul_exponents((a, b) in (arb_bignum(), arb_bignum())) {
        let product = a * b;
        let expected = a.exponent() + b.exponent();
        prop_assert!((product.exponent() - expected).abs() <= 1);
    }

    /// Bonus evaluation is order-independent: any permutation of the same
    /// stack yields the same rate.
    #[test]
    fn pipeline_order_independent(stack in arb_bonus_stack(8), seed in 0..64usize) {
        let ctx = StubCtx::default();
        let base = BigNum::from_f64(10.0);

        let mut forward = ProductionPipeline::new();
        for entry in &stack {
            forward.add_or_update(entry.clone());
        }

        let mut rotated = ProductionPipeline::new();
        let pivot = seed % stack.len().max(1);
        for entry in stack[pivot..].iter().chain(&stack[..pivot]) {
            rotated.add_or_update(entry.clone());
        }

        let a = forward.calculate(ResourceId(0), base, &ctx);
        let b = rotated.calculate(ResourceId(0), base, &ctx);
        prop_assert!(approx_eq(a, b), "{a} != {b}");
    }

    /// Double negation is the identity on any condition tree.
    #[test]
    fn condition_double_negation(cond in arb_condition(), amount in 0.0..2000.0f64) {
        let ctx = StubCtx::default().with_amount(ResourceId(0), BigNum::from_f64(amount));
        let doubled = Condition::Not(Box::new(Condition::Not(Box::new(cond.clone()))));
        prop_assert_eq!(
            condition::evaluate(&ctx, &cond),
            condition::evaluate(&ctx, &doubled)
        );
    }

    /// De Morgan: NOT(ANY xs) == ALL(NOT x).
    #[test]
    fn condition_de_morgan(
        conds in proptest::collection::vec(arb_condition(), 0..4),
        amount in 0.0..2000.0f64,
    ) {
        let ctx = StubCtx::default().with_amount(ResourceId(0), BigNum::from_f64(amount));
        let lhs = Condition::Not(Box::new(Condition::Any(conds.clone())));
        let rhs = Condition::All(
            conds
                .iter()
                .map(|c| Condition::Not(Box::new(c.clone())))
                .collect(),
        );
        prop_assert_eq!(condition::evaluate(&ctx, &lhs), condition::evaluate(&ctx, &rhs));
    }

    /// Progress stays in the unit interval for every tree.
    #[test]
    fn condition_progress_bounded(cond in arb_condition(), amount in 0.0..2000.0f64) {
        let ctx = StubCtx::default().with_amount(ResourceId(0), BigNum::from_f64(amount));
        let report = condition::evaluate_with_details(&ctx, &cond);
        if let Some(progress) = report.progress {
            prop_assert!((0.0..=1.0).contains(&progress));
        }
    }

    /// Sanitizing arbitrary JSON never panics and always yields a blob
    /// the save schema can deserialize.
    #[test]
    fn sanitize_total(mut value in arb_json()) {
        save::sanitize(&mut value, 5);
        let envelope: Result<SaveEnvelope, _> = serde_json::from_value(value);
        prop_assert!(envelope.is_ok());
    }

    /// Sanitizing is idempotent: a second pass changes nothing.
    #[test]
    fn sanitize_idempotent(mut value in arb_json()) {
        save::sanitize(&mut value, 5);
        let once = value.clone();
        save::sanitize(&mut value, 5);
        prop_assert_eq!(value, once);
    }

    /// A fully migrated blob is a fixed point of migration.
    #[test]
    fn migration_idempotent(start_version in 1u32..4) {
        let mut registry = MigrationRegistry::new(4);
        for target in 2..=4u32 {
            registry
                .register(target, Box::new(move |data| {
                    data["state"]["meta"][format!("step_{target}")] = json!(true);
                    Ok(())
                }))
                .unwrap();
        }

        let mut blob = json!({
            "state": { "meta": { "version": start_version } }
        });
        registry.migrate(&mut blob).unwrap();
        let after_first = blob.clone();
        registry.migrate(&mut blob).unwrap();
        prop_assert_eq!(blob, after_first);
    }
}
