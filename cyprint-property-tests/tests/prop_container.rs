//! Property tests for the Container resource
//!
//! Tests invariants for:
//! - Bounds: 0 <= level <= capacity after every operation
//! - Conservation: level changes by exactly what was transferred
//! - Validation: negative, non-finite and oversized amounts are rejected

use cyprint_property_tests::kernel::{Container, Pid, Transfer};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Op {
    Get(f64),
    Put(f64),
    Cancel(u32),
}

fn op(capacity: f64) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0.0..=capacity).prop_map(Op::Get),
        (0.0..=capacity).prop_map(Op::Put),
        (0u32..32).prop_map(Op::Cancel),
    ]
}

fn scenario() -> impl Strategy<Value = (f64, f64, Vec<Op>)> {
    (1.0f64..100.0).prop_flat_map(|capacity| {
        (
            Just(capacity),
            0.0..=capacity,
            prop::collection::vec(op(capacity), 1..48),
        )
    })
}

// ============================================================================
// Container Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: the level stays within [0, capacity]
    #[test]
    fn container_level_stays_in_bounds((capacity, level, ops) in scenario()) {
        let mut tank = Container::new(0, "filament", capacity, level);
        let mut expected = level;

        for (index, op) in ops.iter().enumerate() {
            let pid = Pid(index as u32);
            match *op {
                Op::Get(amount) => {
                    if tank.request_get(pid, amount).unwrap() {
                        expected -= amount;
                    }
                }
                Op::Put(amount) => {
                    if tank.request_put(pid, amount).unwrap() {
                        expected += amount;
                    }
                }
                Op::Cancel(victim) => {
                    tank.cancel(Pid(victim));
                }
            }
            for (_, transfer) in tank.settle().unwrap() {
                match transfer {
                    Transfer::Got(amount) => expected -= amount,
                    Transfer::Put(amount) => expected += amount,
                }
            }

            prop_assert!(tank.check().is_ok());
            prop_assert!(tank.level() >= 0.0 && tank.level() <= capacity,
                "level {} outside [0, {}]", tank.level(), capacity);
            prop_assert!((tank.level() - expected).abs() < 1e-6,
                "level {} but transfers account for {}", tank.level(), expected);
        }
    }

    /// Amounts the container can never satisfy are refused outright
    #[test]
    fn container_rejects_invalid_amounts(capacity in 1.0f64..100.0, excess in 0.001f64..100.0) {
        let mut tank = Container::new(0, "filament", capacity, 0.0);
        prop_assert!(tank.request_get(Pid(0), -excess).is_err());
        prop_assert!(tank.request_put(Pid(0), capacity + excess).is_err());
        prop_assert!(tank.request_get(Pid(0), f64::NAN).is_err());
        prop_assert_eq!(tank.waiting_getters(), 0);
        prop_assert_eq!(tank.waiting_putters(), 0);
        prop_assert_eq!(tank.level(), 0.0);
    }
}
