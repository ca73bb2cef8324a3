//! Property tests for replay aggregation and per-key monotonicity.

use proptest::prelude::*;
use sequencer_rs::aggregate_max;
use sequencer_rs::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// Strategies
// =============================================================================

fn arb_values(max_len: usize) -> impl Strategy<Value = Vec<SeqValue>> {
    prop::collection::vec((0u64..3, 1u16..4, 1u64..10_000), 0..max_len).prop_map(|raw| {
        raw.into_iter()
            .map(|(ws_id, seq_id, value)| SeqValue::new(ws_id, seq_id, value))
            .collect()
    })
}

fn arb_values_and_shuffle(max_len: usize) -> impl Strategy<Value = (Vec<SeqValue>, Vec<SeqValue>)> {
    arb_values(max_len).prop_flat_map(|values| (Just(values.clone()), Just(values).prop_shuffle()))
}

/// One transaction: how many numbers to draw per sequence, and whether it
/// ends with `actualize` instead of `flush`, and whether a flush tick
/// elapses afterwards.
fn arb_transactions() -> impl Strategy<Value = Vec<(u8, u8, bool, bool)>> {
    prop::collection::vec((0u8..4, 0u8..3, any::<bool>(), any::<bool>()), 1..12)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap_or_else(|e| panic!("failed to build runtime: {e}"))
}

fn expected_max(values: &[SeqValue]) -> HashMap<NumberKey, Number> {
    let mut expected = HashMap::new();
    for v in values {
        let entry = expected.entry(v.key).or_insert(0);
        if v.value > *entry {
            *entry = v.value;
        }
    }
    expected
}

// =============================================================================
// Properties
// =============================================================================

/// Property: the aggregate keeps the highest value per key whatever the
/// order of the input.
fn prop_aggregation_is_order_independent(values: &[SeqValue], shuffled: &[SeqValue]) {
    let mut in_order = HashMap::new();
    aggregate_max(&mut in_order, values);

    let mut one_by_one = HashMap::new();
    for v in shuffled {
        aggregate_max(&mut one_by_one, std::slice::from_ref(v));
    }

    assert_eq!(in_order, one_by_one);
    assert_eq!(in_order, expected_max(values));
}

/// Property: startup replay persists the highest logged value per key, no
/// matter how the values are spread across records.
fn prop_replay_persists_logged_max(values: &[SeqValue], per_record: usize) {
    runtime().block_on(async {
        let storage = Arc::new(MemStorage::new());
        for (i, chunk) in values.chunks(per_record.max(1)).enumerate() {
            storage.append_plog(i as u64 + 1, chunk.to_vec());
        }

        let params = Params::new().with_seq_type(1, 1, 0);
        let sequencer = Sequencer::new(params, Arc::clone(&storage))
            .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
        assert!(sequencer.wait_ready().await.is_ok());

        for (key, max) in expected_max(values) {
            assert_eq!(storage.number(key), max, "replayed value for {key}");
        }
        sequencer.shutdown().await;
    });
}

/// Property: numbers drawn for a key form a strictly increasing sequence
/// starting at `initial + 1`, across flushes, ticks and actualizations.
fn prop_numbers_are_monotonic(transactions: &[(u8, u8, bool, bool)]) {
    runtime().block_on(async {
        let params = Params::new()
            .with_seq_type(1, 1, 0)
            .with_seq_type(1, 2, 100)
            .with_flush_interval_ms(100);
        let storage = Arc::new(MemStorage::new());
        let mut sequencer = Sequencer::new(params.clone(), Arc::clone(&storage))
            .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
        assert!(sequencer.wait_ready().await.is_ok());

        let mut issued: HashMap<SeqId, Vec<Number>> = HashMap::new();
        for &(first, second, actualize, tick) in transactions {
            let offset = sequencer
                .start(1, 1)
                .await
                .unwrap_or_else(|| panic!("start refused"));

            let mut logged = Vec::new();
            for (seq_id, count) in [(1, first), (2, second)] {
                for _ in 0..count {
                    let number = sequencer
                        .next(seq_id)
                        .await
                        .unwrap_or_else(|e| panic!("next failed: {e}"));
                    issued.entry(seq_id).or_default().push(number);
                    logged.push(SeqValue::new(1, seq_id, number));
                }
            }

            if actualize {
                sequencer.actualize();
                assert!(sequencer.wait_ready().await.is_ok());
            } else {
                storage.append_plog(offset, logged);
                sequencer.flush();
            }
            if tick {
                tokio::time::sleep(params.flush_interval() * 2).await;
            }
        }

        for (seq_id, numbers) in &issued {
            let initial = params.initial_value(1, *seq_id).unwrap_or_default();
            assert_eq!(numbers.first().copied(), Some(initial + 1));
            assert!(
                numbers.windows(2).all(|w| w[1] == w[0] + 1),
                "numbers for seq {seq_id} must increase by one: {numbers:?}"
            );
        }
        sequencer.shutdown().await;
    });
}

// =============================================================================
// Test runners
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_aggregation_is_order_independent((values, shuffled) in arb_values_and_shuffle(40)) {
        prop_aggregation_is_order_independent(&values, &shuffled);
    }

    #[test]
    fn test_replay_persists_logged_max(values in arb_values(40), per_record in 1usize..6) {
        prop_replay_persists_logged_max(&values, per_record);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_numbers_are_monotonic(transactions in arb_transactions()) {
        prop_numbers_are_monotonic(&transactions);
    }
}
