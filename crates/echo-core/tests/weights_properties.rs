use echo_core::config::ScoringWeights;
use proptest::prelude::*;

proptest! {
    #[test]
    fn normalized_weights_sum_to_one(
        relevance in 0.0f64..1000.0,
        importance in 0.0f64..1000.0,
        recency in 0.0f64..1000.0,
        proximity in 0.0f64..1000.0,
        frequency in 0.01f64..1000.0,
    ) {
        let raw = ScoringWeights {
            relevance,
            importance,
            recency,
            proximity,
            frequency,
        };
        let normalized = raw.normalized();
        let sum = normalized.relevance
            + normalized.importance
            + normalized.recency
            + normalized.proximity
            + normalized.frequency;
        prop_assert!((sum - 1.0).abs() < 1e-6, "weights summed to {sum}, expected 1.0");
        prop_assert!(normalized.relevance >= 0.0 && normalized.relevance <= 1.0);
        prop_assert!(normalized.frequency >= 0.0 && normalized.frequency <= 1.0);
    }
}

#[test]
fn zero_sum_falls_back_to_default() {
    let raw = ScoringWeights {
        relevance: 0.0,
        importance: 0.0,
        recency: 0.0,
        proximity: 0.0,
        frequency: 0.0,
    };
    assert_eq!(raw.normalized(), ScoringWeights::DEFAULT);
}
