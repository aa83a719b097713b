use echo_core::config::ScoringWeights;
use echo_core::models::ScoreBreakdown;
use echo_retrieval::scorer::composite_score;
use proptest::prelude::*;

fn arb_unit() -> impl Strategy<Value = f64> {
    0.0f64..=1.0f64
}

fn arb_weights() -> impl Strategy<Value = ScoringWeights> {
    (
        0.0f64..1000.0,
        0.0f64..1000.0,
        0.0f64..1000.0,
        0.0f64..1000.0,
        0.01f64..1000.0,
    )
        .prop_map(|(relevance, importance, recency, proximity, frequency)| {
            ScoringWeights {
                relevance,
                importance,
                recency,
                proximity,
                frequency,
            }
            .normalized()
        })
}

proptest! {
    #[test]
    fn composite_score_stays_within_unit_interval(
        relevance in arb_unit(),
        importance in arb_unit(),
        recency in arb_unit(),
        proximity in arb_unit(),
        frequency in arb_unit(),
        weights in arb_weights(),
    ) {
        let breakdown = ScoreBreakdown {
            relevance,
            importance,
            recency,
            proximity,
            frequency,
        };
        let score = composite_score(&breakdown, &weights);
        prop_assert!((0.0..=1.0).contains(&score), "composite score {score} out of bounds");
    }
}
