/// Loaded, normalized weights for the five composite-score factors.
/// Always sums to 1.0 (within `1e-6`) once loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub relevance: f64,
    pub importance: f64,
    pub recency: f64,
    pub proximity: f64,
    pub frequency: f64,
}

impl ScoringWeights {
    pub const DEFAULT: Self = Self {
        relevance: 0.30,
        importance: 0.30,
        recency: 0.20,
        proximity: 0.10,
        frequency: 0.10,
    };

    /// Load from `ECHO_WEIGHT_{RELEVANCE|IMPORTANCE|RECENCY|PROXIMITY|FREQUENCY}`.
    /// Any individually unparseable or negative value falls back to its
    /// default component (with a `tracing::warn!`); the resulting set is
    /// then normalized to sum to 1.0, or replaced wholesale by the
    /// defaults if the sum is non-positive.
    pub fn load_from_env() -> Self {
        let relevance = read_weight("ECHO_WEIGHT_RELEVANCE", Self::DEFAULT.relevance);
        let importance = read_weight("ECHO_WEIGHT_IMPORTANCE", Self::DEFAULT.importance);
        let recency = read_weight("ECHO_WEIGHT_RECENCY", Self::DEFAULT.recency);
        let proximity = read_weight("ECHO_WEIGHT_PROXIMITY", Self::DEFAULT.proximity);
        let frequency = read_weight("ECHO_WEIGHT_FREQUENCY", Self::DEFAULT.frequency);

        Self {
            relevance,
            importance,
            recency,
            proximity,
            frequency,
        }
        .normalized()
    }

    fn sum(&self) -> f64 {
        self.relevance + self.importance + self.recency + self.proximity + self.frequency
    }

    /// Normalize proportionally so the five weights sum to 1.0. Falls
    /// back to [`ScoringWeights::DEFAULT`] if the sum is non-positive.
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        if total <= 0.0 {
            tracing::warn!("scoring weights summed to {total}, falling back to defaults");
            return Self::DEFAULT;
        }
        if (total - 1.0).abs() <= 1e-6 {
            return *self;
        }
        Self {
            relevance: self.relevance / total,
            importance: self.importance / total,
            recency: self.recency / total,
            proximity: self.proximity / total,
            frequency: self.frequency / total,
        }
    }
}

fn read_weight(var: &str, default: f64) -> f64 {
    match std::env::var(var) {
        Ok(raw) => match raw.parse::<f64>() {
            Ok(v) if v >= 0.0 => v,
            Ok(v) => {
                tracing::warn!("{var}={v} is negative, using default {default}");
                default
            }
            Err(_) => {
                tracing::warn!("{var}={raw:?} is not a number, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}
