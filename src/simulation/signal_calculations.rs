//! Channel success calculations.
//!
//! Contains helpers for:
//! - Deciding whether an in-range transmission is actually received
//! - The tiered on-device model scaling a per-drone base success rate
//! - The Gaussian ring model and its lazily built bucket table
//!
//! Units:
//! - Distance: meters
//! - Probabilities: plain `f64` in `[0, 1]`

use rand::Rng;

use crate::common::scene::{ChannelErrorKind, SimulationConfig};

/// Width of a Gaussian ring relative to the communication range.
const GAUSSIAN_RING_RATIO: f64 = 0.5;

/// Standard deviation of the Gaussian model relative to the communication range.
const GAUSSIAN_SIGMA_RATIO: f64 = 1.15;

/// Cumulative distribution function of a normal distribution centered at 0.
///
/// # Formula
///
/// ```text
/// Φ(x) = ½ × (1 + erf(x / (σ√2)))
/// ```
pub fn normal_cdf(x: f64, sigma: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / (sigma * std::f64::consts::SQRT_2)))
}

/// Success probability per distance ring of the Gaussian channel model.
///
/// Ring `i` covers distances `[i·w, (i+1)·w)` where `w = ⌊range × 0.5⌋`.
/// Probabilities are CDF differences normalized by the first ring, so the
/// closest ring always has probability 1 and farther rings decay.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianBuckets {
    ring_width: f64,
    probabilities: Vec<f64>,
}

impl GaussianBuckets {
    /// Build the table for a drone with communication range `range`.
    ///
    /// # Formula
    ///
    /// ```text
    /// p_i = (Φ((i+1)·w) − Φ(i·w)) / (Φ(w) − Φ(0))
    /// ```
    pub fn new(range: f64) -> Self {
        let ring_width = (range * GAUSSIAN_RING_RATIO).floor();
        if ring_width < 1.0 {
            return Self {
                ring_width: range.max(f64::MIN_POSITIVE),
                probabilities: vec![1.0],
            };
        }

        let sigma = range * GAUSSIAN_SIGMA_RATIO;
        let max_prob = normal_cdf(ring_width, sigma) - normal_cdf(0.0, sigma);

        let mut probabilities = Vec::new();
        let mut lower = 0.0;
        while lower < range {
            let mass = normal_cdf(lower + ring_width, sigma) - normal_cdf(lower, sigma);
            probabilities.push((mass / max_prob).max(0.0));
            lower += ring_width;
        }

        Self {
            ring_width,
            probabilities,
        }
    }

    /// Probability for a link of length `distance`. Distances on the range
    /// edge fall into the last ring.
    pub fn probability(&self, distance: f64) -> f64 {
        let index = (distance.max(0.0) / self.ring_width) as usize;
        let index = index.min(self.probabilities.len() - 1);
        self.probabilities[index]
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }
}

/// Per-drone channel model.
///
/// Each drone owns one, parameterised with its own range and base success
/// rate. The Gaussian table is built on first use and kept for the drone's
/// lifetime.
#[derive(Debug, Clone)]
pub struct ChannelModel {
    kind: ChannelErrorKind,
    range: f64,
    /// Base success rate of the on-device model.
    success_rate: f64,
    uniform_success: f64,
    gaussian_scale: f64,
    buckets: Option<GaussianBuckets>,
}

impl ChannelModel {
    pub fn new(kind: ChannelErrorKind, range: f64, success_rate: f64, config: &SimulationConfig) -> Self {
        Self {
            kind,
            range,
            success_rate,
            uniform_success: config.drone_communication_success,
            gaussian_scale: config.gaussian_scale,
            buckets: None,
        }
    }

    pub fn kind(&self) -> ChannelErrorKind {
        self.kind
    }

    /// Success probability of a link of length `distance` under this model.
    ///
    /// Links longer than the drone's range always fail.
    pub fn success_probability(&mut self, distance: f64) -> f64 {
        if distance > self.range {
            return 0.0;
        }
        match self.kind {
            ChannelErrorKind::NoError => 1.0,
            ChannelErrorKind::Uniform => self.uniform_success,
            ChannelErrorKind::OnDevice => {
                if distance <= self.range / 3.0 {
                    self.success_rate
                } else if distance <= self.range * 2.0 / 3.0 {
                    self.success_rate * 2.0 / 3.0
                } else {
                    self.success_rate / 3.0
                }
            }
            ChannelErrorKind::Gaussian => {
                let range = self.range;
                let buckets = self.buckets.get_or_insert_with(|| GaussianBuckets::new(range));
                buckets.probability(distance) * self.gaussian_scale
            }
        }
    }

    /// Roll whether a transmission over `distance` meters is received.
    pub fn channel_success<R: Rng>(&mut self, distance: f64, rng: &mut R) -> bool {
        if self.kind == ChannelErrorKind::NoError {
            return true;
        }
        let probability = self.success_probability(distance);
        rng.r#gen::<f64>() < probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn model(kind: ChannelErrorKind, rate: f64) -> ChannelModel {
        ChannelModel::new(kind, 200.0, rate, &SimulationConfig::default())
    }

    #[test]
    fn no_error_always_succeeds() {
        let mut channel = model(ChannelErrorKind::NoError, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for d in [0.0, 1.0, 99.9, 150.0, 200.0, 450.0] {
            assert!(channel.channel_success(d, &mut rng));
        }
    }

    #[test]
    fn on_device_tiers_scale_base_rate() {
        let mut channel = model(ChannelErrorKind::OnDevice, 0.9);
        assert!((channel.success_probability(50.0) - 0.9).abs() < 1e-12);
        assert!((channel.success_probability(100.0) - 0.6).abs() < 1e-12);
        assert!((channel.success_probability(190.0) - 0.3).abs() < 1e-12);
        assert_eq!(channel.success_probability(201.0), 0.0);
    }

    #[test]
    fn uniform_zero_never_succeeds() {
        let mut config = SimulationConfig::default();
        config.drone_communication_success = 0.0;
        let mut channel = ChannelModel::new(ChannelErrorKind::Uniform, 200.0, 1.0, &config);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        assert!((0..100).all(|_| !channel.channel_success(10.0, &mut rng)));
    }

    #[test]
    fn gaussian_buckets_are_normalized_and_decaying() {
        let buckets = GaussianBuckets::new(200.0);
        let probs = buckets.probabilities();
        assert_eq!(probs.len(), 2);
        assert!((probs[0] - 1.0).abs() < 1e-12);
        assert!(probs.iter().all(|p| *p >= 0.0));
        assert!(probs.windows(2).all(|w| w[1] <= w[0]));

        let scale = SimulationConfig::default().gaussian_scale;
        let total: f64 = probs.iter().sum();
        let scaled: f64 = probs.iter().map(|p| p * scale).sum();
        assert!(scaled <= total);
    }

    #[test]
    fn gaussian_lookup_clamps_on_range_edge() {
        let buckets = GaussianBuckets::new(200.0);
        assert_eq!(buckets.probability(200.0), buckets.probabilities()[1]);
        assert_eq!(buckets.probability(0.0), 1.0);
    }

    #[test]
    fn gaussian_table_is_built_lazily() {
        let mut channel = model(ChannelErrorKind::Gaussian, 1.0);
        assert!(channel.buckets.is_none());
        let p = channel.success_probability(10.0);
        assert!(channel.buckets.is_some());
        assert!((p - SimulationConfig::default().gaussian_scale).abs() < 1e-12);
    }

    #[test]
    fn cdf_is_centered() {
        assert!((normal_cdf(0.0, 10.0) - 0.5).abs() < 1e-12);
        assert!(normal_cdf(30.0, 10.0) > 0.99);
    }
}
