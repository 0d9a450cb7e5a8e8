//! Wave field math: interference sums and breathing patterns.
//!
//! Everything here is a pure function of its arguments. No state, no
//! clocks, no allocation beyond the returned pattern.

use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::settings::WaveParameters;
use crate::vec3::Vec3;

/// Point emitter used to evaluate interference at other points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaveSource {
    pub position: Vec3,
    /// Spatial frequency, > 0.
    pub frequency: f32,
    /// Amplitude, > 0.
    pub amplitude: f32,
    pub phase: f32,
}

impl WaveSource {
    pub fn new(position: Vec3, frequency: f32, amplitude: f32, phase: f32) -> Self {
        Self {
            position,
            frequency,
            amplitude,
            phase,
        }
    }

    /// Contribution of this source at `point`.
    pub fn contribution(&self, point: Vec3) -> f32 {
        let d = point.distance(self.position);
        (d * self.frequency + self.phase).sin() * self.amplitude
    }

    /// Finite position and phase, strictly positive frequency and amplitude.
    pub fn is_valid(&self) -> bool {
        self.position.is_finite()
            && self.phase.is_finite()
            && self.frequency.is_finite()
            && self.frequency > 0.0
            && self.amplitude.is_finite()
            && self.amplitude > 0.0
    }
}

/// Scalar interference at `point`: Σ sin(|point − pᵢ|·fᵢ + φᵢ)·aᵢ.
///
/// Sources are summed in input order with no normalization, so the
/// magnitude never exceeds the sum of amplitudes.
pub fn compute_interference(point: Vec3, sources: &[WaveSource]) -> f32 {
    sources.iter().map(|s| s.contribution(point)).sum()
}

/// Upper bound on `|compute_interference(_, sources)|`.
pub fn amplitude_bound(sources: &[WaveSource]) -> f32 {
    sources.iter().map(|s| s.amplitude.abs()).sum()
}

/// Vertical breathing displacement at time `t` for an element with `phase`.
///
/// Superposes all three wave terms; the magnitude is bounded by
/// `params.total_amplitude()`.
pub fn breathing_height(params: &WaveParameters, t: f32, phase: f32) -> f32 {
    params.primary_amplitude * (TAU * params.primary_frequency * t + phase).sin()
        + params.secondary_amplitude * (TAU * params.secondary_frequency * t + 2.0 * phase).cos()
        + params.tertiary_amplitude * (TAU * params.tertiary_frequency * t + 3.0 * phase).sin()
}

/// Place `count` points evenly on a circle of `radius` in the XZ plane,
/// lifting each by the primary and secondary breathing terms at time `t`.
///
/// Deterministic for fixed inputs. `count == 0` yields an empty vector.
pub fn generate_pattern(count: usize, radius: f32, params: &WaveParameters, t: f32) -> Vec<Vec3> {
    (0..count)
        .map(|i| {
            let angle = TAU * i as f32 / count as f32;
            let y = params.base_height
                + params.primary_amplitude * (TAU * params.primary_frequency * t + angle).sin()
                + params.secondary_amplitude
                    * (TAU * params.secondary_frequency * t + 2.0 * angle).cos();
            Vec3::new(radius * angle.cos(), y, radius * angle.sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn source(x: f32, f: f32, a: f32, p: f32) -> WaveSource {
        WaveSource::new(Vec3::new(x, 0.0, 0.0), f, a, p)
    }

    #[test]
    fn test_single_source_at_origin() {
        // distance 0 → sin(phase) * a
        let s = source(0.0, 1.0, 2.0, std::f32::consts::FRAC_PI_2);
        let v = compute_interference(Vec3::ZERO, &[s]);
        assert!((v - 2.0).abs() < 1e-6, "got {v}");
    }

    #[test]
    fn test_empty_sources_is_zero() {
        assert_eq!(compute_interference(Vec3::new(1.0, 2.0, 3.0), &[]), 0.0);
    }

    #[test]
    fn test_opposite_phases_cancel() {
        let a = source(1.0, 1.0, 1.0, 0.0);
        let b = source(1.0, 1.0, 1.0, std::f32::consts::PI);
        let v = compute_interference(Vec3::ZERO, &[a, b]);
        assert!(v.abs() < 1e-5, "expected cancellation, got {v}");
    }

    #[test]
    fn test_pattern_empty() {
        let p = generate_pattern(0, 1.0, &WaveParameters::default(), 0.0);
        assert!(p.is_empty());
    }

    #[test]
    fn test_pattern_on_circle() {
        let params = WaveParameters::default();
        for (i, p) in generate_pattern(12, 2.0, &params, 3.7).iter().enumerate() {
            let r = (p.x * p.x + p.z * p.z).sqrt();
            assert!((r - 2.0).abs() < 1e-5, "point {i} off circle: r = {r}");
            let lift = (p.y - params.base_height).abs();
            assert!(lift <= params.primary_amplitude + params.secondary_amplitude + 1e-6);
        }
    }

    #[test]
    fn test_pattern_deterministic_bitwise() {
        let params = WaveParameters::default();
        let a = generate_pattern(100, 1.5, &params, 12.25);
        let b = generate_pattern(100, 1.5, &params, 12.25);
        for (p, q) in a.iter().zip(&b) {
            assert_eq!(p.x.to_bits(), q.x.to_bits());
            assert_eq!(p.y.to_bits(), q.y.to_bits());
            assert_eq!(p.z.to_bits(), q.z.to_bits());
        }
    }

    #[test]
    fn test_breathing_height_bounded() {
        let params = WaveParameters::default();
        for i in 0..500 {
            let h = breathing_height(&params, i as f32 * 0.037, i as f32 * 0.5);
            assert!(h.abs() <= params.total_amplitude() + 1e-6);
        }
    }

    fn arb_source() -> impl Strategy<Value = WaveSource> {
        (
            -10.0f32..10.0,
            -10.0f32..10.0,
            -10.0f32..10.0,
            0.01f32..10.0,
            0.01f32..5.0,
            -10.0f32..10.0,
        )
            .prop_map(|(x, y, z, f, a, p)| WaveSource::new(Vec3::new(x, y, z), f, a, p))
    }

    proptest! {
        #[test]
        fn prop_interference_bounded(
            sources in prop::collection::vec(arb_source(), 0..64),
            px in -20.0f32..20.0, py in -20.0f32..20.0, pz in -20.0f32..20.0,
        ) {
            let v = compute_interference(Vec3::new(px, py, pz), &sources);
            let bound = amplitude_bound(&sources);
            prop_assert!(v.is_finite());
            prop_assert!(v.abs() <= bound + 1e-3 * (1.0 + bound), "{} > {}", v.abs(), bound);
        }

        #[test]
        fn prop_interference_deterministic(
            sources in prop::collection::vec(arb_source(), 0..32),
            px in -5.0f32..5.0,
        ) {
            let p = Vec3::new(px, 0.5, -px);
            let a = compute_interference(p, &sources);
            let b = compute_interference(p, &sources);
            prop_assert_eq!(a.to_bits(), b.to_bits());
        }

        #[test]
        fn prop_pattern_finite(count in prop::sample::select(vec![0usize, 1, 10, 100]), t in 0.0f32..10_000.0) {
            let params = WaveParameters::default();
            for p in generate_pattern(count, 1.5, &params, t) {
                prop_assert!(p.is_finite());
            }
        }
    }
}
