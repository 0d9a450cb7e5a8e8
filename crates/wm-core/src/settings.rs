//! Tunable runtime configuration.
//!
//! Every struct here is plain data with `#[serde(default)]`, so a partial
//! config file fills the gaps from the documented defaults. Validation never
//! rejects: a non-positive or non-finite value reverts to the last-known-valid
//! value, an out-of-range value is clamped into range, and each change is
//! returned as a [`Correction`] and logged.

use serde::{Deserialize, Serialize};

use crate::constants::{FRAME_RATE_HZ, PRIMARY_FREQUENCY_RANGE, SYNC_TOLERANCE};

/// A single value the validator had to change.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Correction {
    pub field: &'static str,
    pub from: f32,
    pub to: f32,
}

/// Revert to `last_valid` when `value` is unusable, otherwise clamp into `range`.
fn sanitize(
    field: &'static str,
    value: f32,
    last_valid: f32,
    range: (f32, f32),
    corrections: &mut Vec<Correction>,
) -> f32 {
    let fixed = if !value.is_finite() || value <= 0.0 {
        if last_valid.is_finite() && last_valid > 0.0 {
            last_valid.clamp(range.0, range.1)
        } else {
            range.0
        }
    } else {
        value.clamp(range.0, range.1)
    };
    if fixed.to_bits() != value.to_bits() {
        tracing::warn!("{field}: corrected {value} -> {fixed}");
        corrections.push(Correction {
            field,
            from: value,
            to: fixed,
        });
    }
    fixed
}

/// Wave terms driving the breathing layout.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveParameters {
    /// Primary breathing frequency in Hz. Comfortable range 0.2–0.5.
    pub primary_frequency: f32,
    pub primary_amplitude: f32,
    pub secondary_frequency: f32,
    pub secondary_amplitude: f32,
    pub tertiary_frequency: f32,
    pub tertiary_amplitude: f32,
    /// Height of the layout plane above the viewer.
    pub base_height: f32,
}

impl Default for WaveParameters {
    fn default() -> Self {
        Self {
            primary_frequency: 0.3,
            primary_amplitude: 0.05,
            secondary_frequency: 0.7,
            secondary_amplitude: 0.02,
            tertiary_frequency: 1.3,
            tertiary_amplitude: 0.01,
            base_height: 0.1,
        }
    }
}

impl WaveParameters {
    pub const SECONDARY_FREQUENCY_RANGE: (f32, f32) = (0.1, 2.0);
    pub const TERTIARY_FREQUENCY_RANGE: (f32, f32) = (0.1, 4.0);
    pub const AMPLITUDE_RANGE: (f32, f32) = (1e-4, 0.5);
    pub const BASE_HEIGHT_RANGE: (f32, f32) = (1e-4, 3.0);

    /// Clamp every term into its documented range.
    pub fn validated(&self, last_valid: &Self) -> (Self, Vec<Correction>) {
        let mut c = Vec::new();
        let v = Self {
            primary_frequency: sanitize(
                "primary_frequency",
                self.primary_frequency,
                last_valid.primary_frequency,
                PRIMARY_FREQUENCY_RANGE,
                &mut c,
            ),
            primary_amplitude: sanitize(
                "primary_amplitude",
                self.primary_amplitude,
                last_valid.primary_amplitude,
                Self::AMPLITUDE_RANGE,
                &mut c,
            ),
            secondary_frequency: sanitize(
                "secondary_frequency",
                self.secondary_frequency,
                last_valid.secondary_frequency,
                Self::SECONDARY_FREQUENCY_RANGE,
                &mut c,
            ),
            secondary_amplitude: sanitize(
                "secondary_amplitude",
                self.secondary_amplitude,
                last_valid.secondary_amplitude,
                Self::AMPLITUDE_RANGE,
                &mut c,
            ),
            tertiary_frequency: sanitize(
                "tertiary_frequency",
                self.tertiary_frequency,
                last_valid.tertiary_frequency,
                Self::TERTIARY_FREQUENCY_RANGE,
                &mut c,
            ),
            tertiary_amplitude: sanitize(
                "tertiary_amplitude",
                self.tertiary_amplitude,
                last_valid.tertiary_amplitude,
                Self::AMPLITUDE_RANGE,
                &mut c,
            ),
            base_height: sanitize(
                "base_height",
                self.base_height,
                last_valid.base_height,
                Self::BASE_HEIGHT_RANGE,
                &mut c,
            ),
        };
        (v, c)
    }

    /// Sum of all term amplitudes: the largest possible breathing displacement.
    pub fn total_amplitude(&self) -> f32 {
        self.primary_amplitude + self.secondary_amplitude + self.tertiary_amplitude
    }

    pub fn is_positive(&self) -> bool {
        [
            self.primary_frequency,
            self.primary_amplitude,
            self.secondary_frequency,
            self.secondary_amplitude,
            self.tertiary_frequency,
            self.tertiary_amplitude,
            self.base_height,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0)
    }
}

/// Runtime layout and smoothing settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveMatrixSettings {
    /// Outer radius of the slot layout.
    pub radius: f32,
    /// Host tick rate; the per-tick budget is derived from it.
    pub update_frequency_hz: f32,
    /// Natural frequency of the smoothing spring (rad/s).
    pub smoothing_speed: f32,
    /// 1.0 = critically damped.
    pub damping_factor: f32,
}

impl Default for WaveMatrixSettings {
    fn default() -> Self {
        Self {
            radius: 1.5,
            update_frequency_hz: FRAME_RATE_HZ,
            smoothing_speed: 8.0,
            damping_factor: 1.0,
        }
    }
}

impl WaveMatrixSettings {
    pub const RADIUS_RANGE: (f32, f32) = (0.1, 10.0);
    pub const UPDATE_FREQUENCY_RANGE: (f32, f32) = (1.0, 240.0);
    pub const SMOOTHING_SPEED_RANGE: (f32, f32) = (0.5, 30.0);
    pub const DAMPING_FACTOR_RANGE: (f32, f32) = (0.1, 4.0);

    pub fn validated(&self, last_valid: &Self) -> (Self, Vec<Correction>) {
        let mut c = Vec::new();
        let v = Self {
            radius: sanitize(
                "radius",
                self.radius,
                last_valid.radius,
                Self::RADIUS_RANGE,
                &mut c,
            ),
            update_frequency_hz: sanitize(
                "update_frequency_hz",
                self.update_frequency_hz,
                last_valid.update_frequency_hz,
                Self::UPDATE_FREQUENCY_RANGE,
                &mut c,
            ),
            smoothing_speed: sanitize(
                "smoothing_speed",
                self.smoothing_speed,
                last_valid.smoothing_speed,
                Self::SMOOTHING_SPEED_RANGE,
                &mut c,
            ),
            damping_factor: sanitize(
                "damping_factor",
                self.damping_factor,
                last_valid.damping_factor,
                Self::DAMPING_FACTOR_RANGE,
                &mut c,
            ),
        };
        (v, c)
    }

    /// Spring constant k = ω².
    pub fn spring_constant(&self) -> f32 {
        self.smoothing_speed * self.smoothing_speed
    }

    /// Damping coefficient, 2ω·ζ (critical when ζ = 1).
    pub fn damping(&self) -> f32 {
        2.0 * self.smoothing_speed * self.damping_factor
    }

    /// Largest spring sub-step that stays stable under semi-implicit Euler.
    ///
    /// Stability needs c·h < 2 and k·h² + 2c·h < 4; h = 1/(c + ω) satisfies
    /// both for every ω and ζ.
    pub fn max_stable_step(&self) -> f32 {
        1.0 / (self.damping() + self.smoothing_speed).max(f32::EPSILON)
    }

    /// Corners of the accepted smoothing-speed and damping ranges, plus
    /// critical damping at each speed extreme.
    pub fn spring_extremes(&self) -> Vec<Self> {
        let (w_lo, w_hi) = Self::SMOOTHING_SPEED_RANGE;
        let (z_lo, z_hi) = Self::DAMPING_FACTOR_RANGE;
        [w_lo, w_hi]
            .into_iter()
            .flat_map(|w| [z_lo, 1.0, z_hi].map(move |z| (w, z)))
            .map(|(smoothing_speed, damping_factor)| Self {
                smoothing_speed,
                damping_factor,
                ..*self
            })
            .collect()
    }

    /// Per-tick time budget in microseconds.
    pub fn frame_budget_micros(&self) -> u64 {
        (1_000_000.0 / self.update_frequency_hz.max(1.0)) as u64
    }
}

/// Shape of the confidence → distance mapping.
///
/// Both curves send confidence 0 to `max_distance` and 1 to `min_distance`
/// and are strictly decreasing in between.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceCurve {
    #[default]
    Linear,
    InverseSquare,
}

impl ConfidenceCurve {
    /// Normalized distance weight in [0, 1]: 1 at confidence 0, 0 at confidence 1.
    pub fn weight(self, confidence: f32) -> f32 {
        let c = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        match self {
            ConfidenceCurve::Linear => 1.0 - c,
            // 1/(1+c)² spans [1/4, 1]; rescale onto [0, 1].
            ConfidenceCurve::InverseSquare => {
                let inv = 1.0 / ((1.0 + c) * (1.0 + c));
                ((inv - 0.25) / 0.75).clamp(0.0, 1.0)
            }
        }
    }
}

/// Target-placement and presentation tunables.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    /// Offset along viewer-forward at confidence 1.
    pub min_distance: f32,
    /// Offset along viewer-forward at confidence 0.
    pub max_distance: f32,
    pub confidence_curve: ConfidenceCurve,
    /// Weight of the averaged neighbour interference in the height term.
    pub interference_gain: f32,
    /// Upper bound on a single bias correction; kept ≤ primary amplitude.
    pub max_bias_magnitude: f32,
    /// Engine seconds between bias regeneration requests.
    pub bias_refresh_interval: f32,
    /// Bias fields older than this (engine seconds) contribute nothing.
    pub bias_max_age: f32,
    /// Deviation above which an element is reported out of sync.
    pub sync_tolerance: f32,
    /// Velocity added per unit of press intensity.
    pub impulse_gain: f32,
    /// Scale multiplier while an element is held pressed.
    pub pressed_scale: f32,
    /// Fractional depth of the breathing scale oscillation.
    pub scale_depth: f32,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            min_distance: 0.6,
            max_distance: 2.5,
            confidence_curve: ConfidenceCurve::Linear,
            interference_gain: 0.5,
            max_bias_magnitude: 0.05,
            bias_refresh_interval: 0.5,
            bias_max_age: 2.0,
            sync_tolerance: SYNC_TOLERANCE,
            impulse_gain: 0.5,
            pressed_scale: 0.9,
            scale_depth: 0.08,
        }
    }
}

impl OptimizerSettings {
    pub const DISTANCE_RANGE: (f32, f32) = (0.05, 50.0);

    /// Validate against the wave terms the bias clamp is measured against.
    pub fn validated(&self, last_valid: &Self, wave: &WaveParameters) -> (Self, Vec<Correction>) {
        let mut c = Vec::new();
        let min_distance = sanitize(
            "min_distance",
            self.min_distance,
            last_valid.min_distance,
            Self::DISTANCE_RANGE,
            &mut c,
        );
        let mut max_distance = sanitize(
            "max_distance",
            self.max_distance,
            last_valid.max_distance,
            Self::DISTANCE_RANGE,
            &mut c,
        );
        if max_distance <= min_distance {
            let fixed = min_distance + 0.1;
            tracing::warn!("max_distance: {max_distance} not above min_distance, using {fixed}");
            c.push(Correction {
                field: "max_distance",
                from: max_distance,
                to: fixed,
            });
            max_distance = fixed;
        }
        let v = Self {
            min_distance,
            max_distance,
            confidence_curve: self.confidence_curve,
            interference_gain: sanitize(
                "interference_gain",
                self.interference_gain,
                last_valid.interference_gain,
                (1e-4, 2.0),
                &mut c,
            ),
            max_bias_magnitude: sanitize(
                "max_bias_magnitude",
                self.max_bias_magnitude,
                last_valid.max_bias_magnitude,
                (1e-6, wave.primary_amplitude.max(1e-6)),
                &mut c,
            ),
            bias_refresh_interval: sanitize(
                "bias_refresh_interval",
                self.bias_refresh_interval,
                last_valid.bias_refresh_interval,
                (0.05, 60.0),
                &mut c,
            ),
            bias_max_age: sanitize(
                "bias_max_age",
                self.bias_max_age,
                last_valid.bias_max_age,
                (0.1, 600.0),
                &mut c,
            ),
            sync_tolerance: sanitize(
                "sync_tolerance",
                self.sync_tolerance,
                last_valid.sync_tolerance,
                (1e-4, 10.0),
                &mut c,
            ),
            impulse_gain: sanitize(
                "impulse_gain",
                self.impulse_gain,
                last_valid.impulse_gain,
                (1e-4, 10.0),
                &mut c,
            ),
            pressed_scale: sanitize(
                "pressed_scale",
                self.pressed_scale,
                last_valid.pressed_scale,
                (0.1, 2.0),
                &mut c,
            ),
            scale_depth: sanitize(
                "scale_depth",
                self.scale_depth,
                last_valid.scale_depth,
                (1e-4, 0.5),
                &mut c,
            ),
        };
        (v, c)
    }

    /// Offset along viewer-forward for a confidence score.
    pub fn radial_offset(&self, confidence: f32) -> f32 {
        let w = self.confidence_curve.weight(confidence);
        let offset = self.min_distance + (self.max_distance - self.min_distance) * w;
        offset.clamp(self.min_distance, self.max_distance)
    }
}

/// The three tunable groups the engine runs with, validated together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub wave: WaveParameters,
    pub matrix: WaveMatrixSettings,
    pub optimizer: OptimizerSettings,
}

impl EngineSettings {
    pub fn validated(&self, last_valid: &Self) -> (Self, Vec<Correction>) {
        let (wave, mut corrections) = self.wave.validated(&last_valid.wave);
        let (matrix, c) = self.matrix.validated(&last_valid.matrix);
        corrections.extend(c);
        let (optimizer, c) = self.optimizer.validated(&last_valid.optimizer, &wave);
        corrections.extend(c);
        (
            Self {
                wave,
                matrix,
                optimizer,
            },
            corrections,
        )
    }
}
