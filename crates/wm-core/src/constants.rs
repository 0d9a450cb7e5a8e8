/// Golden angle in radians: 2π / φ²
pub const GOLDEN_ANGLE: f32 = 2.399_963_3;

/// Numerical epsilon for near-zero comparisons
pub const EPSILON: f32 = 1e-6;

/// Headset refresh rate the per-frame budget is derived from.
pub const FRAME_RATE_HZ: f32 = 72.0;

/// Per-frame time budget in microseconds (1 / 72 Hz).
pub const FRAME_BUDGET_MICROS: u64 = 13_888;

/// Default number of active elements and pool capacity.
pub const DEFAULT_TARGET_COUNT: usize = 100;

/// Deviation (length units) beyond which an element is reported out of sync.
pub const SYNC_TOLERANCE: f32 = 0.1;

/// Comfortable range for the primary breathing frequency (Hz).
pub const PRIMARY_FREQUENCY_RANGE: (f32, f32) = (0.2, 0.5);

/// Largest integration step taken by the spring; longer frames are sub-stepped.
pub const MAX_SPRING_STEP: f32 = 1.0 / FRAME_RATE_HZ;

/// Baseline optimizer budget: microseconds per 50 elements per tick.
pub const BASELINE_MICROS_PER_50: u64 = 1_000;
