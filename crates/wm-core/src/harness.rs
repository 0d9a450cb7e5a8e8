//! Self-checks run before shipping a build.
//!
//! Each check is a named gate that passes or fails on its own. Timing gates
//! compare the baseline tick cost against a per-element budget so a
//! regression can reject the build; they can be skipped where timings are
//! meaningless (unoptimized builds, shared CI runners).

use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::constants::{BASELINE_MICROS_PER_50, MAX_SPRING_STEP};
use crate::element::Viewer;
use crate::integrator::{VisualIntegrator, spring_step};
use crate::lifecycle::{LifecycleManager, PoolConfig};
use crate::optimizer::{
    OptimizerMode, PositionOptimizer, SyncOptimizer, TargetContext, advanced_available,
    select_optimizer,
};
use crate::settings::EngineSettings;
use crate::vec3::Vec3;
use crate::wave::{WaveSource, amplitude_bound, compute_interference};

pub const HARNESS_VERSION: &str = "1.0";

/// Two minutes at the reference rate; the slowest accepted spring decays
/// well past 5% in that time.
const EXTREME_SWEEP_TICKS: usize = 8_640;

/// Element counts the sweep and timing gates run at.
pub const DEFAULT_SWEEP_COUNTS: [usize; 4] = [10, 25, 50, 100];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Gate {
    pub name: String,
    pub status: GateStatus,
    pub detail: String,
}

impl Gate {
    fn check(name: impl Into<String>, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: if ok { GateStatus::Pass } else { GateStatus::Fail },
            detail: detail.into(),
        }
    }

    fn skip(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: GateStatus::Skip,
            detail: detail.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status != GateStatus::Fail
    }
}

/// Mean tick cost at one element count.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CountTiming {
    pub count: usize,
    pub baseline_micros: f64,
    /// Present when the advanced optimizer is compiled in.
    pub advanced_micros: Option<f64>,
    pub budget_micros: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HarnessReport {
    pub version: &'static str,
    pub passed: bool,
    pub advanced_available: bool,
    pub gates: Vec<Gate>,
    pub timings: Vec<CountTiming>,
}

impl HarnessReport {
    pub fn failed_gates(&self) -> impl Iterator<Item = &Gate> {
        self.gates.iter().filter(|g| !g.passed())
    }
}

#[derive(Clone, Debug)]
pub struct HarnessConfig {
    pub counts: Vec<usize>,
    /// Ticks per timed run, after a short warmup.
    pub timing_ticks: usize,
    /// Ticks per element count in the no-NaN sweep.
    pub sweep_ticks: usize,
    pub skip_timing: bool,
    pub seed: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            counts: DEFAULT_SWEEP_COUNTS.to_vec(),
            timing_ticks: 200,
            sweep_ticks: 240,
            skip_timing: false,
            seed: 42,
        }
    }
}

/// Budget for the baseline path at `count` elements, scaled from the per-50 figure.
pub fn baseline_budget_micros(count: usize) -> u64 {
    (BASELINE_MICROS_PER_50 * count as u64).div_ceil(50).max(1)
}

pub struct ValidationHarness {
    settings: EngineSettings,
    config: HarnessConfig,
}

impl ValidationHarness {
    pub fn new(settings: EngineSettings, config: HarnessConfig) -> Self {
        Self { settings, config }
    }

    pub fn run(&self) -> HarnessReport {
        let mut gates = vec![
            self.parameter_positivity(),
            self.interference_bounded(),
            self.no_nan_sweep(),
            self.pool_invariant(),
            self.spring_convergence(),
            self.optimizer_equivalence(),
        ];

        let mut timings = Vec::new();
        for &count in &self.config.counts {
            let name = format!("timing_{count}");
            if self.config.skip_timing {
                gates.push(Gate::skip(name, "timing gates skipped"));
                continue;
            }
            let timing = self.time_count(count);
            gates.push(Gate::check(
                name,
                timing.baseline_micros <= timing.budget_micros as f64,
                format!(
                    "baseline {:.1}µs per tick, budget {}µs",
                    timing.baseline_micros, timing.budget_micros
                ),
            ));
            timings.push(timing);
        }

        let passed = gates.iter().all(Gate::passed);
        for gate in gates.iter().filter(|g| !g.passed()) {
            tracing::warn!("gate {} failed: {}", gate.name, gate.detail);
        }
        tracing::info!(
            "validation harness: {} ({} gates)",
            if passed { "PASS" } else { "FAIL" },
            gates.len()
        );

        HarnessReport {
            version: HARNESS_VERSION,
            passed,
            advanced_available: advanced_available(),
            gates,
            timings,
        }
    }

    fn parameter_positivity(&self) -> Gate {
        let s = &self.settings;
        let mut problems = Vec::new();
        if !s.wave.is_positive() {
            problems.push("wave parameters");
        }
        let m = &s.matrix;
        if !(m.radius > 0.0
            && m.update_frequency_hz > 0.0
            && m.smoothing_speed > 0.0
            && m.damping_factor > 0.0)
        {
            problems.push("matrix settings");
        }
        let o = &s.optimizer;
        if !(o.min_distance > 0.0 && o.max_distance > o.min_distance) {
            problems.push("distance range");
        }
        if !(o.max_bias_magnitude >= 0.0 && o.max_bias_magnitude <= s.wave.primary_amplitude) {
            problems.push("bias clamp");
        }
        let detail = if problems.is_empty() {
            "all tunables positive".to_string()
        } else {
            format!("invalid: {}", problems.join(", "))
        };
        Gate::check("parameter_positivity", problems.is_empty(), detail)
    }

    fn interference_bounded(&self) -> Gate {
        let mut rng = SmallRng::seed_from_u64(self.config.seed);
        let mut worst = 0.0f32;
        let mut ok = true;
        for _ in 0..200 {
            let n = rng.random_range(1..=32);
            let sources: Vec<WaveSource> = (0..n)
                .map(|_| {
                    WaveSource::new(
                        random_point(&mut rng, 3.0),
                        rng.random_range(0.1..10.0),
                        rng.random_range(0.001..0.5),
                        rng.random_range(0.0..std::f32::consts::TAU),
                    )
                })
                .collect();
            let bound = amplitude_bound(&sources);
            let point = random_point(&mut rng, 3.0);
            let value = compute_interference(point, &sources);
            if !value.is_finite() || value.abs() > bound + 1e-4 {
                ok = false;
            }
            if bound > 0.0 {
                worst = worst.max(value.abs() / bound);
            }
        }
        Gate::check(
            "interference_bounded",
            ok,
            format!("max |I| / Σa = {worst:.3}"),
        )
    }

    fn no_nan_sweep(&self) -> Gate {
        let mut rng = SmallRng::seed_from_u64(self.config.seed);
        let mut failures = Vec::new();
        for &count in &self.config.counts {
            let (mut integrator, mut pool) =
                match self.rig(count, select_optimizer(OptimizerMode::Advanced, Some(2))) {
                    Some(rig) => rig,
                    None => {
                        failures.push(format!("{count}: pool init failed"));
                        continue;
                    }
                };
            let sender = integrator.sender();
            let mut fallbacks = 0;
            for tick in 0..self.config.sweep_ticks {
                if tick % 12 == 0 {
                    for e in pool.get_all() {
                        sender.confidence(e.id, rng.random_range(0.0..=1.0));
                    }
                }
                fallbacks += integrator
                    .tick(&mut pool, Viewer::default(), MAX_SPRING_STEP)
                    .fallbacks;
            }
            let finite = pool
                .get_all()
                .iter()
                .all(|e| e.is_finite() && e.scale.is_finite());
            if !finite || fallbacks > 0 {
                failures.push(format!("{count}: finite={finite} fallbacks={fallbacks}"));
            }
        }
        let detail = if failures.is_empty() {
            format!("{} counts clean", self.config.counts.len())
        } else {
            failures.join("; ")
        };
        Gate::check("no_nan_sweep", failures.is_empty(), detail)
    }

    fn pool_invariant(&self) -> Gate {
        let mut pool = LifecycleManager::new(PoolConfig::default(), self.settings.wave);
        let mut sequence = vec![0, 1, 100, 37];
        sequence.extend(self.config.counts.iter().copied().filter(|&c| c <= 100));
        sequence.push(0);

        for target in sequence {
            pool.set_target_count(target);
            if let Err(e) = pool.reconcile_count() {
                return Gate::check("pool_invariant", false, format!("target {target}: {e}"));
            }
            let v = pool.validate_count();
            if !v.valid || pool.get_all().len() != target {
                return Gate::check(
                    "pool_invariant",
                    false,
                    format!("expected {} active, found {}", v.expected, v.actual),
                );
            }
        }
        Gate::check(
            "pool_invariant",
            true,
            format!("pool efficiency {:.2}", pool.metrics().pool_efficiency()),
        )
    }

    /// Active settings must settle within 600 ticks. Every corner of the
    /// accepted smoothing ranges must stay bounded and decay, however slowly.
    fn spring_convergence(&self) -> Gate {
        let target = Vec3::new(1.0, 0.5, 2.0);
        let start = target.length();
        let (mut x, mut v) = (Vec3::ZERO, Vec3::ZERO);
        let mut settled = None;
        for tick in 0..600 {
            (x, v) = spring_step(x, v, target, &self.settings.matrix, MAX_SPRING_STEP);
            if !x.is_finite() {
                return Gate::check("spring_convergence", false, format!("diverged at tick {tick}"));
            }
            if x.distance(target) < 1e-3 && v.length() < 1e-2 {
                settled = Some(tick + 1);
                break;
            }
        }
        let Some(ticks) = settled else {
            return Gate::check(
                "spring_convergence",
                false,
                format!("residual {:.4} after 600 ticks", x.distance(target)),
            );
        };

        for corner in self.settings.matrix.spring_extremes() {
            let (mut x, mut v) = (Vec3::ZERO, Vec3::ZERO);
            for _ in 0..EXTREME_SWEEP_TICKS {
                (x, v) = spring_step(x, v, target, &corner, MAX_SPRING_STEP);
                let d = x.distance(target);
                if !d.is_finite() || d > 1.5 * start {
                    return Gate::check(
                        "spring_convergence",
                        false,
                        format!(
                            "unstable at speed {} damping {}",
                            corner.smoothing_speed, corner.damping_factor
                        ),
                    );
                }
            }
            let residual = x.distance(target);
            if residual > 0.05 * start {
                return Gate::check(
                    "spring_convergence",
                    false,
                    format!(
                        "no decay at speed {} damping {}: residual {residual:.4}",
                        corner.smoothing_speed, corner.damping_factor
                    ),
                );
            }
        }
        Gate::check(
            "spring_convergence",
            true,
            format!("settled in {ticks} ticks, range extremes stable"),
        )
    }

    fn optimizer_equivalence(&self) -> Gate {
        if !advanced_available() {
            return Gate::skip("optimizer_equivalence", "advanced optimizer not compiled in");
        }
        let mut rng = SmallRng::seed_from_u64(self.config.seed);
        let advanced = select_optimizer(OptimizerMode::Advanced, Some(4));
        let Some((_, mut pool)) = self.rig(100, Box::new(SyncOptimizer)) else {
            return Gate::check("optimizer_equivalence", false, "pool init failed");
        };
        for e in pool.get_all_mut() {
            e.set_confidence(rng.random_range(0.0..=1.0));
        }

        let s = &self.settings;
        let ctx = TargetContext {
            time: 3.7,
            settings: &s.matrix,
            wave: &s.wave,
            optimizer: &s.optimizer,
            viewer: Viewer::default(),
            layout_capacity: pool.capacity(),
        };
        let base = SyncOptimizer.compute_targets(pool.get_all(), &ctx, None);
        let par = advanced.compute_targets(pool.get_all(), &ctx, None);
        let worst = base
            .positions
            .iter()
            .zip(&par.positions)
            .map(|(a, b)| a.distance(*b))
            .fold(0.0f32, f32::max);
        Gate::check(
            "optimizer_equivalence",
            base.positions.len() == par.positions.len() && worst <= 1e-4,
            format!("max divergence {worst:.2e}"),
        )
    }

    fn time_count(&self, count: usize) -> CountTiming {
        let baseline_micros = self.time_optimizer(count, Box::new(SyncOptimizer));
        let advanced_micros = advanced_available().then(|| {
            self.time_optimizer(count, select_optimizer(OptimizerMode::Advanced, None))
        });
        CountTiming {
            count,
            baseline_micros,
            advanced_micros,
            budget_micros: baseline_budget_micros(count),
        }
    }

    fn time_optimizer(&self, count: usize, optimizer: Box<dyn PositionOptimizer>) -> f64 {
        let Some((mut integrator, mut pool)) = self.rig(count, optimizer) else {
            return f64::INFINITY;
        };
        for _ in 0..10 {
            integrator.tick(&mut pool, Viewer::default(), MAX_SPRING_STEP);
        }
        let ticks = self.config.timing_ticks.max(1);
        let started = Instant::now();
        for _ in 0..ticks {
            integrator.tick(&mut pool, Viewer::default(), MAX_SPRING_STEP);
        }
        per_tick_micros(started.elapsed(), ticks)
    }

    /// A running integrator over a freshly seeded pool of `count` elements.
    fn rig(
        &self,
        count: usize,
        optimizer: Box<dyn PositionOptimizer>,
    ) -> Option<(VisualIntegrator, LifecycleManager)> {
        let config = PoolConfig {
            capacity: count.max(PoolConfig::default().capacity),
            ..PoolConfig::default()
        };
        let mut pool = LifecycleManager::new(config, self.settings.wave);
        pool.initialize(count).ok()?;
        let mut integrator = VisualIntegrator::new(self.settings, optimizer);
        integrator.reset(&mut pool);
        integrator.start();
        Some((integrator, pool))
    }
}

fn random_point(rng: &mut SmallRng, extent: f32) -> Vec3 {
    Vec3::new(
        rng.random_range(-extent..extent),
        rng.random_range(-extent..extent),
        rng.random_range(-extent..extent),
    )
}

fn per_tick_micros(elapsed: Duration, ticks: usize) -> f64 {
    elapsed.as_secs_f64() * 1e6 / ticks as f64
}
