//! Target placement: base layout + wave interference + confidence distance + bias.
//!
//! Two strategies share the [`PositionOptimizer`] contract. The baseline walks
//! elements in order on the calling thread. The advanced strategy fans the same
//! per-element function out over a bounded rayon pool and adds the bias field.
//! Each element reads only the previous tick's snapshot and writes only its own
//! output slot, so both produce the same numbers for the same inputs.

use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::bias::BiasField;
use crate::constants::GOLDEN_ANGLE;
use crate::element::{Element, Viewer};
use crate::settings::{OptimizerSettings, WaveMatrixSettings, WaveParameters};
use crate::vec3::Vec3;
use crate::wave::{WaveSource, breathing_height};

/// Everything a strategy needs besides the elements themselves.
#[derive(Clone, Copy, Debug)]
pub struct TargetContext<'a> {
    /// Engine time in seconds.
    pub time: f32,
    pub settings: &'a WaveMatrixSettings,
    pub wave: &'a WaveParameters,
    pub optimizer: &'a OptimizerSettings,
    pub viewer: Viewer,
    /// Fixed slot capacity the layout is spread over.
    pub layout_capacity: usize,
}

/// Output of one placement pass, aligned with the input elements.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetSet {
    pub positions: Vec<Vec3>,
    /// Elements whose computed target was non-finite and fell back.
    pub fallbacks: usize,
}

/// Shared contract for the baseline and advanced placement strategies.
pub trait PositionOptimizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy blends a bias field when one is supplied.
    fn uses_bias(&self) -> bool;

    fn compute_targets(
        &self,
        elements: &[Element],
        ctx: &TargetContext<'_>,
        bias: Option<&BiasField>,
    ) -> TargetSet;
}

/// Which strategy to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMode {
    #[default]
    Baseline,
    Advanced,
}

/// True when the advanced strategy was compiled in.
pub fn advanced_available() -> bool {
    cfg!(feature = "parallel")
}

/// Build the strategy for `mode`, degrading to the baseline when the
/// advanced strategy is not compiled in.
pub fn select_optimizer(mode: OptimizerMode, workers: Option<usize>) -> Box<dyn PositionOptimizer> {
    match mode {
        OptimizerMode::Baseline => Box::new(SyncOptimizer),
        OptimizerMode::Advanced => advanced_optimizer(workers),
    }
}

#[cfg(feature = "parallel")]
fn advanced_optimizer(workers: Option<usize>) -> Box<dyn PositionOptimizer> {
    Box::new(ParallelOptimizer::new(workers))
}

#[cfg(not(feature = "parallel"))]
fn advanced_optimizer(_workers: Option<usize>) -> Box<dyn PositionOptimizer> {
    tracing::warn!("advanced optimizer not compiled in (feature `parallel`), using baseline");
    Box::new(SyncOptimizer)
}

/// Layout-space base point of `slot`: golden-angle spiral over the fixed capacity.
///
/// Depends only on the slot and capacity, so adding or removing other
/// elements never moves it.
pub fn slot_layout(slot: u32, capacity: usize, radius: f32) -> (f32, f32) {
    let capacity = capacity.max(slot as usize + 1) as f32;
    let r = radius * ((slot as f32 + 0.5) / capacity).sqrt();
    let theta = (slot as f32 * GOLDEN_ANGLE).rem_euclid(TAU);
    (r * theta.cos(), r * theta.sin())
}

/// World position of an element before any wave term: layout point lifted to
/// the base height and pushed out along viewer-forward by its confidence offset.
pub fn rest_position(element: &Element, ctx: &TargetContext<'_>) -> Vec3 {
    let (x, y) = slot_layout(element.index, ctx.layout_capacity, ctx.settings.radius);
    let offset = ctx.optimizer.radial_offset(element.confidence);
    ctx.viewer
        .to_world(Vec3::new(x, y + ctx.wave.base_height, offset))
}

/// Offset of `point` along the viewer-forward axis.
pub fn forward_offset(point: Vec3, viewer: &Viewer) -> f32 {
    let (_, _, forward) = viewer.basis();
    (point - viewer.position).dot(forward)
}

/// Wave sources for every element with a usable state, tagged with their owner.
pub fn collect_sources(elements: &[Element], time: f32) -> Vec<(usize, WaveSource)> {
    elements
        .iter()
        .enumerate()
        .map(|(i, e)| (i, e.wave_source(time)))
        .filter(|(_, s)| s.is_valid())
        .collect()
}

/// Average interference at `point` from every source not owned by `skip`.
fn neighbour_interference(point: Vec3, sources: &[(usize, WaveSource)], skip: usize) -> f32 {
    let mut sum = 0.0f32;
    let mut n = 0usize;
    for (owner, s) in sources {
        if *owner == skip {
            continue;
        }
        sum += s.contribution(point);
        n += 1;
    }
    if n == 0 { 0.0 } else { sum / n as f32 }
}

/// Target for element `i`. The bool is true when the computed value was
/// unusable and the element's last valid position was substituted.
fn target_for(
    i: usize,
    elements: &[Element],
    sources: &[(usize, WaveSource)],
    ctx: &TargetContext<'_>,
    bias: Option<&BiasField>,
) -> (Vec3, bool) {
    let element = &elements[i];
    let (x, y) = slot_layout(element.index, ctx.layout_capacity, ctx.settings.radius);
    let offset = ctx.optimizer.radial_offset(element.confidence);
    let base = ctx
        .viewer
        .to_world(Vec3::new(x, y + ctx.wave.base_height, offset));

    let interference = neighbour_interference(base, sources, i);
    let lift = breathing_height(ctx.wave, ctx.time, element.phase)
        + ctx.optimizer.interference_gain * interference;

    let mut target = ctx
        .viewer
        .to_world(Vec3::new(x, y + ctx.wave.base_height + lift, offset));

    if let Some(field) = bias {
        target += field.correction(element.index, ctx.optimizer.max_bias_magnitude);
    }

    if target.is_finite() {
        return (target, false);
    }
    let held = if element.position.is_finite() {
        element.position
    } else {
        rest_position(element, ctx)
    };
    (held, true)
}

fn gather(results: Vec<(Vec3, bool)>) -> TargetSet {
    let fallbacks = results.iter().filter(|(_, fell_back)| *fell_back).count();
    if fallbacks > 0 {
        tracing::debug!("{fallbacks} element target(s) held at last valid position");
    }
    TargetSet {
        positions: results.into_iter().map(|(p, _)| p).collect(),
        fallbacks,
    }
}

/// Synchronous baseline. Always available; ignores bias fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyncOptimizer;

impl PositionOptimizer for SyncOptimizer {
    fn name(&self) -> &'static str {
        "baseline"
    }

    fn uses_bias(&self) -> bool {
        false
    }

    fn compute_targets(
        &self,
        elements: &[Element],
        ctx: &TargetContext<'_>,
        _bias: Option<&BiasField>,
    ) -> TargetSet {
        let sources = collect_sources(elements, ctx.time);
        let results = (0..elements.len())
            .map(|i| target_for(i, elements, &sources, ctx, None))
            .collect();
        gather(results)
    }
}

/// Advanced strategy: parallel-for over a bounded pool, with bias blending.
#[cfg(feature = "parallel")]
pub struct ParallelOptimizer {
    pool: Option<rayon::ThreadPool>,
}

#[cfg(feature = "parallel")]
impl ParallelOptimizer {
    /// `workers` bounds the pool; `None` sizes it to the machine.
    pub fn new(workers: Option<usize>) -> Self {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("wm-opt-{i}"));
        if let Some(n) = workers {
            builder = builder.num_threads(n.max(1));
        }
        let pool = match builder.build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!("failed to build optimizer pool, using global rayon pool: {e}");
                None
            }
        };
        Self { pool }
    }

    pub fn worker_count(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

#[cfg(feature = "parallel")]
impl PositionOptimizer for ParallelOptimizer {
    fn name(&self) -> &'static str {
        "advanced"
    }

    fn uses_bias(&self) -> bool {
        true
    }

    fn compute_targets(
        &self,
        elements: &[Element],
        ctx: &TargetContext<'_>,
        bias: Option<&BiasField>,
    ) -> TargetSet {
        use rayon::prelude::*;

        let sources = collect_sources(elements, ctx.time);
        let run = || -> Vec<(Vec3, bool)> {
            (0..elements.len())
                .into_par_iter()
                .map(|i| target_for(i, elements, &sources, ctx, bias))
                .collect()
        };
        let results = match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        };
        gather(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ConfidenceCurve;

    struct Fixture {
        settings: WaveMatrixSettings,
        wave: WaveParameters,
        optimizer: OptimizerSettings,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                settings: WaveMatrixSettings::default(),
                wave: WaveParameters::default(),
                optimizer: OptimizerSettings::default(),
            }
        }

        fn ctx(&self, time: f32) -> TargetContext<'_> {
            TargetContext {
                time,
                settings: &self.settings,
                wave: &self.wave,
                optimizer: &self.optimizer,
                viewer: Viewer::default(),
                layout_capacity: 100,
            }
        }

        fn elements(&self, n: u32) -> Vec<Element> {
            let ctx = self.ctx(0.0);
            (0..n)
                .map(|i| {
                    let mut e = Element::new(i, i, Vec3::ZERO, &self.wave);
                    let rest = rest_position(&e, &ctx);
                    e.reseed(rest);
                    e
                })
                .collect()
        }
    }

    #[test]
    fn test_slot_layout_stable_and_inside_radius() {
        for slot in 0..100 {
            let (x, y) = slot_layout(slot, 100, 1.5);
            assert!((x * x + y * y).sqrt() <= 1.5 + 1e-5);
            assert_eq!(slot_layout(slot, 100, 1.5), (x, y));
        }
    }

    #[test]
    fn test_targets_aligned_and_finite() {
        let f = Fixture::new();
        let els = f.elements(25);
        let out = SyncOptimizer.compute_targets(&els, &f.ctx(3.0), None);
        assert_eq!(out.positions.len(), 25);
        assert_eq!(out.fallbacks, 0);
        assert!(out.positions.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_empty_input() {
        let f = Fixture::new();
        let out = SyncOptimizer.compute_targets(&[], &f.ctx(0.0), None);
        assert!(out.positions.is_empty());
    }

    #[test]
    fn test_zero_confidence_sits_at_max_distance() {
        let f = Fixture::new();
        let els = f.elements(100);
        let ctx = f.ctx(1.0);
        let out = SyncOptimizer.compute_targets(&els, &ctx, None);
        for p in &out.positions {
            let off = forward_offset(*p, &ctx.viewer);
            assert!((off - f.optimizer.max_distance).abs() < 1e-4, "offset {off}");
        }
    }

    #[test]
    fn test_confidence_flip_moves_only_that_element() {
        let f = Fixture::new();
        let mut els = f.elements(100);
        let ctx = f.ctx(2.5);
        let before = SyncOptimizer.compute_targets(&els, &ctx, None);

        els[42].confidence = 1.0;
        let after = SyncOptimizer.compute_targets(&els, &ctx, None);

        for i in 0..100 {
            let b = forward_offset(before.positions[i], &ctx.viewer);
            let a = forward_offset(after.positions[i], &ctx.viewer);
            if i == 42 {
                assert!((a - f.optimizer.min_distance).abs() < 1e-4, "flipped offset {a}");
            } else {
                assert!((a - b).abs() < 1e-4, "element {i} moved: {b} -> {a}");
            }
        }
    }

    #[test]
    fn test_higher_confidence_is_closer() {
        for curve in [ConfidenceCurve::Linear, ConfidenceCurve::InverseSquare] {
            let mut f = Fixture::new();
            f.optimizer.confidence_curve = curve;
            let mut els = f.elements(2);
            els[0].confidence = 0.8;
            els[1].confidence = 0.3;
            let ctx = f.ctx(0.0);
            let out = SyncOptimizer.compute_targets(&els, &ctx, None);
            let near = forward_offset(out.positions[0], &ctx.viewer);
            let far = forward_offset(out.positions[1], &ctx.viewer);
            assert!(near < far, "{curve:?}: {near} !< {far}");
        }
    }

    #[test]
    fn test_nan_position_falls_back() {
        let f = Fixture::new();
        let mut els = f.elements(5);
        els[2].position = Vec3::new(f32::NAN, 0.0, 0.0);
        els[3].confidence = f32::NAN;
        let out = SyncOptimizer.compute_targets(&els, &f.ctx(1.0), None);
        assert!(out.positions.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_poisoned_breathing_holds_last_valid() {
        let f = Fixture::new();
        let mut els = f.elements(3);
        els[1].phase = f32::INFINITY;
        let last = els[1].position;
        let out = SyncOptimizer.compute_targets(&els, &f.ctx(1.0), None);
        assert_eq!(out.fallbacks, 1);
        assert_eq!(out.positions[1], last);
    }

    #[test]
    fn test_baseline_ignores_bias() {
        let f = Fixture::new();
        let els = f.elements(4);
        let ctx = f.ctx(0.5);
        let field = BiasField::new(1, 0.5, vec![Vec3::new(0.0, 1.0, 0.0); 4]);
        let with = SyncOptimizer.compute_targets(&els, &ctx, Some(&field));
        let without = SyncOptimizer.compute_targets(&els, &ctx, None);
        assert_eq!(with, without);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_matches_baseline() {
        let f = Fixture::new();
        let mut els = f.elements(100);
        for (i, e) in els.iter_mut().enumerate() {
            e.confidence = (i as f32 * 0.37).fract();
        }
        let ctx = f.ctx(7.25);
        let base = SyncOptimizer.compute_targets(&els, &ctx, None);
        let par = ParallelOptimizer::new(Some(4)).compute_targets(&els, &ctx, None);
        for (a, b) in base.positions.iter().zip(&par.positions) {
            assert!((a.x - b.x).abs() < 1e-4);
            assert!((a.y - b.y).abs() < 1e-4);
            assert!((a.z - b.z).abs() < 1e-4);
        }
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_bias_bounded() {
        let f = Fixture::new();
        let els = f.elements(10);
        let ctx = f.ctx(0.0);
        let field = BiasField::new(1, 0.0, vec![Vec3::new(0.0, 0.0, 5.0); 10]);
        let plain = ParallelOptimizer::new(Some(2)).compute_targets(&els, &ctx, None);
        let biased = ParallelOptimizer::new(Some(2)).compute_targets(&els, &ctx, Some(&field));
        for (a, b) in plain.positions.iter().zip(&biased.positions) {
            let d = a.distance(*b);
            assert!(d <= f.optimizer.max_bias_magnitude + 1e-5, "bias moved target by {d}");
            assert!(d > 0.0);
        }
    }

    #[test]
    fn test_select_optimizer_names() {
        assert_eq!(select_optimizer(OptimizerMode::Baseline, None).name(), "baseline");
        let adv = select_optimizer(OptimizerMode::Advanced, Some(2));
        if advanced_available() {
            assert_eq!(adv.name(), "advanced");
        } else {
            assert_eq!(adv.name(), "baseline");
        }
    }
}
