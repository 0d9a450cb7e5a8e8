//! Per-tick driver: inbox → reconcile → targets → spring → write-back.
//!
//! The host calls [`VisualIntegrator::tick`] once per rendered frame. Nothing
//! runs between ticks except the optional bias predictor thread, whose output
//! is picked up by the next tick. The integrator only moves while `Running`;
//! `start`, `stop` and `reset` are explicit.

use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::bias::{BiasField, BiasRegenerator};
use crate::constants::MAX_SPRING_STEP;
use crate::element::{Element, InteractionEvent, InteractionKind, Viewer};
use crate::inbox::{Inbox, InboxMessage, InboxSender};
use crate::lifecycle::{ElementState, LifecycleManager};
use crate::optimizer::{PositionOptimizer, TargetContext, rest_position};
use crate::report::{PerformanceReport, SyncReport};
use crate::settings::{Correction, EngineSettings, WaveMatrixSettings};
use crate::vec3::Vec3;
use crate::wave::breathing_height;

/// Longest frame the integrator will simulate in one tick.
const MAX_TICK_DT: f32 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorState {
    Stopped,
    Running,
}

/// What one tick did.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// False when the integrator was stopped and nothing happened.
    pub ran: bool,
    /// Engine time after the tick.
    pub time: f32,
    pub elapsed_micros: u64,
    pub over_budget: bool,
    pub messages_applied: usize,
    pub dropped_messages: usize,
    /// Elements held at their last valid state because of non-finite math.
    pub fallbacks: usize,
    /// Generation of a bias field adopted at the start of this tick.
    pub bias_adopted: Option<u64>,
    /// Elements seeded into the layout by reconciliation.
    pub spawned: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct TickStats {
    ticks: u64,
    total_micros: f64,
    peak_micros: f64,
    last_micros: f64,
    over_budget: u64,
}

impl TickStats {
    fn record(&mut self, elapsed: Duration) {
        let micros = elapsed.as_secs_f64() * 1e6;
        self.ticks += 1;
        self.total_micros += micros;
        self.peak_micros = self.peak_micros.max(micros);
        self.last_micros = micros;
    }

    fn average(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.total_micros / self.ticks as f64
        }
    }
}

/// One semi-implicit Euler spring step toward `target`, sub-stepped so no
/// single step exceeds one frame at the reference rate or the stability
/// limit of the configured spring.
///
/// force = (target − rendered)·k − velocity·c; v += force·dt; x += v·dt
pub fn spring_step(
    rendered: Vec3,
    velocity: Vec3,
    target: Vec3,
    settings: &WaveMatrixSettings,
    dt: f32,
) -> (Vec3, Vec3) {
    if dt <= 0.0 {
        return (rendered, velocity);
    }
    let k = settings.spring_constant();
    let c = settings.damping();
    let max_step = MAX_SPRING_STEP.min(settings.max_stable_step());
    let steps = (dt / max_step).ceil().max(1.0) as u32;
    let h = dt / steps as f32;

    let (mut x, mut v) = (rendered, velocity);
    for _ in 0..steps {
        let force = (target - x) * k - v * c;
        v += force * h;
        x += v * h;
    }
    (x, v)
}

/// Breathing scale from a secondary oscillator riding on the element's wave height.
pub fn breathing_scale(element: &Element, settings: &EngineSettings, time: f32) -> f32 {
    let wave = &settings.wave;
    let height = breathing_height(wave, time, element.phase);
    let normalized = (height / wave.total_amplitude().max(f32::EPSILON)).clamp(-1.0, 1.0);
    let secondary = (TAU * wave.secondary_frequency * time + element.phase).sin();
    let mut scale = 1.0 + settings.optimizer.scale_depth * (0.5 * normalized + 0.5 * secondary);
    if element.pressed {
        scale *= settings.optimizer.pressed_scale;
    }
    scale
}

pub struct VisualIntegrator {
    state: IntegratorState,
    optimizer: Box<dyn PositionOptimizer>,
    settings: EngineSettings,
    time: f32,
    viewer: Viewer,
    inbox: Inbox,
    bias: Option<BiasField>,
    regenerator: Option<BiasRegenerator>,
    last_bias_request: Option<f32>,
    stats: TickStats,
}

impl VisualIntegrator {
    /// Create a stopped integrator. `settings` are validated against the defaults.
    pub fn new(settings: EngineSettings, optimizer: Box<dyn PositionOptimizer>) -> Self {
        let (settings, _) = settings.validated(&EngineSettings::default());
        Self {
            state: IntegratorState::Stopped,
            optimizer,
            settings,
            time: 0.0,
            viewer: Viewer::default(),
            inbox: Inbox::new(),
            bias: None,
            regenerator: None,
            last_bias_request: None,
            stats: TickStats::default(),
        }
    }

    /// Attach a background bias predictor. Only strategies that use bias consult it.
    pub fn with_bias_regenerator(mut self, regenerator: BiasRegenerator) -> Self {
        self.regenerator = Some(regenerator);
        self
    }

    /// Handle collaborators use to post confidence and interaction updates.
    pub fn sender(&self) -> InboxSender {
        self.inbox.sender()
    }

    pub fn state(&self) -> IntegratorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == IntegratorState::Running
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn optimizer_name(&self) -> &'static str {
        self.optimizer.name()
    }

    /// The bias field currently blended into targets, if any.
    pub fn current_bias(&self) -> Option<&BiasField> {
        self.bias.as_ref()
    }

    pub fn start(&mut self) {
        if self.state == IntegratorState::Stopped {
            tracing::info!("integrator started ({} optimizer)", self.optimizer.name());
        }
        self.state = IntegratorState::Running;
    }

    pub fn stop(&mut self) {
        if self.state == IntegratorState::Running {
            tracing::info!("integrator stopped at t={:.3}", self.time);
        }
        self.state = IntegratorState::Stopped;
    }

    /// Swap the placement strategy. Call sites see the same contract either way.
    pub fn set_optimizer(&mut self, optimizer: Box<dyn PositionOptimizer>) {
        tracing::info!(
            "optimizer switched: {} -> {}",
            self.optimizer.name(),
            optimizer.name()
        );
        self.optimizer = optimizer;
    }

    /// Apply new settings, correcting invalid values against the current ones.
    pub fn update_settings(
        &mut self,
        settings: EngineSettings,
        pool: &mut LifecycleManager,
    ) -> Vec<Correction> {
        let (validated, corrections) = settings.validated(&self.settings);
        self.settings = validated;
        pool.set_wave_parameters(validated.wave);
        corrections
    }

    fn context(&self, capacity: usize) -> TargetContext<'_> {
        TargetContext {
            time: self.time,
            settings: &self.settings.matrix,
            wave: &self.settings.wave,
            optimizer: &self.settings.optimizer,
            viewer: self.viewer,
            layout_capacity: capacity,
        }
    }

    /// Snap every live element to its rest layout position and zero velocities.
    pub fn reset(&mut self, pool: &mut LifecycleManager) {
        let capacity = pool.capacity();
        let ctx = self.context(capacity);
        for element in pool.get_all_mut() {
            let rest = rest_position(element, &ctx);
            element.reseed(rest);
            element.last_update_time = ctx.time;
        }
        tracing::info!("integrator reset {} elements", pool.active_count());
    }

    fn seed_slots(&self, pool: &mut LifecycleManager, slots: &[u32]) {
        let capacity = pool.capacity();
        let ctx = self.context(capacity);
        let elements = pool.get_all_mut();
        for &slot in slots {
            if let Some(element) = elements.get_mut(slot as usize) {
                let rest = rest_position(element, &ctx);
                element.reseed(rest);
                element.last_update_time = ctx.time;
            }
        }
    }

    /// Apply queued collaborator writes. Returns (applied, dropped).
    fn apply_inbox(&mut self, pool: &mut LifecycleManager) -> (usize, usize) {
        let mut applied = 0;
        let mut dropped = 0;
        for message in self.inbox.drain() {
            let id = message.element_id();
            let ok = match message {
                InboxMessage::Confidence { element_id, value } => match pool.get_mut(element_id) {
                    Some(element) => element.set_confidence(value),
                    None => false,
                },
                InboxMessage::Interaction(event) => match pool.get_mut(event.element_id) {
                    Some(element) => apply_interaction(element, &event, &self.settings),
                    None => false,
                },
            };
            if ok {
                applied += 1;
            } else {
                tracing::debug!("dropped inbox message for element {id}");
                dropped += 1;
            }
        }
        (applied, dropped)
    }

    fn adopt_bias(&mut self) -> Option<u64> {
        if !self.optimizer.uses_bias() {
            return None;
        }
        let regenerator = self.regenerator.as_ref()?;
        let field = regenerator.mailbox().try_take()?;
        let generation = field.generation;
        tracing::debug!("adopted bias field {generation} ({} entries)", field.len());
        self.bias = Some(field);
        Some(generation)
    }

    fn request_bias(&mut self, elements: &[Element]) {
        if !self.optimizer.uses_bias() {
            return;
        }
        let Some(regenerator) = &self.regenerator else {
            return;
        };
        let due = match self.last_bias_request {
            Some(at) => self.time - at >= self.settings.optimizer.bias_refresh_interval,
            None => true,
        };
        if due && regenerator.request(self.time, elements) {
            self.last_bias_request = Some(self.time);
        }
    }

    /// Advance one frame of `dt` seconds with the viewer frame supplied by the host.
    pub fn tick(&mut self, pool: &mut LifecycleManager, viewer: Viewer, dt: f32) -> TickReport {
        if self.state != IntegratorState::Running {
            return TickReport {
                time: self.time,
                ..TickReport::default()
            };
        }
        let started = Instant::now();
        let dt = if dt.is_finite() && dt > 0.0 {
            dt.min(MAX_TICK_DT)
        } else {
            0.0
        };
        self.time += dt;
        if viewer.position.is_finite() {
            self.viewer = viewer;
        }

        let (messages_applied, dropped_messages) = self.apply_inbox(pool);

        let mut spawned = 0;
        if !pool.validate_count().valid {
            match pool.reconcile_count() {
                Ok(outcome) => {
                    spawned = outcome.spawned.len();
                    self.seed_slots(pool, &outcome.spawned);
                }
                Err(e) => tracing::warn!("element count reconciliation failed: {e}"),
            }
        }

        let bias_adopted = self.adopt_bias();

        let ctx = self.context(pool.capacity());
        let bias = self
            .bias
            .as_ref()
            .filter(|b| !b.is_stale(self.time, self.settings.optimizer.bias_max_age));
        let targets = self.optimizer.compute_targets(pool.get_all(), &ctx, bias);

        let mut fallbacks = targets.fallbacks;
        let states: Vec<ElementState> = pool
            .get_all()
            .iter()
            .zip(&targets.positions)
            .map(|(element, &target)| {
                let (state, held) = self.integrate(element, target, dt);
                if held {
                    fallbacks += 1;
                }
                state
            })
            .collect();
        pool.set_all(&states);

        self.request_bias(pool.get_all());

        let elapsed = started.elapsed();
        pool.record_update(elapsed, pool.active_count());
        self.stats.record(elapsed);
        let budget = self.settings.matrix.frame_budget_micros();
        let elapsed_micros = elapsed.as_micros() as u64;
        let over_budget = elapsed_micros > budget;
        if over_budget {
            self.stats.over_budget += 1;
            tracing::warn!(
                "tick at t={:.3} took {elapsed_micros}µs, budget {budget}µs",
                self.time
            );
        }

        TickReport {
            ran: true,
            time: self.time,
            elapsed_micros,
            over_budget,
            messages_applied,
            dropped_messages,
            fallbacks,
            bias_adopted,
            spawned,
        }
    }

    /// Spring one element toward `target`. The bool is true when the result
    /// was non-finite and the previous state was held instead.
    fn integrate(&self, element: &Element, target: Vec3, dt: f32) -> (ElementState, bool) {
        let (rendered, velocity) = spring_step(
            element.rendered_position,
            element.velocity,
            target,
            &self.settings.matrix,
            dt,
        );
        let scale = breathing_scale(element, &self.settings, self.time);

        if rendered.is_finite() && velocity.is_finite() && scale.is_finite() {
            return (
                ElementState {
                    position: target,
                    rendered_position: rendered,
                    velocity,
                    scale,
                    last_update_time: self.time,
                },
                false,
            );
        }

        let held = if element.rendered_position.is_finite() {
            element.rendered_position
        } else {
            target
        };
        (
            ElementState {
                position: target,
                rendered_position: held,
                velocity: Vec3::ZERO,
                scale: if element.scale.is_finite() {
                    element.scale
                } else {
                    1.0
                },
                last_update_time: self.time,
            },
            true,
        )
    }

    /// Diagnostic comparison of authoritative and rendered positions.
    pub fn validate_synchronization(&self, pool: &LifecycleManager) -> SyncReport {
        SyncReport::from_elements(pool.get_all(), self.settings.optimizer.sync_tolerance)
    }

    pub fn performance_report(&self, pool: &LifecycleManager) -> PerformanceReport {
        let metrics = pool.metrics();
        PerformanceReport {
            avg_update_time_micros: self.stats.average(),
            peak_update_time_micros: self.stats.peak_micros,
            last_update_time_micros: self.stats.last_micros,
            avg_element_update_micros: metrics.avg_update_micros,
            active_count: pool.active_count(),
            pool_efficiency: metrics.pool_efficiency(),
            ticks: self.stats.ticks,
            over_budget_ticks: self.stats.over_budget,
            frame_budget_micros: self.settings.matrix.frame_budget_micros(),
            optimizer: self.optimizer.name(),
        }
    }
}

/// Apply a press or release. Returns false for unusable events.
fn apply_interaction(
    element: &mut Element,
    event: &InteractionEvent,
    settings: &EngineSettings,
) -> bool {
    match event.kind {
        InteractionKind::Pressed => {
            if !event.intensity.is_finite() || !event.point.is_finite() {
                return false;
            }
            let away = (element.rendered_position - event.point)
                .try_normalize()
                .unwrap_or(Vec3::UP);
            element.velocity += away * (event.intensity.max(0.0) * settings.optimizer.impulse_gain);
            element.pressed = true;
        }
        InteractionKind::Released => element.pressed = false,
    }
    element.is_dirty = true;
    true
}
