//! Headless tick loop with synthetic collaborators.
//!
//! A seeded stand-in for the confidence predictor posts updates and the
//! occasional press through the engine inbox, the way a speech pipeline
//! would from its own thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use wm_config::EngineConfig;
use wm_core::{
    BiasMailbox, BiasRegenerator, CentroidPullPredictor, Element, FRAME_RATE_HZ,
    InteractionEvent, InteractionKind, InboxSender, LifecycleManager, OptimizerMode,
    PerformanceReport, PoolConfig, SyncReport, TickReport, Viewer, VisualIntegrator,
    select_optimizer,
};

pub struct SimOptions {
    pub ticks: usize,
    pub elements: usize,
    pub mode: OptimizerMode,
    pub realtime: bool,
    pub bias: bool,
}

/// Counters summed over every tick that ran.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickTally {
    pub ticks: usize,
    pub messages_applied: usize,
    pub dropped_messages: usize,
    pub fallbacks: usize,
    pub bias_adopted: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimOutcome {
    #[serde(flatten)]
    pub tally: TickTally,
    pub performance: PerformanceReport,
    pub sync: SyncReport,
}

/// Ticks between synthetic confidence bursts (half a second at 72 Hz).
const BURST_EVERY: usize = 36;

/// Seeded stand-in for an external confidence predictor.
struct SyntheticTraffic {
    rng: SmallRng,
    sender: InboxSender,
    pressed: Option<u32>,
}

impl SyntheticTraffic {
    fn new(seed: u64, sender: InboxSender) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            sender,
            pressed: None,
        }
    }

    fn step(&mut self, tick: usize, elements: &[Element]) {
        if elements.is_empty() || tick % BURST_EVERY != 0 {
            return;
        }
        let updates = (elements.len() / 10).max(1);
        for _ in 0..updates {
            let e = &elements[self.rng.random_range(0..elements.len())];
            self.sender.confidence(e.id, self.rng.random_range(0.0..=1.0));
        }

        if let Some(id) = self.pressed.take() {
            self.sender.interaction(InteractionEvent {
                element_id: id,
                kind: InteractionKind::Released,
                point: Default::default(),
                intensity: 0.0,
            });
        } else if self.rng.random_bool(0.25) {
            let e = &elements[self.rng.random_range(0..elements.len())];
            self.sender.interaction(InteractionEvent {
                element_id: e.id,
                kind: InteractionKind::Pressed,
                point: e.rendered_position * 0.9,
                intensity: self.rng.random_range(0.2..1.0),
            });
            self.pressed = Some(e.id);
        }
    }
}

fn accumulate(tally: &mut TickTally, report: &TickReport) {
    if !report.ran {
        return;
    }
    tally.ticks += 1;
    tally.messages_applied += report.messages_applied;
    tally.dropped_messages += report.dropped_messages;
    tally.fallbacks += report.fallbacks;
    if report.bias_adopted.is_some() {
        tally.bias_adopted += 1;
    }
}

pub async fn run(config: &EngineConfig, options: &SimOptions) -> Result<SimOutcome> {
    let settings = config.settings();
    let pool_config = PoolConfig {
        capacity: config.engine.pool.capacity.max(options.elements),
        ..config.engine.pool
    };
    let mut pool = LifecycleManager::new(pool_config, settings.wave);
    pool.initialize(options.elements)
        .context("failed to initialize element pool")?;

    let optimizer = select_optimizer(options.mode, config.engine.workers);
    let mut integrator = VisualIntegrator::new(settings, optimizer);
    if options.bias {
        integrator = integrator.with_bias_regenerator(BiasRegenerator::new(
            Arc::new(CentroidPullPredictor { strength: 0.5 }),
            BiasMailbox::new(),
        ));
    }
    integrator.reset(&mut pool);
    integrator.start();

    let mut traffic = SyntheticTraffic::new(config.engine.seed, integrator.sender());
    let viewer = Viewer::default();
    let frame = 1.0 / FRAME_RATE_HZ;
    let mut tally = TickTally::default();

    if options.realtime {
        let mut interval = tokio::time::interval(Duration::from_secs_f32(frame));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut last = Instant::now();

        for tick in 0..options.ticks {
            tokio::select! {
                _ = &mut ctrl_c => {
                    tracing::info!("interrupted after {tick} ticks");
                    break;
                }
                _ = interval.tick() => {
                    let now = Instant::now();
                    let dt = if tick == 0 { frame } else { (now - last).as_secs_f32() };
                    last = now;
                    traffic.step(tick, pool.get_all());
                    let report = integrator.tick(&mut pool, viewer, dt);
                    accumulate(&mut tally, &report);
                }
            }
        }
    } else {
        for tick in 0..options.ticks {
            traffic.step(tick, pool.get_all());
            let report = integrator.tick(&mut pool, viewer, frame);
            accumulate(&mut tally, &report);
        }
    }

    integrator.stop();
    Ok(SimOutcome {
        tally,
        performance: integrator.performance_report(&pool),
        sync: integrator.validate_synchronization(&pool),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(ticks: usize, elements: usize, mode: OptimizerMode) -> SimOptions {
        SimOptions {
            ticks,
            elements,
            mode,
            realtime: false,
            bias: false,
        }
    }

    #[tokio::test]
    async fn test_fast_run_counts_ticks() {
        let outcome = run(&EngineConfig::default(), &options(100, 20, OptimizerMode::Baseline))
            .await
            .unwrap();
        assert_eq!(outcome.tally.ticks, 100);
        assert_eq!(outcome.tally.fallbacks, 0);
        assert!(outcome.tally.messages_applied > 0);
        let perf = outcome.performance;
        assert_eq!(perf.active_count, 20);
        assert_eq!(perf.ticks, 100);
    }

    #[tokio::test]
    async fn test_elements_beyond_capacity_grow_pool() {
        let outcome = run(&EngineConfig::default(), &options(5, 150, OptimizerMode::Baseline))
            .await
            .unwrap();
        assert_eq!(outcome.performance.active_count, 150);
    }

    #[tokio::test]
    async fn test_same_seed_same_result() {
        let a = run(&EngineConfig::default(), &options(80, 10, OptimizerMode::Baseline))
            .await
            .unwrap();
        let b = run(&EngineConfig::default(), &options(80, 10, OptimizerMode::Baseline))
            .await
            .unwrap();
        assert_eq!(a.tally.messages_applied, b.tally.messages_applied);
        assert_eq!(a.sync.max_deviation, b.sync.max_deviation);
    }

    #[tokio::test]
    async fn test_zero_elements() {
        let outcome = run(&EngineConfig::default(), &options(10, 0, OptimizerMode::Advanced))
            .await
            .unwrap();
        assert_eq!(outcome.tally.ticks, 10);
        assert!(outcome.sync.is_in_sync);
    }

    #[tokio::test]
    async fn test_realtime_paces_ticks() {
        let mut opts = options(6, 5, OptimizerMode::Baseline);
        opts.realtime = true;
        let started = Instant::now();
        let outcome = run(&EngineConfig::default(), &opts).await.unwrap();
        assert_eq!(outcome.tally.ticks, 6);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
