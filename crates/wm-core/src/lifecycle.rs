//! Pooled element collection.
//!
//! Slots `[..active]` are live, slots `[active..]` are parked in the pool and
//! reused before anything new is allocated. A slot's index never changes,
//! so its base layout position is stable while other slots come and go.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_TARGET_COUNT;
use crate::element::{Element, ElementId};
use crate::error::{EngineError, Result};
use crate::settings::WaveParameters;
use crate::vec3::Vec3;

/// How the pool is sized and whether it recycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Slots the layout is spread over and the pool holds. Growth past it
    /// never changes this value.
    pub capacity: usize,
    /// Recycle deactivated elements instead of dropping them.
    pub pooling: bool,
    /// Let a pooled collection grow past `capacity` instead of failing.
    pub allow_growth: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TARGET_COUNT,
            pooling: true,
            allow_growth: false,
        }
    }
}

/// Result of comparing the live count against the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CountValidation {
    pub valid: bool,
    pub expected: usize,
    pub actual: usize,
}

/// What a reconciliation pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Slots that became live this pass and need seeding.
    pub spawned: Vec<u32>,
    pub reactivated: usize,
    pub instantiated: usize,
    pub deactivated: usize,
    pub destroyed: usize,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.spawned.is_empty() && self.deactivated == 0 && self.destroyed == 0
    }
}

/// Authoritative state written back by the integrator for one slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElementState {
    pub position: Vec3,
    pub rendered_position: Vec3,
    pub velocity: Vec3,
    pub scale: f32,
    pub last_update_time: f32,
}

/// Cost and churn counters, for regression tracking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LifecycleMetrics {
    pub avg_update_micros: f64,
    pub peak_update_micros: f64,
    pub update_samples: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub instantiations: u64,
    pub destructions: u64,
}

impl LifecycleMetrics {
    /// Share of activations served from the pool. 1.0 before any activation.
    pub fn pool_efficiency(&self) -> f64 {
        let total = self.pool_hits + self.pool_misses;
        if total == 0 {
            1.0
        } else {
            self.pool_hits as f64 / total as f64
        }
    }
}

pub struct LifecycleManager {
    slots: Vec<Element>,
    active: usize,
    target: usize,
    config: PoolConfig,
    wave: WaveParameters,
    next_id: ElementId,
    metrics: LifecycleMetrics,
    id_index: HashMap<ElementId, usize>,
    index_dirty: bool,
}

impl LifecycleManager {
    pub fn new(config: PoolConfig, wave: WaveParameters) -> Self {
        Self {
            slots: Vec::with_capacity(config.capacity),
            active: 0,
            target: 0,
            config,
            wave,
            next_id: 0,
            metrics: LifecycleMetrics::default(),
            id_index: HashMap::new(),
            index_dirty: true,
        }
    }

    /// Set the target and bring the live count up to it.
    pub fn initialize(&mut self, target_count: usize) -> Result<()> {
        if self.config.capacity == 0 {
            return Err(EngineError::MissingConfiguration("pool capacity"));
        }
        self.set_target_count(target_count);
        self.reconcile_count()?;
        tracing::info!(
            "element pool initialized: {} active, capacity {}, pooling {}",
            self.active,
            self.config.capacity,
            self.config.pooling
        );
        Ok(())
    }

    /// Change the target. Takes effect on the next `reconcile_count`.
    pub fn set_target_count(&mut self, target_count: usize) {
        self.target = target_count;
    }

    pub fn target_count(&self) -> usize {
        self.target
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Slots currently parked for reuse.
    pub fn pooled_count(&self) -> usize {
        self.slots.len() - self.active
    }

    /// Configured layout capacity. Fixed for the life of the pool.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Slots allocated, live and pooled. Exceeds `capacity()` after growth.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Breathing terms for every slot, live ones included.
    pub fn set_wave_parameters(&mut self, wave: WaveParameters) {
        self.wave = wave;
        for element in &mut self.slots {
            element.apply_wave_parameters(&wave);
        }
    }

    /// Activate or retire elements until `active == target`.
    ///
    /// Fails only when a pooled collection would have to grow past its
    /// capacity with growth disabled; the elements that fit are still activated.
    pub fn reconcile_count(&mut self) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        while self.active < self.target {
            if self.config.pooling
                && self.active >= self.config.capacity
                && !self.config.allow_growth
            {
                self.index_dirty = true;
                tracing::warn!(
                    "reconcile stopped at {} of {} elements: pool exhausted",
                    self.active,
                    self.target
                );
                return Err(EngineError::CapacityExceeded {
                    requested: self.target,
                    capacity: self.config.capacity,
                });
            }
            self.activate_next(&mut outcome);
        }

        while self.active > self.target {
            if self.config.pooling {
                self.active -= 1;
                self.slots[self.active].is_dirty = false;
                outcome.deactivated += 1;
            } else {
                self.slots.pop();
                self.active -= 1;
                self.metrics.destructions += 1;
                outcome.destroyed += 1;
            }
        }

        if !outcome.is_noop() {
            self.index_dirty = true;
            tracing::debug!(
                "reconciled to {}: +{} reactivated, +{} new, -{} pooled, -{} destroyed",
                self.active,
                outcome.reactivated,
                outcome.instantiated,
                outcome.deactivated,
                outcome.destroyed
            );
        }
        Ok(outcome)
    }

    fn activate_next(&mut self, outcome: &mut ReconcileOutcome) {
        let slot = self.active;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        if self.config.pooling && slot < self.slots.len() {
            let recycled = Element::new(id, slot as u32, self.slots[slot].position, &self.wave);
            self.slots[slot] = recycled;
            self.metrics.pool_hits += 1;
            outcome.reactivated += 1;
        } else {
            self.slots
                .push(Element::new(id, slot as u32, Vec3::ZERO, &self.wave));
            self.metrics.pool_misses += 1;
            self.metrics.instantiations += 1;
            outcome.instantiated += 1;
            if self.config.pooling && self.slots.len() == self.config.capacity + 1 {
                tracing::warn!(
                    "pool growing past capacity {}; extra slots sit on the layout rim",
                    self.config.capacity
                );
            }
        }
        self.active += 1;
        outcome.spawned.push(slot as u32);
    }

    pub fn validate_count(&self) -> CountValidation {
        CountValidation {
            valid: self.active == self.target,
            expected: self.target,
            actual: self.active,
        }
    }

    /// Live elements, ordered by slot.
    pub fn get_all(&self) -> &[Element] {
        &self.slots[..self.active]
    }

    pub fn get_all_mut(&mut self) -> &mut [Element] {
        &mut self.slots[..self.active]
    }

    /// Write integrator output back, slot-aligned with `get_all()`.
    /// Returns how many elements were updated.
    pub fn set_all(&mut self, states: &[ElementState]) -> usize {
        let n = states.len().min(self.active);
        for (element, state) in self.slots[..n].iter_mut().zip(states) {
            element.position = state.position;
            element.rendered_position = state.rendered_position;
            element.velocity = state.velocity;
            element.scale = state.scale;
            element.last_update_time = state.last_update_time;
            element.is_dirty = false;
        }
        n
    }

    fn ensure_index(&mut self) {
        if !self.index_dirty {
            return;
        }
        self.id_index.clear();
        for (slot, element) in self.slots[..self.active].iter().enumerate() {
            self.id_index.insert(element.id, slot);
        }
        self.index_dirty = false;
    }

    pub fn get(&mut self, id: ElementId) -> Option<&Element> {
        self.ensure_index();
        let slot = *self.id_index.get(&id)?;
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.ensure_index();
        let slot = *self.id_index.get(&id)?;
        self.slots.get_mut(slot)
    }

    /// Set one element's confidence, clamped to [0, 1].
    pub fn set_confidence(&mut self, id: ElementId, value: f32) -> Result<()> {
        let element = self.get_mut(id).ok_or(EngineError::ElementNotFound(id))?;
        element.set_confidence(value);
        Ok(())
    }

    /// Record the cost of one update pass over `element_count` elements.
    pub fn record_update(&mut self, elapsed: Duration, element_count: usize) {
        if element_count == 0 {
            return;
        }
        let per_element = elapsed.as_secs_f64() * 1e6 / element_count as f64;
        let m = &mut self.metrics;
        m.update_samples += 1;
        m.avg_update_micros += (per_element - m.avg_update_micros) / m.update_samples as f64;
        m.peak_update_micros = m.peak_update_micros.max(per_element);
    }

    pub fn metrics(&self) -> &LifecycleMetrics {
        &self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics = LifecycleMetrics::default();
    }
}
