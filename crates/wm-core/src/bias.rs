//! Optional bias field: externally predicted corrections blended into targets.
//!
//! The field is regenerated off the tick thread. A tick never waits for it:
//! whatever the mailbox holds at the start of a tick is adopted, and a
//! missing, stale, or short field contributes zero for the affected slots.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::vec3::Vec3;

/// Hard cap on the number of per-slot entries a field may carry.
pub const MAX_BIAS_ENTRIES: usize = 1024;

/// Per-slot correction vectors produced by a predictor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasField {
    /// Monotonic counter assigned by the regenerator.
    pub generation: u64,
    /// Engine time of the snapshot the field was predicted from.
    pub created_at: f32,
    /// Indexed by element slot.
    vectors: Vec<Vec3>,
}

impl BiasField {
    /// Build a field, truncating to [`MAX_BIAS_ENTRIES`].
    pub fn new(generation: u64, created_at: f32, mut vectors: Vec<Vec3>) -> Self {
        vectors.truncate(MAX_BIAS_ENTRIES);
        Self {
            generation,
            created_at,
            vectors,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Correction for `slot`, clamped to `max_magnitude`. Zero when absent or non-finite.
    pub fn correction(&self, slot: u32, max_magnitude: f32) -> Vec3 {
        match self.vectors.get(slot as usize) {
            Some(v) if v.is_finite() => v.clamp_length(max_magnitude),
            _ => Vec3::ZERO,
        }
    }

    /// Older than `max_age` engine seconds, or created in the future.
    pub fn is_stale(&self, now: f32, max_age: f32) -> bool {
        let age = now - self.created_at;
        !age.is_finite() || age < 0.0 || age > max_age
    }
}

/// Read-only view of one element handed to a predictor.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ElementSnapshot {
    pub index: u32,
    pub confidence: f32,
    pub position: Vec3,
}

/// Immutable input for one bias prediction.
#[derive(Clone, Debug, Serialize)]
pub struct BiasRequest {
    pub generation: u64,
    pub time: f32,
    pub elements: Vec<ElementSnapshot>,
}

impl BiasRequest {
    pub fn from_elements(generation: u64, time: f32, elements: &[Element]) -> Self {
        Self {
            generation,
            time,
            elements: elements
                .iter()
                .map(|e| ElementSnapshot {
                    index: e.index,
                    confidence: e.confidence,
                    position: e.position,
                })
                .collect(),
        }
    }
}

/// External predictor producing bias fields. Runs on a background thread.
pub trait BiasPredictor: Send + Sync {
    fn predict(&self, request: &BiasRequest) -> BiasField;
}

/// Single-slot handoff between the predictor thread and the tick.
#[derive(Clone, Default)]
pub struct BiasMailbox {
    slot: Arc<Mutex<Option<BiasField>>>,
}

impl BiasMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is waiting with `field`. Older generations are discarded.
    pub fn publish(&self, field: BiasField) {
        let mut guard = match self.slot.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(existing) if existing.generation > field.generation => {}
            _ => *guard = Some(field),
        }
    }

    /// Take the waiting field without blocking. Contention reads as "nothing new".
    pub fn try_take(&self) -> Option<BiasField> {
        match self.slot.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// Clears the in-flight flag when the worker exits, panicking or not.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fires predictor calls on a background thread, at most one in flight.
pub struct BiasRegenerator {
    predictor: Arc<dyn BiasPredictor>,
    mailbox: BiasMailbox,
    in_flight: Arc<AtomicBool>,
    next_generation: AtomicU64,
}

impl BiasRegenerator {
    pub fn new(predictor: Arc<dyn BiasPredictor>, mailbox: BiasMailbox) -> Self {
        Self {
            predictor,
            mailbox,
            in_flight: Arc::new(AtomicBool::new(false)),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn mailbox(&self) -> &BiasMailbox {
        &self.mailbox
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start a prediction from `elements` at engine time `time`.
    ///
    /// Returns false without doing anything if a prediction is already running.
    pub fn request(&self, time: f32, elements: &[Element]) -> bool {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return false;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let request = BiasRequest::from_elements(generation, time, elements);
        let predictor = Arc::clone(&self.predictor);
        let mailbox = self.mailbox.clone();
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let spawned = std::thread::Builder::new()
            .name("wm-bias".to_string())
            .spawn(move || {
                let _guard = guard;
                let mut field = predictor.predict(&request);
                field.generation = request.generation;
                field.created_at = request.time;
                mailbox.publish(field);
            });

        if let Err(e) = spawned {
            // The closure, and the guard with it, is dropped on spawn failure.
            tracing::warn!("failed to spawn bias predictor thread: {e}");
            return false;
        }
        tracing::debug!("bias regeneration {generation} requested at t={time:.3}");
        true
    }
}

/// Pulls every element toward the confidence-weighted centroid of the set.
///
/// A small, deterministic predictor useful as a default and in tests.
pub struct CentroidPullPredictor {
    pub strength: f32,
}

impl BiasPredictor for CentroidPullPredictor {
    fn predict(&self, request: &BiasRequest) -> BiasField {
        let total: f32 = request.elements.iter().map(|e| e.confidence).sum();
        let slots = request
            .elements
            .iter()
            .map(|e| e.index as usize + 1)
            .max()
            .unwrap_or(0);
        let mut vectors = vec![Vec3::ZERO; slots.min(MAX_BIAS_ENTRIES)];
        if total <= f32::EPSILON {
            return BiasField::new(request.generation, request.time, vectors);
        }

        let centroid = request
            .elements
            .iter()
            .fold(Vec3::ZERO, |acc, e| acc + e.position * e.confidence)
            * (1.0 / total);

        for e in &request.elements {
            if let Some(slot) = vectors.get_mut(e.index as usize) {
                *slot = (centroid - e.position) * (self.strength * e.confidence);
            }
        }
        BiasField::new(request.generation, request.time, vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::WaveParameters;
    use std::time::{Duration, Instant};

    fn elements(n: u32) -> Vec<Element> {
        let params = WaveParameters::default();
        (0..n)
            .map(|i| {
                let mut e = Element::new(i, i, Vec3::new(i as f32, 0.0, 0.0), &params);
                e.confidence = 1.0;
                e
            })
            .collect()
    }

    #[test]
    fn test_correction_missing_slot_is_zero() {
        let field = BiasField::new(1, 0.0, vec![Vec3::new(1.0, 0.0, 0.0)]);
        assert_eq!(field.correction(5, 1.0), Vec3::ZERO);
    }

    #[test]
    fn test_correction_clamped() {
        let field = BiasField::new(1, 0.0, vec![Vec3::new(3.0, 4.0, 0.0)]);
        let c = field.correction(0, 0.05);
        assert!((c.length() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_nan_entry_is_zero() {
        let field = BiasField::new(1, 0.0, vec![Vec3::new(f32::NAN, 0.0, 0.0)]);
        assert_eq!(field.correction(0, 1.0), Vec3::ZERO);
    }

    #[test]
    fn test_field_bounded() {
        let field = BiasField::new(1, 0.0, vec![Vec3::ZERO; MAX_BIAS_ENTRIES + 10]);
        assert_eq!(field.len(), MAX_BIAS_ENTRIES);
    }

    #[test]
    fn test_staleness() {
        let field = BiasField::new(1, 10.0, vec![]);
        assert!(!field.is_stale(11.0, 2.0));
        assert!(field.is_stale(13.0, 2.0));
        assert!(field.is_stale(9.0, 2.0), "future fields are not trusted");
    }

    #[test]
    fn test_mailbox_keeps_newest_generation() {
        let mb = BiasMailbox::new();
        mb.publish(BiasField::new(3, 0.0, vec![]));
        mb.publish(BiasField::new(2, 0.0, vec![]));
        assert_eq!(mb.try_take().map(|f| f.generation), Some(3));
        assert!(mb.try_take().is_none(), "take empties the slot");
    }

    #[test]
    fn test_centroid_pull_points_inward() {
        let els = elements(3);
        let req = BiasRequest::from_elements(1, 0.0, &els);
        let field = CentroidPullPredictor { strength: 0.1 }.predict(&req);
        // centroid x = 1.0
        assert!(field.correction(0, 1.0).x > 0.0);
        assert!(field.correction(1, 1.0).length() < 1e-6);
        assert!(field.correction(2, 1.0).x < 0.0);
    }

    #[test]
    fn test_regenerator_publishes_in_background() {
        let mb = BiasMailbox::new();
        let regen = BiasRegenerator::new(Arc::new(CentroidPullPredictor { strength: 0.1 }), mb.clone());
        assert!(regen.request(4.0, &elements(4)));

        let deadline = Instant::now() + Duration::from_secs(5);
        let field = loop {
            if let Some(f) = mb.try_take() {
                break f;
            }
            assert!(Instant::now() < deadline, "predictor never published");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(field.generation, 1);
        assert_eq!(field.created_at, 4.0);
        assert_eq!(field.len(), 4);
    }

    struct SlowPredictor;

    impl BiasPredictor for SlowPredictor {
        fn predict(&self, request: &BiasRequest) -> BiasField {
            std::thread::sleep(Duration::from_millis(200));
            BiasField::new(request.generation, request.time, vec![])
        }
    }

    #[test]
    fn test_single_request_in_flight() {
        let regen = BiasRegenerator::new(Arc::new(SlowPredictor), BiasMailbox::new());
        assert!(regen.request(0.0, &[]));
        assert!(!regen.request(0.1, &[]), "second request should be refused");
    }

    struct PanickingPredictor;

    impl BiasPredictor for PanickingPredictor {
        fn predict(&self, _request: &BiasRequest) -> BiasField {
            panic!("predictor failed");
        }
    }

    #[test]
    fn test_panicking_predictor_releases_in_flight() {
        let regen = BiasRegenerator::new(Arc::new(PanickingPredictor), BiasMailbox::new());
        assert!(regen.request(0.0, &elements(2)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while regen.is_in_flight() {
            assert!(Instant::now() < deadline, "in-flight flag never cleared");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(regen.request(0.5, &elements(2)), "later requests must still fire");
        assert!(regen.mailbox().try_take().is_none());
    }
}
