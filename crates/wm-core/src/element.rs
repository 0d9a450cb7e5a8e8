use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::constants::GOLDEN_ANGLE;
use crate::settings::WaveParameters;
use crate::vec3::Vec3;
use crate::wave::WaveSource;

/// Stable identifier handed to collaborators.
pub type ElementId = u32;

/// One positioned visual element occupying a pool slot.
///
/// `position` is the authoritative math state written by the integrator from
/// optimizer targets. `rendered_position` is the smoothed state, and the only
/// position the renderer consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    /// Slot in the fixed collection; drives the base layout.
    pub index: u32,
    /// Externally supplied score in [0, 1].
    pub confidence: f32,
    pub position: Vec3,
    pub rendered_position: Vec3,
    pub velocity: Vec3,
    pub scale: f32,
    /// Engine time of the last tick that touched this element.
    pub last_update_time: f32,
    /// Set by inbox writes, cleared once a tick has consumed them.
    pub is_dirty: bool,
    /// Breathing phase, golden-angle spaced by slot.
    pub phase: f32,
    pub breathing_frequency: f32,
    pub breathing_amplitude: f32,
    /// Held by a `Pressed` interaction until `Released`.
    pub pressed: bool,
}

impl Element {
    /// Fresh element at `base`, at rest, with breathing terms derived from its slot.
    pub fn new(id: ElementId, index: u32, base: Vec3, params: &WaveParameters) -> Self {
        let mut element = Self {
            id,
            index,
            confidence: 0.0,
            position: base,
            rendered_position: base,
            velocity: Vec3::ZERO,
            scale: 1.0,
            last_update_time: 0.0,
            is_dirty: false,
            phase: (index as f32 * GOLDEN_ANGLE).rem_euclid(TAU),
            breathing_frequency: 0.0,
            breathing_amplitude: 0.0,
            pressed: false,
        };
        element.apply_wave_parameters(params);
        element
    }

    /// Re-derive the breathing terms from `params`. Phase is left alone so
    /// the element keeps its place in the breathing cycle.
    pub fn apply_wave_parameters(&mut self, params: &WaveParameters) {
        let detune = (self.index as f32 * 0.618_034).fract();
        self.breathing_frequency = params.primary_frequency * (0.9 + 0.2 * detune);
        self.breathing_amplitude = params.primary_amplitude;
    }

    /// Set confidence, clamped to [0, 1]. Non-finite input is ignored.
    pub fn set_confidence(&mut self, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.confidence = value.clamp(0.0, 1.0);
        self.is_dirty = true;
        true
    }

    /// Snap both positions to `base` and stop all motion.
    pub fn reseed(&mut self, base: Vec3) {
        self.position = base;
        self.rendered_position = base;
        self.velocity = Vec3::ZERO;
        self.scale = 1.0;
        self.pressed = false;
    }

    /// Emitter snapshot of this element at engine time `t`.
    pub fn wave_source(&self, t: f32) -> WaveSource {
        WaveSource::new(
            self.position,
            TAU * self.breathing_frequency,
            self.breathing_amplitude,
            self.phase + TAU * self.breathing_frequency * t,
        )
    }

    /// Distance between authoritative and rendered state.
    pub fn sync_deviation(&self) -> f32 {
        self.position.distance(self.rendered_position)
    }

    pub fn is_finite(&self) -> bool {
        self.confidence.is_finite()
            && self.position.is_finite()
            && self.rendered_position.is_finite()
            && self.velocity.is_finite()
            && self.scale.is_finite()
    }
}

/// Kind of hand/controller interaction reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Pressed,
    Released,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub element_id: ElementId,
    pub kind: InteractionKind,
    /// World-space contact point.
    pub point: Vec3,
    pub intensity: f32,
}

/// Viewer frame supplied by the host each tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewer {
    pub position: Vec3,
    pub forward: Vec3,
}

impl Default for Viewer {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::FORWARD,
        }
    }
}

impl Viewer {
    pub fn new(position: Vec3, forward: Vec3) -> Self {
        Self { position, forward }
    }

    /// Orthonormal (right, up, forward) basis.
    ///
    /// A degenerate forward falls back to −Z; a forward parallel to world up
    /// borrows −Z as its reference so the basis stays well defined.
    pub fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let forward = self.forward.try_normalize().unwrap_or(Vec3::FORWARD);
        let right = forward
            .cross(Vec3::UP)
            .try_normalize()
            .or_else(|| forward.cross(Vec3::FORWARD).try_normalize())
            .unwrap_or(Vec3::new(1.0, 0.0, 0.0));
        let up = right.cross(forward);
        (right, up, forward)
    }

    /// Map a layout-space point (x right, y up, z forward) into world space.
    pub fn to_world(&self, local: Vec3) -> Vec3 {
        let (right, up, forward) = self.basis();
        let origin = if self.position.is_finite() {
            self.position
        } else {
            Vec3::ZERO
        };
        origin + right * local.x + up * local.y + forward * local.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_element_at_rest() {
        let base = Vec3::new(1.0, 0.5, -2.0);
        let e = Element::new(7, 3, base, &WaveParameters::default());
        assert_eq!(e.position, base);
        assert_eq!(e.rendered_position, base);
        assert_eq!(e.velocity, Vec3::ZERO);
        assert!(e.is_finite());
        assert!(e.phase >= 0.0 && e.phase < TAU);
    }

    #[test]
    fn test_set_confidence_clamps_and_rejects_nan() {
        let mut e = Element::new(0, 0, Vec3::ZERO, &WaveParameters::default());
        assert!(e.set_confidence(1.7));
        assert_eq!(e.confidence, 1.0);
        assert!(e.is_dirty);
        assert!(!e.set_confidence(f32::NAN));
        assert_eq!(e.confidence, 1.0);
    }

    #[test]
    fn test_wave_source_valid() {
        let e = Element::new(0, 11, Vec3::new(0.3, 0.0, 1.0), &WaveParameters::default());
        assert!(e.wave_source(12.0).is_valid());
    }

    #[test]
    fn test_default_viewer_basis() {
        let (right, up, forward) = Viewer::default().basis();
        assert!((right.x - 1.0).abs() < 1e-6);
        assert!((up.y - 1.0).abs() < 1e-6);
        assert!((forward.z + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_basis_orthonormal_for_tilted_forward() {
        let v = Viewer::new(Vec3::ZERO, Vec3::new(0.3, -0.4, -1.0));
        let (r, u, f) = v.basis();
        for (a, b) in [(r, u), (u, f), (r, f)] {
            assert!(a.dot(b).abs() < 1e-5);
        }
        for n in [r, u, f] {
            assert!((n.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_basis_straight_up_is_defined() {
        let v = Viewer::new(Vec3::ZERO, Vec3::UP);
        let (r, u, f) = v.basis();
        assert!(r.is_finite() && u.is_finite() && f.is_finite());
        assert!(r.dot(f).abs() < 1e-5);
    }

    #[test]
    fn test_to_world_forward_component() {
        let v = Viewer::new(Vec3::new(1.0, 1.6, 0.0), Vec3::FORWARD);
        let w = v.to_world(Vec3::new(0.0, 0.0, 2.0));
        assert!((w.z + 2.0).abs() < 1e-6);
        assert!((w.x - 1.0).abs() < 1e-6);
    }
}
