//! Wave-matrix spatial positioning and breathing engine.
//!
//! Places up to ~100 visual elements in 3D every frame by superposing
//! wave functions, pushing each element toward or away from the viewer by
//! an external confidence score, optionally nudging the result with a
//! predicted bias field, and easing the rendered transform toward that
//! target with a critically damped spring inside a 72 Hz frame budget.
//!
//! Zero I/O. The host owns the clock and calls `VisualIntegrator::tick`.

pub mod bias;
pub mod constants;
pub mod element;
pub mod error;
pub mod harness;
pub mod inbox;
pub mod integrator;
pub mod lifecycle;
pub mod optimizer;
pub mod report;
pub mod settings;
pub mod vec3;
pub mod wave;

pub use bias::{
    BiasField, BiasMailbox, BiasPredictor, BiasRegenerator, BiasRequest, CentroidPullPredictor,
};
pub use constants::{
    BASELINE_MICROS_PER_50, DEFAULT_TARGET_COUNT, EPSILON, FRAME_BUDGET_MICROS, FRAME_RATE_HZ,
    GOLDEN_ANGLE, SYNC_TOLERANCE,
};
pub use element::{Element, ElementId, InteractionEvent, InteractionKind, Viewer};
pub use error::{EngineError, Result};
pub use harness::{GateStatus, HarnessConfig, HarnessReport, ValidationHarness};
pub use inbox::{Inbox, InboxMessage, InboxSender};
pub use integrator::{IntegratorState, TickReport, VisualIntegrator};
pub use lifecycle::{LifecycleManager, PoolConfig, ReconcileOutcome};
#[cfg(feature = "parallel")]
pub use optimizer::ParallelOptimizer;
pub use optimizer::{
    OptimizerMode, PositionOptimizer, SyncOptimizer, TargetContext, TargetSet,
    advanced_available, select_optimizer,
};
pub use report::{PerformanceReport, RenderOutput, SyncReport, export_json, render_outputs};
pub use settings::{
    ConfidenceCurve, Correction, EngineSettings, OptimizerSettings, WaveMatrixSettings,
    WaveParameters,
};
pub use vec3::Vec3;
pub use wave::{WaveSource, compute_interference, generate_pattern};
