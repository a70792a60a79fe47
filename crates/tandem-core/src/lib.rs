//! # tandem-core
//!
//! The session alignment engine for Tandem - THE LOGIC.
//!
//! Several independently-clocked producers (a wearable sensor, a gaze tracker,
//! a microphone) report data at their own pace. This crate decides which
//! recording session each piece of data belongs to:
//!
//! - `clock`: monotonic epoch-millisecond time immune to wall-clock jumps
//! - `session`: the shared session record and its sequential id allocator
//! - `readiness`: opens a session once every modality has reported
//! - `rotation`: rolls the session over when a timestamp leaves its window
//! - `discovery` / `resolver`: found/lost tracking of external streams
//! - `inlet`: drain-to-empty sample pulls with periodic clock correction
//! - `artifact` / `recorder`: session-labeled files and their metadata sidecars
//! - `capability`: `Flushable` and `Producer` contracts for supervised runs
//!
//! ## Architectural Constraints
//!
//! - No async runtime and no network code; the app layer owns both
//! - Lock order is readiness -> session, never the reverse
//! - No I/O happens while a lock is held

// =============================================================================
// MODULES
// =============================================================================

pub mod artifact;
pub mod capability;
pub mod clock;
pub mod discovery;
pub mod inlet;
pub mod readiness;
pub mod recorder;
pub mod resolver;
pub mod rotation;
pub mod session;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{Modality, NO_SESSION, Session, SessionEvent, TandemError};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use artifact::{ArtifactName, create_unique};
pub use capability::{Flushable, Producer, ProducerHandle};
pub use clock::{Clock, ManualClock, MonotonicClock, file_stamp_utc, iso_utc};
pub use discovery::{SampleSource, StreamDescriptor, StreamDiscovery};
pub use inlet::{ClockCorrectedInlet, InletSample, PullReport};
pub use readiness::{FirstSaveLog, NotifyOutcome, ReadinessTracker};
pub use recorder::{SensorMeta, SensorRecorder};
pub use resolver::{ResolverHandle, StreamEvent, StreamResolver};
pub use rotation::{RotationOutcome, SessionRotationPolicy};
pub use session::SessionStore;
