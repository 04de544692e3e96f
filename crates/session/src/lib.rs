//! Call session orchestration
//!
//! Sequences offer/answer negotiation, gates outbound media on the remote
//! party being ready, buffers caller audio for transcription and owns the
//! per-call cleanup path.

pub mod accumulator;
pub mod call;
pub mod clip;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod looping;
pub mod registry;
pub mod router;
pub mod sdp;

pub use accumulator::{AccumulatorConfig, InboundAudioAccumulator, SharedAccumulator};
pub use call::{CallDeps, CallInfo, CallSession, CallSessionConfig, CallState};
pub use clip::{AudioClip, ClipError};
pub use diagnostics::{DiagnosticsMonitor, DiagnosticsReport};
pub use error::{CallError, SignalingStep};
pub use events::{CallEvent, CallSessionEvent};
pub use looping::LoopingAudioSource;
pub use registry::CallRegistry;
pub use router::CallEventRouter;
