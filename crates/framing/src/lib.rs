//! capline framing
//!
//! Turns upstream payloads into packet records.
//!
//! ```text
//! payload bytes ──► PayloadDecoder ──► Record(Value) ─────────────► queue
//!                         │
//!                         └──► Text ──► RecordFramer ──► Frame ───► queue
//! ```
//!
//! - [`PayloadDecoder`] unwraps the configured envelope field
//! - [`RecordFramer`] extracts balanced JSON objects from arbitrary chunks

pub mod framer;
pub mod payload;

pub use framer::{DEFAULT_MAX_FRAME_SIZE, Frame, FramerStats, Frames, RecordFramer, frames};
pub use payload::{Decoded, PayloadDecoder};
