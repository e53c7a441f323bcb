//! Remote prediction API: HTTP client and event-stream frame decoding.

mod flowise;
pub mod frames;

pub use flowise::{ApiError, PredictionClient, ProbeReply, PROBE_QUESTION};
pub use frames::{decode_frame, FrameDecoder, StreamEvent};
