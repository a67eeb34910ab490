//! Translive: realtime transcription-and-translation relay.
//!
//! Each live session runs a concurrent pipeline:
//! producer audio → upstream STT socket → translation queue → transcript
//! store → room broadcast to subscribers.
//!
//! # Architecture
//!
//! The pipeline is built from independent per-session tasks connected by
//! async channels:
//! - **STT session**: duplex WebSocket to the realtime STT service
//! - **Translation queue**: one cancellable partial lane + a serial
//!   committed lane feeding the LLM pipeline
//! - **Transcript store**: Redis-backed hot cache over a MongoDB log
//! - **Rooms**: per-session fan-out to WebSocket subscribers

pub mod config;
pub mod error;
pub mod gateway;
pub mod oracle;
pub mod orchestrator;
pub mod rooms;
pub mod segment;
pub mod store;
pub mod stt;
pub mod translate;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use orchestrator::SessionOrchestrator;
pub use segment::{Segment, SegmentResult, TranscriptView};
