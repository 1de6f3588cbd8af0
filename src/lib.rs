//! Real-time speech-to-text gateway
//!
//! A WebSocket front end over a local Whisper engine. One session per
//! connection; two cooperating tasks per session (ingress, worker)
//! bridged by a bounded audio queue, with engine invocations admitted
//! through a process-wide concurrency limiter.
//!
//! # Core Primitives
//!
//! - **Handle**: correlation ID for logging (UUIDv4)
//! - **ConcurrencyLimiter**: caps engine invocations in flight
//! - **EngineAdapter**: WAV decode + transcription behind the limiter
//! - **AudioQueue**: bounded handoff between ingress and worker
//! - **Session**: per-connection state machine
//! - **ConnectionAcceptor**: TCP listener + WebSocket upgrade

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod limiter;
pub mod queue;
pub mod server;
pub mod session;

pub use codec::{decode_control, encode_error, encode_transcript, DecodedControl};
pub use config::Config;
pub use engine::{EngineAdapter, SpeechError, SpeechToText, WhisperEngine};
pub use error::GatewayError;
pub use handle::Handle;
pub use limiter::{ConcurrencyLimiter, Lease};
pub use queue::{audio_queue, AudioQueueReader, AudioQueueWriter};
pub use server::ConnectionAcceptor;
pub use session::{Session, SessionState};
