//! Gateway configuration
//!
//! CLI flags with environment-variable fallbacks, following the same
//! "look for WHISPER_MODEL, then fall back to a sane default" idiom the
//! teacher's Whisper adapter uses for model path resolution.

use clap::Parser;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9090";
const DEFAULT_UPGRADE_PATH: &str = "/transcribe";

#[derive(Parser, Debug, Clone)]
#[command(name = "stt-gateway", about = "Real-time speech-to-text gateway")]
pub struct Config {
    /// Address to bind the WebSocket listener on.
    #[arg(long, env = "GATEWAY_BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
    pub bind_addr: String,

    /// HTTP path that is upgraded to the duplex streaming protocol.
    #[arg(long, env = "GATEWAY_UPGRADE_PATH", default_value = DEFAULT_UPGRADE_PATH)]
    pub upgrade_path: String,

    /// Maximum number of concurrent engine invocations across all sessions.
    #[arg(long, env = "GATEWAY_MAX_CONCURRENT", default_value_t = 4)]
    pub max_concurrent: usize,

    /// Path to the Whisper ggml model file. When unset, the engine adapter
    /// searches the same candidate locations as the teacher's WhisperSTT.
    #[arg(long, env = "WHISPER_MODEL_PATH")]
    pub model_path: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be >= 1".to_string());
        }
        Ok(())
    }
}
