//! Speech recognition engine (C2)
//!
//! Wraps the black-box Whisper transcriber the way the teacher's
//! `stt/whisper.rs` already does (process-global `OnceCell<Arc<Mutex<..>>>`,
//! inference on a blocking thread pool) and adds the WAV decode front-end
//! the distilled spec assumes but never specifies, grounded on the
//! `hound`-based WAV decode in `call_server.rs`'s hold-music loader and
//! on the `rubato`/`hound` entries already present in the teacher's
//! `Cargo.toml`.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::limiter::ConcurrencyLimiter;
use tokio_util::sync::CancellationToken;

const WHISPER_SAMPLE_RATE: u32 = 16_000;
/// Whisper needs >=1000ms of audio; pad with a small safety margin the
/// same way the teacher's adapter rounds up to 1050ms.
const WHISPER_MIN_SAMPLES: usize = (WHISPER_SAMPLE_RATE as usize * 1050) / 1000;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// A single segment of recognized speech.
#[derive(Debug, Clone)]
pub struct TranscriptSegment {
    pub text: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Clone)]
pub struct TranscriptResult {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

/// Minimal speech-to-text surface the gateway depends on. Kept as a
/// trait (mirroring the teacher's `SpeechToText` trait) so tests can
/// substitute a fake engine without touching a real Whisper model.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &'static str;
    async fn initialize(&self) -> Result<(), SpeechError>;
    async fn transcribe(
        &self,
        samples: Vec<f32>,
        language: Option<&str>,
    ) -> Result<TranscriptResult, SpeechError>;
}

/// Local Whisper inference via `whisper-rs`.
pub struct WhisperEngine {
    model_path: Option<PathBuf>,
    ctx: OnceCell<Arc<AsyncMutex<WhisperContext>>>,
}

impl WhisperEngine {
    pub fn new(model_path: Option<PathBuf>) -> Self {
        Self {
            model_path,
            ctx: OnceCell::new(),
        }
    }

    fn find_model_path(&self) -> PathBuf {
        if let Some(ref path) = self.model_path {
            return path.clone();
        }

        let model_name = std::env::var("WHISPER_MODEL").unwrap_or_else(|_| "base".to_string());
        let model_file = match model_name.as_str() {
            "small" => "ggml-small.en.bin",
            "medium" => "ggml-medium.en.bin",
            "large-v3" => "ggml-large-v3.bin",
            _ => "ggml-base.en.bin",
        };

        let candidates = [
            PathBuf::from(format!("models/whisper/{model_file}")),
            dirs::data_dir()
                .unwrap_or_default()
                .join(format!("whisper/{model_file}")),
        ];

        candidates
            .into_iter()
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from(format!("models/whisper/{model_file}")))
    }

    fn transcribe_sync(
        ctx: &WhisperContext,
        mut samples: Vec<f32>,
        language: Option<&str>,
    ) -> Result<TranscriptResult, SpeechError> {
        if samples.is_empty() {
            return Err(SpeechError::InvalidAudio("empty audio samples".into()));
        }

        if samples.len() < WHISPER_MIN_SAMPLES {
            samples.resize(WHISPER_MIN_SAMPLES, 0.0);
        }

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if let Some(lang) = language {
            if lang != "auto" {
                params.set_language(Some(lang));
            }
        }
        params.set_n_threads(num_cpus::get().min(4) as i32);
        params.set_translate(false);
        params.set_no_context(true);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        let mut state = ctx
            .create_state()
            .map_err(|e| SpeechError::InferenceFailed(format!("create_state: {e}")))?;
        state
            .full(params, &samples)
            .map_err(|e| SpeechError::InferenceFailed(format!("full: {e}")))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| SpeechError::InferenceFailed(format!("full_n_segments: {e}")))?;

        let mut full_text = String::new();
        let mut segments = Vec::with_capacity(num_segments as usize);
        for i in 0..num_segments {
            let segment_text = state
                .full_get_segment_text(i)
                .map_err(|e| SpeechError::InferenceFailed(format!("segment {i}: {e}")))?;
            let start_ms = state.full_get_segment_t0(i).unwrap_or(0) * 10;
            let end_ms = state.full_get_segment_t1(i).unwrap_or(0) * 10;

            full_text.push_str(&segment_text);
            segments.push(TranscriptSegment {
                text: segment_text.trim().to_string(),
                start_ms,
                end_ms,
            });
        }

        Ok(TranscriptResult {
            text: full_text.trim().to_string(),
            segments,
        })
    }
}

#[async_trait]
impl SpeechToText for WhisperEngine {
    fn name(&self) -> &'static str {
        "whisper"
    }

    async fn initialize(&self) -> Result<(), SpeechError> {
        if self.ctx.get().is_some() {
            return Ok(());
        }

        let model_path = self.find_model_path();
        info!(path = ?model_path, "loading Whisper model");

        if !model_path.exists() {
            warn!(path = ?model_path, "Whisper model not found");
            return Err(SpeechError::ModelNotLoaded(format!(
                "model not found at {model_path:?}"
            )));
        }

        let params = WhisperContextParameters::default();
        let ctx = WhisperContext::new_with_params(
            model_path.to_str().unwrap_or(""),
            params,
        )
        .map_err(|e| SpeechError::ModelNotLoaded(e.to_string()))?;

        self.ctx
            .set(Arc::new(AsyncMutex::new(ctx)))
            .map_err(|_| SpeechError::ModelNotLoaded("context already set".into()))?;
        Ok(())
    }

    async fn transcribe(
        &self,
        samples: Vec<f32>,
        language: Option<&str>,
    ) -> Result<TranscriptResult, SpeechError> {
        let ctx = self
            .ctx
            .get()
            .ok_or_else(|| SpeechError::ModelNotLoaded("call initialize() first".into()))?
            .clone();
        let lang = language.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let guard = ctx.blocking_lock();
            Self::transcribe_sync(&guard, samples, lang.as_deref())
        })
        .await
        .map_err(|e| SpeechError::InferenceFailed(format!("join error: {e}")))?
    }
}

/// Decodes a self-contained WAV payload into mono f32 samples at
/// Whisper's native 16kHz, resampling with `rubato` when the source
/// rate differs.
pub fn decode_wav_payload(bytes: &[u8]) -> Result<Vec<f32>, SpeechError> {
    let cursor = Cursor::new(bytes);
    let mut reader = hound::WavReader::new(cursor)
        .map_err(|e| SpeechError::InvalidAudio(format!("not a valid WAV file: {e}")))?;
    let spec = reader.spec();

    let mono: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            let samples: Vec<i32> = reader
                .samples::<i32>()
                .filter_map(|s| s.ok())
                .collect();
            downmix(&samples.iter().map(|&s| s as f32 / max).collect::<Vec<_>>(), spec.channels)
        }
        hound::SampleFormat::Float => {
            let samples: Vec<f32> = reader.samples::<f32>().filter_map(|s| s.ok()).collect();
            downmix(&samples, spec.channels)
        }
    };

    if spec.sample_rate == WHISPER_SAMPLE_RATE {
        return Ok(mono);
    }
    resample(&mono, spec.sample_rate, WHISPER_SAMPLE_RATE)
}

fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, SpeechError> {
    use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| SpeechError::InvalidAudio(format!("resampler setup failed: {e}")))?;

    let output = resampler
        .process(&[samples.to_vec()], None)
        .map_err(|e| SpeechError::InvalidAudio(format!("resample failed: {e}")))?;

    Ok(output.into_iter().next().unwrap_or_default())
}

/// C2: a single-payload transcription behind the shared concurrency
/// limiter. Implements spec §4.2's five steps end to end, including the
/// failure-sanitization policy: anything other than `Cancelled` is
/// logged and translated into an empty result so one bad payload can
/// never tear down a session.
pub struct EngineAdapter {
    engine: Arc<dyn SpeechToText>,
    limiter: ConcurrencyLimiter,
}

impl EngineAdapter {
    pub fn new(engine: Arc<dyn SpeechToText>, limiter: ConcurrencyLimiter) -> Self {
        Self { engine, limiter }
    }

    pub async fn transcribe(
        &self,
        payload: &[u8],
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, crate::error::GatewayError> {
        let _lease = self.limiter.acquire(cancel).await?;

        let lang = if language.trim().is_empty() {
            "auto"
        } else {
            language
        };

        let samples = match decode_wav_payload(payload) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "payload failed to decode as WAV, skipping");
                return Ok(String::new());
            }
        };

        match self.engine.transcribe(samples, Some(lang)).await {
            Ok(result) => Ok(result.text.trim().to_string()),
            Err(e) => {
                warn!(error = %e, engine = self.engine.name(), "engine failure, skipping payload");
                Ok(String::new())
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// A fake engine used by session/queue tests: no real model, just a
    /// configurable delay and a canned response per call, tracking peak
    /// concurrency so the admission-cap property is directly observable.
    pub struct FakeEngine {
        pub delay: Duration,
        pub responses: Mutex<Vec<String>>,
        pub in_flight: AtomicUsize,
        pub peak_in_flight: AtomicUsize,
    }

    impl FakeEngine {
        pub fn new(delay: Duration, responses: Vec<&str>) -> Self {
            Self {
                delay,
                responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SpeechToText for FakeEngine {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn initialize(&self) -> Result<(), SpeechError> {
            Ok(())
        }

        async fn transcribe(
            &self,
            _samples: Vec<f32>,
            _language: Option<&str>,
        ) -> Result<TranscriptResult, SpeechError> {
            let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(n, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(TranscriptResult {
                    text: String::new(),
                    segments: vec![],
                });
            }
            let text = responses.remove(0);
            Ok(TranscriptResult {
                text,
                segments: vec![],
            })
        }
    }

    #[tokio::test]
    async fn fake_engine_returns_canned_responses_in_order() {
        let engine = FakeEngine::new(Duration::from_millis(1), vec!["one", "two"]);
        assert_eq!(engine.transcribe(vec![], None).await.unwrap().text, "one");
        assert_eq!(engine.transcribe(vec![], None).await.unwrap().text, "two");
    }
}
