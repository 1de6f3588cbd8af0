//! Per-connection session state machine (C5)
//!
//! Two cooperating tasks per session — ingress and worker — sharing only
//! the structures §5 names: the `language` watch channel, the bounded
//! `AudioQueue`, and (for egress) the worker's exclusive ownership of the
//! WebSocket sink. This resolves the §9 "egress serialization" open
//! question in favor of option (a): every outbound frame, including
//! ingress's best-effort error notices, is funneled through the worker
//! loop via a small mailbox, so only one task ever touches the sink.
//!
//! Grounded on the teacher's `call_server.rs::handle_connection`, which
//! splits a `WebSocketStream` into sink/stream halves and runs the read
//! side and a forwarding task concurrently under `tokio::select!`.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::{decode_control, encode_error, encode_transcript, DecodedControl};
use crate::engine::EngineAdapter;
use crate::error::GatewayError;
use crate::handle::Handle;
use crate::queue::{audio_queue, AudioQueueWriter};

const DEFAULT_LANGUAGE: &str = "auto";
/// Capacity for ingress's best-effort error mailbox to the worker. Small:
/// these are rare, terminal notices, not a steady-state data path.
const ERROR_MAILBOX_CAPACITY: usize = 4;

/// The three states named by §4.5: `Running` is the default, `Draining`
/// is entered the moment either loop decides the session is ending, and
/// `Terminated` is entered only after the worker loop has exited and the
/// close handshake (best effort) has been attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Running = 0,
    Draining = 1,
    Terminated = 2,
}

struct SessionStateCell(AtomicU8);

impl SessionStateCell {
    fn new() -> Self {
        Self(AtomicU8::new(SessionState::Running as u8))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn get(&self) -> SessionState {
        match self.0.load(Ordering::SeqCst) {
            0 => SessionState::Running,
            1 => SessionState::Draining,
            _ => SessionState::Terminated,
        }
    }
}

pub struct Session {
    handle: Handle,
    adapter: Arc<EngineAdapter>,
    cancel: CancellationToken,
    disposed: AtomicBool,
    state: Arc<SessionStateCell>,
}

impl Session {
    pub fn new(adapter: Arc<EngineAdapter>, cancel: CancellationToken) -> Self {
        Self {
            handle: Handle::new(),
            adapter,
            cancel,
            disposed: AtomicBool::new(false),
            state: Arc::new(SessionStateCell::new()),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Runs the session to completion: spawns the worker, drives ingress
    /// on the current task, then awaits the worker unconditionally
    /// before returning. Never panics across its own boundary — every
    /// internal error is classified and logged, not propagated.
    pub async fn run<S>(&self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let (queue_writer, queue_reader) = audio_queue();
        let (lang_tx, lang_rx) = watch::channel(DEFAULT_LANGUAGE.to_string());
        let (err_tx, err_rx) = mpsc::channel(ERROR_MAILBOX_CAPACITY);

        let worker = tokio::spawn(Self::worker_loop(
            sink,
            queue_reader,
            lang_rx,
            err_rx,
            self.adapter.clone(),
            self.cancel.clone(),
            self.handle,
        ));

        Self::ingress_loop(
            stream,
            queue_writer,
            lang_tx,
            err_tx,
            self.cancel.clone(),
            self.handle,
            self.state.clone(),
        )
        .await;

        if let Err(e) = worker.await {
            warn!(session = %self.handle, error = %e, "worker task panicked");
        }

        self.state.set(SessionState::Terminated);
        info!(session = %self.handle, "session terminated");
    }

    async fn ingress_loop<S>(
        mut stream: SplitStream<WebSocketStream<S>>,
        queue: AudioQueueWriter,
        lang_tx: watch::Sender<String>,
        err_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
        handle: Handle,
        state: Arc<SessionStateCell>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    state.set(SessionState::Draining);
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                None => {
                    state.set(SessionState::Draining);
                    break;
                }
                Some(Ok(Message::Close(_))) => {
                    state.set(SessionState::Draining);
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    match decode_control(text.as_bytes()) {
                        DecodedControl::Update {
                            language,
                            end_requested,
                        } => {
                            if let Some(lang) = language {
                                let _ = lang_tx.send(lang);
                            }
                            if end_requested {
                                state.set(SessionState::Draining);
                                break;
                            }
                        }
                        DecodedControl::Ignore => {}
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    // tokio-tungstenite reassembles continuation frames
                    // into one complete `Message::Binary` before handing
                    // it to the stream, so this single write already
                    // carries the full reassembled WAV payload.
                    match queue.write(data.to_vec(), &cancel).await {
                        Ok(()) => {}
                        Err(GatewayError::Cancelled) => {
                            state.set(SessionState::Draining);
                            break;
                        }
                        Err(e) => {
                            warn!(session = %handle, error = %e, "audio queue closed, stopping ingress");
                            let _ = err_tx.try_send("connection error".to_string());
                            state.set(SessionState::Draining);
                            break;
                        }
                    }
                }
                Some(Ok(_)) => {
                    // Ping/Pong/Frame — nothing for the protocol to do.
                }
                Some(Err(e)) => {
                    // TransportError: no best-effort send on a channel
                    // that just failed its own read.
                    warn!(session = %handle, error = %e, "transport error on ingress");
                    state.set(SessionState::Draining);
                    break;
                }
            }
        }
        // queue and err_tx drop here, closing both the writer side of
        // the AudioQueue and the error mailbox.
    }

    async fn worker_loop<S>(
        mut sink: SplitSink<WebSocketStream<S>, Message>,
        mut queue: crate::queue::AudioQueueReader,
        lang_rx: watch::Receiver<String>,
        mut err_rx: mpsc::Receiver<String>,
        adapter: Arc<EngineAdapter>,
        cancel: CancellationToken,
        handle: Handle,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut channel_open = true;

        loop {
            tokio::select! {
                biased;
                payload = queue.recv() => {
                    let Some(payload) = payload else { break };

                    if cancel.is_cancelled() {
                        drop(payload);
                        break;
                    }

                    let language = lang_rx.borrow().clone();
                    match adapter.transcribe(&payload, &language, &cancel).await {
                        Ok(text) if text.trim().is_empty() => {}
                        Ok(text) => {
                            if channel_open {
                                let bytes = encode_transcript(&text);
                                if let Err(e) = sink.send(Message::Text(String::from_utf8_lossy(&bytes).into_owned())).await {
                                    warn!(session = %handle, error = %e, "failed to send transcript, closing session");
                                    channel_open = false;
                                }
                            }
                        }
                        Err(GatewayError::Cancelled) => break,
                        Err(e) => {
                            warn!(session = %handle, error = %e, "worker error on payload");
                            if channel_open {
                                let bytes = encode_error("transcription failed");
                                let _ = sink.send(Message::Text(String::from_utf8_lossy(&bytes).into_owned())).await;
                            }
                        }
                    }
                }
                msg = err_rx.recv() => {
                    let Some(message) = msg else { continue };
                    if channel_open {
                        let bytes = encode_error(&message);
                        let _ = sink.send(Message::Text(String::from_utf8_lossy(&bytes).into_owned())).await;
                    }
                }
            }
        }

        // Drain any error notices that arrived after the queue finished.
        while let Ok(message) = err_rx.try_recv() {
            if channel_open {
                let bytes = encode_error(&message);
                let _ = sink.send(Message::Text(String::from_utf8_lossy(&bytes).into_owned())).await;
            }
        }

        if channel_open {
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "session end".into(),
                })))
                .await;
            let _ = sink.close().await;
        }
    }

    /// Explicit disposal: idempotent, safe to call from an unwind path
    /// or by the acceptor after `run` returns. Marks the session
    /// disposed and cancels it so any task that outlives `run` (e.g. a
    /// detached worker) observes the cancellation signal.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}
