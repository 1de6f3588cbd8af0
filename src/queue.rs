//! Bounded audio payload queue (C4)
//!
//! A single-consumer handoff between the ingress loop and the worker
//! loop. Backed directly by `tokio::sync::mpsc::channel`: the channel's
//! own closed/drained semantics already give "readAll terminates when
//! the queue is empty and the writer is complete" for free, so this is
//! a thin, explicitly-contracted wrapper rather than a hand-rolled ring
//! buffer — the "superseded session variant" the spec rejects used an
//! unbounded queue and an extra copy; this one does neither.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

pub const QUEUE_CAPACITY: usize = 4;

pub struct AudioQueueWriter {
    tx: mpsc::Sender<Vec<u8>>,
}

pub struct AudioQueueReader {
    rx: mpsc::Receiver<Vec<u8>>,
}

pub fn audio_queue() -> (AudioQueueWriter, AudioQueueReader) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (AudioQueueWriter { tx }, AudioQueueReader { rx })
}

impl AudioQueueWriter {
    /// Blocks until space is available, fails with `Cancelled` if
    /// `cancel` fires first, or `Unexpected` if the reader side has
    /// already been dropped (queue closed from the consumer end).
    pub async fn write(
        &self,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            result = self.tx.send(payload) => {
                result.map_err(|_| GatewayError::Unexpected("audio queue closed by reader".into()))
            }
        }
    }
}

impl AudioQueueReader {
    /// Receives the next payload, or `None` once the writer is dropped
    /// and no payloads remain — the "readAll terminates" contract.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn preserves_fifo_order() {
        let (writer, mut reader) = audio_queue();
        let cancel = CancellationToken::new();

        for i in 0u8..3 {
            writer.write(vec![i], &cancel).await.unwrap();
        }
        drop(writer);

        assert_eq!(reader.recv().await, Some(vec![0]));
        assert_eq!(reader.recv().await, Some(vec![1]));
        assert_eq!(reader.recv().await, Some(vec![2]));
        assert_eq!(reader.recv().await, None);
    }

    #[tokio::test]
    async fn closing_does_not_discard_queued_items() {
        let (writer, mut reader) = audio_queue();
        let cancel = CancellationToken::new();

        writer.write(vec![42], &cancel).await.unwrap();
        drop(writer); // close() is idempotent-equivalent: dropping the sender once is enough

        assert_eq!(reader.recv().await, Some(vec![42]));
        assert_eq!(reader.recv().await, None);
    }

    #[tokio::test]
    async fn full_queue_blocks_the_writer_until_drained() {
        let (writer, mut reader) = audio_queue();
        let cancel = CancellationToken::new();

        for i in 0..QUEUE_CAPACITY {
            writer.write(vec![i as u8], &cancel).await.unwrap();
        }

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            writer.write(vec![99], &cancel),
        )
        .await;
        assert!(blocked.is_err(), "write into a full queue should block");

        reader.recv().await;
        writer
            .write(vec![99], &cancel)
            .await
            .expect("space freed after one read");
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_blocked_writer() {
        let (writer, _reader) = audio_queue();
        let cancel = CancellationToken::new();

        for i in 0..QUEUE_CAPACITY {
            writer.write(vec![i as u8], &cancel).await.unwrap();
        }

        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel2.cancel();
        });

        let result = writer.write(vec![99], &cancel).await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }
}
