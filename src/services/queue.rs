use camino::Utf8PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Returned when a path is enqueued after the dispatcher has gone away
#[derive(Error, Debug)]
#[error("File queue is closed, dropping {0}")]
pub struct QueueClosed(pub Utf8PathBuf);

/// Result of a single timed dequeue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeue {
    Item(Utf8PathBuf),
    Empty,
    Closed,
}

/// Producer side of the work queue.
///
/// Cheap to clone; the detector's notification thread and the initial scan
/// each hold a copy. Enqueueing never blocks and never drops a path while the
/// receiver is alive.
#[derive(Debug, Clone)]
pub struct FileQueue {
    tx: mpsc::UnboundedSender<Utf8PathBuf>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side of the work queue, owned by the dispatcher loop
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<Utf8PathBuf>,
    depth: Arc<AtomicUsize>,
}

/// Create a connected queue pair
pub fn file_queue() -> (FileQueue, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        FileQueue {
            tx,
            depth: depth.clone(),
        },
        QueueReceiver { rx, depth },
    )
}

impl FileQueue {
    pub fn enqueue(&self, path: Utf8PathBuf) -> Result<(), QueueClosed> {
        // Count before sending so the consumer never decrements below zero
        self.depth.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(path)) = self.tx.send(path) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueClosed(path));
        }
        Ok(())
    }

    /// Paths enqueued but not yet picked up by a worker
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl QueueReceiver {
    /// Wait up to `wait` for the next path.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Dequeue {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(path)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Dequeue::Item(path)
            }
            Ok(None) => Dequeue::Closed,
            Err(_) => Dequeue::Empty,
        }
    }

    /// Take the next path if one is immediately available
    pub fn try_recv(&mut self) -> Option<Utf8PathBuf> {
        let path = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(path)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Shared depth counter, still readable once the receiver has moved into a task
    pub(crate) fn depth_counter(&self) -> Arc<AtomicUsize> {
        self.depth.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_depth_tracks_pending_entries() {
        let (queue, mut receiver) = file_queue();

        queue.enqueue(Utf8PathBuf::from("/in/a.xml")).unwrap();
        queue.enqueue(Utf8PathBuf::from("/in/b.xml")).unwrap();
        assert_eq!(queue.depth(), 2);

        let first = receiver.recv_timeout(Duration::from_millis(50)).await;
        assert_eq!(first, Dequeue::Item(Utf8PathBuf::from("/in/a.xml")));
        assert_eq!(queue.depth(), 1);
        assert_eq!(receiver.depth(), 1);
    }

    #[tokio::test]
    async fn test_recv_timeout_empty() {
        let (_queue, mut receiver) = file_queue();
        let result = receiver.recv_timeout(Duration::from_millis(10)).await;
        assert_eq!(result, Dequeue::Empty);
    }

    #[tokio::test]
    async fn test_closed_when_all_producers_dropped() {
        let (queue, mut receiver) = file_queue();
        drop(queue);
        let result = receiver.recv_timeout(Duration::from_millis(10)).await;
        assert_eq!(result, Dequeue::Closed);
    }

    #[test]
    fn test_enqueue_after_receiver_dropped() {
        let (queue, receiver) = file_queue();
        drop(receiver);

        let err = queue.enqueue(Utf8PathBuf::from("/in/late.xml")).unwrap_err();
        assert_eq!(err.0, Utf8PathBuf::from("/in/late.xml"));
        assert_eq!(queue.depth(), 0);
        assert!(queue.is_closed());
    }
}
