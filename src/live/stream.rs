use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError, TrySendError};

use crate::error::{MirrorError, MirrorResult};
use crate::registry::LiveQueryId;

use super::dispatcher::{EventDispatcher, ListenerHandle};
use super::event::{EventKind, Notification};

/// Pull-style receiver of a live query's notifications.
///
/// Fed by an `any` listener that never blocks event delivery: when the buffer
/// is full the notification is dropped and counted. Dropping this stream
/// unregisters the listener.
#[derive(Debug)]
pub struct LiveQueryStream {
    lq_id: LiveQueryId,
    rx: Receiver<Notification>,
    handle: ListenerHandle,
    dropped: Arc<AtomicU64>,
    unregistered: AtomicBool,
}

impl LiveQueryStream {
    pub(crate) fn attach(lq_id: LiveQueryId, dispatcher: &EventDispatcher, capacity: usize) -> Self {
        let (tx, rx) = bounded::<Notification>(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let listener_dropped = Arc::clone(&dropped);

        let handle = dispatcher.on(EventKind::Any, move |notification| {
            match tx.try_send(notification.clone()) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    listener_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(lq_id = %lq_id, "live query stream full, notification dropped");
                }
            }
            Ok(())
        });

        Self {
            lq_id,
            rx,
            handle,
            dropped,
            unregistered: AtomicBool::new(false),
        }
    }

    /// Id of the live query feeding this stream.
    #[must_use]
    pub const fn lq_id(&self) -> LiveQueryId {
        self.lq_id
    }

    /// Notifications discarded because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop receiving notifications. Idempotent.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        self.handle.unsubscribe();
    }

    /// Receive the next notification (blocking).
    pub fn recv(&self) -> MirrorResult<Notification> {
        self.rx.recv().map_err(|_| MirrorError::Disconnected {
            path: "live_query_stream".to_string(),
        })
    }

    /// Receive the next notification with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> MirrorResult<Notification> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => MirrorError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => MirrorError::Disconnected {
                path: "live_query_stream".to_string(),
            },
        })
    }

    /// Non-blocking receive; `None` when nothing is buffered.
    pub fn try_recv(&self) -> MirrorResult<Option<Notification>> {
        match self.rx.try_recv() {
            Ok(n) => Ok(Some(n)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(MirrorError::Disconnected {
                path: "live_query_stream".to_string(),
            }),
        }
    }
}

impl Drop for LiveQueryStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
