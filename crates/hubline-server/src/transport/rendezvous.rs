//! Unbuffered hand-off between an HTTP handler task and a connection task.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::errors::ConnectionError;

struct Handoff {
    payload: Vec<u8>,
    taken: oneshot::Sender<()>,
}

/// A channel where [`put`](Self::put) completes only once a
/// [`take`](Self::take) has received the payload.
///
/// Both sides unblock with [`ConnectionError::TransportClosed`] as soon as
/// the connection's termination token fires.
pub struct Rendezvous {
    tx: mpsc::Sender<Handoff>,
    rx: Mutex<mpsc::Receiver<Handoff>>,
    end: CancellationToken,
}

impl Rendezvous {
    /// Create a rendezvous bound to a connection's termination token.
    pub fn new(end: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
            end,
        }
    }

    /// Hand `payload` to the other side and wait until it has been taken.
    pub async fn put(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        let (taken, was_taken) = oneshot::channel();
        tokio::select! {
            biased;
            () = self.end.cancelled() => return Err(ConnectionError::TransportClosed),
            sent = self.tx.send(Handoff { payload, taken }) => {
                sent.map_err(|_| ConnectionError::TransportClosed)?;
            }
        }
        tokio::select! {
            biased;
            ack = was_taken => ack.map_err(|_| ConnectionError::TransportClosed),
            () = self.end.cancelled() => Err(ConnectionError::TransportClosed),
        }
    }

    /// Wait for the next payload.
    pub async fn take(&self) -> Result<Vec<u8>, ConnectionError> {
        let mut rx = tokio::select! {
            biased;
            () = self.end.cancelled() => return Err(ConnectionError::TransportClosed),
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            () = self.end.cancelled() => Err(ConnectionError::TransportClosed),
            handoff = rx.recv() => {
                let handoff = handoff.ok_or(ConnectionError::TransportClosed)?;
                let _ = handoff.taken.send(());
                Ok(handoff.payload)
            }
        }
    }

    /// Like [`take`](Self::take), but gives up after `wait`.
    ///
    /// Returns `Ok(None)` on timeout. A payload not taken before the
    /// deadline stays queued for the next call.
    pub async fn take_timeout(&self, wait: Duration) -> Result<Option<Vec<u8>>, ConnectionError> {
        match tokio::time::timeout(wait, self.take()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Whether the owning connection has terminated.
    pub fn is_closed(&self) -> bool {
        self.end.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn put_waits_for_take() {
        let rv = Arc::new(Rendezvous::new(CancellationToken::new()));
        let putter = {
            let rv = Arc::clone(&rv);
            tokio::spawn(async move { rv.put(b"hello".to_vec()).await })
        };
        tokio::task::yield_now().await;
        assert!(!putter.is_finished());

        let got = rv.take().await.unwrap();
        assert_eq!(got, b"hello");
        putter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancelled_token_unblocks_put() {
        let end = CancellationToken::new();
        let rv = Arc::new(Rendezvous::new(end.clone()));
        let putter = {
            let rv = Arc::clone(&rv);
            tokio::spawn(async move { rv.put(b"x".to_vec()).await })
        };
        end.cancel();
        assert_matches!(putter.await.unwrap(), Err(ConnectionError::TransportClosed));
    }

    #[tokio::test]
    async fn cancelled_token_unblocks_take() {
        let end = CancellationToken::new();
        let rv = Arc::new(Rendezvous::new(end.clone()));
        let taker = {
            let rv = Arc::clone(&rv);
            tokio::spawn(async move { rv.take().await })
        };
        end.cancel();
        assert_matches!(taker.await.unwrap(), Err(ConnectionError::TransportClosed));
        assert!(rv.is_closed());
    }

    #[tokio::test]
    async fn put_after_close_fails_immediately() {
        let end = CancellationToken::new();
        end.cancel();
        let rv = Rendezvous::new(end);
        assert_matches!(rv.put(vec![1]).await, Err(ConnectionError::TransportClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn take_timeout_returns_none_and_keeps_payload() {
        let rv = Arc::new(Rendezvous::new(CancellationToken::new()));
        assert_eq!(rv.take_timeout(Duration::from_secs(1)).await.unwrap(), None);

        let putter = {
            let rv = Arc::clone(&rv);
            tokio::spawn(async move { rv.put(b"late".to_vec()).await })
        };
        let got = rv.take_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"late"[..]));
        putter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn payloads_arrive_in_order() {
        let rv = Arc::new(Rendezvous::new(CancellationToken::new()));
        let putter = {
            let rv = Arc::clone(&rv);
            tokio::spawn(async move {
                for i in 0..3u8 {
                    rv.put(vec![i]).await.unwrap();
                }
            })
        };
        for i in 0..3u8 {
            assert_eq!(rv.take().await.unwrap(), vec![i]);
        }
        putter.await.unwrap();
    }
}
