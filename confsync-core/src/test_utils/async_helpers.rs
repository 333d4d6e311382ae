//! Async test helpers

use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

/// Receive from an unbounded channel with a timeout
pub async fn recv_timeout<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Everything currently queued on a channel
pub fn try_drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

/// Run a future, panicking if it takes longer than `duration`
pub async fn within<F: Future>(duration: Duration, future: F) -> F::Output {
    match timeout(duration, future).await {
        Ok(output) => output,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_timeout_and_drain() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(1).unwrap();
        tx.send(2).unwrap();

        assert_eq!(recv_timeout(&mut rx, Duration::from_millis(50)).await, Ok(1));
        assert_eq!(try_drain(&mut rx), vec![2]);
        assert_eq!(
            recv_timeout(&mut rx, Duration::from_millis(20)).await,
            Err(RecvTimeoutError::Timeout)
        );

        drop(tx);
        assert_eq!(
            recv_timeout(&mut rx, Duration::from_millis(20)).await,
            Err(RecvTimeoutError::Closed)
        );
    }
}
