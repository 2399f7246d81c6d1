//! Single-use rendezvous between two workers of one tunnel.
//!
//! A slot carries exactly one value from the side that fills it to the
//! side that takes it. Both ends can be used once per slot; a second
//! attempt fails with [`ProtocolError::HandoffConsumed`].

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{constants, ProtocolError, Result};

pub struct HandoffSlot<T> {
    name: &'static str,
    sender: Mutex<Option<oneshot::Sender<T>>>,
    receiver: Mutex<Option<oneshot::Receiver<T>>>,
}

impl<T> HandoffSlot<T> {
    pub fn new(name: &'static str) -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            name,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Hand `value` to the waiting side.
    ///
    /// # Errors
    /// `HandoffConsumed` if the slot was already filled, `ConnectionClosed`
    /// if the waiting side is gone.
    pub fn fill(&self, value: T) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?
            .take()
            .ok_or(ProtocolError::HandoffConsumed)?;
        sender
            .send(value)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Wait for the value, giving up after `timeout` or when `cancel` fires.
    ///
    /// # Errors
    /// `HandoffConsumed` on a second call, `Timeout` when the deadline
    /// passes, `ConnectionClosed` on cancellation.
    pub async fn take(&self, timeout: Duration, cancel: &CancellationToken) -> Result<T> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?
            .take()
            .ok_or(ProtocolError::HandoffConsumed)?;

        tokio::select! {
            _ = cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
            received = tokio::time::timeout(timeout, receiver) => match received {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
                Err(_) => Err(ProtocolError::Timeout),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_value_crosses_once() {
        let slot = Arc::new(HandoffSlot::new("test"));
        let cancel = CancellationToken::new();

        let filler = Arc::clone(&slot);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            filler.fill(5u32).unwrap();
        });

        assert_eq!(slot.take(Duration::from_secs(1), &cancel).await.unwrap(), 5);
        assert!(matches!(slot.fill(6), Err(ProtocolError::HandoffConsumed)));
        assert!(matches!(
            slot.take(Duration::from_secs(1), &cancel).await,
            Err(ProtocolError::HandoffConsumed)
        ));
    }

    #[tokio::test]
    async fn test_take_times_out() {
        let slot: HandoffSlot<u32> = HandoffSlot::new("test");
        let result = slot
            .take(Duration::from_millis(20), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_take_cancelled() {
        let slot: HandoffSlot<u32> = HandoffSlot::new("test");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = slot.take(Duration::from_secs(5), &cancel).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
