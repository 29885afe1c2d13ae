use crate::chain::ChainError;
use std::future::Future;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};

pub type SubscriptionSender<T> = mpsc::UnboundedSender<Result<T, ChainError>>;

/// Live event listener. Dropping it deregisters the listener: the producer
/// task is aborted and the channel closed, so no callback outlives the
/// session that registered it.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<Result<T, ChainError>>,
    producer: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Subscription fed by whoever holds the sender.
    pub fn channel() -> (SubscriptionSender<T>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            Self {
                receiver,
                producer: None,
            },
        )
    }

    /// Runs `producer` on the runtime until it returns or the subscription
    /// is dropped.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(SubscriptionSender<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, mut subscription) = Self::channel();
        subscription.producer = Some(tokio::spawn(producer(sender)));
        subscription
    }

    /// `None` once the producer is gone and the backlog is drained.
    pub async fn next(&mut self) -> Option<Result<T, ChainError>> {
        self.receiver.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn next__yields_items_in_order_then_none_when_sender_dropped() {
        // given
        let (sender, mut subscription) = Subscription::<u32>::channel();
        sender.send(Ok(1)).unwrap();
        sender.send(Err(ChainError::NoSigner)).unwrap();
        drop(sender);

        // then
        assert_eq!(subscription.next().await, Some(Ok(1)));
        assert_eq!(subscription.next().await, Some(Err(ChainError::NoSigner)));
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn drop__closes_channel_for_producer() {
        // given
        let (sender, subscription) = Subscription::<u32>::channel();

        // when
        drop(subscription);

        // then
        assert!(sender.is_closed());
        assert!(sender.send(Ok(5)).is_err());
    }

    #[tokio::test]
    async fn drop__aborts_spawned_producer() {
        // given
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
        let subscription = Subscription::<u32>::spawn(move |sender| async move {
            let _guard = DropSignal(done_tx);
            loop {
                if sender.send(Ok(0)).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        // when
        drop(subscription);

        // then
        let signalled = tokio::time::timeout(Duration::from_secs(1), done_rx.recv()).await;
        assert!(signalled.is_ok());
    }

    struct DropSignal(mpsc::UnboundedSender<()>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            let _ = self.0.send(());
        }
    }
}
