use crate::actor::Event;
use crate::replica::TimerEvent;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc;

struct TestUtilReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T: Debug> TestUtilReceiver<T> {
    fn new(rx: mpsc::Receiver<T>) -> Self {
        TestUtilReceiver { rx }
    }

    async fn recv(&mut self) -> T {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
            .expect("Expected value")
    }

    async fn recv_assert_timeout(&mut self, timeout: Duration) {
        if let Ok(event) = tokio::time::timeout(timeout, self.rx.recv()).await {
            panic!("Expected timeout, got {:?}", event);
        }
    }
}

/// Stands in for the replica actor's queue.
pub(crate) struct TestUtilActor {
    receiver: TestUtilReceiver<Event>,
    timeout: Duration,
}

impl TestUtilActor {
    pub(crate) fn new(actor_queue_rx: mpsc::Receiver<Event>) -> Self {
        TestUtilActor {
            receiver: TestUtilReceiver::new(actor_queue_rx),
            timeout: Duration::from_millis(10),
        }
    }

    pub(crate) async fn assert_timer_event(&mut self, expected: TimerEvent) {
        match self.receiver.recv().await {
            Event::Timer(event) => assert_eq!(event, expected),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(crate) async fn assert_no_event(&mut self) {
        self.receiver.recv_assert_timeout(self.timeout).await;
    }
}
