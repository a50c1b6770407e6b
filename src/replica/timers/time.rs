#[cfg(test)]
use tokio::sync::watch;
#[cfg(test)]
use tokio::time::Duration;
use tokio::time::Instant;

#[async_trait::async_trait]
pub(crate) trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let now = Instant::now();
    let (tx, rx) = watch::channel(now);
    let clock = MockClock { current_time: rx };
    let controller = MockClockController {
        current_time: tx,
        time_of_instantiation: now,
    };

    (clock, controller)
}

/// Time only moves when the paired controller says so.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockClock {
    current_time: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.current_time.borrow() < deadline {
            if self.current_time.changed().await.is_err() {
                // Controller is gone, time will never reach the deadline.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct MockClockController {
    current_time: watch::Sender<Instant>,
    time_of_instantiation: Instant,
}

#[cfg(test)]
impl MockClockController {
    pub(crate) fn elapsed_time(&self) -> Duration {
        *self.current_time.borrow() - self.time_of_instantiation
    }

    /// Advance in steps smaller than what you want to observe. A sleeper only promises to wake
    /// at or after its deadline, so one big leap wakes everyone at once.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let new_now = *self.current_time.borrow() + duration;
        let _ = self.current_time.send(new_now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn mock_clock_wakes_sleepers_at_deadline() {
        let delay = Duration::from_millis(200);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut clock, mut controller) = mocked_clock();

        // Fixed before spawning; the task may not run until after the first advance.
        let deadline = clock.now() + delay;
        tokio::spawn(async move {
            clock.sleep_until(deadline).await;
            let _ = tx.send(clock.now());
        });

        controller.advance(delay / 2);
        tokio::time::timeout(Duration::from_millis(20), rx.recv())
            .await
            .expect_err("Woke up too early");

        controller.advance(delay / 2);
        let woke_at = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Never woke up")
            .unwrap();
        assert_eq!(controller.elapsed_time(), delay);
        assert!(woke_at >= controller.time_of_instantiation + delay);
    }
}
