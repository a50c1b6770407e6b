use std::fmt;
use tokio::sync::oneshot;

/// One-shot reply channel handed to the replica with a request. Dropping it without sending
/// closes the receiver, which callers observe as the replica going away.
pub struct Callback<T>(oneshot::Sender<T>);

impl<T> Callback<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Callback(tx), rx)
    }

    pub fn send(self, message: T) {
        // The caller may have given up waiting; that's fine.
        let _ = self.0.send(message);
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}
