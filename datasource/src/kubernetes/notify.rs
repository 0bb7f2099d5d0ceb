//! A capacity-1 wakeup channel: a pending notification makes every further
//! one a no-op until the receiver drains it, mirroring a Go `select` with a
//! `default` branch on a buffered channel.

use tokio::sync::mpsc;

#[derive(Clone)]
pub struct ChangeNotifier {
    tx: mpsc::Sender<()>,
}

pub struct ChangeReceiver {
    rx: mpsc::Receiver<()>,
}

pub fn channel() -> (ChangeNotifier, ChangeReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ChangeNotifier { tx }, ChangeReceiver { rx })
}

impl ChangeNotifier {
    /// Signals a change. If a notification is already pending, this is a
    /// silent no-op: the next receive will pick up all changes since then.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

impl ChangeReceiver {
    pub async fn changed(&mut self) {
        self.rx.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_notify_does_not_block_or_queue() {
        let (tx, mut rx) = channel();
        tx.notify();
        tx.notify();
        tx.notify();
        rx.changed().await;
        assert!(tokio::time::timeout(std::time::Duration::from_millis(10), rx.changed())
            .await
            .is_err());
    }
}
