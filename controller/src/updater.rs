//! Two ways to decide when the next reconcile should run, behind one
//! contract: `next_wakeup` resolves whenever a cycle should start.

use std::time::Duration;

use datasource::kubernetes::notify::ChangeReceiver;

pub enum Updater {
    Timed { interval: Duration },
    OnDemand { receiver: ChangeReceiver },
}

impl Updater {
    pub async fn next_wakeup(&mut self) {
        match self {
            Updater::Timed { interval } => tokio::time::sleep(*interval).await,
            Updater::OnDemand { receiver } => receiver.changed().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timed_updater_waits_roughly_the_interval() {
        let mut updater = Updater::Timed { interval: Duration::from_millis(20) };
        let start = tokio::time::Instant::now();
        updater.next_wakeup().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn on_demand_updater_wakes_on_notify() {
        let (tx, rx) = datasource::kubernetes::notify::channel();
        let mut updater = Updater::OnDemand { receiver: rx };
        tx.notify();
        tokio::time::timeout(Duration::from_millis(50), updater.next_wakeup())
            .await
            .expect("should wake immediately");
    }
}
