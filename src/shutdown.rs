use tokio::sync::watch;

/// Process wide stop signal: `true` asks every task to stop.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once a stop was requested or the sender is gone.
pub async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_on_stop() {
        let (tx, mut rx) = channel();
        let waiter = tokio::spawn(async move { stopped(&mut rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn resolves_when_sender_dropped() {
        let (tx, mut rx) = channel();
        drop(tx);
        stopped(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn pending_while_running() {
        let (_tx, mut rx) = channel();
        let result = tokio::time::timeout(Duration::from_secs(1), stopped(&mut rx)).await;
        assert!(result.is_err());
    }
}
