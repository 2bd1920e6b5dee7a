//! Trailing-edge debounce of change signals.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default quiet period before a burst of changes triggers a reload.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Run `on_fire` once per burst of signals on `rx`.
///
/// A burst ends after `quiet` elapses with no new signal. `on_fire` returns
/// `false` to stop the task. The task also ends once every sender is gone.
pub fn spawn_debouncer<F, Fut>(
    quiet: Duration,
    mut rx: mpsc::UnboundedReceiver<()>,
    mut on_fire: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            let mut closed = false;
            loop {
                match tokio::time::timeout(quiet, rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }
            if !on_fire().await || closed {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<bool> + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        (fired, move || {
            f.fetch_add(1, Ordering::SeqCst);
            std::future::ready(true)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_fires_once() {
        let (fired, on_fire) = counter();
        let (tx, rx) = mpsc::unbounded_channel();
        let _task = spawn_debouncer(DEFAULT_DEBOUNCE, rx, on_fire);

        for _ in 0..3 {
            tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_fire_separately() {
        let (fired, on_fire) = counter();
        let (tx, rx) = mpsc::unbounded_channel();
        let _task = spawn_debouncer(DEFAULT_DEBOUNCE, rx, on_fire);

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_burst_fires_when_senders_close() {
        let (fired, on_fire) = counter();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn_debouncer(DEFAULT_DEBOUNCE, rx, on_fire);

        tx.send(()).unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
