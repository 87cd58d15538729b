//! Single-fire result cells.
//!
//! A [`Signal`] can be fired at most once. Every later fire is a silent
//! no-op, so racing producers (an error callback and a close callback for
//! the same session, say) never block, never panic and never overwrite the
//! first value. Any number of [`SignalReceiver`]s can read the value, and
//! reading after the fire never suspends.
//!
//! Built on [`tokio::sync::watch`], which gives cancel-safe waiting for free.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::watch;

// ============================================================================
// Signal
// ============================================================================

/// Write side of a single-fire cell.
#[derive(Debug)]
pub struct Signal<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Signal<T> {
    /// Creates an unfired signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Fires the signal with `value`.
    ///
    /// Returns `true` if this call set the value, `false` if the signal had
    /// already fired (in which case `value` is discarded).
    pub fn fire(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    /// Returns `true` if the signal has fired.
    #[inline]
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Creates a new reader of this signal.
    #[must_use]
    pub fn subscribe(&self) -> SignalReceiver<T> {
        SignalReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SignalReceiver
// ============================================================================

/// Read side of a single-fire cell. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SignalReceiver<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> SignalReceiver<T> {
    /// Returns the value if the signal has fired, without waiting.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Waits until the signal fires and returns its value.
    ///
    /// Returns `None` if the [`Signal`] was dropped without firing.
    /// Cancel-safe: dropping the future loses nothing.
    pub async fn wait(&mut self) -> Option<T> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::time::timeout;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_first_fire_wins() {
        let signal = Signal::new();
        let reader = signal.subscribe();

        assert!(!signal.is_fired());
        assert!(signal.fire(1));
        assert!(!signal.fire(2));
        assert!(signal.is_fired());
        assert_eq!(reader.get(), Some(1));
    }

    #[test]
    fn test_reader_created_after_fire_sees_value() {
        let signal = Signal::new();
        signal.fire("done");
        assert_eq!(signal.subscribe().get(), Some("done"));
    }

    #[tokio::test]
    async fn test_wait_resolves_on_fire() {
        let signal = Signal::new();
        let mut reader = signal.subscribe();

        let waiter = tokio::spawn(async move { reader.wait().await });
        tokio::task::yield_now().await;
        signal.fire(7u32);

        let value = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait should resolve")
            .expect("task should not panic");
        assert_eq!(value, Some(7));
    }

    #[test]
    fn test_wait_pending_until_fired() {
        let signal = Signal::new();
        let mut reader = signal.subscribe();

        let mut wait = task::spawn(reader.wait());
        assert_pending!(wait.poll());

        signal.fire(5u16);
        assert!(wait.is_woken());
        assert_eq!(assert_ready!(wait.poll()), Some(5));
    }

    #[tokio::test]
    async fn test_wait_after_fire_does_not_block() {
        let signal = Signal::new();
        signal.fire(3u8);
        let mut reader = signal.subscribe();

        assert_eq!(reader.wait().await, Some(3));
        assert_eq!(reader.wait().await, Some(3));
    }

    #[tokio::test]
    async fn test_dropped_signal_yields_none() {
        let signal: Signal<u8> = Signal::new();
        let mut reader = signal.subscribe();
        drop(signal);

        assert_eq!(reader.wait().await, None);
    }

    proptest! {
        #[test]
        fn prop_only_first_value_is_kept(values in proptest::collection::vec(any::<i32>(), 1..32)) {
            let signal = Signal::new();
            let fired: Vec<bool> = values.iter().map(|v| signal.fire(*v)).collect();

            prop_assert_eq!(fired.iter().filter(|f| **f).count(), 1);
            prop_assert!(fired[0]);
            prop_assert_eq!(signal.subscribe().get(), Some(values[0]));
        }
    }
}
