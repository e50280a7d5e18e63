//! Long-press detection on the shutdown button.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::task::TaskSlot;

/// User action run once per qualifying hold. Returns the future to execute on
/// the watchdog's callback task.
pub type ShutdownCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Idle,
    /// Button down since the given instant
    Timing(Instant),
    /// Callback launched for the current press; waiting for release
    Fired,
}

struct Inner {
    state: Mutex<HoldState>,
    timeout: Mutex<Duration>,
    callback: Mutex<Option<ShutdownCallback>>,
    hold_timer: TaskSlot,
    callback_task: TaskSlot,
}

impl Inner {
    fn timeout(&self) -> Duration {
        *self.timeout.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Timing -> Fired. Only the first caller for a given press wins.
    fn try_fire(&self, pressed_at: Instant) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != HoldState::Timing(pressed_at) {
                return;
            }
            *state = HoldState::Fired;
        }
        log::warn!(
            "[WATCHDOG] shutdown button held for {:?}",
            pressed_at.elapsed()
        );
        self.launch();
    }

    fn launch(&self) {
        let callback = self.callback.lock().unwrap_or_else(|e| e.into_inner());
        match callback.as_ref() {
            // Held across replace so a concurrent on_shutdown cannot interleave
            Some(callback) => self.callback_task.replace(callback()),
            None => log::warn!("[WATCHDOG] no shutdown callback registered"),
        }
    }
}

/// Hold detector: `Idle -> Timing -> Idle` on an early release,
/// `Timing -> Fired -> Idle` when the press reaches the timeout.
///
/// The timeout is inclusive: a press released exactly at the deadline still
/// counts, even if the release edge beats the timer task.
#[derive(Clone)]
pub struct ShutdownWatchdog {
    inner: Arc<Inner>,
}

impl ShutdownWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(HoldState::Idle),
                timeout: Mutex::new(timeout),
                callback: Mutex::new(None),
                hold_timer: TaskSlot::new("shutdown-hold"),
                callback_task: TaskSlot::new("shutdown-callback"),
            }),
        }
    }

    /// Register the shutdown action, replacing any previous one
    pub fn on_shutdown(&self, callback: ShutdownCallback) {
        *self
            .inner
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Change the hold duration. Zero disables the watchdog and drops any
    /// press currently being timed without firing.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.inner.timeout.lock().unwrap_or_else(|e| e.into_inner()) = timeout;
        if timeout.is_zero() {
            self.inner.hold_timer.cancel();
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*state, HoldState::Timing(_)) {
                *state = HoldState::Idle;
            }
        }
    }

    pub fn state(&self) -> HoldState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Debounced button edge. `pressed` is the logical (active) state.
    pub fn on_edge(&self, pressed: bool) {
        let timeout = self.inner.timeout();

        if pressed {
            if timeout.is_zero() {
                return;
            }
            let pressed_at = Instant::now();
            *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) =
                HoldState::Timing(pressed_at);

            let inner = Arc::clone(&self.inner);
            self.inner.hold_timer.replace(async move {
                tokio::time::sleep_until(pressed_at + timeout).await;
                inner.try_fire(pressed_at);
            });
            return;
        }

        self.inner.hold_timer.cancel();
        let state = self.state();
        match state {
            HoldState::Timing(pressed_at) if !timeout.is_zero() && pressed_at.elapsed() >= timeout => {
                self.inner.try_fire(pressed_at);
            }
            HoldState::Timing(pressed_at) => {
                log::debug!(
                    "[WATCHDOG] released after {:?}, below {:?}",
                    pressed_at.elapsed(),
                    timeout
                );
            }
            HoldState::Idle | HoldState::Fired => {}
        }
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) = HoldState::Idle;
    }

    /// Adapter for `InputMonitor::subscribe`
    pub fn listener(&self) -> crate::inputs::Listener {
        let watchdog = self.clone();
        Arc::new(move |pressed| watchdog.on_edge(pressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counting_callback(count: &Arc<AtomicUsize>) -> ShutdownCallback {
        let count = Arc::clone(count);
        Arc::new(move || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_press_never_fires() {
        let watchdog = ShutdownWatchdog::new(Duration::from_millis(250));
        let count = Arc::new(AtomicUsize::new(0));
        watchdog.on_shutdown(counting_callback(&count));

        watchdog.on_edge(true);
        sleep(Duration::from_millis(200)).await;
        watchdog.on_edge(false);
        assert_eq!(watchdog.state(), HoldState::Idle);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_press_fires_once() {
        let watchdog = ShutdownWatchdog::new(Duration::from_millis(250));
        let count = Arc::new(AtomicUsize::new(0));
        watchdog.on_shutdown(counting_callback(&count));

        watchdog.on_edge(true);
        assert!(matches!(watchdog.state(), HoldState::Timing(_)));
        sleep(Duration::from_secs(2)).await;
        assert_eq!(watchdog.state(), HoldState::Fired);
        watchdog.on_edge(false);
        sleep(Duration::from_millis(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(watchdog.state(), HoldState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_at_boundary_fires() {
        let watchdog = ShutdownWatchdog::new(Duration::from_millis(250));
        let count = Arc::new(AtomicUsize::new(0));
        watchdog.on_shutdown(counting_callback(&count));

        watchdog.on_edge(true);
        // Release lands exactly on the deadline
        tokio::time::advance(Duration::from_millis(250)).await;
        watchdog.on_edge(false);
        sleep(Duration::from_millis(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_disables() {
        let watchdog = ShutdownWatchdog::new(Duration::from_millis(250));
        let count = Arc::new(AtomicUsize::new(0));
        watchdog.on_shutdown(counting_callback(&count));

        watchdog.on_edge(true);
        sleep(Duration::from_millis(100)).await;
        watchdog.set_timeout(Duration::ZERO);
        assert_eq!(watchdog.state(), HoldState::Idle);

        sleep(Duration::from_secs(1)).await;
        watchdog.on_edge(false);
        watchdog.on_edge(true);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_replaces_callback() {
        let watchdog = ShutdownWatchdog::new(Duration::from_millis(50));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        watchdog.on_shutdown(counting_callback(&first));
        watchdog.on_shutdown(counting_callback(&second));

        watchdog.on_edge(true);
        sleep(Duration::from_millis(100)).await;
        watchdog.on_edge(false);
        sleep(Duration::from_millis(10)).await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_presses_never_overlap() {
        let watchdog = ShutdownWatchdog::new(Duration::from_millis(50));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicUsize::new(0));

        struct Running(Arc<AtomicUsize>);
        impl Drop for Running {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let (a, p, s) = (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&started));
        watchdog.on_shutdown(Arc::new(move || {
            let (active, peak, started) = (Arc::clone(&a), Arc::clone(&p), Arc::clone(&s));
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                let _running = Running(Arc::clone(&active));
                peak.fetch_max(now, Ordering::SeqCst);
                // Long-running callback (e.g. waiting on the main loop)
                sleep(Duration::from_secs(10)).await;
            }
            .boxed()
        }));

        for _ in 0..2 {
            watchdog.on_edge(true);
            sleep(Duration::from_millis(60)).await;
            watchdog.on_edge(false);
            sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(active.load(Ordering::SeqCst), 1);
    }
}
