//! Digital input monitoring.
//!
//! Raw edges arrive on a channel from whatever edge source is wired up (sysfs
//! poller, bench console, tests). Each line runs its own glitch filter and
//! publishes a single debounced boolean that the control loop reads lock-free.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

use crate::task::TaskSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Line {
    /// Logging-enable toggle switch
    Logging,
    /// Brake light line
    Brake,
    /// Momentary shutdown button
    Shutdown,
}

impl Line {
    pub const ALL: [Line; 3] = [Line::Logging, Line::Brake, Line::Shutdown];

    fn index(self) -> usize {
        match self {
            Line::Logging => 0,
            Line::Brake => 1,
            Line::Shutdown => 2,
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Line::Logging => "logging",
            Line::Brake => "brake",
            Line::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn invert(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Raw level change reported by an edge source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub line: Line,
    pub level: Level,
}

impl Edge {
    pub fn new(line: Line, level: Level) -> Self {
        Self { line, level }
    }
}

/// Called with the new logical state whenever a debounced change commits
pub type Listener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct LineConfig {
    active_level: Level,
    debounce: Duration,
}

struct DebouncedLine {
    line: Line,
    config: Mutex<LineConfig>,
    active: AtomicBool,
    listener: Mutex<Option<Listener>>,
    pending: TaskSlot,
}

impl DebouncedLine {
    fn new(line: Line) -> Self {
        Self {
            line,
            config: Mutex::new(LineConfig {
                active_level: Level::High,
                debounce: Duration::ZERO,
            }),
            active: AtomicBool::new(false),
            listener: Mutex::new(None),
            pending: TaskSlot::new("debounce"),
        }
    }

    fn config(&self) -> LineConfig {
        *self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store the filtered state and notify the subscriber on a real change
    fn commit(&self, active: bool) {
        let previous = self.active.swap(active, Ordering::SeqCst);
        if previous == active {
            return;
        }
        log::debug!(
            "[INPUT] {} -> {}",
            self.line,
            if active { "active" } else { "inactive" }
        );

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener(active);
        }
    }
}

/// Debounced state of the logging switch, brake line and shutdown button
pub struct InputMonitor {
    lines: [Arc<DebouncedLine>; 3],
}

impl InputMonitor {
    pub fn new() -> Self {
        Self {
            lines: Line::ALL.map(|line| Arc::new(DebouncedLine::new(line))),
        }
    }

    fn line(&self, line: Line) -> &Arc<DebouncedLine> {
        &self.lines[line.index()]
    }

    /// Set polarity and glitch filter for a line
    pub fn configure(&self, line: Line, active_level: Level, debounce: Duration) {
        let state = self.line(line);
        *state.config.lock().unwrap_or_else(|e| e.into_inner()) = LineConfig {
            active_level,
            debounce,
        };
        state.pending.cancel();
        log::info!(
            "[INPUT] {} configured: active {:?}, glitch filter {:?}",
            line,
            active_level,
            debounce
        );
    }

    /// Attach the consumer of committed changes on `line`, replacing any previous one
    pub fn subscribe(&self, line: Line, listener: Listener) {
        *self
            .line(line)
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Latest debounced logical state
    pub fn read(&self, line: Line) -> bool {
        self.line(line).active.load(Ordering::SeqCst)
    }

    /// Feed one raw edge through the line's glitch filter.
    ///
    /// The level is committed once it has held for the debounce duration. A
    /// newer edge inside that window replaces the pending commit, so pulses
    /// narrower than the filter never reach readers or the subscriber.
    pub fn handle_edge(&self, edge: Edge) {
        let state = self.line(edge.line);
        let config = state.config();
        let active = edge.level == config.active_level;

        if config.debounce.is_zero() {
            state.commit(active);
            return;
        }

        let state_for_commit = Arc::clone(state);
        state.pending.replace(async move {
            tokio::time::sleep(config.debounce).await;
            state_for_commit.commit(active);
        });
    }

    /// Notification-delivery loop: drain edges until every sender is gone
    pub async fn run(self: Arc<Self>, mut edges: Receiver<Edge>) {
        while let Some(edge) = edges.recv().await {
            log::trace!("[INPUT] raw edge {:?}", edge);
            self.handle_edge(edge);
        }
        log::info!("[INPUT] edge source closed");
    }
}

impl Default for InputMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn monitor_with_filter(debounce_ms: u64) -> InputMonitor {
        let monitor = InputMonitor::new();
        monitor.configure(Line::Logging, Level::High, Duration::from_millis(debounce_ms));
        monitor.configure(Line::Brake, Level::High, Duration::from_millis(debounce_ms));
        monitor.configure(Line::Shutdown, Level::Low, Duration::from_millis(debounce_ms));
        monitor
    }

    #[test]
    fn test_polarity_without_filter() {
        let monitor = monitor_with_filter(0);
        assert!(!monitor.read(Line::Logging));

        monitor.handle_edge(Edge::new(Line::Logging, Level::High));
        assert!(monitor.read(Line::Logging));

        // Shutdown button is active low
        monitor.handle_edge(Edge::new(Line::Shutdown, Level::High));
        assert!(!monitor.read(Line::Shutdown));
        monitor.handle_edge(Edge::new(Line::Shutdown, Level::Low));
        assert!(monitor.read(Line::Shutdown));

        // Lines are independent
        assert!(!monitor.read(Line::Brake));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_level_commits_after_filter() {
        let monitor = monitor_with_filter(20);
        monitor.handle_edge(Edge::new(Line::Brake, Level::High));

        sleep(Duration::from_millis(10)).await;
        assert!(!monitor.read(Line::Brake));

        sleep(Duration::from_millis(15)).await;
        assert!(monitor.read(Line::Brake));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chatter_is_suppressed() {
        let monitor = monitor_with_filter(20);
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&changes);
        monitor.subscribe(
            Line::Logging,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // 5 ms glitches never settle
        for _ in 0..5 {
            monitor.handle_edge(Edge::new(Line::Logging, Level::High));
            sleep(Duration::from_millis(5)).await;
            monitor.handle_edge(Edge::new(Line::Logging, Level::Low));
            sleep(Duration::from_millis(5)).await;
        }
        sleep(Duration::from_millis(100)).await;

        assert!(!monitor.read(Line::Logging));
        assert_eq!(changes.load(Ordering::SeqCst), 0);

        monitor.handle_edge(Edge::new(Line::Logging, Level::High));
        sleep(Duration::from_millis(30)).await;
        assert!(monitor.read(Line::Logging));
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_channel() {
        let monitor = Arc::new(monitor_with_filter(0));
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let task = tokio::spawn(Arc::clone(&monitor).run(rx));

        tx.send(Edge::new(Line::Logging, Level::High)).await.unwrap();
        tx.send(Edge::new(Line::Brake, Level::High)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(monitor.read(Line::Logging));
        assert!(monitor.read(Line::Brake));
    }
}
