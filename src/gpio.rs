//! Raw edge sources feeding the input monitor.
//!
//! On the car the three lines are polled through the sysfs GPIO interface; on
//! the bench they are driven by typed commands on stdin. Both report the
//! initial level of every line before any change, so the debounced state
//! starts out matching the hardware.

use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::Pins;
use crate::error::{DaqError, DaqResult};
use crate::inputs::{Edge, Level, Line};

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Well below the glitch filter so every settled level is seen
const POLL_PERIOD: Duration = Duration::from_millis(1);

/// Electrical polarity of each input on the harness
pub fn active_level(line: Line) -> Level {
    match line {
        Line::Logging | Line::Brake => Level::High,
        // Button pulls the line to ground
        Line::Shutdown => Level::Low,
    }
}

pub fn pin_for(pins: &Pins, line: Line) -> u32 {
    match line {
        Line::Logging => pins.logging,
        Line::Brake => pins.brake,
        Line::Shutdown => pins.shutdown,
    }
}

fn parse_level(text: &str) -> Option<Level> {
    match text.trim() {
        "0" => Some(Level::Low),
        "1" => Some(Level::High),
        _ => None,
    }
}

async fn write_attr(path: &Path, value: &str) -> DaqResult<()> {
    tokio::fs::write(path, value)
        .await
        .map_err(|e| DaqError::Gpio(format!("write {:?} to {}: {}", value, path.display(), e)))
}

/// One exported input pin
struct SysfsPin {
    line: Line,
    value: PathBuf,
    last: Option<Level>,
}

impl SysfsPin {
    /// Export the pin if needed and make it an input
    async fn open(root: &Path, line: Line, pin: u32) -> DaqResult<Self> {
        let dir = root.join(format!("gpio{}", pin));
        if !dir.exists() {
            write_attr(&root.join("export"), &pin.to_string()).await?;
        }
        write_attr(&dir.join("direction"), "in").await?;
        log::info!("[GPIO] {} on pin {}", line, pin);
        Ok(Self {
            line,
            value: dir.join("value"),
            last: None,
        })
    }

    /// Read the pin; returns an edge when the level differs from the last read
    async fn poll(&mut self) -> DaqResult<Option<Edge>> {
        let text = tokio::fs::read_to_string(&self.value)
            .await
            .map_err(|e| DaqError::Gpio(format!("read {}: {}", self.value.display(), e)))?;
        let level = parse_level(&text).ok_or_else(|| {
            DaqError::Gpio(format!("unexpected value {:?} in {}", text.trim(), self.value.display()))
        })?;

        if self.last == Some(level) {
            return Ok(None);
        }
        self.last = Some(level);
        Ok(Some(Edge::new(self.line, level)))
    }
}

/// Poll the three input pins under `root` until the receiver goes away.
/// Setup and read failures are returned; they end the edge source.
pub async fn sysfs_loop(tx: Sender<Edge>, root: PathBuf, pins: Pins) -> DaqResult<()> {
    let mut lines = Vec::with_capacity(Line::ALL.len());
    for line in Line::ALL {
        lines.push(SysfsPin::open(&root, line, pin_for(&pins, line)).await?);
    }

    let mut ticker = interval(POLL_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut edge_count = 0u64;

    loop {
        ticker.tick().await;
        for pin in lines.iter_mut() {
            let Some(edge) = pin.poll().await? else {
                continue;
            };
            if tx.send(edge).await.is_err() {
                log::info!("[GPIO] edge channel closed after {} edges", edge_count);
                return Ok(());
            }
            edge_count += 1;
        }
    }
}

/// Parse one bench command into the raw edge the hardware would produce
pub fn parse_bench_command(command: &str) -> Option<Edge> {
    let mut words = command.split_whitespace().map(|w| w.to_ascii_lowercase());
    let line = match words.next()?.as_str() {
        "logging" | "log" => Line::Logging,
        "brake" => Line::Brake,
        "shutdown" => Line::Shutdown,
        _ => return None,
    };
    let active = match words.next()?.as_str() {
        "on" | "press" | "1" => true,
        "off" | "release" | "0" => false,
        _ => return None,
    };
    if words.next().is_some() {
        return None;
    }

    let level = if active {
        active_level(line)
    } else {
        active_level(line).invert()
    };
    Some(Edge::new(line, level))
}

/// Drive the lines from stdin, one command per line (`logging on`,
/// `brake off`, `shutdown press`, ...). All lines start inactive.
pub async fn bench_loop(tx: Sender<Edge>) -> DaqResult<()> {
    for line in Line::ALL {
        if tx.send(Edge::new(line, active_level(line).invert())).await.is_err() {
            return Ok(());
        }
    }
    log::info!("[GPIO] bench mode: type e.g. `logging on`, `brake off`, `shutdown press`");

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    while let Some(command) = commands.next_line().await? {
        if command.trim().is_empty() {
            continue;
        }
        match parse_bench_command(&command) {
            Some(edge) => {
                if tx.send(edge).await.is_err() {
                    break;
                }
            }
            None => log::warn!("[GPIO] unknown bench command {:?}", command.trim()),
        }
    }
    log::info!("[GPIO] bench input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::sync::mpsc;

    #[test]
    fn test_bench_commands() {
        assert_eq!(
            parse_bench_command("logging on"),
            Some(Edge::new(Line::Logging, Level::High))
        );
        assert_eq!(
            parse_bench_command("  Brake OFF "),
            Some(Edge::new(Line::Brake, Level::Low))
        );
        // Shutdown is active low
        assert_eq!(
            parse_bench_command("shutdown press"),
            Some(Edge::new(Line::Shutdown, Level::Low))
        );
        assert_eq!(
            parse_bench_command("shutdown release"),
            Some(Edge::new(Line::Shutdown, Level::High))
        );

        assert_eq!(parse_bench_command("horn on"), None);
        assert_eq!(parse_bench_command("logging"), None);
        assert_eq!(parse_bench_command("logging on now"), None);
    }

    #[test]
    fn test_pin_mapping() {
        let pins = Pins::default();
        assert_eq!(pin_for(&pins, Line::Shutdown), 23);
        assert_eq!(pin_for(&pins, Line::Logging), 24);
        assert_eq!(pin_for(&pins, Line::Brake), 18);
    }

    fn fake_sysfs(root: &Path, pins: &Pins, level: &str) {
        for line in Line::ALL {
            let dir = root.join(format!("gpio{}", pin_for(pins, line)));
            fs::create_dir_all(&dir).unwrap();
            set_value(&dir, level);
        }
    }

    /// Replace the value file in one step so the poller never sees it empty
    fn set_value(dir: &Path, level: &str) {
        let staged = dir.join("value.tmp");
        fs::write(&staged, level).unwrap();
        fs::rename(staged, dir.join("value")).unwrap();
    }

    #[tokio::test]
    async fn test_sysfs_reports_initial_levels_then_changes() {
        let root = tempfile::tempdir().unwrap();
        let pins = Pins::default();
        fake_sysfs(root.path(), &pins, "1\n");

        let (tx, mut rx) = mpsc::channel(16);
        let poller = tokio::spawn(sysfs_loop(tx, root.path().to_path_buf(), pins));

        let mut initial = Vec::new();
        for _ in 0..3 {
            initial.push(rx.recv().await.unwrap());
        }
        assert!(initial.iter().all(|e| e.level == Level::High));

        set_value(&root.path().join("gpio24"), "0\n");
        assert_eq!(rx.recv().await.unwrap(), Edge::new(Line::Logging, Level::Low));

        // Dropping the receiver stops the poller cleanly
        drop(rx);
        set_value(&root.path().join("gpio18"), "0\n");
        assert!(poller.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_sysfs_missing_root_is_gpio_error() {
        let root = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let result = sysfs_loop(tx, root.path().join("absent"), Pins::default()).await;
        assert!(matches!(result, Err(DaqError::Gpio(_))));
    }

    #[tokio::test]
    async fn test_garbage_value_is_gpio_error() {
        let root = tempfile::tempdir().unwrap();
        let pins = Pins::default();
        fake_sysfs(root.path(), &pins, "x");
        let (tx, _rx) = mpsc::channel(16);
        let result = sysfs_loop(tx, root.path().to_path_buf(), pins).await;
        assert!(matches!(result, Err(DaqError::Gpio(_))));
    }
}
