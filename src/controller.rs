//! Main control loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::Config;
use crate::display::{Display, DisplayLock, StatusFlags};
use crate::error::DaqResult;
use crate::inputs::{InputMonitor, Line};
use crate::sensors::{self, CoreReadings, SensorSuite};
use crate::session::{SessionEvent, SessionManager, SessionPaths};
use crate::shutdown::RunFlags;

/// Warning limits for the status LEDs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cvt_warn_temp_f: f32,
    pub low_battery_voltage: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cvt_warn_temp_f: 200.0,
            low_battery_voltage: 11.1,
        }
    }
}

/// Status LEDs for one iteration. NaN readings never raise a warning.
pub fn status_flags(
    core: &CoreReadings,
    brake: bool,
    logging: bool,
    thresholds: &Thresholds,
) -> StatusFlags {
    let mut status = StatusFlags::NONE;
    if core.cvt_temp >= thresholds.cvt_warn_temp_f {
        status |= StatusFlags::WARNING_TEMP;
    }
    if core.battery_voltage <= thresholds.low_battery_voltage {
        status |= StatusFlags::WARNING_BATTERY;
    }
    if brake {
        status |= StatusFlags::INFO_BRAKE;
    }
    if logging {
        status |= StatusFlags::INFO_DATA_LOGGING;
    }
    status
}

/// Whole units for the dash; NaN and negatives show as 0
fn dash_value(value: f32) -> u32 {
    if value.is_finite() && value > 0.0 {
        value as u32
    } else {
        0
    }
}

pub struct Controller<S, D> {
    sensors: S,
    display: D,
    inputs: Arc<InputMonitor>,
    sessions: SessionManager,
    lock: DisplayLock,
    flags: Arc<RunFlags>,
    thresholds: Thresholds,
    lock_duration: Duration,
    period: Duration,
    iterations: u64,
}

impl<S: SensorSuite, D: Display> Controller<S, D> {
    pub fn new(
        config: &Config,
        sensors: S,
        display: D,
        inputs: Arc<InputMonitor>,
        flags: Arc<RunFlags>,
    ) -> Self {
        Self {
            sensors,
            display,
            inputs,
            sessions: SessionManager::new(SessionPaths::from_config(config)),
            lock: DisplayLock::new(),
            flags,
            thresholds: Thresholds {
                cvt_warn_temp_f: config.cvt_warn_temp_f,
                low_battery_voltage: config.low_battery_voltage,
            },
            lock_duration: config.display_lock(),
            period: config.loop_period(),
            iterations: 0,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn display_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Bring up sensors and display. Failures here abort startup.
    pub fn start(&mut self) -> DaqResult<()> {
        self.sensors.init()?;
        self.display.begin()?;
        self.sensors.begin()?;
        log::info!("[LOOP] sensors and display ready");
        Ok(())
    }

    /// One pass: read, open/close, log, render
    pub fn step(&mut self) -> DaqResult<()> {
        let core = sensors::read_core(&mut self.sensors);

        let logging = self.inputs.read(Line::Logging);
        let extended = logging && !self.sessions.is_open() && sensors::extended_present(&mut self.sensors);
        if let Some(event) = self.sessions.maybe_open_or_close(logging, extended)? {
            self.on_session_event(event);
        }

        let written = match self.sessions.active_mut() {
            Some(session) => {
                let extended = session
                    .is_extended()
                    .then(|| sensors::read_extended(&mut self.sensors));
                Some(session.write_row(&core, extended.as_ref()))
            }
            None => None,
        };
        if let Some(Err(e)) = written {
            log::error!("[LOOP] write failed, ending session until logging is switched off: {}", e);
            if let Some(event) = self.sessions.fail_active() {
                self.on_session_event(event);
            }
        }

        let status = status_flags(
            &core,
            self.inputs.read(Line::Brake),
            self.sessions.is_open(),
            &self.thresholds,
        );

        // Checked right before rendering; the unlock task may flip it any time
        if !self.lock.is_locked() {
            if let Err(e) = self.display.update(dash_value(core.rear_speed), dash_value(core.rpm), status) {
                log::warn!("[LOOP] display update failed: {}", e);
            }
        }

        self.iterations += 1;
        Ok(())
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        let number = match event {
            SessionEvent::Opened { number, .. } | SessionEvent::Closed { number, .. } => number,
            SessionEvent::Exhausted => return,
        };
        if let Err(e) = self
            .lock
            .trigger(&mut self.display, u32::from(number), self.lock_duration)
        {
            log::warn!("[LOOP] failed to show session number {}: {}", number, e);
        }
    }

    async fn run_loop(&mut self) -> DaqResult<()> {
        let mut last_report = Instant::now();
        let mut reported_iterations = self.iterations;

        while self.flags.is_running() {
            let started = Instant::now();
            self.step()?;

            let since_report = last_report.elapsed();
            if since_report >= Duration::from_secs(10) {
                let rate = (self.iterations - reported_iterations) as f64 / since_report.as_secs_f64();
                log::debug!(
                    "[LOOP] {:.1} iterations/s, session {}",
                    rate,
                    self.sessions
                        .active()
                        .map(|s| format!("{:04} ({} rows)", s.number(), s.rows()))
                        .unwrap_or_else(|| "closed".to_string())
                );
                last_report = Instant::now();
                reported_iterations = self.iterations;
            }

            let elapsed = started.elapsed();
            if elapsed < self.period {
                sleep(self.period - elapsed).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(event) = self.sessions.close() {
            self.on_session_event(event);
        }
        if let Err(e) = self.display.end() {
            log::warn!("[LOOP] display end failed: {}", e);
        }
        if let Err(e) = self.sensors.end() {
            log::warn!("[LOOP] sensor end failed: {}", e);
        }
        if let Err(e) = self.display.close() {
            log::warn!("[LOOP] display close failed: {}", e);
        }
        if let Err(e) = self.sensors.close() {
            log::warn!("[LOOP] sensor close failed: {}", e);
        }
        self.lock.cancel();
    }

    /// Run until the run flag clears, then release everything, report done
    /// and hold the exit while a shutdown hand-off is in progress.
    pub async fn run(mut self) -> DaqResult<()> {
        log::info!("[LOOP] running (period {:?})", self.period);
        let result = self.run_loop().await;
        if let Err(e) = &result {
            log::error!("[LOOP] stopping: {}", e);
        }

        self.teardown();
        log::info!("[LOOP] stopped after {} iterations", self.iterations);
        self.flags.mark_done();
        self.flags.wait_exit_released().await;
        result
    }
}
