//! Run/stop flags and the hand-off to the system shutdown command.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DaqError;
use crate::watchdog::ShutdownCallback;

/// Process-wide lifecycle flags. Set once, never reset (except the
/// `wait_on_done` fallback when the hand-off fails).
#[derive(Debug)]
pub struct RunFlags {
    run: AtomicBool,
    done: AtomicBool,
    wait_on_done: AtomicBool,
}

impl RunFlags {
    pub fn new() -> Self {
        Self {
            run: AtomicBool::new(true),
            done: AtomicBool::new(false),
            wait_on_done: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::SeqCst)
    }

    /// Ask the control loop to finish its current iteration and exit
    pub fn request_stop(&self) {
        self.run.store(false, Ordering::SeqCst);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Control loop has released every resource
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn hold_exit(&self, hold: bool) {
        self.wait_on_done.store(hold, Ordering::SeqCst);
    }

    pub fn exit_held(&self) -> bool {
        self.wait_on_done.load(Ordering::SeqCst)
    }

    /// Spin until the control loop reports done
    pub async fn wait_done(&self) {
        while !self.is_done() {
            tokio::task::yield_now().await;
        }
    }

    /// Spin while a shutdown hand-off is in progress
    pub async fn wait_exit_released(&self) {
        while self.exit_held() {
            tokio::task::yield_now().await;
        }
    }
}

impl Default for RunFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform hand-off performed after the control loop has shut down.
/// On success the process is gone; the returned error is the failure case.
pub trait SystemShutdown: Send + Sync {
    fn execute(&self) -> io::Error;
}

/// Replaces this process with a command (normally `sudo shutdown now`)
#[derive(Debug, Clone)]
pub struct ExecShutdown {
    program: String,
    args: Vec<String>,
}

impl ExecShutdown {
    pub fn new(command: &[String]) -> Result<Self, DaqError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| DaqError::Config("shutdown command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl SystemShutdown for ExecShutdown {
    fn execute(&self) -> io::Error {
        log::warn!("[SHUTDOWN] exec {} {}", self.program, self.args.join(" "));
        Command::new(&self.program).args(&self.args).exec()
    }
}

/// The ordered shutdown sequence: hold the exit, stop the loop, wait for it
/// to release everything, then hand off. If the hand-off fails the exit hold
/// is released so the process ends normally.
pub async fn shutdown_sequence(flags: Arc<RunFlags>, system: Arc<dyn SystemShutdown>) {
    log::warn!("[SHUTDOWN] shutdown requested, stopping control loop");
    flags.hold_exit(true);
    flags.request_stop();
    flags.wait_done().await;

    let error = system.execute();
    log::error!("[SHUTDOWN] {}", DaqError::Shutdown(error.to_string()));
    flags.hold_exit(false);
}

/// Watchdog callback that runs `shutdown_sequence`
pub fn shutdown_callback(flags: Arc<RunFlags>, system: Arc<dyn SystemShutdown>) -> ShutdownCallback {
    Arc::new(move || -> BoxFuture<'static, ()> {
        shutdown_sequence(Arc::clone(&flags), Arc::clone(&system)).boxed()
    })
}
