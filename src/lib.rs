pub mod adc;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod gpio;
pub mod inputs;
pub mod sensors;
pub mod session;
pub mod shutdown;
pub mod sim;
pub mod task;
pub mod watchdog;

pub use config::Config;
pub use controller::Controller;
pub use error::{DaqError, DaqResult, SensorError};
pub use inputs::{Edge, InputMonitor, Level, Line};
pub use shutdown::RunFlags;
pub use watchdog::ShutdownWatchdog;
