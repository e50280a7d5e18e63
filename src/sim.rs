//! Simulated bus devices for bench runs without the car attached.
//!
//! They plug into `AdcSensors` exactly where the SPI/I2C drivers would, so
//! simulated readings go through the real channel map and conversions.

use std::time::Instant;

use crate::adc::{AdcBus, Accelerometer, ChipSelect, Device, IrDevice, IrThermometer};
use crate::error::SensorError;

fn seconds_since(start: Instant) -> f32 {
    start.elapsed().as_secs_f32()
}

/// Raw count oscillating around `center` (fraction of full scale)
fn wave(t: f32, rate: f32, phase: f32, center: f32, swing: f32) -> u16 {
    let level = (center + swing * (t * rate + phase).sin()).clamp(0.0, 1.0);
    (level * 1023.0).round() as u16
}

/// Both ADC dongles. Without the testing harness only the rear dongle's
/// speed, tachometer and battery channels answer.
pub struct SimAdc {
    start: Instant,
    harness: bool,
}

impl SimAdc {
    pub fn new(harness: bool) -> Self {
        Self {
            start: Instant::now(),
            harness,
        }
    }
}

impl Device for SimAdc {}

impl AdcBus for SimAdc {
    fn sample(&mut self, chip: ChipSelect, channel: u8) -> Result<u16, SensorError> {
        let t = seconds_since(self.start);
        let raw = match (chip, channel) {
            (ChipSelect::Cs1, 0) => wave(t, 0.2, 0.0, 0.05, 0.04),
            (ChipSelect::Cs1, 1) => wave(t, 0.5, 0.0, 0.6, 0.3),
            // ~12.2 V, sagging slowly
            (ChipSelect::Cs1, 4) => (952.0 - (t * 0.1).min(100.0)) as u16,
            _ if !self.harness => return Err(SensorError::Absent),
            (ChipSelect::Cs0, 0) | (ChipSelect::Cs0, 1) => wave(t, 0.2, 0.1, 0.05, 0.04),
            (ChipSelect::Cs0, 2) | (ChipSelect::Cs0, 3) => wave(t, 0.3, 0.0, 0.3, 0.25),
            (ChipSelect::Cs0, 4) => wave(t, 0.1, 0.0, 0.5, 0.25),
            (_, channel) if channel < 8 => wave(t, 3.0, f32::from(channel), 0.5, 0.1),
            _ => return Err(SensorError::Transport(format!("no channel {}", channel))),
        };
        Ok(raw)
    }
}

pub struct SimIr {
    start: Instant,
    harness: bool,
}

impl SimIr {
    pub fn new(harness: bool) -> Self {
        Self {
            start: Instant::now(),
            harness,
        }
    }
}

impl Device for SimIr {}

impl IrThermometer for SimIr {
    fn object_temp(&mut self, device: IrDevice) -> Result<f32, SensorError> {
        let t = seconds_since(self.start);
        match device {
            IrDevice::CvtBelt => Ok(150.0 + (t * 0.05).sin() * 60.0),
            _ if self.harness => Ok(120.0 + (t * 0.05).sin() * 40.0),
            _ => Err(SensorError::Absent),
        }
    }

    fn ambient_temp(&mut self, _device: IrDevice) -> Result<f32, SensorError> {
        Ok(75.0 + (seconds_since(self.start) * 0.01).sin())
    }
}

pub struct SimAccel {
    start: Instant,
}

impl SimAccel {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SimAccel {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for SimAccel {}

impl Accelerometer for SimAccel {
    fn acceleration(&mut self) -> Result<[f32; 3], SensorError> {
        let t = seconds_since(self.start);
        Ok([
            (t * 2.0).sin() * 0.5,
            (t * 2.0).cos() * 0.3,
            1.0 + t.sin() * 0.05,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::AdcSensors;
    use crate::sensors::{extended_present, read_core, read_extended, SensorSuite};

    #[test]
    fn test_wave_stays_in_range() {
        for step in 0..1000 {
            let t = step as f32 * 0.37;
            assert!(wave(t, 1.0, 0.0, 0.9, 0.5) <= 1023);
            assert_eq!(wave(t, 1.0, 0.0, 0.05, 0.0), 51);
        }
    }

    #[test]
    fn test_simulated_car_without_harness() {
        let mut sensors = AdcSensors::new(SimAdc::new(false), SimIr::new(false), SimAccel::new());
        sensors.init().unwrap();
        sensors.begin().unwrap();

        let core = read_core(&mut sensors);
        assert!(core.columns().iter().all(|v| !v.is_nan()));
        assert!(core.battery_voltage > 11.1 && core.battery_voltage < 12.6);
        assert!(core.rpm >= 0.0 && core.rpm <= 3800.0);
        assert!(!extended_present(&mut sensors));
    }

    #[test]
    fn test_simulated_harness_reads_every_column() {
        let mut sensors = AdcSensors::new(SimAdc::new(true), SimIr::new(true), SimAccel::new());
        assert!(extended_present(&mut sensors));
        let extended = read_extended(&mut sensors);
        assert!(extended.0.iter().all(|v| !v.is_nan()));
    }
}
