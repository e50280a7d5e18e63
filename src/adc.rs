//! Sensor suite backed by the car's ADC dongles, IR thermometers and
//! accelerometer. Bus drivers plug in through the device traits below; this
//! module owns the channel map and the linear conversions to physical units.

use std::f32::consts::PI;

use crate::error::{DaqResult, SensorError};
use crate::sensors::{Quantity, SensorSuite};

/// Full-scale reading of the 10-bit converters
const ADC_MAX: f32 = 1023.0;

/// Lifecycle shared by every device driver
pub trait Device: Send {
    fn init(&mut self) -> DaqResult<()> {
        Ok(())
    }

    fn begin(&mut self) -> DaqResult<()> {
        Ok(())
    }

    fn end(&mut self) -> DaqResult<()> {
        Ok(())
    }

    fn close(&mut self) -> DaqResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipSelect {
    /// Front dongle
    Cs0,
    /// Rear dongle
    Cs1,
}

pub trait AdcBus: Device {
    /// Raw 10-bit sample from `channel` (0..=7) of one converter
    fn sample(&mut self, chip: ChipSelect, channel: u8) -> Result<u16, SensorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrDevice {
    CvtBelt,
    RearRotor,
    FrontLeftRotor,
    FrontRightRotor,
}

pub trait IrThermometer: Device {
    /// Object temperature in °F
    fn object_temp(&mut self, device: IrDevice) -> Result<f32, SensorError>;
    /// Die (ambient) temperature in °F
    fn ambient_temp(&mut self, device: IrDevice) -> Result<f32, SensorError>;
}

pub trait Accelerometer: Device {
    /// (x, y, z) in g
    fn acceleration(&mut self) -> Result<[f32; 3], SensorError>;
}

/// Linear map of `value` from [min, max] onto [new_min, new_max]
pub fn scale(new_min: f32, new_max: f32, min: f32, max: f32, value: f32) -> f32 {
    new_min + (value - min) * (new_max - new_min) / (max - min)
}

/// Hall sensor through a frequency-to-voltage converter, to mph
fn hal_to_mph(raw: u16) -> f32 {
    const MAX_HZ: f32 = 5000.0;
    const MPH_PER_HZ: f32 = 1.0 / 6.81;
    scale(0.0, MAX_HZ, 0.0, ADC_MAX, raw as f32) * MPH_PER_HZ
}

fn rpm(raw: u16) -> f32 {
    // Range of the converter, not of the engine (governed at 3800)
    scale(0.0, 3800.0, 0.0, ADC_MAX, raw as f32)
}

/// Ratiometric 0.5-4.5 V transducer on a 5 V reference, to psi
fn brake_pressure(raw: u16) -> f32 {
    let low = 0.5 / 5.0 * ADC_MAX;
    let high = 4.5 / 5.0 * ADC_MAX;
    scale(0.0, 2000.0, low, high, raw as f32)
}

fn steering_angle(raw: u16) -> f32 {
    scale(-90.0, 90.0, 0.0, ADC_MAX, raw as f32)
}

/// Suspension travel in inches from the rocker potentiometer.
///
/// The pot angle (0..60°, offset by `PHI` from the nearest link) closes a
/// triangle with links `A` and `B`; travel is the third side.
fn suspension_travel(raw: u16) -> f32 {
    const A: f32 = 10.0;
    const B: f32 = 7.0;
    const PHI: f32 = 2.0 / 3.0 * PI;
    let theta = scale(0.0, PI / 3.0, 0.0, ADC_MAX, raw as f32);
    // NaN when the geometry is impossible
    (A * A + B * B - 2.0 * A * B * (theta + PHI).cos()).sqrt()
}

fn battery_voltage(raw: u16) -> f32 {
    const CHARGED_VOLTAGE: f32 = 12.5;
    const CHARGED_READOUT: f32 = 976.0;
    scale(0.0, CHARGED_VOLTAGE, 0.0, CHARGED_READOUT, raw as f32)
}

/// Where each ADC-backed quantity is wired
fn adc_channel(quantity: Quantity) -> Option<(ChipSelect, u8)> {
    use ChipSelect::{Cs0, Cs1};
    let wiring = match quantity {
        Quantity::FrontLeftSpeed => (Cs0, 0),
        Quantity::FrontRightSpeed => (Cs0, 1),
        Quantity::FrontBrakePressure => (Cs0, 2),
        Quantity::RearBrakePressure => (Cs0, 3),
        Quantity::SteeringAngle => (Cs0, 4),
        Quantity::FrontLeftTravel => (Cs0, 5),
        Quantity::FrontRightTravel => (Cs0, 6),
        Quantity::RearSpeed => (Cs1, 0),
        Quantity::Rpm => (Cs1, 1),
        Quantity::RearLeftTravel => (Cs1, 2),
        Quantity::RearRightTravel => (Cs1, 3),
        Quantity::BatteryVoltage => (Cs1, 4),
        _ => return None,
    };
    Some(wiring)
}

pub struct AdcSensors<B, T, A> {
    adc: B,
    ir: T,
    accel: A,
}

impl<B: AdcBus, T: IrThermometer, A: Accelerometer> AdcSensors<B, T, A> {
    pub fn new(adc: B, ir: T, accel: A) -> Self {
        Self { adc, ir, accel }
    }

    fn convert(&mut self, quantity: Quantity, chip: ChipSelect, channel: u8) -> Result<f32, SensorError> {
        let raw = self.adc.sample(chip, channel)?;
        let value = match quantity {
            Quantity::FrontLeftSpeed | Quantity::FrontRightSpeed | Quantity::RearSpeed => {
                hal_to_mph(raw)
            }
            Quantity::FrontBrakePressure | Quantity::RearBrakePressure => brake_pressure(raw),
            Quantity::SteeringAngle => steering_angle(raw),
            Quantity::FrontLeftTravel
            | Quantity::FrontRightTravel
            | Quantity::RearLeftTravel
            | Quantity::RearRightTravel => suspension_travel(raw),
            Quantity::Rpm => rpm(raw),
            Quantity::BatteryVoltage => battery_voltage(raw),
            _ => return Err(SensorError::Absent),
        };
        Ok(value)
    }
}

impl<B: AdcBus, T: IrThermometer, A: Accelerometer> SensorSuite for AdcSensors<B, T, A> {
    fn init(&mut self) -> DaqResult<()> {
        self.accel.init()?;
        self.adc.init()?;
        self.ir.init()
    }

    fn begin(&mut self) -> DaqResult<()> {
        self.accel.begin()?;
        self.adc.begin()?;
        self.ir.begin()
    }

    fn end(&mut self) -> DaqResult<()> {
        self.accel.end()?;
        self.adc.end()?;
        self.ir.end()
    }

    fn close(&mut self) -> DaqResult<()> {
        self.accel.close()?;
        self.adc.close()?;
        self.ir.close()
    }

    fn acceleration(&mut self) -> Result<[f32; 3], SensorError> {
        self.accel.acceleration()
    }

    fn read(&mut self, quantity: Quantity) -> Result<f32, SensorError> {
        if let Some((chip, channel)) = adc_channel(quantity) {
            return self.convert(quantity, chip, channel);
        }
        match quantity {
            // Ambient is taken from the CVT sensor's die temperature
            Quantity::AmbientTemp => self.ir.ambient_temp(IrDevice::CvtBelt),
            Quantity::CvtTemp => self.ir.object_temp(IrDevice::CvtBelt),
            Quantity::RearRotorTemp => self.ir.object_temp(IrDevice::RearRotor),
            Quantity::FrontLeftRotorTemp => self.ir.object_temp(IrDevice::FrontLeftRotor),
            Quantity::FrontRightRotorTemp => self.ir.object_temp(IrDevice::FrontRightRotor),
            _ => Err(SensorError::Absent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{extended_present, read_core};
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeAdc {
        samples: HashMap<(u8, u8), u16>,
    }

    impl Device for FakeAdc {}

    impl AdcBus for FakeAdc {
        fn sample(&mut self, chip: ChipSelect, channel: u8) -> Result<u16, SensorError> {
            let chip = match chip {
                ChipSelect::Cs0 => 0,
                ChipSelect::Cs1 => 1,
            };
            self.samples
                .get(&(chip, channel))
                .copied()
                .ok_or_else(|| SensorError::Transport("spi".to_string()))
        }
    }

    struct FakeIr {
        rotors_fitted: bool,
    }

    impl Device for FakeIr {}

    impl IrThermometer for FakeIr {
        fn object_temp(&mut self, device: IrDevice) -> Result<f32, SensorError> {
            match device {
                IrDevice::CvtBelt => Ok(180.0),
                _ if self.rotors_fitted => Ok(250.0),
                _ => Err(SensorError::CrcMismatch {
                    expected: 0x12,
                    actual: 0x34,
                }),
            }
        }

        fn ambient_temp(&mut self, _device: IrDevice) -> Result<f32, SensorError> {
            Ok(70.0)
        }
    }

    struct FakeAccel;

    impl Device for FakeAccel {}

    impl Accelerometer for FakeAccel {
        fn acceleration(&mut self) -> Result<[f32; 3], SensorError> {
            Ok([0.0, 0.0, 1.0])
        }
    }

    #[test]
    fn test_scale_is_linear() {
        assert_relative_eq!(scale(0.0, 10.0, 0.0, 100.0, 50.0), 5.0);
        assert_relative_eq!(scale(-90.0, 90.0, 0.0, 1023.0, 0.0), -90.0);
        assert_relative_eq!(scale(-90.0, 90.0, 0.0, 1023.0, 1023.0), 90.0);
    }

    #[test]
    fn test_conversions() {
        assert_relative_eq!(rpm(1023), 3800.0);
        assert_relative_eq!(hal_to_mph(1023), 5000.0 / 6.81, max_relative = 1e-5);
        assert_relative_eq!(battery_voltage(976), 12.5);
        assert_relative_eq!(steering_angle(0), -90.0);
        assert_relative_eq!(brake_pressure(102), 0.0, epsilon = 1.0);
        assert_relative_eq!(brake_pressure(921), 2000.0, epsilon = 1.0);

        // Travel grows as the rocker swings away from the link
        let closed = suspension_travel(0);
        let open = suspension_travel(1023);
        assert_relative_eq!(closed, (149.0f32 + 70.0).sqrt(), max_relative = 1e-4);
        assert!(open > closed);
    }

    #[test]
    fn test_suite_reads_through_channel_map() {
        let mut adc = FakeAdc::default();
        adc.samples.insert((1, 1), 1023); // rpm
        adc.samples.insert((1, 4), 976); // battery
        let mut sensors = AdcSensors::new(adc, FakeIr { rotors_fitted: false }, FakeAccel);

        let core = read_core(&mut sensors);
        assert_relative_eq!(core.rpm, 3800.0);
        assert_relative_eq!(core.battery_voltage, 12.5);
        assert_relative_eq!(core.cvt_temp, 180.0);
        assert_relative_eq!(core.ambient_temp, 70.0);
        assert_eq!(core.accel, [0.0, 0.0, 1.0]);
        // Rear hall channel not answering
        assert!(core.rear_speed.is_nan());

        assert!(!extended_present(&mut sensors));
    }

    #[test]
    fn test_rotor_thermometers_mark_extended_harness() {
        let mut sensors =
            AdcSensors::new(FakeAdc::default(), FakeIr { rotors_fitted: true }, FakeAccel);
        assert!(extended_present(&mut sensors));
        assert_eq!(sensors.read(Quantity::RearRotorTemp), Ok(250.0));
    }
}
