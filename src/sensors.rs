use serde::{Deserialize, Serialize};

use crate::error::{DaqResult, SensorError};

/// Scalar quantities the car can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantity {
    // Always fitted; needed for the display
    AmbientTemp,
    CvtTemp,
    RearSpeed,
    Rpm,
    BatteryVoltage,
    // Testing-only harness
    FrontRightSpeed,
    FrontLeftSpeed,
    FrontBrakePressure,
    RearBrakePressure,
    SteeringAngle,
    FrontRightTravel,
    FrontLeftTravel,
    RearRightTravel,
    RearLeftTravel,
    FrontRightRotorTemp,
    FrontLeftRotorTemp,
    RearRotorTemp,
}

impl Quantity {
    pub const CORE: [Quantity; 5] = [
        Quantity::AmbientTemp,
        Quantity::CvtTemp,
        Quantity::RearSpeed,
        Quantity::Rpm,
        Quantity::BatteryVoltage,
    ];

    pub const EXTENDED: [Quantity; 12] = [
        Quantity::FrontRightSpeed,
        Quantity::FrontLeftSpeed,
        Quantity::FrontBrakePressure,
        Quantity::RearBrakePressure,
        Quantity::SteeringAngle,
        Quantity::FrontRightTravel,
        Quantity::FrontLeftTravel,
        Quantity::RearRightTravel,
        Quantity::RearLeftTravel,
        Quantity::FrontRightRotorTemp,
        Quantity::FrontLeftRotorTemp,
        Quantity::RearRotorTemp,
    ];

    /// Extended harness is considered fitted when this reads a real value
    pub const EXTENDED_PROBE: Quantity = Quantity::FrontRightRotorTemp;

    /// CSV column name
    pub fn header(self) -> &'static str {
        match self {
            Quantity::AmbientTemp => "Ambient Temp",
            Quantity::CvtTemp => "CVT Temp",
            Quantity::RearSpeed => "Rear HAL",
            Quantity::Rpm => "Tachometer",
            Quantity::BatteryVoltage => "Battery Voltage",
            Quantity::FrontRightSpeed => "Front Right HAL",
            Quantity::FrontLeftSpeed => "Front Left HAL",
            Quantity::FrontBrakePressure => "Front Brakeline Pressure",
            Quantity::RearBrakePressure => "Rear Brakeline Pressure",
            Quantity::SteeringAngle => "Steering Angle",
            Quantity::FrontRightTravel => "Front Right Suspension Travel",
            Quantity::FrontLeftTravel => "Front Left Suspension Travel",
            Quantity::RearRightTravel => "Rear Right Suspension Travel",
            Quantity::RearLeftTravel => "Rear Left Suspension Travel",
            Quantity::FrontRightRotorTemp => "Front Right Rotor Temp",
            Quantity::FrontLeftRotorTemp => "Front Left Rotor Temp",
            Quantity::RearRotorTemp => "Rear Rotor Temp",
        }
    }
}

/// Sensor collaborator. Accessors report failures; the controller decides
/// what a failure means (it logs NaN and carries on).
pub trait SensorSuite: Send {
    /// Attach to buses
    fn init(&mut self) -> DaqResult<()> {
        Ok(())
    }

    /// Configure devices
    fn begin(&mut self) -> DaqResult<()> {
        Ok(())
    }

    fn end(&mut self) -> DaqResult<()> {
        Ok(())
    }

    fn close(&mut self) -> DaqResult<()> {
        Ok(())
    }

    /// (x, y, z) in g
    fn acceleration(&mut self) -> Result<[f32; 3], SensorError>;

    fn read(&mut self, quantity: Quantity) -> Result<f32, SensorError>;
}

/// Readings logged on every row and used for the display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoreReadings {
    pub accel: [f32; 3],
    pub ambient_temp: f32,
    pub cvt_temp: f32,
    pub rear_speed: f32,
    pub rpm: f32,
    pub battery_voltage: f32,
}

impl CoreReadings {
    pub fn invalid() -> Self {
        Self {
            accel: [f32::NAN; 3],
            ambient_temp: f32::NAN,
            cvt_temp: f32::NAN,
            rear_speed: f32::NAN,
            rpm: f32::NAN,
            battery_voltage: f32::NAN,
        }
    }

    /// Values in CSV column order
    pub fn columns(&self) -> [f32; 8] {
        [
            self.accel[0],
            self.accel[1],
            self.accel[2],
            self.ambient_temp,
            self.cvt_temp,
            self.rear_speed,
            self.rpm,
            self.battery_voltage,
        ]
    }
}

/// Testing-only readings, in `Quantity::EXTENDED` order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtendedReadings(pub [f32; 12]);

impl ExtendedReadings {
    pub fn invalid() -> Self {
        Self([f32::NAN; 12])
    }
}

fn value_or_nan(quantity: Quantity, result: Result<f32, SensorError>) -> f32 {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::trace!("[SENSORS] {:?} unavailable: {}", quantity, e);
            f32::NAN
        }
    }
}

pub fn read_core<S: SensorSuite + ?Sized>(sensors: &mut S) -> CoreReadings {
    let accel = sensors.acceleration().unwrap_or_else(|e| {
        log::trace!("[SENSORS] acceleration unavailable: {}", e);
        [f32::NAN; 3]
    });
    let mut read = |q: Quantity| value_or_nan(q, sensors.read(q));

    CoreReadings {
        accel,
        ambient_temp: read(Quantity::AmbientTemp),
        cvt_temp: read(Quantity::CvtTemp),
        rear_speed: read(Quantity::RearSpeed),
        rpm: read(Quantity::Rpm),
        battery_voltage: read(Quantity::BatteryVoltage),
    }
}

pub fn read_extended<S: SensorSuite + ?Sized>(sensors: &mut S) -> ExtendedReadings {
    ExtendedReadings(Quantity::EXTENDED.map(|q| value_or_nan(q, sensors.read(q))))
}

/// True when the testing harness answers with a real number
pub fn extended_present<S: SensorSuite + ?Sized>(sensors: &mut S) -> bool {
    let probe = Quantity::EXTENDED_PROBE;
    !value_or_nan(probe, sensors.read(probe)).is_nan()
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Scripted sensors shared between a test and the controller under test
    #[derive(Clone, Default)]
    pub struct FakeSensors {
        pub values: Arc<Mutex<HashMap<Quantity, f32>>>,
        pub accel: Arc<Mutex<Option<[f32; 3]>>>,
    }

    impl FakeSensors {
        pub fn set(&self, quantity: Quantity, value: f32) {
            self.values.lock().unwrap().insert(quantity, value);
        }

        pub fn clear(&self, quantity: Quantity) {
            self.values.lock().unwrap().remove(&quantity);
        }
    }

    impl SensorSuite for FakeSensors {
        fn acceleration(&mut self) -> Result<[f32; 3], SensorError> {
            self.accel
                .lock()
                .unwrap()
                .ok_or_else(|| SensorError::Transport("no accelerometer".to_string()))
        }

        fn read(&mut self, quantity: Quantity) -> Result<f32, SensorError> {
            self.values
                .lock()
                .unwrap()
                .get(&quantity)
                .copied()
                .ok_or(SensorError::Absent)
        }
    }
}
