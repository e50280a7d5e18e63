//! Dash display: status flags, the display collaborator and the lock that
//! temporarily overrides normal telemetry.

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::DaqResult;
use crate::task::TaskSlot;

/// Status LED bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusFlags(u8);

impl StatusFlags {
    pub const NONE: StatusFlags = StatusFlags(0);
    pub const WARNING_BATTERY: StatusFlags = StatusFlags(1 << 0);
    pub const WARNING_TEMP: StatusFlags = StatusFlags(1 << 1);
    pub const INFO_BRAKE: StatusFlags = StatusFlags(1 << 2);
    pub const INFO_DATA_LOGGING: StatusFlags = StatusFlags(1 << 3);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: StatusFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StatusFlags {
    type Output = StatusFlags;

    fn bitor(self, rhs: StatusFlags) -> StatusFlags {
        StatusFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusFlags {
    fn bitor_assign(&mut self, rhs: StatusFlags) {
        self.0 |= rhs.0;
    }
}

/// Display collaborator. The control loop is the only caller of `update`.
pub trait Display: Send {
    fn begin(&mut self) -> DaqResult<()> {
        Ok(())
    }

    fn update(&mut self, speed: u32, rpm: u32, status: StatusFlags) -> DaqResult<()>;

    fn end(&mut self) -> DaqResult<()> {
        Ok(())
    }

    fn close(&mut self) -> DaqResult<()> {
        Ok(())
    }
}

// Channel layout of the shift-register chain, LSB first:
// [0, 11] rpm bar, [12, 15] status LEDs, [16, 22] tens digit, [23, 29] ones digit.
const RPM_LEDS: u32 = 12;
const MAX_RPM: u32 = 3800;
const SHIFT_STATUS: u32 = 12;
const SHIFT_TENS: u32 = 16;
const SHIFT_ONES: u32 = 23;

// Segments: a=0 b=1 c=2 d=3 e=4 f=5 g=6
const DIGIT_SEGMENTS: [u32; 10] = [
    0b011_1111, // 0
    0b000_0110, // 1
    0b101_1011, // 2
    0b100_1111, // 3
    0b110_0110, // 4
    0b110_1101, // 5
    0b111_1101, // 6
    0b000_0111, // 7
    0b111_1111, // 8
    0b110_0111, // 9
];

/// Pack one display refresh into the 32-bit channel image.
///
/// Speeds of 100 and above lose the hundreds digit; a single-digit speed
/// leaves the tens digit dark.
pub fn pack_frame(speed: u32, rpm: u32, status: StatusFlags) -> u32 {
    let lit = (rpm.min(MAX_RPM) * RPM_LEDS / MAX_RPM).min(RPM_LEDS);
    let mut channels = if lit == 0 { 0 } else { 0xFFF >> (RPM_LEDS - lit) };

    channels |= u32::from(status.bits() & 0x0F) << SHIFT_STATUS;

    let speed = speed % 100;
    let (tens, ones) = ((speed / 10) as usize, (speed % 10) as usize);
    if tens != 0 {
        channels |= DIGIT_SEGMENTS[tens] << SHIFT_TENS;
    }
    channels |= DIGIT_SEGMENTS[ones] << SHIFT_ONES;
    channels
}

/// Renders frames to the diagnostic log instead of the SPI chain. Used on the
/// bench and in simulation.
#[derive(Debug, Default)]
pub struct LogDisplay {
    last_frame: Option<u32>,
    frames: u64,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> Option<u32> {
        self.last_frame
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Display for LogDisplay {
    fn update(&mut self, speed: u32, rpm: u32, status: StatusFlags) -> DaqResult<()> {
        let frame = pack_frame(speed, rpm, status);
        if self.last_frame != Some(frame) {
            log::debug!(
                "[DISPLAY] speed={} rpm={} status={:#06b} frame={:#010x}",
                speed,
                rpm,
                status.bits(),
                frame
            );
        }
        self.last_frame = Some(frame);
        self.frames += 1;
        Ok(())
    }
}

/// Temporary display override.
///
/// The lock word holds 0 when unlocked, otherwise the epoch of the trigger
/// that owns it. An unlock only succeeds if its epoch is still current, so an
/// older trigger can never release a newer one.
pub struct DisplayLock {
    state: Arc<AtomicU64>,
    epoch: AtomicU64,
    unlock: TaskSlot,
}

impl DisplayLock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU64::new(0)),
            epoch: AtomicU64::new(0),
            unlock: TaskSlot::new("display-unlock"),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::SeqCst) != 0
    }

    /// Lock, show `value` right away and unlock after `duration`.
    /// Retriggering restarts the countdown.
    pub fn trigger<D: Display + ?Sized>(
        &self,
        display: &mut D,
        value: u32,
        duration: Duration,
    ) -> DaqResult<()> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.store(epoch, Ordering::SeqCst);

        let rendered = display.update(value, 0, StatusFlags::INFO_DATA_LOGGING);

        let state = Arc::clone(&self.state);
        self.unlock.replace(async move {
            tokio::time::sleep(duration).await;
            if state
                .compare_exchange(epoch, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                log::trace!("[DISPLAY] unlocked (epoch {})", epoch);
            }
        });

        rendered
    }

    /// Drop any pending unlock, e.g. at teardown
    pub fn cancel(&self) {
        self.unlock.cancel();
    }
}

impl Default for DisplayLock {
    fn default() -> Self {
        Self::new()
    }
}
