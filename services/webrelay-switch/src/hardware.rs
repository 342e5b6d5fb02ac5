//! Hardware output abstraction
//!
//! Toggling an actual pin (I2C port expander, GPIO, DAC) is the job of a
//! [`SwitchDriver`]. The device calls the driver before it records a new
//! value, and waits for the write to complete before answering.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

/// Writes switch outputs to hardware
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait SwitchDriver: Send + Sync {
    /// Energise or release the relay coil on `pin`
    async fn write_relay(&self, pin: u8, energized: bool) -> Result<()>;

    /// Drive a PWM or DAC output on `pin` to `value`
    async fn write_output(&self, pin: u8, value: f64) -> Result<()>;
}

/// Driver that keeps output levels in memory.
///
/// Used when no hardware driver is supplied, and by tests to observe the
/// levels a request produced.
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    levels: Mutex<BTreeMap<u8, f64>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written to `pin`, relays reading 1.0 when energised
    pub async fn level(&self, pin: u8) -> Option<f64> {
        self.levels.lock().await.get(&pin).copied()
    }
}

#[async_trait]
impl SwitchDriver for SimulatedDriver {
    async fn write_relay(&self, pin: u8, energized: bool) -> Result<()> {
        debug!("Simulated relay on pin {}: energized={}", pin, energized);
        self.levels
            .lock()
            .await
            .insert(pin, if energized { 1.0 } else { 0.0 });
        Ok(())
    }

    async fn write_output(&self, pin: u8, value: f64) -> Result<()> {
        debug!("Simulated output on pin {}: {}", pin, value);
        self.levels.lock().await.insert(pin, value);
        Ok(())
    }
}
