//! Switch device context
//!
//! [`SwitchDevice`] owns all process state: the switch registry, the
//! hostname and discovery port, the persistent store and the hardware
//! driver. It is the only thing that mutates the registry, and every
//! operation either applies completely or leaves the state untouched.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::eeprom::Eeprom;
use crate::error::{Result, SwitchError};
use crate::hardware::SwitchDriver;
use crate::persistence::{self, BootSource, PersistedState};
use crate::switches::{
    validate_text, SwitchEntry, SwitchRegistry, SwitchSnapshot, SwitchType, MAX_NAME_LEN,
    MAX_SWITCHES,
};

/// Diagnostic snapshot of the whole device
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceStatus {
    pub host: String,
    pub time: String,
    pub discovery_port: u16,
    pub switches: Vec<SwitchSnapshot>,
}

/// Process-wide switch device state
pub struct SwitchDevice {
    config: Config,
    state: PersistedState,
    boot_source: BootSource,
    store: Box<dyn Eeprom>,
    driver: Arc<dyn SwitchDriver>,
    connected: bool,
    server_transaction_id: u32,
}

impl fmt::Debug for SwitchDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchDevice")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("boot_source", &self.boot_source)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

fn unsupported(operation: &'static str, id: usize, switch_type: SwitchType) -> SwitchError {
    SwitchError::UnsupportedForType {
        operation,
        switch_type: switch_type.to_string(),
        id,
    }
}

fn hardware_error(err: SwitchError) -> SwitchError {
    match err {
        SwitchError::Hardware(_) => err,
        other => SwitchError::Hardware(other.to_string()),
    }
}

fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() || hostname.len() >= MAX_NAME_LEN {
        return Err(SwitchError::InvalidHostname(format!(
            "{:?} must be 1 to {} characters",
            hostname,
            MAX_NAME_LEN - 1
        )));
    }
    if !hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(SwitchError::InvalidHostname(format!(
            "{:?} may only contain letters, digits and '-'",
            hostname
        )));
    }
    Ok(())
}

impl SwitchDevice {
    /// Boot from `store`, falling back to (and storing) the default state
    pub fn boot(config: Config, mut store: Box<dyn Eeprom>, driver: Arc<dyn SwitchDriver>) -> Self {
        let (state, boot_source) = persistence::decode(store.as_mut());
        info!(
            "Booted {} switches for host {} ({:?})",
            state.registry.len(),
            state.hostname,
            boot_source
        );
        Self {
            config,
            state,
            boot_source,
            store,
            driver,
            connected: false,
            server_transaction_id: 0,
        }
    }

    /// Rebuild all state from the store, as after a power cycle
    pub fn reboot(&mut self) {
        let (state, boot_source) = persistence::decode(self.store.as_mut());
        info!(
            "Rebooted with {} switches for host {} ({:?})",
            state.registry.len(),
            state.hostname,
            boot_source
        );
        self.state = state;
        self.boot_source = boot_source;
        self.connected = false;
        self.server_transaction_id = 0;
    }

    /// Drive every output to its recorded value. Failures are logged and
    /// leave the recorded value in place.
    pub async fn restore_outputs(&self) {
        for (id, entry) in self.state.registry.entries().iter().enumerate() {
            if let Err(e) = self.drive(entry).await {
                warn!("Failed to restore switch {} on pin {}: {}", id, entry.pin, e);
            }
        }
    }

    /// Drive the pin of `entry` to its recorded state or value
    async fn drive(&self, entry: &SwitchEntry) -> Result<()> {
        match entry.switch_type {
            SwitchType::RelayNo | SwitchType::RelayNc => {
                let energized = entry.switch_type.coil_energized(entry.state());
                self.driver.write_relay(entry.pin, energized).await
            }
            SwitchType::Pwm | SwitchType::Dac => {
                self.driver.write_output(entry.pin, entry.value).await
            }
        }
    }

    /// Release the pin of a channel that is no longer served
    async fn release(&self, entry: &SwitchEntry) -> Result<()> {
        match entry.switch_type {
            SwitchType::RelayNo | SwitchType::RelayNc => {
                self.driver.write_relay(entry.pin, false).await
            }
            SwitchType::Pwm | SwitchType::Dac => self.driver.write_output(entry.pin, 0.0).await,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SwitchRegistry {
        &self.state.registry
    }

    pub fn hostname(&self) -> &str {
        &self.state.hostname
    }

    pub fn discovery_port(&self) -> u16 {
        self.state.discovery_port
    }

    pub fn boot_source(&self) -> BootSource {
        self.boot_source
    }

    pub fn store(&self) -> &dyn Eeprom {
        self.store.as_ref()
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        debug!("Connected set to {}", connected);
        self.connected = connected;
    }

    /// Next server transaction ID, starting from 1
    pub fn next_transaction_id(&mut self) -> u32 {
        self.server_transaction_id = self.server_transaction_id.wrapping_add(1);
        self.server_transaction_id
    }

    pub fn max_switch(&self) -> usize {
        self.state.registry.len()
    }

    pub fn entry(&self, id: usize) -> Result<&SwitchEntry> {
        self.state.registry.get(id)
    }

    pub fn can_write(&self, id: usize) -> Result<bool> {
        Ok(self.entry(id)?.writeable)
    }

    /// Entry `id`, provided it is a relay
    pub fn relay_entry(&self, id: usize, operation: &'static str) -> Result<&SwitchEntry> {
        let entry = self.entry(id)?;
        match entry.switch_type {
            SwitchType::RelayNo | SwitchType::RelayNc => Ok(entry),
            other @ (SwitchType::Pwm | SwitchType::Dac) => Err(unsupported(operation, id, other)),
        }
    }

    /// Entry `id`, provided it is a PWM or DAC output
    pub fn output_entry(&self, id: usize, operation: &'static str) -> Result<&SwitchEntry> {
        let entry = self.entry(id)?;
        match entry.switch_type {
            SwitchType::Pwm | SwitchType::Dac => Ok(entry),
            other @ (SwitchType::RelayNo | SwitchType::RelayNc) => {
                Err(unsupported(operation, id, other))
            }
        }
    }

    /// Boolean state of a relay channel
    pub fn get_switch(&self, id: usize) -> Result<bool> {
        Ok(self.relay_entry(id, "getswitch")?.state())
    }

    /// Switch a relay channel on or off
    pub async fn set_switch(&mut self, id: usize, state: bool) -> Result<()> {
        let entry = self.relay_entry(id, "setswitch")?;
        let switch_type = entry.switch_type;
        if !entry.writeable {
            return Err(SwitchError::SwitchNotWritable(id));
        }

        self.driver
            .write_relay(entry.pin, switch_type.coil_energized(state))
            .await
            .map_err(hardware_error)?;

        let value = if state { 1.0 } else { 0.0 };
        self.state.registry.mutate(id, |entry| entry.value = value)?;
        debug!("Switch {} set to {}", id, state);

        if self.config.storage.persist_switch_state {
            self.persist();
        }
        Ok(())
    }

    pub fn switch_description(&self, id: usize) -> Result<String> {
        Ok(self.entry(id)?.description.clone())
    }

    pub fn switch_name(&self, id: usize) -> Result<String> {
        Ok(self.entry(id)?.name.clone())
    }

    pub fn set_switch_name(&mut self, id: usize, name: &str) -> Result<()> {
        self.state.registry.set_name(id, name)?;
        debug!("Switch {} renamed to {}", id, name);
        self.persist();
        Ok(())
    }

    /// Output value of a PWM or DAC channel
    pub fn get_switch_value(&self, id: usize) -> Result<f64> {
        Ok(self.output_entry(id, "getswitchvalue")?.value)
    }

    /// Drive a PWM or DAC channel.
    ///
    /// Values outside `[min, max]` are rejected, never clamped.
    pub async fn set_switch_value(&mut self, id: usize, value: f64) -> Result<()> {
        let entry = self.output_entry(id, "setswitchvalue")?;
        if !entry.writeable {
            return Err(SwitchError::SwitchNotWritable(id));
        }
        if !value.is_finite() || value < entry.min || value > entry.max {
            return Err(SwitchError::ValueOutOfRange {
                id,
                value,
                min: entry.min,
                max: entry.max,
            });
        }

        self.driver
            .write_output(entry.pin, value)
            .await
            .map_err(hardware_error)?;

        self.state.registry.mutate(id, |entry| entry.value = value)?;
        debug!("Switch {} value set to {}", id, value);

        if self.config.storage.persist_switch_state {
            self.persist();
        }
        Ok(())
    }

    pub fn min_switch_value(&self, id: usize) -> Result<f64> {
        Ok(self.entry(id)?.min)
    }

    pub fn max_switch_value(&self, id: usize) -> Result<f64> {
        Ok(self.entry(id)?.max)
    }

    pub fn switch_step(&self, id: usize) -> Result<f64> {
        Ok(self.entry(id)?.step)
    }

    pub fn switch_type(&self, id: usize) -> Result<SwitchType> {
        Ok(self.entry(id)?.switch_type)
    }

    /// Change the type of a channel and drive its pin to match.
    ///
    /// The type is only adopted once the driver accepted the new output.
    pub async fn set_switch_type(&mut self, id: usize, switch_type: SwitchType) -> Result<()> {
        let mut updated = self.entry(id)?.clone();
        updated.set_type(switch_type);
        self.drive(&updated).await.map_err(hardware_error)?;

        self.state
            .registry
            .mutate(id, |entry| entry.set_type(switch_type))?;
        info!("Switch {} type set to {}", id, switch_type);
        self.persist();
        Ok(())
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            host: self.state.hostname.clone(),
            time: chrono::Utc::now().to_rfc3339(),
            discovery_port: self.state.discovery_port,
            switches: self.state.registry.snapshot(),
        }
    }

    /// Store a new hostname. The caller restarts the device afterwards.
    pub fn apply_hostname(&mut self, hostname: &str) -> Result<()> {
        validate_hostname(hostname)?;
        validate_text(hostname)?;
        let mut next = self.state.clone();
        next.hostname = hostname.to_string();
        self.commit(next)?;
        info!("Hostname changed to {}", hostname);
        Ok(())
    }

    /// Resize the switch bank and store the result.
    ///
    /// Pins of dropped channels are released unless a remaining channel
    /// still uses them. Release failures are logged and do not undo the resize.
    pub async fn apply_resize(&mut self, count: usize) -> Result<()> {
        if count > MAX_SWITCHES {
            return Err(SwitchError::InvalidSwitchCount {
                count: count.to_string(),
                max: MAX_SWITCHES,
            });
        }
        let entries = self.state.registry.entries();
        let dropped = entries[count.min(entries.len())..].to_vec();

        let mut next = self.state.clone();
        next.registry.resize(count);
        self.commit(next)?;
        info!("Switch bank resized to {}", count);

        for entry in &dropped {
            let shared = self
                .state
                .registry
                .entries()
                .iter()
                .any(|kept| kept.pin == entry.pin);
            if shared {
                continue;
            }
            if let Err(e) = self.release(entry).await {
                warn!("Failed to release pin {}: {}", entry.pin, e);
            }
        }
        Ok(())
    }

    /// Replace all state with factory defaults and store them
    pub fn factory_reset(&mut self) -> Result<()> {
        self.commit(PersistedState::defaults())?;
        info!("Factory defaults restored");
        Ok(())
    }

    /// Store `next` and adopt it only once the write succeeded
    fn commit(&mut self, next: PersistedState) -> Result<()> {
        persistence::encode(&next, self.store.as_mut())?;
        self.state = next;
        Ok(())
    }

    /// Store the current state; the in-memory state stays authoritative on failure
    fn persist(&mut self) {
        if let Err(e) = persistence::encode(&self.state, self.store.as_mut()) {
            warn!("Failed to persist switch state: {}", e);
        }
    }
}
