//! Persistent storage codec
//!
//! The device state is stored as a fixed-offset sequential layout
//! (all integers and floats little-endian):
//!
//! | Offset | Width | Field |
//! |--------|-------|-------|
//! | 0 | 1 | sentinel (`*`) |
//! | 1 | 4 | switch count (i32) |
//! | 5 | 4 | discovery port (i32) |
//! | 9 + k * 85 | 85 | switch entry k |
//! | 9 + n * 85 | 25 | hostname |
//!
//! Each switch entry holds: type tag (u8), pin (u8), writeable (u8),
//! min, max, step, value (f64 each), name (25 bytes), description (25 bytes).
//! Text fields are NUL-padded and always NUL-terminated, so at most
//! `MAX_NAME_LEN - 1` bytes of text survive a round trip.
//!
//! A store whose sentinel does not match is not an error: it is replaced
//! with the default state.

use tracing::{debug, info, warn};

use crate::eeprom::Eeprom;
use crate::error::{Result, SwitchError};
use crate::switches::{
    SwitchEntry, SwitchRegistry, SwitchType, DEFAULT_NUM_SWITCHES, MAX_NAME_LEN, MAX_SWITCHES,
};

/// Marks a completely written store
pub const MAGIC: u8 = b'*';

/// Hostname used until one is configured
pub const DEFAULT_HOSTNAME: &str = "espRLY01";

/// Standard Alpaca discovery port
pub const ALPACA_DISCOVERY_PORT: u16 = 32227;

const SENTINEL_ADDR: usize = 0;
const INVALID_SENTINEL: u8 = 0;
const HEADER_LEN: usize = 1 + 4 + 4;

/// Stored width of one switch entry
pub const ENTRY_LEN: usize = 3 + 4 * 8 + 2 * MAX_NAME_LEN;

/// Bytes needed for a store holding `MAX_SWITCHES` entries
pub const STORE_SIZE: usize = HEADER_LEN + MAX_SWITCHES * ENTRY_LEN + MAX_NAME_LEN;

/// Everything that survives a power cycle
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub registry: SwitchRegistry,
    pub hostname: String,
    pub discovery_port: u16,
}

impl PersistedState {
    /// Factory default state
    pub fn defaults() -> Self {
        Self {
            registry: SwitchRegistry::with_defaults(DEFAULT_NUM_SWITCHES),
            hostname: DEFAULT_HOSTNAME.to_string(),
            discovery_port: ALPACA_DISCOVERY_PORT,
        }
    }
}

/// Where the boot state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSource {
    /// Decoded from a valid store
    Restored,
    /// The store was blank or corrupt and has been rewritten with defaults
    Defaulted,
}

/// The part of `text` that a fixed-width text slot preserves.
///
/// Text stops at the first NUL and is cut to `MAX_NAME_LEN - 1` bytes on a
/// character boundary.
pub fn truncate_text(text: &str) -> &str {
    let text = text.split('\0').next().unwrap_or_default();
    let mut end = text.len().min(MAX_NAME_LEN - 1);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

struct StoreWriter<'a> {
    store: &'a mut dyn Eeprom,
    addr: usize,
}

impl StoreWriter<'_> {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.store.write(self.addr, bytes)?;
        self.addr += bytes.len();
        Ok(())
    }

    fn put_u8(&mut self, value: u8) -> Result<()> {
        self.put(&[value])
    }

    fn put_i32(&mut self, value: i32) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    fn put_f64(&mut self, value: f64) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    fn put_text(&mut self, text: &str) -> Result<()> {
        let text = truncate_text(text);
        let mut slot = [0u8; MAX_NAME_LEN];
        slot[..text.len()].copy_from_slice(text.as_bytes());
        self.put(&slot)
    }
}

struct StoreReader<'a> {
    store: &'a dyn Eeprom,
    addr: usize,
}

impl StoreReader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.store.read(self.addr, &mut buf)?;
        self.addr += N;
        Ok(buf)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn take_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn take_f64(&mut self, field: &str) -> Result<f64> {
        let value = f64::from_le_bytes(self.take()?);
        if !value.is_finite() {
            return Err(SwitchError::Storage(format!(
                "non-finite {} at offset {}",
                field,
                self.addr - 8
            )));
        }
        Ok(value)
    }

    fn take_text(&mut self, field: &str) -> Result<String> {
        let slot = self.take::<MAX_NAME_LEN>()?;
        let end = slot
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(MAX_NAME_LEN)
            .min(MAX_NAME_LEN - 1);
        let text = std::str::from_utf8(&slot[..end]).map_err(|_| {
            SwitchError::Storage(format!(
                "{} at offset {} is not valid UTF-8",
                field,
                self.addr - MAX_NAME_LEN
            ))
        })?;
        Ok(truncate_text(text).to_string())
    }
}

/// Write `state` to `store`.
///
/// The sentinel is cleared and committed first and only set again once the
/// body has been committed, so an interrupted write reads back as blank.
pub fn encode(state: &PersistedState, store: &mut dyn Eeprom) -> Result<()> {
    let count = state.registry.len();
    if count > MAX_SWITCHES {
        return Err(SwitchError::Storage(format!(
            "cannot store {} switches, maximum is {}",
            count, MAX_SWITCHES
        )));
    }

    store.write(SENTINEL_ADDR, &[INVALID_SENTINEL])?;
    store.commit()?;

    let mut writer = StoreWriter {
        store: &mut *store,
        addr: SENTINEL_ADDR + 1,
    };
    writer.put_i32(count as i32)?;
    writer.put_i32(i32::from(state.discovery_port))?;
    for entry in state.registry.entries() {
        writer.put_u8(entry.switch_type.tag())?;
        writer.put_u8(entry.pin)?;
        writer.put_u8(u8::from(entry.writeable))?;
        writer.put_f64(entry.min)?;
        writer.put_f64(entry.max)?;
        writer.put_f64(entry.step)?;
        writer.put_f64(entry.value)?;
        writer.put_text(&entry.name)?;
        writer.put_text(&entry.description)?;
    }
    writer.put_text(&state.hostname)?;
    let end = writer.addr;
    store.commit()?;

    store.write(SENTINEL_ADDR, &[MAGIC])?;
    store.commit()?;

    debug!(
        "Stored {} switches and hostname {} ({} bytes)",
        count, state.hostname, end
    );
    Ok(())
}

fn decode_body(store: &dyn Eeprom) -> Result<PersistedState> {
    let mut reader = StoreReader {
        store,
        addr: SENTINEL_ADDR + 1,
    };

    let raw_count = reader.take_i32()?;
    let count = raw_count.clamp(0, MAX_SWITCHES as i32) as usize;
    if count as i32 != raw_count {
        warn!(
            "Stored switch count {} out of range, clamped to {}",
            raw_count, count
        );
    }

    let raw_port = reader.take_i32()?;
    let discovery_port = u16::try_from(raw_port)
        .ok()
        .filter(|port| *port != 0)
        .unwrap_or_else(|| {
            warn!("Stored discovery port {} invalid, using default", raw_port);
            ALPACA_DISCOVERY_PORT
        });

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = reader.take_u8()?;
        let switch_type = SwitchType::from_tag(tag)
            .ok_or_else(|| SwitchError::Storage(format!("unknown switch type tag {}", tag)))?;
        let pin = reader.take_u8()?;
        let writeable = reader.take_u8()? != 0;
        let min = reader.take_f64("min")?;
        let max = reader.take_f64("max")?;
        let step = reader.take_f64("step")?;
        let mut value = reader.take_f64("value")?;
        if switch_type.is_relay() && value != 1.0 {
            value = 0.0;
        }
        let name = reader.take_text("name")?;
        let description = reader.take_text("description")?;
        entries.push(SwitchEntry {
            description,
            name,
            switch_type,
            writeable,
            min,
            max,
            step,
            value,
            pin,
        });
    }

    let hostname = reader.take_text("hostname")?;

    Ok(PersistedState {
        registry: SwitchRegistry::new(entries),
        hostname,
        discovery_port,
    })
}

/// Read the device state from `store`.
///
/// A missing sentinel or corrupt contents yield the default state, which is
/// written back immediately. Write-back failures are logged; the defaults
/// are still returned.
pub fn decode(store: &mut dyn Eeprom) -> (PersistedState, BootSource) {
    let mut sentinel = [0u8; 1];
    let valid = match store.read(SENTINEL_ADDR, &mut sentinel) {
        Ok(()) if sentinel[0] == MAGIC => true,
        Ok(()) => {
            info!("Store sentinel not found, initialising defaults");
            false
        }
        Err(e) => {
            warn!("Failed to read store sentinel: {}", e);
            false
        }
    };

    if valid {
        match decode_body(&*store) {
            Ok(state) => {
                info!(
                    "Restored {} switches for host {}",
                    state.registry.len(),
                    state.hostname
                );
                return (state, BootSource::Restored);
            }
            Err(e) => warn!("Stored state is corrupt ({}), initialising defaults", e),
        }
    }

    let state = PersistedState::defaults();
    if let Err(e) = encode(&state, store) {
        warn!("Failed to write default state: {}", e);
    }
    (state, BootSource::Defaulted)
}
