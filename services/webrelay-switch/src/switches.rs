//! Switch channel definitions
//!
//! A device exposes an ordered bank of switch channels. Channel IDs are
//! positions in the [`SwitchRegistry`] and are numbered from 0 to
//! `registry.len() - 1`. Each channel is one of four [`SwitchType`]s:
//!
//! | Type | Values | Endpoints |
//! |------|--------|-----------|
//! | RelayNO | 0.0 / 1.0 | getswitch, setswitch |
//! | RelayNC | 0.0 / 1.0 | getswitch, setswitch |
//! | PWM | `min..=max` | getswitchvalue, setswitchvalue |
//! | DAC | `min..=max` | getswitchvalue, setswitchvalue |

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Result, SwitchError};

/// Width of every fixed-size text field, including the terminating NUL
pub const MAX_NAME_LEN: usize = 25;

/// Upper bound on the number of channels a device can hold
pub const MAX_SWITCHES: usize = 16;

/// Number of channels created on first boot
pub const DEFAULT_NUM_SWITCHES: usize = 8;

const PLACEHOLDER_NAME: &str = "Switch Name";
const DEFAULT_DESCRIPTION: &str = "Default description";

/// Kind of output driven by a switch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchType {
    /// Normally-open relay
    RelayNo = 0,
    /// Normally-closed relay
    RelayNc = 1,
    /// Pulse-width modulated output
    Pwm = 2,
    /// Analogue output from a DAC
    Dac = 3,
}

impl SwitchType {
    /// Try to convert a stored type tag to a SwitchType
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::RelayNo),
            1 => Some(Self::RelayNc),
            2 => Some(Self::Pwm),
            3 => Some(Self::Dac),
            _ => None,
        }
    }

    /// Numeric tag used on the wire and in the store
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Relay channels only carry boolean state
    pub fn is_relay(&self) -> bool {
        matches!(self, Self::RelayNo | Self::RelayNc)
    }

    /// Coil drive level for a requested contact state.
    ///
    /// A normally-closed relay conducts while its coil is released.
    pub fn coil_energized(&self, state: bool) -> bool {
        match self {
            Self::RelayNc => !state,
            _ => state,
        }
    }
}

impl fmt::Display for SwitchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RelayNo => "RelayNO",
            Self::RelayNc => "RelayNC",
            Self::Pwm => "PWM",
            Self::Dac => "DAC",
        };
        f.write_str(name)
    }
}

impl FromStr for SwitchType {
    type Err = SwitchError;

    /// Accepts either the numeric tag or the variant name, case-insensitively
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(tag) = s.parse::<u8>() {
            return Self::from_tag(tag)
                .ok_or_else(|| SwitchError::InvalidValue(format!("Unknown switch type: {}", s)));
        }
        match s.to_ascii_lowercase().as_str() {
            "relayno" => Ok(Self::RelayNo),
            "relaync" => Ok(Self::RelayNc),
            "pwm" => Ok(Self::Pwm),
            "dac" => Ok(Self::Dac),
            _ => Err(SwitchError::InvalidValue(format!(
                "Unknown switch type: {}",
                s
            ))),
        }
    }
}

/// Check that a text field fits its fixed-width slot
pub fn validate_text(text: &str) -> Result<()> {
    if text.contains('\0') {
        return Err(SwitchError::InvalidValue(
            "Text must not contain NUL characters".to_string(),
        ));
    }
    if text.len() >= MAX_NAME_LEN {
        return Err(SwitchError::NameTooLong {
            len: text.len(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// State of one switch channel
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchEntry {
    pub description: String,
    pub name: String,
    pub switch_type: SwitchType,
    pub writeable: bool,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub value: f64,
    /// Hardware channel reference, passed through to the driver untouched
    pub pin: u8,
}

impl SwitchEntry {
    /// Entry appended by a resize
    pub fn placeholder() -> Self {
        Self {
            description: DEFAULT_DESCRIPTION.to_string(),
            name: PLACEHOLDER_NAME.to_string(),
            switch_type: SwitchType::RelayNo,
            writeable: false,
            min: 0.0,
            max: 0.0,
            step: 1.0,
            value: 0.0,
            pin: 0,
        }
    }

    /// Entry created for position `index` on first boot or factory reset
    pub fn factory_default(index: usize) -> Self {
        Self {
            description: DEFAULT_DESCRIPTION.to_string(),
            name: format!("Switch_{}", index),
            switch_type: SwitchType::RelayNo,
            writeable: true,
            min: 0.0,
            max: 1.0,
            step: 1.0,
            value: 0.0,
            pin: index as u8,
        }
    }

    /// Boolean view of a relay channel
    pub fn state(&self) -> bool {
        self.value == 1.0
    }

    /// Change the channel type, keeping the relay value domain intact
    pub fn set_type(&mut self, switch_type: SwitchType) {
        self.switch_type = switch_type;
        if switch_type.is_relay() {
            self.value = if self.state() { 1.0 } else { 0.0 };
        }
    }
}

/// Snapshot of one channel as reported by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwitchSnapshot {
    pub id: usize,
    pub description: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub switch_type: u8,
    pub pin: u8,
    pub writeable: bool,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl SwitchSnapshot {
    fn of(id: usize, entry: &SwitchEntry) -> Self {
        let (state, value) = if entry.switch_type.is_relay() {
            (Some(entry.state()), None)
        } else {
            (None, Some(entry.value))
        };
        Self {
            id,
            description: entry.description.clone(),
            name: entry.name.clone(),
            switch_type: entry.switch_type.tag(),
            pin: entry.pin,
            writeable: entry.writeable,
            min: entry.min,
            max: entry.max,
            step: entry.step,
            state,
            value,
        }
    }
}

/// Ordered collection of switch channels
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SwitchRegistry {
    entries: Vec<SwitchEntry>,
}

impl SwitchRegistry {
    pub fn new(entries: Vec<SwitchEntry>) -> Self {
        Self { entries }
    }

    /// Registry holding `count` factory-default channels
    pub fn with_defaults(count: usize) -> Self {
        Self::new((0..count).map(SwitchEntry::factory_default).collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SwitchEntry] {
        &self.entries
    }

    /// Bounds-checked lookup
    pub fn get(&self, id: usize) -> Result<&SwitchEntry> {
        self.entries
            .get(id)
            .ok_or_else(|| SwitchError::InvalidSwitchId(id.to_string()))
    }

    /// Apply `op` to the entry at `id`; out-of-range IDs never reach `op`
    pub fn mutate<T>(&mut self, id: usize, op: impl FnOnce(&mut SwitchEntry) -> T) -> Result<T> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| SwitchError::InvalidSwitchId(id.to_string()))?;
        Ok(op(entry))
    }

    /// Replace the name of channel `id`.
    ///
    /// The new name is fully built before the old one is dropped, so the
    /// entry always holds a valid name.
    pub fn set_name(&mut self, id: usize, name: &str) -> Result<()> {
        validate_text(name)?;
        let name = name.to_string();
        self.mutate(id, |entry| entry.name = name)
    }

    /// Grow with placeholder channels or drop trailing channels.
    ///
    /// Entries below `min(len, new_size)` keep their position and contents.
    pub fn resize(&mut self, new_size: usize) {
        if new_size < self.entries.len() {
            self.entries.truncate(new_size);
        } else {
            self.entries.resize_with(new_size, SwitchEntry::placeholder);
        }
    }

    /// Snapshot of every channel, in ID order
    pub fn snapshot(&self) -> Vec<SwitchSnapshot> {
        self.entries
            .iter()
            .enumerate()
            .map(|(id, entry)| SwitchSnapshot::of(id, entry))
            .collect()
    }
}
