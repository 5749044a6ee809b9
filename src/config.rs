//! Adapter configuration.
//!
//! A [`Config`] is resolved once, validated, and then handed by reference to
//! every component constructor. Nothing reads it back at runtime to change
//! behaviour; modes are baked into the components when they are built.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::adapter::direct::{DirectLayout, KeyMask, MAX_DIRECT_KEYS};

pub const DEFAULT_ANSWERBACK: &[u8] = b"Hello\r\n";

/// Parity check applied to the raw 8-bit character code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Parity {
    #[default]
    None,
    /// XOR of all eight bits must be 0.
    Even,
    /// XOR of all eight bits must be 1.
    Odd,
}

/// Strobe edge that latches the character bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum StrobeEdge {
    #[default]
    Falling,
    Rising,
}

/// Active level of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ActiveLevel {
    Low,
    #[default]
    High,
}

impl ActiveLevel {
    /// Pin level that represents `on`.
    #[inline]
    pub fn level(self, on: bool) -> bool {
        match self {
            ActiveLevel::High => on,
            ActiveLevel::Low => !on,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BellMode {
    #[default]
    None,
    /// Drive low while ringing.
    Low,
    /// Drive high while ringing.
    High,
    /// Tone output. Not supported; rejected by [`Config::validate`].
    Tone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReadyAckMode {
    #[default]
    None,
    /// Mirror the host's DTR line.
    #[value(alias = "host-follow")]
    Dtr,
    /// Pulse after characters are sent.
    KeyAck,
}

/// What a direct key does when it changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAction {
    #[default]
    NoOp,
    /// Raise BREAK on the control lines (and the indicator) while held.
    Break,
    /// Send answer-back sequence `0..=2` on press.
    Answerback(u8),
    /// Send ESC, the optional selector, then `ch` on press.
    EscapePrefix { selector: Option<u8>, ch: u8 },
}

impl FromStr for KeyAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("esc:") {
            // "esc:C" or "esc:SC" with an explicit selector.
            return match parse_escaped(rest)?.as_slice() {
                [ch] => Ok(KeyAction::EscapePrefix {
                    selector: None,
                    ch: *ch,
                }),
                [selector, ch] => Ok(KeyAction::EscapePrefix {
                    selector: Some(*selector),
                    ch: *ch,
                }),
                _ => Err(format!("expected one or two characters, got {rest:?}")),
            };
        }
        if let Some(ch) = s.strip_prefix("csi:") {
            return Ok(KeyAction::EscapePrefix {
                selector: Some(b'['),
                ch: single_byte(ch)?,
            });
        }
        match s {
            "none" | "noop" => Ok(KeyAction::NoOp),
            "break" => Ok(KeyAction::Break),
            "answerback" | "here-is" => Ok(KeyAction::Answerback(0)),
            "answerback2" => Ok(KeyAction::Answerback(1)),
            "answerback3" => Ok(KeyAction::Answerback(2)),
            _ => Err(format!("unknown key action {s:?}")),
        }
    }
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAction::NoOp => write!(f, "none"),
            KeyAction::Break => write!(f, "break"),
            KeyAction::Answerback(0) => write!(f, "answerback"),
            KeyAction::Answerback(slot) => write!(f, "answerback{}", slot + 1),
            KeyAction::EscapePrefix { selector: None, ch } => {
                write!(f, "esc:")?;
                write_escaped(f, *ch)
            }
            KeyAction::EscapePrefix {
                selector: Some(b'['),
                ch,
            } => {
                write!(f, "csi:")?;
                write_escaped(f, *ch)
            }
            KeyAction::EscapePrefix {
                selector: Some(selector),
                ch,
            } => {
                write!(f, "esc:")?;
                write_escaped(f, *selector)?;
                write_escaped(f, *ch)
            }
        }
    }
}

/// One byte in the form [`parse_escaped`] reads back.
fn write_escaped(f: &mut fmt::Formatter<'_>, b: u8) -> fmt::Result {
    match b {
        b'\\' => write!(f, "\\\\"),
        b if b.is_ascii_graphic() || b == b' ' => write!(f, "{}", b as char),
        b => write!(f, "\\x{b:02x}"),
    }
}

fn single_byte(s: &str) -> Result<u8, String> {
    match parse_escaped(s)?.as_slice() {
        [b] => Ok(*b),
        _ => Err(format!("expected a single character, got {s:?}")),
    }
}

/// Binds a direct key (numbered from 1) to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBinding {
    pub key: u8,
    pub action: KeyAction,
}

impl FromStr for KeyBinding {
    type Err = String;

    /// Parses `KEY=ACTION`, e.g. `1=break` or `4=csi:A`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((key, action)) = s.split_once('=') else {
            return Err(format!("expected KEY=ACTION, got {s:?}"));
        };
        let key = key
            .trim()
            .parse::<u8>()
            .map_err(|e| format!("bad key number {key:?}: {e}"))?;
        Ok(KeyBinding {
            key,
            action: action.trim().parse()?,
        })
    }
}

/// Pull-up masks to enable at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pullups {
    pub char_bus: u8,
    pub strobe: bool,
    pub direct: u8,
    pub direct_2: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bits of the character code that are transmitted.
    pub char_mask: u8,
    /// Character bus pull-ups; derived from mask and parity when unset.
    pub char_pullup_mask: Option<u8>,
    pub parity: Parity,
    /// Complement the character code before masking.
    pub invert: bool,
    pub strobe_edge: StrobeEdge,

    /// Number of discretely wired keys, 0 disables the subsystem.
    pub direct_keys: u8,
    /// Bits complemented after reading the direct-key bus.
    pub direct_invert_mask: KeyMask,
    /// Primary direct-bus pin used for a status LED, never read as a key.
    pub status_pin: Option<u8>,
    /// Stabilisation window for polled direct keys, 0 = pass-through.
    pub debounce_ms: u32,
    /// Direct keys that force escape-prefixed output of strobed characters.
    pub escape_prefix_mask: KeyMask,
    /// Byte sent between ESC and the character, e.g. `[`.
    pub escape_selector: Option<u8>,
    pub key_bindings: Vec<KeyBinding>,

    pub bell: BellMode,
    pub bell_duration_us: u32,

    pub ready_ack: ReadyAckMode,
    pub ready_ack_on: ActiveLevel,
    pub ready_ack_duration_us: u32,
    /// Quiet period before a coalesced key-ack pulse, 0 = pulse immediately.
    pub ready_ack_delay_ms: u32,

    pub answerback: Vec<u8>,
    pub answerback_2: Option<Vec<u8>>,
    pub answerback_3: Option<Vec<u8>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            char_mask: 0x7F,
            char_pullup_mask: None,
            parity: Parity::None,
            invert: false,
            strobe_edge: StrobeEdge::Falling,
            direct_keys: 0,
            direct_invert_mask: 0,
            status_pin: None,
            debounce_ms: 0,
            escape_prefix_mask: 0,
            escape_selector: None,
            key_bindings: Vec::new(),
            bell: BellMode::None,
            bell_duration_us: 5,
            ready_ack: ReadyAckMode::None,
            ready_ack_on: ActiveLevel::High,
            ready_ack_duration_us: 5,
            ready_ack_delay_ms: 0,
            answerback: DEFAULT_ANSWERBACK.to_vec(),
            answerback_2: None,
            answerback_3: None,
        }
    }
}

impl Config {
    pub fn answerback(&self, slot: u8) -> Option<&[u8]> {
        match slot {
            0 => Some(&self.answerback),
            1 => self.answerback_2.as_deref(),
            2 => self.answerback_3.as_deref(),
            _ => None,
        }
    }

    pub fn direct_enabled(&self) -> bool {
        self.direct_keys > 0
    }

    pub fn pullups(&self) -> Pullups {
        let char_bus = self.char_pullup_mask.unwrap_or(match self.parity {
            Parity::None => self.char_mask,
            // The parity bit has to be read as well.
            _ => 0xFF,
        });
        let (direct, direct_2) = match DirectLayout::new(self) {
            Some(layout) => (layout.primary_mask, layout.secondary_mask),
            None => (0, 0),
        };
        Pullups {
            char_bus,
            strobe: true,
            direct,
            direct_2,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bell == BellMode::Tone {
            return Err(ConfigError::ToneBellUnsupported);
        }
        if self.direct_keys as usize > MAX_DIRECT_KEYS {
            return Err(ConfigError::TooManyDirectKeys(self.direct_keys));
        }
        if let Some(pin) = self.status_pin {
            if !(1..=7).contains(&pin) {
                return Err(ConfigError::StatusPinOutOfRange(pin));
            }
            if !self.direct_enabled() {
                return Err(ConfigError::RequiresDirectKeys("status pin"));
            }
        }
        if self.escape_prefix_mask != 0 && !self.direct_enabled() {
            return Err(ConfigError::RequiresDirectKeys("escape-prefix mask"));
        }
        for binding in &self.key_bindings {
            if binding.key == 0 || binding.key > self.direct_keys {
                return Err(ConfigError::KeyOutOfRange {
                    key: binding.key,
                    count: self.direct_keys,
                });
            }
            if let KeyAction::Answerback(slot) = binding.action {
                if self.answerback(slot).is_none() {
                    return Err(ConfigError::MissingAnswerback {
                        key: binding.key,
                        slot,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ToneBellUnsupported,
    TooManyDirectKeys(u8),
    StatusPinOutOfRange(u8),
    RequiresDirectKeys(&'static str),
    KeyOutOfRange { key: u8, count: u8 },
    MissingAnswerback { key: u8, slot: u8 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ToneBellUnsupported => write!(f, "tone bell mode is not supported"),
            ConfigError::TooManyDirectKeys(n) => {
                write!(f, "{n} direct keys requested, at most {MAX_DIRECT_KEYS} supported")
            }
            ConfigError::StatusPinOutOfRange(pin) => {
                write!(f, "status pin {pin} is not a direct-bus pin (1..=7)")
            }
            ConfigError::RequiresDirectKeys(what) => {
                write!(f, "{what} configured but direct keys are disabled")
            }
            ConfigError::KeyOutOfRange { key, count } => {
                write!(f, "action bound to key {key}, but only keys 1..={count} exist")
            }
            ConfigError::MissingAnswerback { key, slot } => write!(
                f,
                "key {key} sends answer-back {} which is not configured",
                slot + 1
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse a hex number, with or without a `0x` prefix.
pub fn parse_hex_u8(s: &str) -> Result<u8, Box<dyn std::error::Error + Send + Sync>> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    Ok(u8::from_str_radix(s, 16)?)
}

pub fn parse_hex_u16(s: &str) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    Ok(u16::from_str_radix(s, 16)?)
}

/// Decode `\r`, `\n`, `\t`, `\e`, `\\` and `\xNN` escapes into bytes.
pub fn parse_escaped(s: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'e') => out.push(0x1B),
            Some(b'\\') => out.push(b'\\'),
            Some(b'x') => {
                let hi = bytes.next();
                let lo = bytes.next();
                let (Some(hi), Some(lo)) = (hi, lo) else {
                    return Err(format!("truncated \\x escape in {s:?}"));
                };
                let digits = [hi, lo];
                let text = std::str::from_utf8(&digits).map_err(|e| e.to_string())?;
                out.push(u8::from_str_radix(text, 16).map_err(|e| format!("{e} in {s:?}"))?);
            }
            Some(other) => return Err(format!("unknown escape \\{} in {s:?}", other as char)),
            None => return Err(format!("dangling backslash in {s:?}")),
        }
    }
    Ok(out)
}
