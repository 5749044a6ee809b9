//! Validation and shaping of a captured character code: parity check, then
//! optional inversion, then the character mask.

use crate::config::{Config, Parity};

/// XOR of all eight bits: 0 for an even number of set bits, 1 for odd.
#[inline]
pub fn parity_of(value: u8) -> u8 {
    (value.count_ones() & 1) as u8
}

impl Parity {
    /// Whether the raw 8-bit `value` passes this parity check.
    pub fn accepts(self, value: u8) -> bool {
        match self {
            Parity::None => true,
            Parity::Even => parity_of(value) == 0,
            Parity::Odd => parity_of(value) == 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharTransform {
    pub parity: Parity,
    pub invert: bool,
    pub mask: u8,
}

impl CharTransform {
    pub fn new(config: &Config) -> Self {
        Self {
            parity: config.parity,
            invert: config.invert,
            mask: config.char_mask,
        }
    }

    /// Returns the byte to transmit, or `None` if the entry fails parity and
    /// must be dropped.
    #[inline]
    pub fn apply(&self, raw: u8) -> Option<u8> {
        if !self.parity.accepts(raw) {
            return None;
        }
        let value = if self.invert { !raw } else { raw };
        Some(value & self.mask)
    }
}

impl Default for CharTransform {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}
