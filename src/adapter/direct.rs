//! Discretely wired keys: bus layout and the edge-triggered dispatcher.
//!
//! Key `k` (numbered from 1) lives in bit `k - 1` of a [`KeyMask`]. Keys 1..=7
//! are read from pins 1..=7 of the primary bus (pin 0 carries the strobe), keys
//! 8..=15 from pins 0..=7 of the secondary bus.

use crate::config::{Config, KeyAction};

pub type KeyMask = u16;

pub const MAX_DIRECT_KEYS: usize = 15;

/// Pin masks and normalisation for the direct-key buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectLayout {
    pub count: u8,
    pub primary_mask: u8,
    pub secondary_mask: u8,
    pub invert_mask: KeyMask,
    key_mask: KeyMask,
}

impl DirectLayout {
    /// `None` when direct keys are disabled.
    pub fn new(config: &Config) -> Option<Self> {
        let count = config.direct_keys.min(MAX_DIRECT_KEYS as u8);
        if count == 0 {
            return None;
        }
        let reserved = config
            .status_pin
            .map_or(0u8, |pin| 1u8.checked_shl(pin as u32).unwrap_or(0));
        let primary_mask = if count < 8 {
            (((1u16 << count) - 1) << 1) as u8 & !reserved
        } else {
            0xFE & !reserved
        };
        let secondary_mask = if count > 7 {
            ((1u16 << (count - 7)) - 1) as u8
        } else {
            0
        };
        let key_mask = ((1u32 << count) - 1) as KeyMask & !((reserved as KeyMask) >> 1);
        Some(Self {
            count,
            primary_mask,
            secondary_mask,
            invert_mask: config.direct_invert_mask,
            key_mask,
        })
    }

    /// Combine raw reads of both buses into a key mask.
    #[inline]
    pub fn normalize(&self, primary: u8, secondary: u8) -> KeyMask {
        let raw = ((primary & self.primary_mask) as KeyMask >> 1)
            | (((secondary & self.secondary_mask) as KeyMask) << 7);
        (raw ^ self.invert_mask) & self.key_mask
    }

    /// Bus levels that read back as `keys`; the inverse of [`normalize`].
    ///
    /// [`normalize`]: DirectLayout::normalize
    pub fn pins(&self, keys: KeyMask) -> (u8, u8) {
        let raw = (keys & self.key_mask) ^ self.invert_mask;
        (
            (raw << 1) as u8 & self.primary_mask,
            (raw >> 7) as u8 & self.secondary_mask,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEdge {
    /// Key number, from 1.
    pub key: u8,
    pub pressed: bool,
}

/// Per-key edges between two masks, lowest key first.
pub fn edges(previous: KeyMask, next: KeyMask) -> impl Iterator<Item = KeyEdge> {
    let mut diff = previous ^ next;
    std::iter::from_fn(move || {
        if diff == 0 {
            return None;
        }
        let bit = diff.trailing_zeros();
        diff &= diff - 1;
        Some(KeyEdge {
            key: bit as u8 + 1,
            pressed: next & (1 << bit) != 0,
        })
    })
}

/// Fixed table of key actions and the last accepted key mask.
#[derive(Debug, Clone)]
pub struct DirectKeyDispatcher {
    actions: [KeyAction; MAX_DIRECT_KEYS],
    previous: KeyMask,
}

impl DirectKeyDispatcher {
    pub fn new(config: &Config) -> Self {
        let mut actions = [KeyAction::NoOp; MAX_DIRECT_KEYS];
        for binding in &config.key_bindings {
            if let Some(slot) = (binding.key as usize)
                .checked_sub(1)
                .and_then(|i| actions.get_mut(i))
            {
                *slot = binding.action;
            }
        }
        Self {
            actions,
            previous: 0,
        }
    }

    #[cfg(test)]
    fn action(&self, key: u8) -> KeyAction {
        (key as usize)
            .checked_sub(1)
            .and_then(|i| self.actions.get(i))
            .copied()
            .unwrap_or_default()
    }

    pub fn previous(&self) -> KeyMask {
        self.previous
    }

    /// Accept a stable mask. Yields every key that changed with its bound
    /// action, lowest key first.
    pub fn update(&mut self, next: KeyMask) -> impl Iterator<Item = (KeyEdge, KeyAction)> + use<> {
        let previous = std::mem::replace(&mut self.previous, next);
        let actions = self.actions;
        edges(previous, next).map(move |edge| {
            let action = actions
                .get(edge.key as usize - 1)
                .copied()
                .unwrap_or_default();
            (edge, action)
        })
    }

    pub fn reset(&mut self) {
        self.previous = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyBinding;
    use rstest::rstest;

    fn layout(count: u8, status_pin: Option<u8>, invert: KeyMask) -> DirectLayout {
        let config = Config {
            direct_keys: count,
            status_pin,
            direct_invert_mask: invert,
            ..Default::default()
        };
        DirectLayout::new(&config).unwrap()
    }

    #[rstest]
    #[case(1, None, 0b0000_0010, 0x00)]
    #[case(3, None, 0b0000_1110, 0x00)]
    #[case(7, None, 0b1111_1110, 0x00)]
    #[case(8, None, 0b1111_1110, 0x01)]
    #[case(15, None, 0b1111_1110, 0xFF)]
    #[case(7, Some(7), 0b0111_1110, 0x00)]
    #[case(10, Some(3), 0b1111_0110, 0x07)]
    fn test_layout_masks(
        #[case] count: u8,
        #[case] status_pin: Option<u8>,
        #[case] primary: u8,
        #[case] secondary: u8,
    ) {
        let layout = layout(count, status_pin, 0);
        assert_eq!(layout.primary_mask, primary);
        assert_eq!(layout.secondary_mask, secondary);
    }

    #[test]
    fn test_disabled_layout() {
        assert_eq!(DirectLayout::new(&Config::default()), None);
    }

    #[test]
    fn test_normalize() {
        let l = layout(3, None, 0);
        // Pin 0 is the strobe and must be ignored.
        assert_eq!(l.normalize(0b0000_1011, 0xFF), 0b101);

        let l = layout(15, None, 0);
        assert_eq!(l.normalize(0b1000_0010, 0b1000_0001), 0b0100_0000_1100_0001);

        let l = layout(3, None, 0b111);
        assert_eq!(l.normalize(0b0000_1110, 0), 0);
        assert_eq!(l.normalize(0b0000_0000, 0), 0b111);
    }

    #[test]
    fn test_pins_read_back() {
        let l = layout(15, None, 0x0003);
        for keys in [0x0000, 0x0001, 0x0080, 0x4001, 0x7FFF] {
            let (primary, secondary) = l.pins(keys);
            assert_eq!(l.normalize(primary, secondary), keys, "keys {keys:04X}");
        }
        assert_eq!(layout(3, None, 0).pins(0b101), (0b0000_1010, 0));
    }

    #[test]
    fn test_normalize_skips_status_pin() {
        let l = layout(7, Some(2), 0);
        assert_eq!(l.normalize(0xFF, 0), 0b0111_1101);
        // An inverted status pin still never reads as a key.
        let l = layout(7, Some(2), 0x7F);
        assert_eq!(l.normalize(0x00, 0), 0b0111_1101);
    }

    #[test]
    fn test_edges_low_to_high() {
        let found: Vec<KeyEdge> = edges(0b000, 0b101).collect();
        assert_eq!(
            found,
            vec![
                KeyEdge {
                    key: 1,
                    pressed: true
                },
                KeyEdge {
                    key: 3,
                    pressed: true
                },
            ]
        );

        let found: Vec<KeyEdge> = edges(0b110, 0b011).collect();
        assert_eq!(
            found,
            vec![
                KeyEdge {
                    key: 1,
                    pressed: true
                },
                KeyEdge {
                    key: 3,
                    pressed: false
                },
            ]
        );

        assert_eq!(edges(0x4000, 0x4000).count(), 0);
        assert_eq!(edges(0, 0x4000).next().map(|e| e.key), Some(15));
    }

    #[test]
    fn test_dispatch_updates_previous() {
        let config = Config {
            direct_keys: 3,
            key_bindings: vec![KeyBinding {
                key: 3,
                action: KeyAction::Break,
            }],
            ..Default::default()
        };
        let mut dispatcher = DirectKeyDispatcher::new(&config);
        let seen: Vec<_> = dispatcher
            .update(0b101)
            .map(|(edge, action)| (edge.key, edge.pressed, action))
            .collect();
        assert_eq!(
            seen,
            vec![(1, true, KeyAction::NoOp), (3, true, KeyAction::Break)]
        );
        assert_eq!(dispatcher.previous(), 0b101);

        assert_eq!(dispatcher.update(0b101).count(), 0);

        let seen: Vec<_> = dispatcher
            .update(0b001)
            .map(|(edge, action)| (edge.key, edge.pressed, action))
            .collect();
        assert_eq!(seen, vec![(3, false, KeyAction::Break)]);

        dispatcher.reset();
        assert_eq!(dispatcher.previous(), 0);
    }

    #[test]
    fn test_unbound_keys_are_noop() {
        let dispatcher = DirectKeyDispatcher::new(&Config::default());
        assert_eq!(dispatcher.action(0), KeyAction::NoOp);
        assert_eq!(dispatcher.action(5), KeyAction::NoOp);
        assert_eq!(dispatcher.action(16), KeyAction::NoOp);
    }
}
