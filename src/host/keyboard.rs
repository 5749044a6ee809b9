//! Simulated parallel keyboard: a bus of atomics driven from a byte source.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace};

use parallel_kbd::adapter::capture::{StrobeCapture, StrobeLine};
use parallel_kbd::adapter::charcode::parity_of;
use parallel_kbd::adapter::direct::{DirectLayout, KeyMask};
use parallel_kbd::adapter::ports::InputPorts;
use parallel_kbd::config::{Parity, Pullups};

/// Pin levels shared between the keyboard thread and the adapter.
///
/// Pin 0 of the primary direct bus is the strobe line. Bits the keyboard does
/// not drive read back from the pull-ups.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    char_bus: AtomicU8,
    char_driven: AtomicU8,
    char_pullups: AtomicU8,
    strobe: AtomicBool,
    primary: AtomicU8,
    secondary: AtomicU8,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive the bits of `driven` to `value`.
    pub fn drive_char(&self, value: u8, driven: u8) {
        self.char_bus.store(value, Ordering::Relaxed);
        self.char_driven.store(driven, Ordering::Release);
    }

    pub fn set_strobe(&self, level: bool) {
        self.strobe.store(level, Ordering::Release);
    }

    pub fn strobe(&self) -> bool {
        self.strobe.load(Ordering::Acquire)
    }

    pub fn set_direct(&self, primary: u8, secondary: u8) {
        self.primary.store(primary & 0xFE, Ordering::Relaxed);
        self.secondary.store(secondary, Ordering::Release);
    }
}

impl InputPorts for SimulatedBus {
    fn read_char_bus(&self) -> u8 {
        let driven = self.char_driven.load(Ordering::Acquire);
        let value = self.char_bus.load(Ordering::Relaxed);
        (value & driven) | (self.char_pullups.load(Ordering::Relaxed) & !driven)
    }

    fn read_direct_bus(&self) -> (u8, u8) {
        let secondary = self.secondary.load(Ordering::Acquire);
        let primary = self.primary.load(Ordering::Relaxed) | self.strobe() as u8;
        (primary, secondary)
    }

    fn enable_pullups(&self, pullups: Pullups) {
        debug!(
            "Bus: pull-ups char={:02X} strobe={} direct={:02X}/{:02X}",
            pullups.char_bus, pullups.strobe, pullups.direct, pullups.direct_2
        );
        self.char_pullups.store(pullups.char_bus, Ordering::Relaxed);
    }
}

/// How the keyboard presents a character on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyboardEncoding {
    pub parity: Parity,
    pub invert: bool,
}

impl KeyboardEncoding {
    /// Bits the keyboard drives.
    pub fn driven(&self) -> u8 {
        match self.parity {
            Parity::None => 0x7F,
            Parity::Even | Parity::Odd => 0xFF,
        }
    }

    pub fn encode(&self, ch: u8) -> u8 {
        let ch = ch & 0x7F;
        let parity_bit = match self.parity {
            Parity::None => 0,
            Parity::Even => parity_of(ch),
            Parity::Odd => parity_of(ch) ^ 1,
        };
        let value = ch | (parity_bit << 7);
        if self.invert { !value } else { value }
    }
}

pub struct Keyboard<'a, 'q> {
    bus: &'a SimulatedBus,
    capture: StrobeCapture<'q>,
    strobe: StrobeLine,
    encoding: KeyboardEncoding,
    interval: Duration,
}

impl<'a, 'q> Keyboard<'a, 'q> {
    pub fn new(
        bus: &'a SimulatedBus,
        capture: StrobeCapture<'q>,
        strobe: StrobeLine,
        encoding: KeyboardEncoding,
        interval: Duration,
    ) -> Self {
        bus.set_strobe(strobe.idle_level());
        Self {
            bus,
            capture,
            strobe,
            encoding,
            interval,
        }
    }

    /// Hold down `keys` for as long as the keyboard runs.
    pub fn hold(&self, layout: &DirectLayout, keys: KeyMask) {
        let (primary, secondary) = layout.pins(keys);
        debug!("Keyboard: holding keys {keys:04X}");
        self.bus.set_direct(primary, secondary);
    }

    /// Present one character and pulse the strobe.
    pub fn type_char(&mut self, ch: u8) {
        let value = self.encoding.encode(ch);
        trace!("Keyboard: {:02X} as {:02X}", ch, value);
        self.bus.drive_char(value, self.encoding.driven());

        let idle = self.strobe.idle_level();
        for level in [!idle, idle] {
            self.bus.set_strobe(level);
            if self.strobe.sample(self.bus.strobe()) && !self.capture.on_strobe(self.bus) {
                debug!("Keyboard: {:02X} lost, queue full", ch);
            }
        }
    }

    /// Type every byte of `source`, then release any held keys.
    pub fn run(&mut self, mut source: impl Read, held: Option<&DirectLayout>) -> io::Result<usize> {
        let mut count = 0;
        let mut buf = [0; 64];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            for &ch in &buf[..n] {
                self.type_char(ch);
                count += 1;
                thread::sleep(self.interval);
            }
        }
        if let Some(layout) = held {
            self.hold(layout, 0);
            thread::sleep(self.interval);
        }
        info!(
            "Keyboard: {count} keys typed, {} lost",
            self.capture.overflows()
        );
        Ok(count)
    }
}
