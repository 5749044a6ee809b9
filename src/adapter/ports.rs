//! Collaborators the adapter core talks to: the serial transport and the
//! hardware pins.

use bitflags::bitflags;

use crate::config::Pullups;

bitflags! {
    /// Control lines driven by the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HostLines: u8 {
        const DTR = 1 << 0;
        const RTS = 1 << 1;
    }
}

bitflags! {
    /// Serial state reported to the host, laid out like a CDC serial-state
    /// notification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceLines: u8 {
        const DCD = 1 << 0;
        const DSR = 1 << 1;
        const BREAK = 1 << 2;
        const RING = 1 << 3;
        const FRAMING_ERROR = 1 << 4;
        const PARITY_ERROR = 1 << 5;
        const OVERRUN = 1 << 6;
    }
}

/// Byte-oriented duplex link to the host.
pub trait Transport {
    fn send_byte(&mut self, byte: u8);

    fn send_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.send_byte(byte);
        }
    }

    /// Next inbound byte, if one has arrived. Never blocks.
    fn receive_byte(&mut self) -> Option<u8>;

    fn report_control_lines(&mut self, lines: DeviceLines);
}

/// Input pins. Read from interrupt context, so implementations must be
/// shareable and must not block.
pub trait InputPorts: Sync {
    /// Character bus, 8 bits.
    fn read_char_bus(&self) -> u8;

    /// Primary and secondary direct-key buses, raw.
    fn read_direct_bus(&self) -> (u8, u8);

    fn enable_pullups(&self, _pullups: Pullups) {}
}

impl<T: InputPorts + ?Sized> InputPorts for &T {
    fn read_char_bus(&self) -> u8 {
        (**self).read_char_bus()
    }

    fn read_direct_bus(&self) -> (u8, u8) {
        (**self).read_direct_bus()
    }

    fn enable_pullups(&self, pullups: Pullups) {
        (**self).enable_pullups(pullups)
    }
}

/// Output pins and the busy-wait used to time pulses on them. Only ever used
/// from the cooperative task.
pub trait OutputPorts {
    fn set_bell(&mut self, level: bool);

    fn set_ready_ack(&mut self, level: bool);

    /// Visual indicator (LEDs) used while BREAK is held.
    fn set_indicator(&mut self, on: bool);

    fn delay_us(&mut self, us: u32);
}
