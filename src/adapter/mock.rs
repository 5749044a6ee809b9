//! Recording stand-ins for the adapter's collaborators.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::adapter::ports::{DeviceLines, InputPorts, OutputPorts, Transport};
use crate::config::Pullups;

#[derive(Debug, Default)]
pub struct MockTransport {
    pub sent: Vec<u8>,
    pub inbound: VecDeque<u8>,
    pub reports: Vec<DeviceLines>,
}

impl MockTransport {
    pub fn receive(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    pub fn take_sent(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MockTransport {
    fn send_byte(&mut self, byte: u8) {
        self.sent.push(byte);
    }

    fn receive_byte(&mut self) -> Option<u8> {
        self.inbound.pop_front()
    }

    fn report_control_lines(&mut self, lines: DeviceLines) {
        self.reports.push(lines);
    }
}

/// Bus levels a test can change between strobes.
#[derive(Debug, Default)]
pub struct MockInputs {
    char_bus: AtomicU8,
    primary: AtomicU8,
    secondary: AtomicU8,
    direct_reads: AtomicUsize,
    pullups: Mutex<Option<Pullups>>,
}

impl MockInputs {
    pub fn new(char_bus: u8, direct_bus: (u8, u8)) -> Self {
        Self {
            char_bus: AtomicU8::new(char_bus),
            primary: AtomicU8::new(direct_bus.0),
            secondary: AtomicU8::new(direct_bus.1),
            ..Default::default()
        }
    }

    pub fn set_char_bus(&self, value: u8) {
        self.char_bus.store(value, Ordering::Relaxed);
    }

    pub fn set_direct_bus(&self, primary: u8, secondary: u8) {
        self.primary.store(primary, Ordering::Relaxed);
        self.secondary.store(secondary, Ordering::Relaxed);
    }

    pub fn direct_reads(&self) -> usize {
        self.direct_reads.load(Ordering::Relaxed)
    }

    pub fn pullups(&self) -> Option<Pullups> {
        *self.pullups.lock().unwrap()
    }
}

impl InputPorts for MockInputs {
    fn read_char_bus(&self) -> u8 {
        self.char_bus.load(Ordering::Relaxed)
    }

    fn read_direct_bus(&self) -> (u8, u8) {
        self.direct_reads.fetch_add(1, Ordering::Relaxed);
        (
            self.primary.load(Ordering::Relaxed),
            self.secondary.load(Ordering::Relaxed),
        )
    }

    fn enable_pullups(&self, pullups: Pullups) {
        *self.pullups.lock().unwrap() = Some(pullups);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    BellPin(bool),
    AckPin(bool),
    IndicatorPin(bool),
    Delay(u32),
}

#[derive(Debug, Default)]
pub struct MockOutputs {
    pub events: Vec<OutputEvent>,
}

impl OutputPorts for MockOutputs {
    fn set_bell(&mut self, level: bool) {
        self.events.push(OutputEvent::BellPin(level));
    }

    fn set_ready_ack(&mut self, level: bool) {
        self.events.push(OutputEvent::AckPin(level));
    }

    fn set_indicator(&mut self, on: bool) {
        self.events.push(OutputEvent::IndicatorPin(on));
    }

    fn delay_us(&mut self, us: u32) {
        self.events.push(OutputEvent::Delay(us));
    }
}
