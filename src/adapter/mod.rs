//! The capture-and-dispatch core.
//!
//! [`AdapterContext`] owns everything shared between the interrupt side and
//! the cooperative task: the capture queue and the millisecond clock. Split it
//! once into an [`InterruptContext`] (strobe capture plus the clock tick) and a
//! [`TaskContext`] that is handed to [`Adapter`], the drain task.

pub mod capture;
pub mod charcode;
pub mod clock;
pub mod debounce;
pub mod direct;
pub mod handshake;
pub mod ports;
pub mod queue;

#[cfg(test)]
pub(crate) mod mock;

use tracing::{debug, trace};

use capture::StrobeCapture;
use charcode::CharTransform;
use clock::TimeBase;
use debounce::Debouncer;
use direct::{DirectKeyDispatcher, DirectLayout, KeyEdge, KeyMask};
use handshake::{Bell, ReadyAck};
use ports::{DeviceLines, HostLines, InputPorts, OutputPorts, Transport};
use queue::{CaptureQueue, Consumer, QUEUE_SIZE};

use crate::config::{Config, ConfigError, KeyAction};

pub const ENQ: u8 = 0x05;
pub const BEL: u8 = 0x07;
pub const ESC: u8 = 0x1B;

pub struct AdapterContext<const N: usize = QUEUE_SIZE> {
    queue: CaptureQueue<N>,
    clock: TimeBase,
}

impl<const N: usize> AdapterContext<N> {
    pub const fn new() -> Self {
        Self {
            queue: CaptureQueue::new(),
            clock: TimeBase::new(),
        }
    }

    /// Rejects an invalid `config` before any component is built.
    pub fn split(
        &mut self,
        config: &Config,
    ) -> Result<(InterruptContext<'_, N>, TaskContext<'_, N>), ConfigError> {
        config.validate()?;
        let Self { queue, clock } = self;
        let clock: &TimeBase = clock;
        let (producer, consumer) = queue.split();
        Ok((
            InterruptContext {
                capture: StrobeCapture::new(producer, config),
                clock,
            },
            TaskContext { consumer, clock },
        ))
    }
}

impl<const N: usize> Default for AdapterContext<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the interrupt handlers touch.
pub struct InterruptContext<'a, const N: usize = QUEUE_SIZE> {
    pub capture: StrobeCapture<'a, N>,
    pub clock: &'a TimeBase,
}

/// Consumer side of the shared state.
pub struct TaskContext<'a, const N: usize = QUEUE_SIZE> {
    pub consumer: Consumer<'a, N>,
    pub clock: &'a TimeBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainStats {
    /// Characters forwarded to the transport.
    pub sent: u32,
    pub parity_dropped: u32,
    /// Entries lost to a full queue.
    pub overflows: u32,
}

/// The drain task.
pub struct Adapter<'a, T, I, O, const N: usize = QUEUE_SIZE> {
    consumer: Consumer<'a, N>,
    clock: &'a TimeBase,
    transport: T,
    inputs: I,
    outputs: O,

    transform: CharTransform,
    layout: Option<DirectLayout>,
    debounce: Debouncer,
    dispatcher: DirectKeyDispatcher,
    escape_mask: KeyMask,
    escape_selector: Option<u8>,
    answerbacks: [Option<Vec<u8>>; 3],
    bell: Bell,
    ready_ack: ReadyAck,

    lines: DeviceLines,
    sent: u32,
    parity_dropped: u32,
}

impl<'a, T, I, O, const N: usize> Adapter<'a, T, I, O, N>
where
    T: Transport,
    I: InputPorts,
    O: OutputPorts,
{
    pub fn new(
        task: TaskContext<'a, N>,
        config: &Config,
        transport: T,
        inputs: I,
        mut outputs: O,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let bell = Bell::new(config);
        let ready_ack = ReadyAck::new(config);
        bell.init(&mut outputs);
        ready_ack.init(&mut outputs);
        outputs.set_indicator(false);
        inputs.enable_pullups(config.pullups());

        let layout = DirectLayout::new(config);
        debug!(
            "Adapter: mask={:02X} parity={:?} invert={} direct keys={} debounce={}ms",
            config.char_mask,
            config.parity,
            config.invert,
            layout.map_or(0, |l| l.count),
            config.debounce_ms
        );

        Ok(Self {
            consumer: task.consumer,
            clock: task.clock,
            transport,
            inputs,
            outputs,
            transform: CharTransform::new(config),
            layout,
            debounce: Debouncer::new(config.debounce_ms),
            dispatcher: DirectKeyDispatcher::new(config),
            escape_mask: config.escape_prefix_mask,
            escape_selector: config.escape_selector,
            answerbacks: [0, 1, 2].map(|slot| config.answerback(slot).map(<[u8]>::to_vec)),
            bell,
            ready_ack,
            lines: DeviceLines::empty(),
            sent: 0,
            parity_dropped: 0,
        })
    }

    /// One pass of the cooperative task.
    pub fn task(&mut self) {
        self.poll_host();
        let sent = self.drain();
        let now = self.clock.now();
        self.ready_ack.after_drain(sent, now, &mut self.outputs);
        self.poll_direct_keys(now);
    }

    /// Notification that the host changed its control lines.
    pub fn host_control_lines_changed(&mut self, lines: HostLines) {
        self.ready_ack.host_lines_changed(lines, &mut self.outputs);
    }

    /// Return all task-side state to power-on values and discard anything
    /// still queued.
    pub fn reset(&mut self) {
        self.consumer.clear();
        self.debounce.reset(self.clock.now());
        self.dispatcher.reset();
        self.ready_ack.reset();
        if self.lines.contains(DeviceLines::BREAK) {
            self.set_break(false);
        }
        debug!("Adapter: reset");
    }

    pub fn stats(&self) -> DrainStats {
        DrainStats {
            sent: self.sent,
            parity_dropped: self.parity_dropped,
            overflows: self.consumer.overflows(),
        }
    }

    /// Nothing queued and no acknowledgment owed.
    pub fn is_idle(&self) -> bool {
        self.consumer.is_empty() && !self.ready_ack.is_pending()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut O {
        &mut self.outputs
    }

    fn poll_host(&mut self) {
        match self.transport.receive_byte() {
            Some(ENQ) => {
                debug!("Host: ENQ, sending answer-back");
                if let Some(answerback) = &self.answerbacks[0] {
                    self.transport.send_bytes(answerback);
                }
            }
            Some(BEL) => {
                debug!("Host: BEL");
                self.bell.ring(&mut self.outputs);
            }
            Some(byte) => trace!("Host: ignoring {byte:02X}"),
            None => {}
        }
    }

    /// Empty the queue. Returns true if at least one character was sent.
    fn drain(&mut self) -> bool {
        let mut sent = false;
        while let Some(entry) = self.consumer.remove() {
            if let Some(keys) = entry.direct_keys {
                self.dispatch(keys);
            }

            let Some(ch) = self.transform.apply(entry.char_code) else {
                debug!("Drain: parity error on {:02X}, dropped", entry.char_code);
                self.parity_dropped = self.parity_dropped.wrapping_add(1);
                continue;
            };

            if entry.direct_keys.is_some_and(|keys| keys & self.escape_mask != 0) {
                trace!("Drain: ESC {:02X}", ch);
                self.send_escaped(self.escape_selector, ch);
            } else {
                trace!("Drain: {:02X}", ch);
                self.transport.send_byte(ch);
            }
            self.sent = self.sent.wrapping_add(1);
            sent = true;
        }
        sent
    }

    fn poll_direct_keys(&mut self, now: u32) {
        let Some(layout) = &self.layout else {
            return;
        };
        let (primary, secondary) = self.inputs.read_direct_bus();
        let sample = layout.normalize(primary, secondary);
        if let Some(stable) = self.debounce.poll(sample, now) {
            self.dispatch(stable);
        }
    }

    fn dispatch(&mut self, keys: KeyMask) {
        for (edge, action) in self.dispatcher.update(keys) {
            trace!(
                "Keys: key {} {}",
                edge.key,
                if edge.pressed { "down" } else { "up" }
            );
            self.run_action(edge, action);
        }
    }

    fn run_action(&mut self, edge: KeyEdge, action: KeyAction) {
        match action {
            KeyAction::NoOp => {}
            KeyAction::Break => self.set_break(edge.pressed),
            KeyAction::Answerback(slot) if edge.pressed => {
                if let Some(Some(answerback)) = self.answerbacks.get(slot as usize) {
                    self.transport.send_bytes(answerback);
                }
            }
            KeyAction::EscapePrefix { selector, ch } if edge.pressed => {
                self.send_escaped(selector, ch);
            }
            // Press-only actions.
            KeyAction::Answerback(_) | KeyAction::EscapePrefix { .. } => {}
        }
    }

    fn set_break(&mut self, on: bool) {
        debug!("Keys: break {}", if on { "on" } else { "off" });
        self.lines.set(DeviceLines::BREAK, on);
        self.outputs.set_indicator(on);
        self.transport.report_control_lines(self.lines);
    }

    fn send_escaped(&mut self, selector: Option<u8>, ch: u8) {
        self.transport.send_byte(ESC);
        if let Some(selector) = selector {
            self.transport.send_byte(selector);
        }
        self.transport.send_byte(ch);
    }
}
