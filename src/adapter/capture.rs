//! Interrupt-side producer. Samples the buses and enqueues; nothing else.

use crate::adapter::direct::DirectLayout;
use crate::adapter::ports::InputPorts;
use crate::adapter::queue::{CapturedEntry, Producer, QUEUE_SIZE};
use crate::config::{Config, StrobeEdge};

pub struct StrobeCapture<'q, const N: usize = QUEUE_SIZE> {
    producer: Producer<'q, N>,
    layout: Option<DirectLayout>,
}

impl<'q, const N: usize> StrobeCapture<'q, N> {
    pub fn new(producer: Producer<'q, N>, config: &Config) -> Self {
        Self {
            producer,
            layout: DirectLayout::new(config),
        }
    }

    /// Handle one strobe edge. Returns false if the queue was full and the
    /// sample was dropped.
    #[inline]
    pub fn on_strobe(&mut self, bus: &impl InputPorts) -> bool {
        let char_code = bus.read_char_bus();
        let entry = match &self.layout {
            Some(layout) => {
                let (primary, secondary) = bus.read_direct_bus();
                CapturedEntry::with_keys(char_code, layout.normalize(primary, secondary))
            }
            None => CapturedEntry::char(char_code),
        };
        self.producer.add(entry)
    }

    pub fn overflows(&self) -> u32 {
        self.producer.overflows()
    }
}

/// Edge detector standing in for the external interrupt trigger on the
/// strobe pin.
#[derive(Debug, Clone, Copy)]
pub struct StrobeLine {
    edge: StrobeEdge,
    last: bool,
}

impl StrobeLine {
    /// Starts at the idle level for `edge`: high (pulled up) for a falling
    /// strobe, low for a rising one.
    pub fn new(edge: StrobeEdge) -> Self {
        Self {
            edge,
            last: edge == StrobeEdge::Falling,
        }
    }

    pub fn idle_level(&self) -> bool {
        self.edge == StrobeEdge::Falling
    }

    /// Feed the current pin level; true on the configured edge.
    pub fn sample(&mut self, level: bool) -> bool {
        let last = std::mem::replace(&mut self.last, level);
        match self.edge {
            StrobeEdge::Falling => last && !level,
            StrobeEdge::Rising => !last && level,
        }
    }
}
