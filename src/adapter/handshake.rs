//! Bell and ready/acknowledge outputs.

use tracing::debug;

use crate::adapter::clock::elapsed;
use crate::adapter::ports::{HostLines, OutputPorts};
use crate::config::{ActiveLevel, BellMode, Config, ReadyAckMode};

/// Bell output, pulsed on BEL from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bell {
    level: Option<ActiveLevel>,
    duration_us: u32,
}

impl Bell {
    pub fn new(config: &Config) -> Self {
        let level = match config.bell {
            BellMode::Low => Some(ActiveLevel::Low),
            BellMode::High => Some(ActiveLevel::High),
            // Tone never gets past validation.
            BellMode::None | BellMode::Tone => None,
        };
        Self {
            level,
            duration_us: config.bell_duration_us,
        }
    }

    /// Drive the idle level.
    pub fn init(&self, out: &mut impl OutputPorts) {
        if let Some(level) = self.level {
            out.set_bell(level.level(false));
        }
    }

    pub fn ring(&self, out: &mut impl OutputPorts) {
        let Some(level) = self.level else {
            return;
        };
        debug!("Bell: {}us pulse", self.duration_us);
        out.set_bell(level.level(true));
        out.delay_us(self.duration_us);
        out.set_bell(level.level(false));
    }
}

/// Timing of a key-ack pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckTiming {
    /// Pulse within the drain cycle that sent.
    Immediate,
    /// Pulse once sending has been quiet for longer than `delay_ms`.
    Delayed {
        delay_ms: u32,
        pending: bool,
        last_send: u32,
    },
}

/// Ready/acknowledge output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyAck {
    Disabled,
    /// Mirror the host's DTR line.
    HostFollow { on: ActiveLevel },
    /// Pulse after keys are sent.
    KeyAck {
        on: ActiveLevel,
        duration_us: u32,
        timing: AckTiming,
    },
}

impl ReadyAck {
    pub fn new(config: &Config) -> Self {
        let on = config.ready_ack_on;
        match config.ready_ack {
            ReadyAckMode::None => ReadyAck::Disabled,
            ReadyAckMode::Dtr => ReadyAck::HostFollow { on },
            ReadyAckMode::KeyAck => ReadyAck::KeyAck {
                on,
                duration_us: config.ready_ack_duration_us,
                timing: if config.ready_ack_delay_ms == 0 {
                    AckTiming::Immediate
                } else {
                    AckTiming::Delayed {
                        delay_ms: config.ready_ack_delay_ms,
                        pending: false,
                        last_send: 0,
                    }
                },
            },
        }
    }

    /// Drive the idle level.
    pub fn init(&self, out: &mut impl OutputPorts) {
        match self {
            ReadyAck::Disabled => {}
            ReadyAck::HostFollow { on } | ReadyAck::KeyAck { on, .. } => {
                out.set_ready_ack(on.level(false))
            }
        }
    }

    pub fn host_lines_changed(&mut self, lines: HostLines, out: &mut impl OutputPorts) {
        if let ReadyAck::HostFollow { on } = self {
            let dtr = lines.contains(HostLines::DTR);
            debug!("Ready/ack: following DTR = {dtr}");
            out.set_ready_ack(on.level(dtr));
        }
    }

    /// Called once per drain cycle with whether anything was sent.
    pub fn after_drain(&mut self, sent: bool, now: u32, out: &mut impl OutputPorts) {
        let ReadyAck::KeyAck {
            on,
            duration_us,
            timing,
        } = self
        else {
            return;
        };
        let fire = match timing {
            AckTiming::Immediate => sent,
            AckTiming::Delayed {
                delay_ms,
                pending,
                last_send,
            } => {
                if sent {
                    *pending = true;
                    *last_send = now;
                    false
                } else if *pending && elapsed(now, *last_send) > *delay_ms {
                    *pending = false;
                    true
                } else {
                    false
                }
            }
        };
        if fire {
            debug!("Ready/ack: {duration_us}us pulse");
            out.set_ready_ack(on.level(true));
            out.delay_us(*duration_us);
            out.set_ready_ack(on.level(false));
        }
    }

    /// A delayed pulse is still owed.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ReadyAck::KeyAck {
                timing: AckTiming::Delayed { pending: true, .. },
                ..
            }
        )
    }

    pub fn reset(&mut self) {
        if let ReadyAck::KeyAck {
            timing: AckTiming::Delayed {
                pending, last_send, ..
            },
            ..
        } = self
        {
            *pending = false;
            *last_send = 0;
        }
    }
}
