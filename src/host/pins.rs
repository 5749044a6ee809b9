use std::time::{Duration, Instant};

use tracing::{debug, info};

use parallel_kbd::adapter::ports::OutputPorts;
use parallel_kbd::config::{ActiveLevel, BellMode, Config};

/// Output pins that log their transitions.
#[derive(Debug)]
pub struct LoggedOutputs {
    bell_on: ActiveLevel,
    ack_on: ActiveLevel,
    bell: bool,
    ready_ack: bool,
    indicator: bool,
    bell_pulses: u32,
    ack_pulses: u32,
}

impl LoggedOutputs {
    /// Pins start at their idle levels.
    pub fn new(config: &Config) -> Self {
        let bell_on = match config.bell {
            BellMode::Low => ActiveLevel::Low,
            _ => ActiveLevel::High,
        };
        let ack_on = config.ready_ack_on;
        Self {
            bell_on,
            ack_on,
            bell: bell_on.level(false),
            ready_ack: ack_on.level(false),
            indicator: false,
            bell_pulses: 0,
            ack_pulses: 0,
        }
    }

    /// Asserting transitions seen on the bell and ready/ack pins.
    pub fn pulses(&self) -> (u32, u32) {
        (self.bell_pulses, self.ack_pulses)
    }

    pub fn levels(&self) -> (bool, bool, bool) {
        (self.bell, self.ready_ack, self.indicator)
    }
}

impl OutputPorts for LoggedOutputs {
    fn set_bell(&mut self, level: bool) {
        if level == self.bell_on.level(true) && level != self.bell {
            self.bell_pulses += 1;
        }
        if level != self.bell {
            debug!("Pins: bell {}", level as u8);
        }
        self.bell = level;
    }

    fn set_ready_ack(&mut self, level: bool) {
        if level == self.ack_on.level(true) && level != self.ready_ack {
            self.ack_pulses += 1;
        }
        if level != self.ready_ack {
            debug!("Pins: ready/ack {}", level as u8);
        }
        self.ready_ack = level;
    }

    fn set_indicator(&mut self, on: bool) {
        if on != self.indicator {
            info!("Pins: indicator {}", if on { "on" } else { "off" });
        }
        self.indicator = on;
    }

    fn delay_us(&mut self, us: u32) {
        let deadline = Instant::now() + Duration::from_micros(us as u64);
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}
