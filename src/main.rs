use clap::Parser;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{Level, error, info, warn};

mod host;

use parallel_kbd::adapter::capture::StrobeLine;
use parallel_kbd::adapter::direct::{DirectLayout, KeyMask};
use parallel_kbd::adapter::ports::HostLines;
use parallel_kbd::config::{
    ActiveLevel, BellMode, Config, KeyBinding, Parity, ReadyAckMode, StrobeEdge, parse_escaped,
    parse_hex_u8, parse_hex_u16,
};
use parallel_kbd::{Adapter, AdapterContext, InterruptContext};

use crate::host::comm::{CommConfig, connect};
use crate::host::keyboard::{Keyboard, KeyboardEncoding, SimulatedBus};
use crate::host::pins::LoggedOutputs;

/// Parallel keyboard to serial adapter
/// Drives the adapter core from a simulated keyboard and a byte-stream host
#[derive(Parser)]
#[command(name = "parallel-kbd")]
#[command(about = "Parallel keyboard to serial adapter with legacy terminal handshaking")]
struct Args {
    /// Keystrokes to type, read from this file instead of stdin
    #[arg(long, value_name = "FILE")]
    keys: Option<PathBuf>,

    /// Delay between simulated keystrokes, in milliseconds
    #[arg(long, default_value_t = 5)]
    key_interval: u64,

    /// Character bits to transmit, parsed as hex
    #[arg(long, value_parser = parse_hex_u8, default_value = "7F")]
    mask: u8,

    /// Character bus pull-ups, parsed as hex (default: derived)
    #[arg(long, value_parser = parse_hex_u8)]
    pullups: Option<u8>,

    #[arg(long, value_enum, default_value_t = Parity::None)]
    parity: Parity,

    /// Complement captured characters
    #[arg(long)]
    invert: bool,

    #[arg(long, value_enum, default_value_t = StrobeEdge::Falling)]
    strobe_edge: StrobeEdge,

    /// Number of discretely wired keys (0 disables them)
    #[arg(long, default_value_t = 0)]
    direct_keys: u8,

    /// Direct-key bits to complement, parsed as hex
    #[arg(long, value_parser = parse_hex_u16, default_value = "0")]
    direct_invert: u16,

    /// Primary direct-bus pin used for a status LED
    #[arg(long)]
    status_pin: Option<u8>,

    /// Direct-key debounce window in milliseconds
    #[arg(long, default_value_t = 0)]
    debounce: u32,

    /// Direct keys that make characters escape-prefixed, parsed as hex
    #[arg(long, value_parser = parse_hex_u16, default_value = "0")]
    escape_mask: u16,

    /// Byte sent between ESC and the character, e.g. "["
    #[arg(long, value_parser = parse_selector)]
    escape_selector: Option<u8>,

    /// Direct-key binding KEY=ACTION, repeatable
    /// (none, break, answerback, answerback2, answerback3, esc:C, esc:SC, csi:C)
    #[arg(long = "key", value_name = "KEY=ACTION")]
    key_bindings: Vec<KeyBinding>,

    /// Direct keys held down while typing, parsed as hex
    #[arg(long, value_parser = parse_hex_u16)]
    hold_keys: Option<u16>,

    #[arg(long, value_enum, default_value_t = BellMode::None)]
    bell: BellMode,

    /// Bell pulse width in microseconds
    #[arg(long, default_value_t = 5)]
    bell_duration: u32,

    #[arg(long, value_enum, default_value_t = ReadyAckMode::None)]
    ready_ack: ReadyAckMode,

    #[arg(long, value_enum, default_value_t = ActiveLevel::High)]
    ready_ack_on: ActiveLevel,

    /// Ready/ack pulse width in microseconds
    #[arg(long, default_value_t = 5)]
    ready_ack_duration: u32,

    /// Quiet period before a key-ack pulse, in milliseconds
    #[arg(long, default_value_t = 0)]
    ready_ack_delay: u32,

    /// Answer-back sent on ENQ (accepts \r \n \t \e \\ \xNN)
    #[arg(long, default_value = r"Hello\r\n")]
    answerback: String,

    #[arg(long)]
    answerback2: Option<String>,

    #[arg(long)]
    answerback3: Option<String>,

    /// Serial: single bidirectional pipe
    #[arg(long, value_name = "PIPE")]
    pipe: Option<PathBuf>,

    /// Serial: separate read and write pipes
    #[arg(long, num_args = 2, value_names = ["RX", "TX"])]
    pipes: Vec<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_selector(s: &str) -> Result<u8, String> {
    match parse_escaped(s)?.as_slice() {
        [b] => Ok(*b),
        _ => Err(format!("expected a single character, got {s:?}")),
    }
}

impl Args {
    fn config(&self) -> Result<Config, String> {
        Ok(Config {
            char_mask: self.mask,
            char_pullup_mask: self.pullups,
            parity: self.parity,
            invert: self.invert,
            strobe_edge: self.strobe_edge,
            direct_keys: self.direct_keys,
            direct_invert_mask: self.direct_invert,
            status_pin: self.status_pin,
            debounce_ms: self.debounce,
            escape_prefix_mask: self.escape_mask,
            escape_selector: self.escape_selector,
            key_bindings: self.key_bindings.clone(),
            bell: self.bell,
            bell_duration_us: self.bell_duration,
            ready_ack: self.ready_ack,
            ready_ack_on: self.ready_ack_on,
            ready_ack_duration_us: self.ready_ack_duration,
            ready_ack_delay_ms: self.ready_ack_delay,
            answerback: parse_escaped(&self.answerback)?,
            answerback_2: self.answerback2.as_deref().map(parse_escaped).transpose()?,
            answerback_3: self.answerback3.as_deref().map(parse_escaped).transpose()?,
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::TRACE
    } else {
        Level::INFO
    };
    match &args.log_file {
        Some(path) => host::logging::setup_logging_file(level, path)?,
        None => host::logging::setup_logging_stdio(level),
    }

    let config = args.config()?;
    config.validate()?;
    info!("Parallel keyboard adapter starting...");

    let source: Box<dyn Read + Send> = match &args.keys {
        Some(path) => {
            info!("Keys from {:?}", path);
            Box::new(File::open(path)?)
        }
        None => Box::new(io::stdin()),
    };

    let pipes = if args.pipes.len() == 2 {
        Some((args.pipes[0].clone(), args.pipes[1].clone()))
    } else {
        None
    };
    let port = connect(CommConfig::from_args(args.pipe.clone(), pipes))?;

    let held = match (args.hold_keys, DirectLayout::new(&config)) {
        (Some(keys), Some(layout)) => Some((layout, keys as KeyMask)),
        (Some(_), None) => {
            warn!("--hold-keys ignored, no direct keys configured");
            None
        }
        _ => None,
    };

    let bus = SimulatedBus::new();
    let mut context = AdapterContext::<16>::new();
    let (irq, task) = context.split(&config)?;
    let InterruptContext { capture, clock } = irq;
    let outputs = LoggedOutputs::new(&config);
    let mut adapter = Adapter::new(task, &config, port, &bus, outputs)?;

    let keyboard_done = AtomicBool::new(false);
    let stop = AtomicBool::new(false);
    let start_time = Instant::now();

    thread::scope(|s| {
        let keyboard_done = &keyboard_done;
        let stop = &stop;
        let bus = &bus;

        s.spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                clock.tick();
                thread::sleep(Duration::from_millis(1));
            }
        });

        let encoding = KeyboardEncoding {
            parity: config.parity,
            invert: config.invert,
        };
        let interval = Duration::from_millis(args.key_interval);
        let strobe = StrobeLine::new(config.strobe_edge);
        s.spawn(move || {
            let mut keyboard = Keyboard::new(bus, capture, strobe, encoding, interval);
            if let Some((layout, keys)) = &held {
                keyboard.hold(layout, *keys);
            }
            if let Err(e) = keyboard.run(source, held.as_ref().map(|(layout, _)| layout)) {
                error!("Keyboard source failed: {e}");
            }
            keyboard_done.store(true, Ordering::Release);
        });

        let mut host_lines = HostLines::empty();
        loop {
            let lines = adapter.transport().host_lines();
            if lines != host_lines {
                info!("Host control lines {:?}", lines);
                adapter.host_control_lines_changed(lines);
                host_lines = lines;
            }
            adapter.task();
            if keyboard_done.load(Ordering::Acquire) && adapter.is_idle() {
                break;
            }
            thread::sleep(Duration::from_micros(100));
        }
        // One last pass for anything that raced the exit check.
        adapter.task();
        stop.store(true, Ordering::Relaxed);
    });

    let stats = adapter.stats();
    let (bell_pulses, ack_pulses) = adapter.outputs().pulses();
    info!("Adapter finished:");
    info!("  Characters sent: {}", stats.sent);
    info!("  Parity errors: {}", stats.parity_dropped);
    info!("  Queue overflows: {}", stats.overflows);
    info!("  Bell pulses: {}", bell_pulses);
    info!("  Ready/ack pulses: {}", ack_pulses);
    let (bell, ready_ack, indicator) = adapter.outputs().levels();
    info!(
        "  Final pins: bell={} ready/ack={} indicator={}",
        bell as u8, ready_ack as u8, indicator as u8
    );
    info!("  Time elapsed: {:?}", start_time.elapsed());

    adapter.into_transport().close();
    Ok(())
}
