use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, trace};

use parallel_kbd::adapter::ports::{DeviceLines, HostLines, Transport};

/// Outbound bytes buffered before `send_byte` blocks.
const CHANNEL_DEPTH: usize = 64;

/// Where the serial side of the adapter is connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CommConfig {
    /// Transmit to stdout. Nothing is received; DTR stays asserted.
    #[default]
    Stdio,
    /// Single bidirectional pipe
    Pipe(PathBuf),
    /// Separate read and write pipes
    Pipes { rx: PathBuf, tx: PathBuf },
}

impl CommConfig {
    pub fn from_args(pipe: Option<PathBuf>, pipes: Option<(PathBuf, PathBuf)>) -> Self {
        if let Some((rx, tx)) = pipes {
            CommConfig::Pipes { rx, tx }
        } else if let Some(pipe) = pipe {
            CommConfig::Pipe(pipe)
        } else {
            CommConfig::Stdio
        }
    }
}

/// Device end of the serial link. Pump threads move bytes between the
/// channels and the connected file or pipe.
pub struct SerialPort {
    rx: Option<mpsc::Receiver<u8>>,
    tx: mpsc::SyncSender<u8>,
    dtr: Arc<AtomicBool>,
    lines: DeviceLines,
    writer: JoinHandle<()>,
}

impl SerialPort {
    /// Host control lines as currently seen.
    pub fn host_lines(&self) -> HostLines {
        if self.dtr.load(Ordering::Acquire) {
            HostLines::DTR
        } else {
            HostLines::empty()
        }
    }

    pub fn device_lines(&self) -> DeviceLines {
        self.lines
    }

    /// Flush everything sent so far and stop the writer.
    pub fn close(self) {
        let SerialPort { tx, writer, .. } = self;
        drop(tx);
        if writer.join().is_err() {
            error!("Serial write thread panicked");
        }
    }
}

impl Transport for SerialPort {
    fn send_byte(&mut self, byte: u8) {
        if self.tx.send(byte).is_err() {
            trace!("Serial: writer gone, dropping {byte:02X}");
        }
    }

    fn receive_byte(&mut self) -> Option<u8> {
        self.rx.as_ref()?.try_recv().ok()
    }

    fn report_control_lines(&mut self, lines: DeviceLines) {
        if lines != self.lines {
            info!("Serial: device control lines {:?}", lines);
        }
        self.lines = lines;
    }
}

/// Open the configured connection and start its pump threads.
pub fn connect(config: CommConfig) -> Result<SerialPort, io::Error> {
    let (tx, out_rx) = mpsc::sync_channel(CHANNEL_DEPTH);
    let dtr = Arc::new(AtomicBool::new(false));

    let (rx, writer) = match config {
        CommConfig::Stdio => {
            info!("Connecting serial to stdout");
            dtr.store(true, Ordering::Release);
            (None, spawn_writer(out_rx, WriteTarget::Open(Box::new(io::stdout()))))
        }
        CommConfig::Pipe(path) => {
            info!("Connecting serial to pipe {:?}", path);
            debug!("Opening {:?} as read/write", path);
            let pipe_r = OpenOptions::new().read(true).write(true).open(&path)?;
            let pipe_w = pipe_r.try_clone()?;
            let (in_tx, in_rx) = mpsc::sync_channel(CHANNEL_DEPTH);
            dtr.store(true, Ordering::Release);
            spawn_reader(in_tx, ReadSource::Open(Box::new(pipe_r)), dtr.clone());
            (
                Some(in_rx),
                spawn_writer(out_rx, WriteTarget::Open(Box::new(pipe_w))),
            )
        }
        CommConfig::Pipes { rx, tx } => {
            info!("Connecting serial to pipes {:?} and {:?}", rx, tx);
            let (in_tx, in_rx) = mpsc::sync_channel(CHANNEL_DEPTH);
            // FIFOs block on open until the other end shows up, so both
            // sides are opened from their pump threads.
            spawn_reader(in_tx, ReadSource::Path(rx), dtr.clone());
            (Some(in_rx), spawn_writer(out_rx, WriteTarget::Path(tx)))
        }
    };

    Ok(SerialPort {
        rx,
        tx,
        dtr,
        lines: DeviceLines::empty(),
        writer,
    })
}

enum ReadSource {
    Open(Box<dyn Read + Send>),
    Path(PathBuf),
}

enum WriteTarget {
    Open(Box<dyn Write + Send>),
    Path(PathBuf),
}

fn spawn_reader(tx: mpsc::SyncSender<u8>, source: ReadSource, dtr: Arc<AtomicBool>) {
    thread::spawn(move || {
        let mut reader: Box<dyn Read + Send> = match source {
            ReadSource::Open(reader) => reader,
            ReadSource::Path(path) => match OpenOptions::new().read(true).open(&path) {
                Ok(file) => Box::new(file),
                Err(e) => {
                    error!("Failed to open {:?}: {e}", path);
                    return;
                }
            },
        };
        dtr.store(true, Ordering::Release);
        debug!("Serial: host connected, DTR asserted");

        let mut buf = [0; 1];
        loop {
            match reader.read(&mut buf) {
                Ok(1) => {
                    trace!("Serial: received {:02X}", buf[0]);
                    if tx.send(buf[0]).is_err() {
                        break;
                    }
                }
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("Serial read failed: {e}");
                    break;
                }
            }
        }
        dtr.store(false, Ordering::Release);
        debug!("Serial: host disconnected, DTR dropped");
    });
}

fn spawn_writer(rx: mpsc::Receiver<u8>, target: WriteTarget) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut writer: Box<dyn Write + Send> = match target {
            WriteTarget::Open(writer) => writer,
            WriteTarget::Path(path) => match OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
            {
                Ok(file) => Box::new(file),
                Err(e) => {
                    error!("Failed to open {:?}: {e}", path);
                    return;
                }
            },
        };

        while let Ok(b) = rx.recv() {
            // Batch whatever else is already waiting.
            let mut chunk = vec![b];
            chunk.extend(rx.try_iter());
            if let Err(e) = writer.write_all(&chunk).and_then(|_| writer.flush()) {
                error!("Serial write failed: {e}");
                break;
            }
        }
        trace!("Serial write thread exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> Option<T> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if let Some(v) = f() {
                return Some(v);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_from_args() {
        assert_eq!(CommConfig::from_args(None, None), CommConfig::Stdio);
        assert_eq!(
            CommConfig::from_args(Some("a".into()), None),
            CommConfig::Pipe("a".into())
        );
        assert_eq!(
            CommConfig::from_args(Some("a".into()), Some(("r".into(), "t".into()))),
            CommConfig::Pipes {
                rx: "r".into(),
                tx: "t".into()
            }
        );
    }

    #[test]
    fn test_pipes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let rx = dir.path().join("host-to-device");
        let tx = dir.path().join("device-to-host");
        std::fs::write(&rx, [0x05]).unwrap();

        let mut port = connect(CommConfig::Pipes {
            rx: rx.clone(),
            tx: tx.clone(),
        })
        .unwrap();
        assert_eq!(wait_for(|| port.receive_byte()), Some(0x05));

        // The inbound file is exhausted, which drops DTR.
        assert!(wait_for(|| port.host_lines().is_empty().then_some(())).is_some());
        assert_eq!(port.receive_byte(), None);

        port.send_bytes(b"Hello\r\n");
        port.close();
        assert_eq!(std::fs::read(&tx).unwrap(), b"Hello\r\n");
    }

    #[test]
    fn test_control_line_reports_are_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let rx = dir.path().join("rx");
        std::fs::write(&rx, b"").unwrap();
        let mut port = connect(CommConfig::Pipes {
            rx,
            tx: dir.path().join("tx"),
        })
        .unwrap();
        port.report_control_lines(DeviceLines::BREAK);
        assert_eq!(port.device_lines(), DeviceLines::BREAK);
        port.report_control_lines(DeviceLines::empty());
        assert!(port.device_lines().is_empty());
        port.close();
    }

    #[test]
    fn test_missing_pipe_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = connect(CommConfig::Pipe(dir.path().join("missing")));
        assert!(result.is_err());
    }
}
