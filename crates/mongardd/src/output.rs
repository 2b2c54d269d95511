//! Routes server output streams to the configured log destination.
//!
//! The server process emits three logical streams: normal output,
//! error output, and the command echo. All three share a single sink
//! so that file logging interleaves them in arrival order.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use mongard_config::{LogDestination, LogEncoding};

use crate::process::PROCESS_TARGET;

/// Logical stream a routed line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Output,
    Error,
    Commands,
}

impl StreamKind {
    /// Prefix applied when lines from the three streams share a console.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Output => "[mongod]",
            Self::Error => "[mongod error]",
            Self::Commands => "[mongod commands]",
        }
    }
}

/// Destination for routed server output lines.
///
/// Implementations must serialise concurrent writers internally: the
/// output and error streams are drained from separate threads.
pub trait LineSink: Send + Sync {
    fn write_line(&self, stream: StreamKind, line: &str) -> io::Result<()>;
}

/// Builds the sink matching the configured log destination.
pub fn sink_for(
    destination: LogDestination,
    log_file: &Utf8Path,
    encoding: LogEncoding,
) -> Arc<dyn LineSink> {
    match destination {
        LogDestination::Console => Arc::new(ConsoleSink),
        LogDestination::File => Arc::new(FileSink::new(log_file.to_owned(), encoding)),
        LogDestination::None => Arc::new(NullSink),
    }
}

/// Writes each line to stderr with the stream prefix.
pub struct ConsoleSink;

impl LineSink for ConsoleSink {
    fn write_line(&self, stream: StreamKind, line: &str) -> io::Result<()> {
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "{} {line}", stream.prefix())
    }
}

/// Writes every stream to a single log file in the configured encoding.
///
/// The file is opened lazily on the first line so that a server which
/// never produces output leaves no empty log behind. Each line is
/// flushed immediately; a crash therefore loses at most the line being
/// written.
pub struct FileSink {
    path: Utf8PathBuf,
    encoding: LogEncoding,
    file: Mutex<Option<File>>,
}

impl FileSink {
    #[must_use]
    pub fn new(path: Utf8PathBuf, encoding: LogEncoding) -> Self {
        Self {
            path,
            encoding,
            file: Mutex::new(None),
        }
    }
}

impl LineSink for FileSink {
    fn write_line(&self, _stream: StreamKind, line: &str) -> io::Result<()> {
        let encoded = self
            .encoding
            .encode(&format!("{line}\n"))
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        let mut guard = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file mutex poisoned"))?;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path.as_std_path())?;
            *guard = Some(file);
        }
        let file = guard
            .as_mut()
            .ok_or_else(|| io::Error::other("log file handle missing after open"))?;
        file.write_all(&encoded)?;
        file.flush()
    }
}

/// Discards every line.
pub struct NullSink;

impl LineSink for NullSink {
    fn write_line(&self, _stream: StreamKind, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Spawns drain threads for the child's captured output streams.
///
/// Returns the join handles so the caller can wait for the streams to
/// close once the child exits. Streams that were not captured are
/// skipped silently.
pub fn route_child_output(child: &mut Child, sink: &Arc<dyn LineSink>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        handles.push(spawn_drain(stdout, StreamKind::Output, Arc::clone(sink)));
    }
    if let Some(stderr) = child.stderr.take() {
        handles.push(spawn_drain(stderr, StreamKind::Error, Arc::clone(sink)));
    }
    handles
}

fn spawn_drain<R>(reader: R, stream: StreamKind, sink: Arc<dyn LineSink>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let buffered = BufReader::new(reader);
        for line in buffered.lines() {
            match line {
                Ok(line) => {
                    if let Err(error) = sink.write_line(stream, &line) {
                        warn!(
                            target: PROCESS_TARGET,
                            %error,
                            stream = stream.prefix(),
                            "failed to route server output line"
                        );
                    }
                }
                Err(error) => {
                    warn!(
                        target: PROCESS_TARGET,
                        %error,
                        stream = stream.prefix(),
                        "failed to read server output stream"
                    );
                    break;
                }
            }
        }
    })
}
