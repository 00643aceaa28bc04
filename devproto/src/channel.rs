//! Blocking socket channel to one custom-protocol terminal.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::frame::{self, DeviceFrame, MessageType};

/// Default socket read/write timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of send attempts for one frame.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Smallest wait used while checking for inbound data.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connected,
    Closed,
}

/// Outcome of waiting for the single reply byte after a DATA frame.
enum Reply {
    Ack,
    Nack,
    Unexpected(u8),
    Timeout,
}

/// One TCP connection to one terminal.
///
/// All operations block the calling thread. Dropping the channel closes it.
pub struct DeviceChannel {
    host: String,
    port: u16,
    io_timeout: Duration,
    stream: Option<TcpStream>,
    state: ChannelState,
}

impl DeviceChannel {
    /// Creates an idle channel for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            io_timeout: DEFAULT_IO_TIMEOUT,
            stream: None,
            state: ChannelState::Idle,
        }
    }

    /// Overrides the socket read/write timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout.max(MIN_WAIT);
        self
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Opens the socket. Any previous socket is closed first.
    pub fn connect(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidHost(self.host.clone()));
        }
        if self.stream.is_some() {
            self.close();
        }

        let addr = self.addr();
        let candidates: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| Error::Connection {
                addr: addr.clone(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, self.io_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    self.state = ChannelState::Connected;
                    info!(addr = %addr, "connected to terminal");
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }

        let source = last_err.unwrap_or_else(|| {
            io::Error::new(ErrorKind::NotFound, "host resolved to no addresses")
        });
        warn!(addr = %addr, error = %source, "terminal connection failed");
        Err(Error::Connection { addr, source })
    }

    /// Sends `payload` as a DATA frame and waits for ACK.
    ///
    /// NACK, an unexpected reply byte, or no reply within the I/O timeout
    /// resends the same frame, up to `max_retries` sends in total. Socket
    /// errors abort at once without using the remaining attempts.
    pub fn send_reliable(&mut self, payload: &[u8], max_retries: u32) -> Result<()> {
        let bytes = frame::encode(MessageType::Data, payload)?;
        let addr = self.addr();

        for attempt in 1..=max_retries {
            {
                let stream = self.stream_mut()?;
                stream.write_all(&bytes)?;
                stream.flush()?;
            }
            trace!(addr = %addr, attempt, len = bytes.len(), "frame sent");

            match self.read_reply()? {
                Reply::Ack => {
                    debug!(addr = %addr, attempt, "frame acknowledged");
                    return Ok(());
                }
                Reply::Nack => warn!(addr = %addr, attempt, "frame rejected by terminal"),
                Reply::Unexpected(b) => {
                    warn!(addr = %addr, attempt, reply = b, "unexpected reply byte")
                }
                Reply::Timeout => warn!(addr = %addr, attempt, "timed out waiting for ack"),
            }
        }

        warn!(addr = %addr, attempts = max_retries, "giving up on frame");
        Err(Error::Rejected {
            attempts: max_retries,
        })
    }

    /// Reads one frame and answers it.
    ///
    /// A valid frame is ACKed and its payload returned. A frame with a bad
    /// version, checksum, or type is NACKed and its error returned.
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        let decoded = frame::decode(self.stream_mut()?);
        self.answer(decoded)
    }

    /// ACKs a decoded frame or NACKs a rejected one.
    fn answer(&mut self, decoded: Result<DeviceFrame>) -> Result<Vec<u8>> {
        let stream = self.stream_mut()?;
        match decoded {
            Ok(frame) => {
                stream.write_all(&[MessageType::Ack.as_byte()])?;
                trace!(len = frame.payload.len(), "frame received");
                Ok(frame.payload)
            }
            Err(e) if e.is_rejection() => {
                stream.write_all(&[MessageType::Nack.as_byte()])?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Waits for the terminal's asynchronous response.
    ///
    /// Checks for inbound data at most `poll_interval` apart, also while a
    /// frame is only partly received. Returns `Ok(None)` when `timeout`
    /// elapses or `cancel` fires; callers tell the two apart by inspecting
    /// `cancel`. Rejected frames are NACKed and polling continues. A frame
    /// abandoned halfway leaves the stream misaligned, so the channel should
    /// be closed after `Ok(None)`.
    pub fn poll_for_response(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let poll_interval = poll_interval.max(MIN_WAIT);

        loop {
            if cancel.is_cancelled() {
                debug!(addr = %self.addr(), "response poll cancelled");
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(addr = %self.addr(), "response poll timed out");
                return Ok(None);
            }

            if !self.wait_readable(poll_interval.min(deadline - now))? {
                continue;
            }
            let decoded = match self.decode_within(deadline, poll_interval, cancel)? {
                Err(Error::Io(e)) if is_timeout(&e) => {
                    warn!(addr = %self.addr(), "partial frame abandoned");
                    continue;
                }
                decoded => decoded,
            };
            match self.answer(decoded) {
                Ok(payload) => return Ok(Some(payload)),
                Err(e) if e.is_rejection() => {
                    warn!(addr = %self.addr(), error = %e, "dropped invalid frame");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Closes the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(addr = %self.addr(), "disconnected from terminal");
        }
        self.state = ChannelState::Closed;
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }

    fn read_reply(&mut self) -> Result<Reply> {
        let stream = self.stream_mut()?;
        let mut byte = [0u8; 1];
        match stream.read(&mut byte) {
            Ok(0) => Err(Error::ConnectionClosed),
            Ok(_) => Ok(match MessageType::from_byte(byte[0]) {
                Some(MessageType::Ack) => Reply::Ack,
                Some(MessageType::Nack) => Reply::Nack,
                _ => Reply::Unexpected(byte[0]),
            }),
            Err(e) if is_timeout(&e) => Ok(Reply::Timeout),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Decodes one frame, waiting at most `slice` per read so `cancel` and
    /// `deadline` are honoured between the bytes of a frame.
    fn decode_within(
        &mut self,
        deadline: Instant,
        slice: Duration,
        cancel: &CancellationToken,
    ) -> Result<Result<DeviceFrame>> {
        let io_timeout = self.io_timeout;
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(slice))?;

        let mut reader = DeadlineReader {
            stream: &*stream,
            deadline,
            cancel,
        };
        let decoded = frame::decode(&mut reader);
        stream.set_read_timeout(Some(io_timeout))?;
        Ok(decoded)
    }

    /// Blocks up to `wait` for at least one inbound byte without consuming it.
    fn wait_readable(&mut self, wait: Duration) -> Result<bool> {
        let io_timeout = self.io_timeout;
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(wait.max(MIN_WAIT)))?;

        let mut peeked = [0u8; 1];
        let result = stream.peek(&mut peeked);
        stream.set_read_timeout(Some(io_timeout))?;

        match result {
            Ok(0) => Err(Error::ConnectionClosed),
            Ok(_) => Ok(true),
            Err(e) if is_timeout(&e) => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for DeviceChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Socket reader that keeps retrying timed-out reads until `cancel` fires or
/// `deadline` passes, then fails with `TimedOut`.
struct DeadlineReader<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
    cancel: &'a CancellationToken,
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self.stream;
        loop {
            match stream.read(buf) {
                Err(e) if is_timeout(&e) => {
                    if self.cancel.is_cancelled() || Instant::now() >= self.deadline {
                        return Err(io::Error::new(ErrorKind::TimedOut, "frame not completed"));
                    }
                }
                result => return result,
            }
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
