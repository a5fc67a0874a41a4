//! Communicate with Busy Tag status indicators via their AT command interface.
//!
//! # Overview
//!
//! The `busytag` crate implements the textual command protocol spoken by
//! Busy Tag devices over their USB serial port.
//! It offers an asynchronous, platform-agnostic API for managing the device's
//! storage, display and LEDs.
//!
//! Depending on your needs, you can:
//!
//! - Use the high-level [`device::Device`] to list, transfer and display pictures
//!   and to change device settings.
//! - Work directly with the low-level command [`Interface`].
//!
//! # Getting started
//!
//! The device enumerates as a USB CDC-ACM serial port, configured as follows:
//!
//! - **Baud rate:** 115200 ([`DEFAULT_BAUD_RATE`])
//! - **Parity:** None
//! - **Data bits:** 8
//! - **Stop bits:** 1
//!
//! If you enable the `native-serial` feature, a compatible serial port
//! instance can be obtained using `serial::open`.
//! Any other port implementing [`Read`] and [`Write`] works as well.
//!
//! # Examples
//!
//! ## Managing the device using the high-level [`device`] module
//!
//! ```no_run
//! # use busytag::embedded_io_async::{Read, Write};
//! # async fn example<P: Read + Write>(port: P) -> busytag::Result<(), P::Error> {
//! let mut dev = busytag::device::Device::connect(port).await?;
//!
//! println!("Connected to {} ({})", dev.name(), dev.firmware_version());
//!
//! for picture in dev.list_pictures().await? {
//!     println!("{}: {} bytes", picture.name, picture.size);
//! }
//!
//! dev.set_active_picture("coffee.gif").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Low-level access using [`Interface`]
//!
//! ```no_run
//! # use busytag::embedded_io_async::{Read, Write};
//! # async fn example<P: Read + Write>(port: P) -> busytag::Result<(), P::Error> {
//! let mut intf = busytag::Interface::new(port);
//!
//! println!("Free space: {}", intf.gquery("FSS").await?);
//!
//! intf.send_command("AT+DB=80").await?;
//! intf.await_ok().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Protocol details
//!
//! Commands are ASCII lines of the form `AT+<MNEMONIC>[=<args>]` terminated by CRLF.
//! The device answers with lines prefixed by `+<MNEMONIC>:`, a bare `OK`
//! or `ERROR:<code>`.
//! At any time, the device may also emit unsolicited event lines prefixed by `+evn`,
//! which are skipped while waiting for a reply.
//!
//! File contents are transferred as raw bytes whose length is announced beforehand,
//! followed by the fixed terminator `\r\nOK\r\n`.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod device;
pub mod frame;

#[cfg(feature = "native-serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-serial")))]
pub mod serial;

pub use embedded_io_async;

use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::{
    fmt::{Display, Formatter},
    str::FromStr,
};
use embedded_io_async::{Read, ReadExactError, Write};
use frame::Frame;
use log::{debug, trace};

/// Baud rate used by the device's serial port.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Maximum length of a single reply line, excluding the terminator.
pub const MAX_LINE_LEN: usize = 1024;

const LINE_TERMINATOR: &[u8] = b"\r\n";
const PAYLOAD_TERMINATOR: &[u8; 6] = b"\r\nOK\r\n";

/// A specialized [`Result`] type for [`Interface`] operations.
///
/// Uses [`Error<E>`] as the error variant, which can include port-specific errors.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Error type for [`Interface`] and [`device::Device`] operations.
///
/// The generic parameter `E` allows the error type to carry a port-specific error.
///
/// Errors reported by the device carry the raw reply text.
/// Transport errors ([`Error::Io`], [`Error::UnexpectedEof`]) close the interface,
/// after which every operation fails with [`Error::Closed`].
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error<E> {
    /// The device failed for an unspecified reason (`ERROR:0`).
    Unknown(String),
    /// The device did not recognize the command (`ERROR:1`).
    InvalidCommand(String),
    /// An argument was rejected, either locally or by the device (`ERROR:2`).
    InvalidArgument(String),
    /// The requested file does not exist (`ERROR:3`).
    FileNotFound(String),
    /// The announced file size is not acceptable (`ERROR:4`).
    InvalidSize(String),
    /// A reply did not have the expected shape.
    MalformedResponse(String),
    /// The device returned an error reply that could not be decoded.
    UnexpectedResponse(String),
    /// The port encountered an unexpected end-of-file.
    UnexpectedEof,
    /// The interface was closed after an unrecoverable failure.
    Closed,
    /// A port-specific input/output error.
    Io(E),
}

impl<E> Error<E> {
    /// Returns `true` if the session cannot be used anymore and the device
    /// has to be reconnected.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnexpectedEof | Self::Closed | Self::Io(_))
    }
}

impl<E: core::error::Error> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::Unknown(raw) => write!(f, "unknown device error: {raw}"),
            Self::InvalidCommand(raw) => write!(f, "invalid command: {raw}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::FileNotFound(raw) => write!(f, "file not found: {raw}"),
            Self::InvalidSize(raw) => write!(f, "invalid size: {raw}"),
            Self::MalformedResponse(raw) => write!(f, "malformed response: {raw:?}"),
            Self::UnexpectedResponse(raw) => write!(f, "unexpected error response: {raw:?}"),
            Self::UnexpectedEof => write!(f, "unexpected end-of-file"),
            Self::Closed => write!(f, "interface closed"),
            Self::Io(err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl<E: core::error::Error> core::error::Error for Error<E> {}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Io(err)
    }
}

impl<E> From<ReadExactError<E>> for Error<E> {
    fn from(err: ReadExactError<E>) -> Self {
        match err {
            ReadExactError::UnexpectedEof => Self::UnexpectedEof,
            ReadExactError::Other(err) => Self::Io(err),
        }
    }
}

/// Parses a numeric reply value.
pub(crate) fn parse_value<T: FromStr, E>(val: &str) -> Result<T, E> {
    val.trim()
        .parse()
        .map_err(|_| Error::MalformedResponse(val.to_string()))
}

/// Rejects argument values that would break command framing.
///
/// CR and LF always end a command line, and `separators` lists additional
/// characters the device uses to split arguments.
pub(crate) fn check_argument<E>(what: &str, val: &str, separators: &[char]) -> Result<(), E> {
    if val.contains(['\r', '\n']) || val.contains(separators) {
        return Err(Error::InvalidArgument(format!(
            "{what} contains reserved characters: {val:?}"
        )));
    }

    Ok(())
}

/// Splits a `+GF:<name>,<size>` download header into the announced size.
fn parse_file_header<E>(header: &str) -> Result<usize, E> {
    header
        .strip_prefix("+GF:")
        .and_then(|val| val.rsplit_once(','))
        .and_then(|(_, size)| size.trim().parse().ok())
        .ok_or_else(|| Error::MalformedResponse(header.to_string()))
}

/// Asynchronous command/response interface.
///
/// Requires a port that implements [`Read`] and [`Write`] for communication.
/// The interface owns the port exclusively: every method takes `&mut self` and
/// completes the whole exchange before returning, so commands never overlap.
///
/// Most users should access the device through [`device::Device`], which
/// caches the device identity and offers typed operations.
/// [`Interface`] is intended for advanced use cases where direct access to
/// the command protocol is required.
///
/// # Examples
///
/// ```no_run
/// # use busytag::embedded_io_async::{Read, Write};
/// # async fn example<P: Read + Write>(port: P) -> busytag::Result<(), P::Error> {
/// let mut intf = busytag::Interface::new(port);
///
/// println!("Brightness: {}", intf.query("DB").await?);
///
/// intf.write_file("hello.txt", b"Hello, world!").await?;
/// let data = intf.read_file("hello.txt").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Interface<P> {
    port: P,
    closed: bool,
}

impl<P: Read + Write> Interface<P> {
    /// Constructs a new command interface.
    pub fn new(port: P) -> Self {
        Self {
            port,
            closed: false,
        }
    }

    /// Returns `true` if the interface was closed after an unrecoverable failure.
    ///
    /// A closed interface rejects all further operations with [`Error::Closed`].
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the interface.
    ///
    /// Use this after abandoning an exchange midway (e.g. on a timeout),
    /// since the position in the byte stream is unknown afterwards.
    pub fn close(&mut self) {
        debug!("Closing interface");
        self.closed = true;
    }

    /// Sends a command line.
    ///
    /// The line terminator is appended automatically.
    /// No reply is consumed.
    pub async fn send_command(&mut self, cmd: &str) -> Result<(), P::Error> {
        debug!("Sending command: {cmd}");

        self.write(cmd.as_bytes()).await?;
        self.write(LINE_TERMINATOR).await?;
        self.flush().await
    }

    /// Reads and classifies the next line sent by the device.
    ///
    /// Error lines are returned as the corresponding [`Error`] variant.
    pub async fn read_frame(&mut self) -> Result<Frame, P::Error> {
        let line = self.read_line().await?;

        frame::classify(&line)
    }

    /// Reads the next data line, skipping event notifications.
    pub async fn next_response(&mut self) -> Result<String, P::Error> {
        loop {
            match self.read_frame().await? {
                Frame::Event(evt) => debug!("Discarding event: {evt}"),
                Frame::Data(line) => return Ok(line),
            }
        }
    }

    /// Waits for a reply line starting with `prefix`.
    ///
    /// Event notifications are skipped.
    /// Returns the whole line, including the prefix.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedResponse`] if a data line with a different prefix arrives.
    /// - Any device error reported by an `ERROR:<code>` line.
    pub async fn await_response(&mut self, prefix: &str) -> Result<String, P::Error> {
        let line = self.next_response().await?;

        if !line.starts_with(prefix) {
            debug!("Expected response starting with {prefix:?}, got {line:?}");

            return Err(Error::MalformedResponse(line));
        }

        trace!("Received response: {line}");

        Ok(line)
    }

    /// Waits for the `OK` reply that completes most commands.
    pub async fn await_ok(&mut self) -> Result<(), P::Error> {
        self.await_response("OK").await.map(|_| ())
    }

    /// Queries an attribute using the `AT+<attr>?` form.
    ///
    /// Returns the value following the `+<attr>:` reply prefix.
    pub async fn query(&mut self, attr: &str) -> Result<String, P::Error> {
        self.send_command(&format!("AT+{attr}?")).await?;
        self.await_value(attr).await
    }

    /// Queries an attribute using the `AT+G<attr>` form.
    ///
    /// Returns the value following the `+<attr>:` reply prefix.
    pub async fn gquery(&mut self, attr: &str) -> Result<String, P::Error> {
        self.send_command(&format!("AT+G{attr}")).await?;
        self.await_value(attr).await
    }

    /// Downloads the contents of a file stored on the device.
    ///
    /// The device announces the file size in a `+GF:<name>,<size>` header,
    /// followed by an empty line, the raw contents and the payload terminator.
    ///
    /// # Errors
    ///
    /// - [`Error::FileNotFound`] if the file does not exist.
    /// - [`Error::MalformedResponse`] if the header cannot be parsed.
    ///   The payload cannot be skipped, so the interface is closed as well.
    /// - [`Error::MalformedResponse`] if the framing around the payload is violated.
    ///   The interface is closed in that case.
    pub async fn read_file(&mut self, name: &str) -> Result<Vec<u8>, P::Error> {
        self.read_file_limited(name, usize::MAX).await
    }

    /// Downloads a file, refusing payloads larger than `max_size` bytes.
    ///
    /// # Errors
    ///
    /// Same as [`Interface::read_file`], plus [`Error::InvalidSize`] if the
    /// announced size exceeds `max_size`.
    /// The unread payload is left in the stream, so the interface is closed.
    pub async fn read_file_limited(
        &mut self,
        name: &str,
        max_size: usize,
    ) -> Result<Vec<u8>, P::Error> {
        check_argument("file name", name, &[','])?;

        self.send_command(&format!("AT+GF={name}")).await?;

        let header = self.await_response("+GF:").await?;
        let size = parse_file_header::<P::Error>(&header)
            .map_err(|_| self.desync(header.as_bytes()))?;

        if size > max_size {
            debug!("Refusing to download {name}: {size} bytes exceed limit of {max_size}");
            self.closed = true;

            return Err(Error::InvalidSize(header));
        }

        debug!("Downloading {name} ({size} bytes)");

        // Header and payload are separated by an empty line
        let sep = self.read_line().await?;

        if !sep.is_empty() {
            return Err(self.desync(&sep));
        }

        let mut data = Vec::new();

        if data.try_reserve_exact(size).is_err() {
            return Err(self.desync(header.as_bytes()));
        }

        data.resize(size, 0x00);
        self.read(&mut data).await?;
        self.read_terminator().await?;

        Ok(data)
    }

    /// Uploads a file to the device, replacing any existing file with the same name.
    ///
    /// The payload is only sent after the device has acknowledged the upload request.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSize`] if the device rejects the file size.
    /// - [`Error::MalformedResponse`] if the payload terminator is missing.
    ///   The interface is closed in that case.
    pub async fn write_file(&mut self, name: &str, data: &[u8]) -> Result<(), P::Error> {
        check_argument("file name", name, &[','])?;

        self.send_command(&format!("AT+UF={name},{}", data.len()))
            .await?;

        // Writing before the acknowledgment risks the device dropping bytes
        let ack = self.next_response().await?;

        debug!("Uploading {name} ({} bytes), device replied {ack:?}", data.len());

        self.write(data).await?;
        self.flush().await?;
        self.read_terminator().await
    }

    async fn await_value(&mut self, attr: &str) -> Result<String, P::Error> {
        let prefix = format!("+{attr}:");
        let line = self.await_response(&prefix).await?;

        Ok(line[prefix.len()..].to_string())
    }

    async fn read_terminator(&mut self) -> Result<(), P::Error> {
        let mut term = [0x00; PAYLOAD_TERMINATOR.len()];

        self.read(&mut term).await?;

        if &term != PAYLOAD_TERMINATOR {
            return Err(self.desync(&term));
        }

        Ok(())
    }

    /// Reads a single line, stripping the line terminator.
    async fn read_line(&mut self) -> Result<Vec<u8>, P::Error> {
        let mut line = Vec::new();
        let mut byte = [0x00];

        loop {
            self.fill(&mut byte).await?;

            match byte[0] {
                b'\n' => break,
                // Leaves room for the carriage return
                _ if line.len() > MAX_LINE_LEN => return Err(self.desync(&line)),
                b => line.push(b),
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        if line.len() > MAX_LINE_LEN {
            return Err(self.desync(&line));
        }

        trace!("Read line from port: {:?}", String::from_utf8_lossy(&line));

        Ok(line)
    }

    /// Marks the byte stream as desynchronized and closes the interface.
    fn desync(&mut self, raw: &[u8]) -> Error<P::Error> {
        debug!("Lost protocol synchronization");
        self.closed = true;

        Error::MalformedResponse(String::from_utf8_lossy(raw).into_owned())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<(), P::Error> {
        self.fill(buf).await?;
        trace!("Read {} bytes from port: {buf:02x?}", buf.len());

        Ok(())
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<(), P::Error> {
        if self.closed {
            return Err(Error::Closed);
        }

        self.port.read_exact(buf).await.map_err(|err| {
            self.closed = true;
            err.into()
        })
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), P::Error> {
        if self.closed {
            return Err(Error::Closed);
        }

        trace!("Write to port: {buf:02x?}");
        self.port.write_all(buf).await.map_err(|err| {
            self.closed = true;
            err.into()
        })
    }

    async fn flush(&mut self) -> Result<(), P::Error> {
        if self.closed {
            return Err(Error::Closed);
        }

        self.port.flush().await.map_err(|err| {
            self.closed = true;
            err.into()
        })
    }
}
