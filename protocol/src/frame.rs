//! Classification of lines received from the device.
//!
//! Every line is either an unsolicited event notification, an error reply
//! or a data line answering the current command.
//! Error replies are translated into the corresponding [`Error`] variant.

use crate::{Error, Result};
use alloc::string::{String, ToString};
use core::str;
use strum::FromRepr;

/// Prefix of unsolicited event notifications.
pub const EVENT_PREFIX: &str = "+evn";

/// Prefix of error replies.
pub const ERROR_PREFIX: &str = "ERROR";

/// A line sent by the device, without its line terminator.
#[derive(PartialEq, Eq, Debug)]
pub enum Frame {
    /// Unsolicited event notification, e.g. `+evn:WS,1`.
    ///
    /// Events are not correlated with any command.
    Event(String),
    /// Reply to the current command.
    Data(String),
}

/// Error code reported by the device in `ERROR:<code>` replies.
#[derive(FromRepr, Debug)]
#[repr(u8)]
enum ErrorCode {
    Unknown,
    InvalidCommand,
    InvalidArgument,
    FileNotFound,
    InvalidSize,
}

/// Classifies a received line.
pub(crate) fn classify<E>(line: &[u8]) -> Result<Frame, E> {
    if line.starts_with(ERROR_PREFIX.as_bytes()) {
        return Err(parse_error(line));
    }

    let text = str::from_utf8(line)
        .map_err(|_| Error::MalformedResponse(String::from_utf8_lossy(line).into_owned()))?
        .to_string();

    if text.starts_with(EVENT_PREFIX) {
        Ok(Frame::Event(text))
    } else {
        Ok(Frame::Data(text))
    }
}

/// Converts an error reply of the form `ERROR:<code>` into an [`Error`].
///
/// Unknown codes and replies that do not follow the pattern result in
/// [`Error::UnexpectedResponse`]. Every variant carries the original reply text.
pub fn parse_error<E>(raw: &[u8]) -> Error<E> {
    let text = String::from_utf8_lossy(raw).into_owned();
    let code = text
        .trim_end()
        .strip_prefix("ERROR:")
        .filter(|code| !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse().ok())
        .and_then(ErrorCode::from_repr);

    match code {
        Some(ErrorCode::Unknown) => Error::Unknown(text),
        Some(ErrorCode::InvalidCommand) => Error::InvalidCommand(text),
        Some(ErrorCode::InvalidArgument) => Error::InvalidArgument(text),
        Some(ErrorCode::FileNotFound) => Error::FileNotFound(text),
        Some(ErrorCode::InvalidSize) => Error::InvalidSize(text),
        None => Error::UnexpectedResponse(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    fn parse(raw: &str) -> Error<Infallible> {
        parse_error(raw.as_bytes())
    }

    #[test]
    fn known_error_codes() {
        assert_eq!(parse("ERROR:0"), Error::Unknown("ERROR:0".into()));
        assert_eq!(parse("ERROR:1"), Error::InvalidCommand("ERROR:1".into()));
        assert_eq!(parse("ERROR:2"), Error::InvalidArgument("ERROR:2".into()));
        assert_eq!(parse("ERROR:3"), Error::FileNotFound("ERROR:3".into()));
        assert_eq!(parse("ERROR:4"), Error::InvalidSize("ERROR:4".into()));
    }

    #[test]
    fn unexpected_error_responses() {
        for raw in [
            "ERROR:5",
            "ERROR:-1",
            "ERROR:256",
            "ERROR:+1",
            "ERROR:",
            "ERROR",
            "ERROR1",
            "ERROR:1:2",
            "ERR:1",
            "error:1",
            "ERROR: 1",
        ] {
            assert_eq!(
                parse(raw),
                Error::UnexpectedResponse(raw.into()),
                "{raw:?} should be an unexpected response"
            );
        }
    }

    #[test]
    fn invalid_utf8_error_response() {
        let err: Error<Infallible> = parse_error(b"ERROR:\xff");

        assert_eq!(
            err,
            Error::UnexpectedResponse("ERROR:\u{fffd}".into()),
            "invalid bytes should be replaced"
        );
    }

    #[test]
    fn classify_lines() {
        assert_eq!(
            classify::<Infallible>(b"+evn:WS,1"),
            Ok(Frame::Event("+evn:WS,1".into())),
            "line should be an event"
        );
        assert_eq!(
            classify::<Infallible>(b"+DB:80"),
            Ok(Frame::Data("+DB:80".into())),
            "line should be data"
        );
        assert_eq!(
            classify::<Infallible>(b""),
            Ok(Frame::Data(String::new())),
            "empty line should be data"
        );
        assert_eq!(
            classify::<Infallible>(b"ERROR:2"),
            Err(Error::InvalidArgument("ERROR:2".into())),
            "line should be an error"
        );
        assert!(
            matches!(
                classify::<Infallible>(b"+PL:\xfe.gif,1"),
                Err(Error::MalformedResponse(_))
            ),
            "invalid UTF-8 should be rejected"
        );
    }
}
