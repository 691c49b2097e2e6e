//! Control socket protocol shared by the daemon and the CLI.
//!
//! A request is the text `operation:service`, a response is free text. Each
//! connection carries exactly one request and at most one response, and each
//! fits in a single [`CONTROL_BUFFER_SIZE`] read.
use std::{
    io::{self, Read, Write},
    net::Shutdown,
    os::unix::net::UnixStream,
    path::Path,
};

use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::constants::{CONTROL_BUFFER_SIZE, REQUEST_DELIMITER, SUCCESS_REPLY, UNIT_SUFFIX};

/// Operations understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Enable,
    Disable,
    Start,
    Stop,
    Restart,
    Status,
    Reboot,
}

/// Message sent from CLI invocations to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub operation: Operation,
    pub service: String,
}

impl ControlRequest {
    pub fn new(operation: Operation, service: impl Into<String>) -> Self {
        Self {
            operation,
            service: service.into(),
        }
    }

    /// Parses `operation:service`, splitting on the first colon and dropping a
    /// trailing `.service` from the name.
    pub fn parse(raw: &str) -> Result<Self, ControlError> {
        let message = raw.trim();
        let (operation, service) = message
            .split_once(REQUEST_DELIMITER)
            .ok_or_else(|| ControlError::Malformed(message.to_string()))?;

        let operation = operation
            .trim()
            .parse::<Operation>()
            .map_err(|_| ControlError::UnknownOperation(operation.to_string()))?;

        let service = service.trim();
        let service = service.strip_suffix(UNIT_SUFFIX).unwrap_or(service);

        Ok(Self::new(operation, service))
    }

    /// Wire form of the request.
    pub fn to_wire(&self) -> String {
        format!("{}{}{}", self.operation, REQUEST_DELIMITER, self.service)
    }
}

/// Response sent by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    /// The operation completed; sent as `success`.
    Ok,
    /// The operation produced a value, e.g. a status string.
    Message(String),
    /// The operation failed with the given message.
    Error(String),
}

impl ControlResponse {
    /// Wire form of the response.
    pub fn to_wire(&self) -> &str {
        match self {
            ControlResponse::Ok => SUCCESS_REPLY,
            ControlResponse::Message(message) | ControlResponse::Error(message) => message,
        }
    }
}

/// Errors raised by the control channel helpers.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control socket I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed control message '{0}'")]
    Malformed(String),
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    #[error("control message exceeds {} bytes", CONTROL_BUFFER_SIZE)]
    TooLarge,
    #[error("Error connecting to daemon: {0}")]
    NotAvailable(io::Error),
    #[error("daemon closed the connection without replying")]
    NoReply,
}

/// Sends one request to the daemon at `socket_path` and returns its reply text.
pub fn send_command(socket_path: &Path, request: &ControlRequest) -> Result<String, ControlError> {
    let payload = request.to_wire();
    if payload.len() > CONTROL_BUFFER_SIZE {
        return Err(ControlError::TooLarge);
    }

    let mut stream = UnixStream::connect(socket_path).map_err(ControlError::NotAvailable)?;
    stream.write_all(payload.as_bytes())?;
    stream.flush()?;
    // Tell the daemon the request is complete; a failure here is harmless.
    let _ = stream.shutdown(Shutdown::Write);

    let mut response = Vec::with_capacity(CONTROL_BUFFER_SIZE);
    stream
        .take(CONTROL_BUFFER_SIZE as u64)
        .read_to_end(&mut response)?;

    if response.is_empty() {
        return Err(ControlError::NoReply);
    }

    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Reads a request from a connected client with a single bounded read.
pub fn read_request(stream: &mut UnixStream) -> Result<String, ControlError> {
    let mut buffer = [0u8; CONTROL_BUFFER_SIZE];
    let read = loop {
        match stream.read(&mut buffer) {
            Ok(read) => break read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    };

    if read == 0 {
        return Err(ControlError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "empty control command",
        )));
    }

    Ok(String::from_utf8_lossy(&buffer[..read]).into_owned())
}

/// Writes a response to the connected CLI client.
pub fn write_response(
    stream: &mut UnixStream,
    response: &ControlResponse,
) -> Result<(), ControlError> {
    let payload = truncate_at_char_boundary(response.to_wire(), CONTROL_BUFFER_SIZE);
    stream.write_all(payload.as_bytes())?;
    stream.flush()?;
    Ok(())
}

/// Longest prefix of `text` that fits in `max` bytes without splitting a character.
fn truncate_at_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let end = (0..=max)
        .rev()
        .find(|&index| text.is_char_boundary(index))
        .unwrap_or(0);
    &text[..end]
}
