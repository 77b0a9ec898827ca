// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::image::ConfigClass;
use ecme_messages::ControllerError;
use ecme_messages::ImageType;
use ecme_messages::TransferHandle;
use slog_error_chain::SlogInlineError;
use std::io;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Failure of a controller session to deliver a request or its reply.
///
/// Session implementations construct this; it is never retried here.
#[derive(Debug, Clone, PartialEq, Eq, Error, SlogInlineError)]
#[error("{message}")]
pub struct SessionError {
    message: String,
}

impl SessionError {
    /// Build a session error from tool-style output, keeping only the first
    /// line and dropping any leading `Error: ` marker.
    pub fn new(output: impl AsRef<str>) -> Self {
        let line = output.as_ref().trim_start().lines().next().unwrap_or("");
        let line = line.trim_end();
        let line = line.strip_prefix("Error: ").unwrap_or(line);
        let message = if line.is_empty() {
            "session encountered an error".to_string()
        } else {
            line.to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum CommunicationError {
    #[error("{operation} failed on {node}")]
    Protocol {
        operation: &'static str,
        node: IpAddr,
        #[source]
        err: SessionError,
    },
    #[error("bogus controller response type: expected {expected:?} but got {got:?}")]
    BadResponseType { expected: &'static str, got: &'static str },
    #[error("controller response to {operation} is missing {field:?}")]
    ResponseShape { operation: &'static str, field: &'static str },
    #[error("error response from controller")]
    ControllerError(#[from] ControllerError),
}

#[derive(Debug, Error, SlogInlineError)]
pub enum FileTransportError {
    #[error("file {name:?} not found on file transport")]
    NoSuchFile { name: String },
    #[error("file transport has no address reachable from {peer}")]
    NoRoute { peer: IpAddr },
    #[error("file transport I/O failed for {name:?}")]
    Io {
        name: String,
        #[source]
        err: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error, SlogInlineError)]
pub enum SelectionError {
    #[error("no partition of type {0} found on host")]
    NoPartition(ImageType),
    #[error("no second {0} partition found on host")]
    NoSecondPartition(ImageType),
    #[error("no third {0} partition found on host")]
    NoThirdPartition(ImageType),
    #[error("no inactive {0} partition found on host")]
    NoInactivePartition(ImageType),
    #[error("no active {0} partition found on host")]
    NoActivePartition(ImageType),
    #[error("invalid partition policy {0:?}")]
    InvalidPolicy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, SlogInlineError)]
#[error("cannot increment priority, already at maximum")]
pub struct PriorityOverflow;

#[derive(Debug, Clone, PartialEq, Eq, Error, SlogInlineError)]
pub enum ImageFormatError {
    #[error("image header claims {claimed} bytes but only {actual} present")]
    Truncated { claimed: u64, actual: u64 },
    #[error("image crc32 mismatch (header {expected:#010x}, data {got:#010x})")]
    CrcMismatch { expected: u32, got: u32 },
    #[error("image payload is too large for an image header")]
    PayloadTooLarge,
}

#[derive(Debug, Error, SlogInlineError)]
pub enum TransferError {
    #[error(
        "{image_type} image is too large for partition {partition} \
         ({size} > {limit} bytes)"
    )]
    ImageTooLarge {
        image_type: ImageType,
        partition: u8,
        size: u64,
        limit: u32,
    },
    #[error("transfer {handle} timed out after {elapsed:?}")]
    Timeout { handle: TransferHandle, elapsed: Duration },
    #[error("node reported transfer failure for {handle}: {status}")]
    Failure { handle: TransferHandle, status: String },
    #[error("transfer {handle} has not completed")]
    NotComplete { handle: TransferHandle },
    #[error("node reported crc32 check failure on partition {partition}")]
    CrcCheckFailure { partition: u8, reason: Option<String> },
    #[error("invalid image on partition {partition}")]
    ImageFormat {
        partition: u8,
        #[source]
        err: ImageFormatError,
    },
    #[error("failed to communicate with controller")]
    Communication(#[from] CommunicationError),
    #[error("file transport failure")]
    FileTransport(#[from] FileTransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error, SlogInlineError)]
pub enum BootEnvError {
    #[error("boot environment is too small ({0} bytes)")]
    TooSmall(usize),
    #[error("boot environment does not fit ({size} > {limit} bytes)")]
    TooLarge { size: usize, limit: usize },
    #[error("boot environment crc32 mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    CrcMismatch { stored: u32, computed: u32 },
    #[error("boot environment is missing its terminator")]
    MissingTerminator,
    #[error("malformed boot environment entry {0:?}")]
    MalformedEntry(String),
    #[error("invalid variable name {0:?}")]
    InvalidName(String),
    #[error("unrecognized boot command {0:?}")]
    UnknownBootCommand(String),
    #[error("invalid boot device {0:?}")]
    InvalidBootDevice(String),
    #[error("{0} must be the last entry of a boot order")]
    TerminalNotLast(&'static str),
}

#[derive(Debug, Error, SlogInlineError)]
pub enum UpdateError {
    #[error("failed to communicate with controller")]
    Communication(#[from] CommunicationError),
    #[error("failed to retrieve firmware info")]
    NoFirmwareInfo,
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    PriorityOverflow(#[from] PriorityOverflow),
    #[error("firmware transfer failed")]
    Transfer(#[from] TransferError),
    #[error("invalid boot environment")]
    BootEnv(#[from] BootEnvError),
    #[error("update requires controller version {required} (found {found})")]
    ControllerVersionTooOld { required: String, found: String },
    #[error("unparseable controller version {0:?}")]
    InvalidControllerVersion(String),
    #[error("refusing to upload a '{package}' package to a '{host}' host")]
    ConfigClassMismatch { package: ConfigClass, host: ConfigClass },
}

impl UpdateError {
    /// Whether this error means "the package does not apply to this node"
    /// rather than "we could not find out".
    pub fn is_readiness_failure(&self) -> bool {
        matches!(
            self,
            Self::Selection(_)
                | Self::PriorityOverflow(_)
                | Self::ControllerVersionTooOld { .. }
                | Self::ConfigClassMismatch { .. }
        )
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum NodeError {
    #[error("failed to communicate with controller")]
    Communication(#[from] CommunicationError),
    #[error("no sensors matching {filter:?} were found")]
    NoSensor { filter: String },
    #[error("node failed to deliver fabric IP info to the file transport")]
    NoIpInfo,
    #[error("node failed to deliver fabric MAC addresses to the file transport")]
    NoMacAddress,
    #[error("file transport failure")]
    FileTransport(#[from] FileTransportError),
    #[error("firmware operation failed")]
    Update(#[from] UpdateError),
}
