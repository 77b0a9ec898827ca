// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The boot environment: the variables the bootloader runs from, including
//! the order it tries boot devices in.

use crate::error::BootEnvError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Variable holding the command the bootloader runs by default.
pub const BOOTCMD_DEFAULT: &str = "bootcmd_default";

/// Separator between commands in a boot command.
const COMMAND_SEPARATOR: &str = "; ";

/// Decoded boot environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootEnv {
    variables: BTreeMap<String, String>,
}

impl BootEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), BootEnvError> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() || name.contains(['=', '\0']) {
            return Err(BootEnvError::InvalidName(name));
        }
        if value.contains('\0') {
            return Err(BootEnvError::MalformedEntry(format!("{name}={value}")));
        }
        self.variables.insert(name, value);
        Ok(())
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.variables.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Devices the default boot command tries, in order.
    pub fn boot_order(&self) -> Result<Vec<BootDevice>, BootEnvError> {
        let Some(command) = self.get(BOOTCMD_DEFAULT) else {
            return Ok(Vec::new());
        };
        command
            .split(';')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(BootDevice::from_command)
            .collect()
    }

    /// Rewrite the default boot command to try `devices` in order.
    ///
    /// `reset` and `retry` end the boot command, so either may only appear
    /// last.
    pub fn set_boot_order(
        &mut self,
        devices: &[BootDevice],
    ) -> Result<(), BootEnvError> {
        if let Some((_, init)) = devices.split_last() {
            if let Some(terminal) = init.iter().find(|d| d.is_terminal()) {
                return Err(BootEnvError::TerminalNotLast(terminal.token()));
            }
        }
        let command = devices
            .iter()
            .map(|d| d.command())
            .collect::<Vec<_>>()
            .join(COMMAND_SEPARATOR);
        self.set(BOOTCMD_DEFAULT, command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootDevice {
    Pxe,
    Disk,
    /// Reset the node.
    Reset,
    /// Start over from the first device.
    Retry,
}

impl BootDevice {
    pub fn token(self) -> &'static str {
        match self {
            Self::Pxe => "pxe",
            Self::Disk => "disk",
            Self::Reset => "reset",
            Self::Retry => "retry",
        }
    }

    fn command(self) -> &'static str {
        match self {
            Self::Pxe => "run bootcmd_pxe",
            Self::Disk => "run bootcmd_sata",
            Self::Reset => "reset",
            Self::Retry => "run bootcmd_default",
        }
    }

    fn from_command(command: &str) -> Result<Self, BootEnvError> {
        match command {
            "run bootcmd_pxe" => Ok(Self::Pxe),
            "run bootcmd_sata" => Ok(Self::Disk),
            "reset" => Ok(Self::Reset),
            "run bootcmd_default" => Ok(Self::Retry),
            other => Err(BootEnvError::UnknownBootCommand(other.to_string())),
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Reset | Self::Retry)
    }
}

impl fmt::Display for BootDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for BootDevice {
    type Err = BootEnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pxe" => Ok(Self::Pxe),
            "disk" => Ok(Self::Disk),
            "reset" => Ok(Self::Reset),
            "retry" => Ok(Self::Retry),
            _ => Err(BootEnvError::InvalidBootDevice(s.to_string())),
        }
    }
}

/// Conversion between a [`BootEnv`] and the bytes of a boot environment
/// partition.
pub trait BootEnvFormat: Send + Sync + 'static {
    fn decode(&self, data: &[u8]) -> Result<BootEnv, BootEnvError>;
    fn encode(&self, env: &BootEnv) -> Result<Vec<u8>, BootEnvError>;
}

/// The standard U-Boot environment layout: a little-endian crc32 of the data
/// area followed by `name=value` strings, each NUL-terminated, ending with an
/// empty string and padded with zeros to a fixed size.
#[derive(Debug, Clone, Copy)]
pub struct UbootEnvFormat {
    size: usize,
}

impl UbootEnvFormat {
    pub const DEFAULT_SIZE: usize = 0x2000;
    const CRC_LEN: usize = 4;

    pub fn with_size(size: usize) -> Self {
        Self { size }
    }
}

impl Default for UbootEnvFormat {
    fn default() -> Self {
        Self::with_size(Self::DEFAULT_SIZE)
    }
}

impl BootEnvFormat for UbootEnvFormat {
    fn decode(&self, data: &[u8]) -> Result<BootEnv, BootEnvError> {
        if data.len() <= Self::CRC_LEN {
            return Err(BootEnvError::TooSmall(data.len()));
        }
        let (crc, body) = data.split_at(Self::CRC_LEN);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(BootEnvError::CrcMismatch { stored, computed });
        }

        let mut env = BootEnv::new();
        let mut rest = body;
        loop {
            let Some(nul) = rest.iter().position(|&b| b == 0) else {
                return Err(BootEnvError::MissingTerminator);
            };
            let entry = &rest[..nul];
            rest = &rest[nul + 1..];
            if entry.is_empty() {
                break;
            }
            let entry = String::from_utf8_lossy(entry);
            let Some((name, value)) = entry.split_once('=') else {
                return Err(BootEnvError::MalformedEntry(entry.into_owned()));
            };
            env.set(name, value)?;
        }
        Ok(env)
    }

    fn encode(&self, env: &BootEnv) -> Result<Vec<u8>, BootEnvError> {
        let mut body = Vec::with_capacity(self.size);
        for (name, value) in env.variables() {
            body.extend_from_slice(name.as_bytes());
            body.push(b'=');
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);

        let size = body.len() + Self::CRC_LEN;
        if size > self.size {
            return Err(BootEnvError::TooLarge { size, limit: self.size });
        }
        body.resize(self.size - Self::CRC_LEN, 0);

        let mut out = Vec::with_capacity(self.size);
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }
}
