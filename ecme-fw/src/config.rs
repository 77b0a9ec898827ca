// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;
use serde::Deserializer;
use std::time::Duration;

/// Timing knobs for talking to one node.
///
/// Durations deserialize from human-readable strings (`"1s"`, `"3m"`), so
/// this can be embedded directly in a caller's configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Delay between successive transfer status polls.
    #[serde(deserialize_with = "deserialize_duration")]
    pub transfer_poll_interval: Duration,
    /// How long a transfer may stay in progress before we give up on it.
    #[serde(deserialize_with = "deserialize_duration")]
    pub transfer_timeout: Duration,
    /// Delay before each attempt to fetch a fabric table from the file
    /// transport.
    #[serde(deserialize_with = "deserialize_duration")]
    pub fabric_fetch_interval: Duration,
    pub fabric_fetch_attempts: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            transfer_poll_interval: Duration::from_secs(1),
            transfer_timeout: Duration::from_secs(180),
            fabric_fetch_interval: Duration::from_secs(1),
            fabric_fetch_attempts: 10,
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}
