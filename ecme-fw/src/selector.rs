// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Choosing which partition an image should be written to.

use crate::error::SelectionError;
use crate::partition::InUse;
use crate::partition::Partition;
use crate::partition::PartitionTable;
use ecme_messages::ImageType;
use std::fmt;
use std::str::FromStr;

/// How to pick the target partition(s) for an image type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PartitionPolicy {
    First,
    Second,
    Third,
    /// The lower-priority of the first two partitions.
    Oldest,
    /// The higher-priority of the first two partitions.
    Newest,
    /// A partition the running system isn't using.
    #[default]
    Inactive,
    /// The partition the running system is using.
    Active,
    /// Both `First` and `Second`. Only meaningful for a whole update, never
    /// as a single choice.
    Both,
}

impl PartitionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "FIRST",
            Self::Second => "SECOND",
            Self::Third => "THIRD",
            Self::Oldest => "OLDEST",
            Self::Newest => "NEWEST",
            Self::Inactive => "INACTIVE",
            Self::Active => "ACTIVE",
            Self::Both => "BOTH",
        }
    }
}

impl fmt::Display for PartitionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionPolicy {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIRST" => Ok(Self::First),
            "SECOND" => Ok(Self::Second),
            "THIRD" => Ok(Self::Third),
            "OLDEST" => Ok(Self::Oldest),
            "NEWEST" => Ok(Self::Newest),
            "INACTIVE" => Ok(Self::Inactive),
            "ACTIVE" => Ok(Self::Active),
            "BOTH" => Ok(Self::Both),
            _ => Err(SelectionError::InvalidPolicy(s.to_string())),
        }
    }
}

/// Pick one partition of `image_type` from `table`.
///
/// `OLDEST`, `NEWEST` and the tie-breaks of `INACTIVE` and `ACTIVE` only ever
/// compare the first two candidates, whatever their count.
pub fn select(
    table: &PartitionTable,
    image_type: ImageType,
    policy: PartitionPolicy,
) -> Result<&Partition, SelectionError> {
    let candidates: Vec<&Partition> = table.of_type(image_type).collect();
    let no_partition = SelectionError::NoPartition(image_type);
    if candidates.is_empty() {
        return Err(no_partition);
    }

    match policy {
        PartitionPolicy::First => Ok(candidates[0]),
        PartitionPolicy::Second => candidates
            .get(1)
            .copied()
            .ok_or(SelectionError::NoSecondPartition(image_type)),
        PartitionPolicy::Third => candidates
            .get(2)
            .copied()
            .ok_or(SelectionError::NoThirdPartition(image_type)),
        PartitionPolicy::Oldest => oldest(&candidates).ok_or(no_partition),
        PartitionPolicy::Newest => newest(&candidates).ok_or(no_partition),
        PartitionPolicy::Inactive => {
            let inactive: Vec<&Partition> = candidates
                .into_iter()
                .filter(|p| !p.is_active() && p.in_use != InUse::Used)
                .collect();
            oldest(&inactive)
                .ok_or(SelectionError::NoInactivePartition(image_type))
        }
        PartitionPolicy::Active => {
            let active: Vec<&Partition> =
                candidates.into_iter().filter(|p| p.is_active()).collect();
            newest(&active).ok_or(SelectionError::NoActivePartition(image_type))
        }
        PartitionPolicy::Both => {
            Err(SelectionError::InvalidPolicy(policy.to_string()))
        }
    }
}

/// Pick every partition `policy` names: two for `BOTH`, otherwise one.
pub fn select_all(
    table: &PartitionTable,
    image_type: ImageType,
    policy: PartitionPolicy,
) -> Result<Vec<&Partition>, SelectionError> {
    match policy {
        PartitionPolicy::Both => Ok(vec![
            select(table, image_type, PartitionPolicy::First)?,
            select(table, image_type, PartitionPolicy::Second)?,
        ]),
        policy => Ok(vec![select(table, image_type, policy)?]),
    }
}

fn oldest<'a>(candidates: &[&'a Partition]) -> Option<&'a Partition> {
    match *candidates {
        [first, second, ..] if first.priority < second.priority => Some(first),
        [_, second, ..] => Some(second),
        [only] => Some(only),
        [] => None,
    }
}

fn newest<'a>(candidates: &[&'a Partition]) -> Option<&'a Partition> {
    match *candidates {
        [first, second, ..] if first.priority >= second.priority => {
            Some(first)
        }
        [_, second, ..] => Some(second),
        [only] => Some(only),
        [] => None,
    }
}
