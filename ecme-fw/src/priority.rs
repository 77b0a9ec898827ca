// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::PriorityOverflow;
use crate::partition::PartitionTable;
use ecme_messages::ImageType;
use ecme_messages::ERASED_VERSION;

/// Priority every partition written by one package update is stamped with.
///
/// One more than the highest priority among inactive partitions of the
/// package's image types, or 0 if there are none.
pub fn next_priority(
    table: &PartitionTable,
    image_types: &[ImageType],
) -> Result<u16, PriorityOverflow> {
    let next = table
        .partitions()
        .iter()
        .filter(|p| !p.is_active() && image_types.contains(&p.image_type))
        .map(|p| u32::from(p.priority) + 1)
        .max()
        .unwrap_or(0);
    u16::try_from(next).map_err(|_| PriorityOverflow)
}

/// Version for an image written outside of a package update.
///
/// Erased partitions don't count, and the result saturates at the largest
/// version rather than failing.
pub fn next_version(table: &PartitionTable, image_type: ImageType) -> u16 {
    table
        .of_type(image_type)
        .map(|p| p.version)
        .filter(|&v| v != ERASED_VERSION)
        .max()
        .map_or(0, |v| v.saturating_add(1))
}
