use std::collections::HashMap;
use std::sync::LazyLock;

use strum_macros::Display;
use uuid::Uuid;

/// GATT access kind checked against the blocklist.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum GattOperation {
    #[strum(to_string = "read")]
    Read,
    #[strum(to_string = "write")]
    Write,
}

/// Blocklist flags for one UUID.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BlocklistStatus {
    pub excludes_reads: bool,
    pub excludes_writes: bool,
}

impl BlocklistStatus {
    pub const EXCLUDE: Self = Self {
        excludes_reads: true,
        excludes_writes: true,
    };
    pub const EXCLUDE_READS: Self = Self {
        excludes_reads: true,
        excludes_writes: false,
    };
    pub const EXCLUDE_WRITES: Self = Self {
        excludes_reads: false,
        excludes_writes: true,
    };

    #[must_use]
    pub fn excludes(self, operation: GattOperation) -> bool {
        match operation {
            GattOperation::Read => self.excludes_reads,
            GattOperation::Write => self.excludes_writes,
        }
    }
}

// Web Bluetooth GATT blocklist.
const BLOCKLIST: [(&str, BlocklistStatus); 10] = [
    // Services.
    ("00001812-0000-1000-8000-00805f9b34fb", BlocklistStatus::EXCLUDE),
    ("00001530-1212-efde-1523-785feabcd123", BlocklistStatus::EXCLUDE),
    ("f000ffc0-0451-4000-b000-000000000000", BlocklistStatus::EXCLUDE),
    ("00060000-0000-1000-8000-00805f9b34fb", BlocklistStatus::EXCLUDE),
    ("0000fffd-0000-1000-8000-00805f9b34fb", BlocklistStatus::EXCLUDE),
    // Characteristics.
    ("00002a02-0000-1000-8000-00805f9b34fb", BlocklistStatus::EXCLUDE_WRITES),
    ("00002a03-0000-1000-8000-00805f9b34fb", BlocklistStatus::EXCLUDE),
    ("00002a25-0000-1000-8000-00805f9b34fb", BlocklistStatus::EXCLUDE),
    // Descriptors.
    ("00002902-0000-1000-8000-00805f9b34fb", BlocklistStatus::EXCLUDE_WRITES),
    ("00002903-0000-1000-8000-00805f9b34fb", BlocklistStatus::EXCLUDE_WRITES),
];

static BLOCKLIST_BY_UUID: LazyLock<HashMap<Uuid, BlocklistStatus>> = LazyLock::new(|| {
    BLOCKLIST
        .iter()
        .filter_map(|(uuid, status)| Some((Uuid::parse_str(uuid).ok()?, *status)))
        .collect()
});

/// Looks up the blocklist entry for `uuid`.
pub(crate) fn blocklist_status(uuid: &Uuid) -> Option<BlocklistStatus> {
    BLOCKLIST_BY_UUID.get(uuid).copied()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::gatt::uuid::uuid_from_short;

    #[test]
    fn every_table_entry_parses() {
        assert_eq!(BLOCKLIST.len(), BLOCKLIST_BY_UUID.len());
    }

    #[rstest]
    #[case(0x1812, GattOperation::Read, true)]
    #[case(0x1812, GattOperation::Write, true)]
    #[case(0x2a02, GattOperation::Read, false)]
    #[case(0x2a02, GattOperation::Write, true)]
    #[case(0x2a25, GattOperation::Read, true)]
    fn status_excludes_expected_operations(
        #[case] short: u32,
        #[case] operation: GattOperation,
        #[case] excluded: bool,
    ) {
        let status = blocklist_status(&uuid_from_short(short)).expect("entry should exist");
        assert_eq!(excluded, status.excludes(operation));
    }

    #[test]
    fn unlisted_uuid_has_no_status() {
        assert_eq!(None, blocklist_status(&uuid_from_short(0x180f)));
    }
}
