use std::fmt;

use crate::address::{HostAddresses, PublishedAddresses};

pub(crate) trait DynDns {
    fn describe(&self) -> String;

    /// Addresses currently published for `domain`. AAAA records are only
    /// consulted when `want_v6` is set.
    fn published_addresses(
        &self,
        domain: &str,
        want_v6: bool,
    ) -> color_eyre::Result<PublishedAddresses>;

    /// Pushes the host addresses to every matching record in the zone,
    /// returning one outcome per record touched.
    fn push_addresses(
        &self,
        domain: &str,
        host: &HostAddresses,
    ) -> color_eyre::Result<Vec<RecordPush>>;
}

/// What happened to a single record during an update pass. Failures are
/// carried here rather than aborting the sibling updates.
pub(crate) struct RecordPush {
    pub record_id: String,
    pub record_type: RecordType,
    pub content: String,
    pub result: color_eyre::Result<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordType {
    A,
    Aaaa,
}

impl RecordType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
