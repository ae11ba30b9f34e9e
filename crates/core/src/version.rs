//! Optimistic concurrency expectations for account streams.

/// Optimistic concurrency expectation for an account stream.
///
/// The version of a stream is the `sequence_number` of its last record
/// (0 for an empty stream).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (out-of-band imports, fixtures).
    Any,
    /// Require the stream to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}
