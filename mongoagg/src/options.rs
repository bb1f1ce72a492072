/// The largest document the wire format accepts from a user.
pub const MAX_USER_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Bytes held back from the result budget for the response envelope.
pub const RESULT_HEADER_RESERVE_BYTES: usize = 1024;

/// Per-request knobs that are not part of the command document itself.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AggregateOptions {
    /// Upper bound on the serialized size of the `result` array.
    pub max_result_bytes: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        AggregateOptions {
            max_result_bytes: MAX_USER_DOCUMENT_BYTES,
        }
    }
}
