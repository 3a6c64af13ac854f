pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced while setting up the technique.
///
/// Problems that happen mid-frame (bucket overflows, reprojection misses
/// etc.) are absorbed and only reflected in statistics; they never end up
/// here.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "buffer `{label}` is too large: {size} bytes exceed the limit of \
         {limit} bytes"
    )]
    BufferTooLarge { label: String, size: u64, limit: u64 },

    #[error(
        "out of device memory while allocating `{label}`: requested \
         {requested} bytes, {available} bytes available"
    )]
    OutOfMemory {
        label: String,
        requested: u64,
        available: u64,
    },

    #[error("count `{label}` was read before its producing pass has run")]
    CountNotProduced { label: String },
}

impl Error {
    pub fn invalid_config(msg: impl ToString) -> Self {
        Self::InvalidConfig(msg.to_string())
    }
}
