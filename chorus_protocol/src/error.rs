use std::io;

/// Errors from an `ObjectStream` or the frame helpers.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode object: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode object: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: u32 },

    #[error("outbound backlog of {pending} bytes exceeds limit of {limit}")]
    Backlog { pending: usize, limit: usize },
}

impl StreamError {
    /// Whether the connection is unusable after this error.
    ///
    /// `Decode` is raised only after its frame has been consumed, so the
    /// stream is still aligned on a frame boundary. `Encode` happens before
    /// anything is queued. `Backlog` means the peer stopped reading. Everything
    /// else leaves the byte stream in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::FrameTooLarge { .. } | Self::Backlog { .. }
        )
    }
}
