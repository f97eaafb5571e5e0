use crate::transport::ControlledFragmentHandler;
use thiserror::Error;

/// Read-only view of one publisher session's archived stream.
pub trait SessionReader {
    /// Replays archived fragments through `handler`.
    ///
    /// `from_stream_position` addresses the first payload byte of the next
    /// undelivered fragment (i.e. the fragment's start position plus the
    /// frame header the archive stores in front of it); `to_stream_position`
    /// is the exclusive committed bound. Returns the stream position reached,
    /// which is at most `to_stream_position`; `0` means no progress was made.
    fn read_up_to(
        &mut self,
        from_stream_position: u64,
        to_stream_position: u64,
        handler: &mut dyn ControlledFragmentHandler,
    ) -> Result<u64, ArchiveError>;
}

/// Persistent archive of everything published on the data transport.
pub trait Archive {
    type Reader: SessionReader;

    /// Opens a reader scoped to one publisher session. `None` means the
    /// archive has nothing for that session yet; callers treat this as
    /// "cannot catch up", not as a failure.
    fn session_reader(&mut self, session_id: i32) -> Option<Self::Reader>;

    fn close(&mut self) -> Result<(), ArchiveError>;
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}
