use thiserror::Error;

/// Length of the data-transport frame header preceding each archived fragment.
pub const FRAME_HEADER_LEN: u64 = 32;

/// Outcome of handling one fragment during a controlled poll.
///
/// `Abort` leaves the fragment unconsumed so the next poll re-presents it,
/// `Break` consumes it and stops the poll, `Continue` consumes it and keeps
/// going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentAction {
    Abort,
    Break,
    Continue,
}

/// Transport-level header delivered alongside each fragment.
///
/// `position` is the stream position of the *end* of the fragment within the
/// publication that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub position: u64,
    pub session_id: i32,
    pub reserved_value: u64,
}

pub trait ControlledFragmentHandler {
    fn on_fragment(&mut self, payload: &[u8], header: &FragmentHeader) -> FragmentAction;
}

impl<F> ControlledFragmentHandler for F
where
    F: FnMut(&[u8], &FragmentHeader) -> FragmentAction,
{
    fn on_fragment(&mut self, payload: &[u8], header: &FragmentHeader) -> FragmentAction {
        self(payload, header)
    }
}

/// Per-publisher view of the data transport.
pub trait PublicationImage {
    /// Stream position consumed so far on this image.
    fn position(&self) -> u64;

    fn initial_term_id(&self) -> i32;

    fn term_buffer_length(&self) -> u32;

    fn controlled_poll(
        &mut self,
        handler: &mut dyn ControlledFragmentHandler,
        fragment_limit: usize,
    ) -> Result<usize, TransportError>;
}

/// Subscription carrying the application fragments published by each leader.
pub trait DataSubscription {
    type Image: PublicationImage;

    /// Returns the image for a publisher session, or `None` while the
    /// transport has not yet seen that session.
    fn image_by_session_id(&mut self, session_id: i32) -> Option<Self::Image>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// Subscription carrying consensus control envelopes.
pub trait ControlSubscription {
    fn controlled_poll(
        &mut self,
        handler: &mut dyn ControlledFragmentHandler,
        fragment_limit: usize,
    ) -> Result<usize, TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// Packing of the cluster-stream tag into a fragment's reserved value.
///
/// The tag lives in the low 32 bits; `NO_FILTER` (zero) is reserved by the
/// transport to mean "no filter" and is never a valid subscriber tag.
pub mod reserved_value {
    pub const NO_FILTER: u32 = 0;

    pub fn of(cluster_stream_id: u32) -> u64 {
        u64::from(cluster_stream_id)
    }

    pub fn cluster_stream_id(reserved_value: u64) -> u32 {
        reserved_value as u32
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}
