//! Arithmetic between the two position spaces the subscriber straddles: the
//! cluster-global consensus log and each leader publication's own stream.
//! A committed range announced as `(position, stream_start, stream_end)`
//! began at consensus position `position - (stream_end - stream_start)`.

/// Consensus position at which an announced committed range begins.
pub fn start_consensus_position(position: u64, stream_start: u64, stream_end: u64) -> u64 {
    debug_assert!(stream_end >= stream_start);
    debug_assert!(position >= stream_end - stream_start);
    position - (stream_end - stream_start)
}

/// How an announced leadership term relates to the term currently being
/// delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermAdvance {
    /// Same term; may only widen the committed range.
    Extension,
    /// The term that directly succeeds the current one. `bootstrap` is set
    /// when the announcement qualified only because no data image exists yet
    /// (first heartbeat after construction or restart).
    NextTerm { bootstrap: bool },
    /// A term whose predecessor has not been seen; must be buffered.
    FutureGap,
    /// A term older than the one being delivered; never mutates state.
    Stale,
}

/// Classifies `announced` against the current term. `has_image` reflects
/// whether a data image has been acquired; its absence makes any announcement
/// eligible as the next term so the very first heartbeat can bootstrap the
/// subscriber.
pub fn classify_term(announced: i32, current: Option<i32>, has_image: bool) -> TermAdvance {
    match current {
        Some(current) if announced == current => TermAdvance::Extension,
        Some(current) if i64::from(announced) == i64::from(current) + 1 => {
            TermAdvance::NextTerm { bootstrap: false }
        }
        _ if !has_image => TermAdvance::NextTerm { bootstrap: true },
        Some(current) if announced > current => TermAdvance::FutureGap,
        Some(_) => TermAdvance::Stale,
        None => TermAdvance::NextTerm { bootstrap: true },
    }
}
