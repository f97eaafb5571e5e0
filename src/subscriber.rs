use crate::archive::{Archive, ArchiveError, SessionReader};
use crate::config::{ConfigError, SubscriberConfig};
use crate::filter::MessageFilter;
use crate::future_acks::{FutureAck, FutureAckQueue};
use crate::position::{classify_term, start_consensus_position, TermAdvance};
use crate::telemetry::{MetricsRegistry, SubscriberCounters};
use crate::transport::{
    reserved_value, ControlSubscription, ControlledFragmentHandler, DataSubscription,
    FragmentAction, FragmentHeader, PublicationImage, TransportError, FRAME_HEADER_LEN,
};
use crate::wire::{ConsensusHeartbeat, MessageHeader, Resend, WireError, CONSENSUS_HEARTBEAT_TEMPLATE_ID, RESEND_TEMPLATE_ID};
use log::{debug, warn};
use thiserror::Error;

/// Single-reader subscriber that reassembles the committed cluster log from a
/// data transport, a control transport, and an archive.
///
/// Not thread safe: create one subscriber per reader thread and pump `poll`
/// from that thread only.
pub struct ClusterSubscriber<D: DataSubscription, C: ControlSubscription, A: Archive> {
    control: C,
    core: Core<D, A>,
    closed: bool,
}

struct Core<D: DataSubscription, A: Archive> {
    data: D,
    archive: A,
    cluster_stream_id: u32,
    current_term: Option<i32>,
    stream_consensus_position: u64,
    last_applied_position: u64,
    previous_consensus_position: u64,
    data_image: Option<D::Image>,
    leader_archive_reader: Option<A::Reader>,
    future_acks: FutureAckQueue,
    counters: SubscriberCounters,
}

impl<D: DataSubscription, C: ControlSubscription, A: Archive> ClusterSubscriber<D, C, A> {
    pub fn new(
        data: D,
        cluster_stream_id: u32,
        control: C,
        archive: A,
    ) -> Result<Self, SubscriberError> {
        Self::with_config(data, control, archive, &SubscriberConfig::new(cluster_stream_id))
    }

    pub fn with_config(
        data: D,
        control: C,
        archive: A,
        config: &SubscriberConfig,
    ) -> Result<Self, SubscriberError> {
        config.validate()?;
        Ok(Self {
            control,
            core: Core {
                data,
                archive,
                cluster_stream_id: config.cluster_stream_id,
                current_term: None,
                stream_consensus_position: 0,
                last_applied_position: 0,
                previous_consensus_position: 0,
                data_image: None,
                leader_archive_reader: None,
                future_acks: FutureAckQueue::new(),
                counters: SubscriberCounters::default(),
            },
            closed: false,
        })
    }

    /// Makes one unit of forward progress and returns the number of fragments
    /// consumed from the live data transport (archive catch-up reports 1).
    ///
    /// Non-blocking; the caller's loop provides progress and is the retry
    /// mechanism for every error surfaced here.
    pub fn poll(
        &mut self,
        handler: &mut dyn ControlledFragmentHandler,
        fragment_limit: usize,
    ) -> Result<usize, SubscriberError> {
        if self.core.cannot_advance() {
            if !self.core.apply_matching_future_ack() {
                let control_error = {
                    let mut dispatcher = ControlDispatcher {
                        core: &mut self.core,
                        handler: &mut *handler,
                        error: None,
                    };
                    self.control.controlled_poll(&mut dispatcher, fragment_limit)?;
                    dispatcher.error
                };
                if let Some(error) = control_error {
                    return Err(error);
                }

                if self.core.cannot_advance() {
                    if self.core.leader_archive_reader.is_some()
                        && self.core.applied_behind_consensus()
                    {
                        self.core.read_from_archive(handler)?;
                        return Ok(1);
                    }
                    return Ok(0);
                }
            }

            if self.core.cannot_advance() && self.core.leader_archive_reader.is_some() {
                self.core.read_from_archive(handler)?;
            }
        }

        self.core.poll_data(handler, fragment_limit)
    }

    /// Highest stream position of the current term committed by consensus.
    pub fn stream_position(&self) -> u64 {
        self.core.stream_consensus_position
    }

    #[deprecated(note = "the session id is ignored for this reader; use stream_position")]
    pub fn position_of(&self, _session_id: i32) -> u64 {
        self.stream_position()
    }

    pub fn current_leadership_term(&self) -> Option<i32> {
        self.core.current_term
    }

    pub fn counters(&self) -> &SubscriberCounters {
        &self.core.counters
    }

    pub fn publish_metrics(&self, registry: &mut MetricsRegistry) {
        let counters = &self.core.counters;
        registry.set_gauge("subscriber.fragments_delivered", counters.fragments_delivered);
        registry.set_gauge(
            "subscriber.stale_fragments_skipped",
            counters.stale_fragments_skipped,
        );
        registry.set_gauge(
            "subscriber.foreign_stream_skipped",
            counters.foreign_stream_skipped,
        );
        registry.set_gauge("subscriber.term_switches", counters.term_switches);
        registry.set_gauge(
            "subscriber.future_acks_deferred",
            counters.future_acks_deferred,
        );
        registry.set_gauge("subscriber.resends_applied", counters.resends_applied);
        registry.set_gauge("subscriber.archive_reads", counters.archive_reads);
        registry.set_gauge(
            "subscriber.pending_future_acks",
            self.core.future_acks.len() as u64,
        );
        registry.set_gauge(
            "subscriber.stream_consensus_position",
            self.core.stream_consensus_position,
        );
        registry.set_gauge(
            "subscriber.last_applied_position",
            self.core.last_applied_position,
        );
    }

    /// Releases the data subscription, control subscription, and archive.
    /// Every resource is released even if an earlier one fails; the first
    /// failure is reported. Subsequent calls are no-ops.
    pub fn close(&mut self) -> Result<(), SubscriberError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error: Option<SubscriberError> = None;
        if let Err(error) = self.core.data.close() {
            first_error = Some(error.into());
        }
        if let Err(error) = self.control.close() {
            if first_error.is_none() {
                first_error = Some(error.into());
            }
        }
        if let Err(error) = self.core.archive.close() {
            if first_error.is_none() {
                first_error = Some(error.into());
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<D: DataSubscription, A: Archive> Core<D, A> {
    fn cannot_advance(&self) -> bool {
        match &self.data_image {
            None => true,
            Some(image) => self.stream_consensus_position <= image.position(),
        }
    }

    fn applied_behind_consensus(&self) -> bool {
        self.stream_consensus_position > self.last_applied_position
    }

    fn apply_matching_future_ack(&mut self) -> bool {
        match self.future_acks.pop_matching(self.previous_consensus_position) {
            Some(ack) => {
                self.switch_terms(
                    ack.leadership_term,
                    ack.leader_session_id,
                    ack.start_position,
                    ack.stream_start_position,
                    ack.stream_position,
                );
                true
            }
            None => false,
        }
    }

    fn on_consensus_heartbeat(&mut self, heartbeat: ConsensusHeartbeat) -> FragmentAction {
        debug!(
            "heartbeat: term={} leader_session={} position={} stream_start={} stream_position={}",
            heartbeat.leadership_term,
            heartbeat.leader_session_id,
            heartbeat.position,
            heartbeat.stream_start_position,
            heartbeat.stream_position
        );

        let start_position = start_consensus_position(
            heartbeat.position,
            heartbeat.stream_start_position,
            heartbeat.stream_position,
        );

        match classify_term(
            heartbeat.leadership_term,
            self.current_term,
            self.data_image.is_some(),
        ) {
            TermAdvance::Extension => {
                if self.data_image.is_none() {
                    // A previous switch found no image; the source update is
                    // idempotent, so re-run it rather than staying stuck.
                    self.switch_term_update_sources(heartbeat.leader_session_id);
                }
                if self.stream_consensus_position < heartbeat.stream_position {
                    self.stream_consensus_position = heartbeat.stream_position;
                    self.previous_consensus_position = heartbeat.position;
                    return FragmentAction::Break;
                }
                FragmentAction::Continue
            }
            TermAdvance::NextTerm { bootstrap } => {
                if start_position != self.previous_consensus_position {
                    self.save_future_ack(
                        heartbeat.leadership_term,
                        heartbeat.leader_session_id,
                        start_position,
                        heartbeat.stream_start_position,
                        heartbeat.stream_position,
                    );
                    FragmentAction::Continue
                } else {
                    if bootstrap && heartbeat.leadership_term != 1 {
                        warn!(
                            "bootstrapping at leadership term {} with no prior term state; \
                             a restart may have masked a term jump",
                            heartbeat.leadership_term
                        );
                    }
                    self.switch_terms(
                        heartbeat.leadership_term,
                        heartbeat.leader_session_id,
                        heartbeat.position,
                        heartbeat.stream_start_position,
                        heartbeat.stream_position,
                    );
                    FragmentAction::Break
                }
            }
            TermAdvance::FutureGap => {
                self.save_future_ack(
                    heartbeat.leadership_term,
                    heartbeat.leader_session_id,
                    start_position,
                    heartbeat.stream_start_position,
                    heartbeat.stream_position,
                );
                FragmentAction::Continue
            }
            // Old leaders keep announcing their last term for a while; their
            // heartbeats never mutate state.
            TermAdvance::Stale => FragmentAction::Continue,
        }
    }

    fn on_resend(
        &mut self,
        resend: &Resend,
        handler: &mut dyn ControlledFragmentHandler,
    ) -> FragmentAction {
        let body_length = resend.body.len() as u64;
        let stream_position = resend.stream_start_position + body_length;

        if resend.start_position == self.previous_consensus_position {
            let next_term = matches!(
                classify_term(
                    resend.leadership_term,
                    self.current_term,
                    self.data_image.is_some(),
                ),
                TermAdvance::NextTerm { .. }
            );
            if next_term {
                self.switch_term_update_sources(resend.leader_session_id);
            }

            let synthetic_header = FragmentHeader {
                position: stream_position,
                session_id: resend.leader_session_id,
                reserved_value: reserved_value::of(self.cluster_stream_id),
            };
            debug!(
                "resend: term={} start_position={} body_length={}",
                resend.leadership_term, resend.start_position, body_length
            );
            let action = handler.on_fragment(&resend.body, &synthetic_header);
            if action == FragmentAction::Abort {
                // Sources may already point at the new leader; positions do
                // not move, so re-presenting the envelope re-runs only the
                // idempotent half.
                return FragmentAction::Abort;
            }

            if next_term {
                let position = resend.start_position + body_length;
                self.switch_term_update_positions(
                    resend.leadership_term,
                    position,
                    stream_position,
                    stream_position,
                );
            } else {
                self.last_applied_position += body_length;
                self.previous_consensus_position += body_length;
            }
            self.counters.record_resend_applied();
            action
        } else if resend.start_position > self.previous_consensus_position {
            self.save_future_ack(
                resend.leadership_term,
                resend.leader_session_id,
                resend.start_position,
                resend.stream_start_position,
                stream_position,
            );
            FragmentAction::Continue
        } else {
            // Range already delivered.
            FragmentAction::Continue
        }
    }

    fn switch_terms(
        &mut self,
        leadership_term: i32,
        leader_session_id: i32,
        position: u64,
        stream_consumed_position: u64,
        stream_position: u64,
    ) {
        self.switch_term_update_sources(leader_session_id);
        self.switch_term_update_positions(
            leadership_term,
            position,
            stream_consumed_position,
            stream_position,
        );
    }

    // Safe to re-run when delivery aborts mid-switch.
    fn switch_term_update_sources(&mut self, leader_session_id: i32) {
        self.data_image = self.data.image_by_session_id(leader_session_id);
        match &self.data_image {
            Some(image) => debug!(
                "acquired data image: session={} initial_term_id={} term_buffer_length={}",
                leader_session_id,
                image.initial_term_id(),
                image.term_buffer_length()
            ),
            None => warn!(
                "no data image yet for leader session {}",
                leader_session_id
            ),
        }
        self.leader_archive_reader = self.archive.session_reader(leader_session_id);
    }

    // Commits the transition; mutates state in a non-abortable way.
    fn switch_term_update_positions(
        &mut self,
        leadership_term: i32,
        position: u64,
        stream_consumed_position: u64,
        stream_position: u64,
    ) {
        self.stream_consensus_position = stream_position;
        self.current_term = Some(leadership_term);
        self.last_applied_position = stream_consumed_position;
        self.previous_consensus_position = position;
        self.counters.record_term_switch();
        debug!("switched to leadership term {}", leadership_term);
    }

    fn save_future_ack(
        &mut self,
        leadership_term: i32,
        leader_session_id: i32,
        start_position: u64,
        stream_start_position: u64,
        stream_position: u64,
    ) {
        debug!(
            "deferring term {} until consensus position {}",
            leadership_term, start_position
        );
        self.future_acks.push(FutureAck {
            leadership_term,
            leader_session_id,
            start_position,
            stream_start_position,
            stream_position,
        });
        self.counters.record_future_ack_deferred();
    }

    fn read_from_archive(
        &mut self,
        handler: &mut dyn ControlledFragmentHandler,
    ) -> Result<(), SubscriberError> {
        let Some(reader) = self.leader_archive_reader.as_mut() else {
            return Ok(());
        };
        let from = self.last_applied_position + FRAME_HEADER_LEN;
        let read_up_to = reader.read_up_to(from, self.stream_consensus_position, handler)?;
        if read_up_to > 0 {
            debug!("archive catch-up reached stream position {}", read_up_to);
            self.last_applied_position = read_up_to;
            self.counters.record_archive_read();
        }
        Ok(())
    }

    fn poll_data(
        &mut self,
        handler: &mut dyn ControlledFragmentHandler,
        fragment_limit: usize,
    ) -> Result<usize, SubscriberError> {
        let Some(image) = self.data_image.as_mut() else {
            // A term switch could not obtain the leader's image yet; source
            // acquisition is retried by the control paths.
            return Ok(0);
        };
        let mut filter = MessageFilter::new(
            self.cluster_stream_id,
            self.stream_consensus_position,
            &mut self.last_applied_position,
            &mut self.counters,
            handler,
        );
        Ok(image.controlled_poll(&mut filter, fragment_limit)?)
    }
}

/// Decodes control envelopes and feeds them into the core state machine.
struct ControlDispatcher<'a, D: DataSubscription, A: Archive> {
    core: &'a mut Core<D, A>,
    handler: &'a mut dyn ControlledFragmentHandler,
    error: Option<SubscriberError>,
}

impl<D: DataSubscription, A: Archive> ControlDispatcher<'_, D, A> {
    fn fail(&mut self, error: WireError) -> FragmentAction {
        self.error = Some(error.into());
        FragmentAction::Abort
    }
}

impl<D: DataSubscription, A: Archive> ControlledFragmentHandler for ControlDispatcher<'_, D, A> {
    fn on_fragment(&mut self, payload: &[u8], _header: &FragmentHeader) -> FragmentAction {
        let header = match MessageHeader::decode(payload) {
            Ok(header) => header,
            Err(error) => return self.fail(error),
        };
        match header.template_id {
            CONSENSUS_HEARTBEAT_TEMPLATE_ID => match ConsensusHeartbeat::decode(payload) {
                Ok(heartbeat) => self.core.on_consensus_heartbeat(heartbeat),
                Err(error) => self.fail(error),
            },
            RESEND_TEMPLATE_ID => match Resend::decode(payload) {
                Ok(resend) => self.core.on_resend(&resend, &mut *self.handler),
                Err(error) => self.fail(error),
            },
            _ => FragmentAction::Continue,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Wire(#[from] WireError),
}
