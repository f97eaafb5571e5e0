use crate::telemetry::SubscriberCounters;
use crate::transport::{reserved_value, ControlledFragmentHandler, FragmentAction, FragmentHeader};
use crate::wire;
use log::debug;

/// Gate between the raw data transport and the caller's handler.
///
/// Borrowed per poll: the commit bound is fixed for the duration of one data
/// poll while the applied position advances with every accepted fragment.
pub(crate) struct MessageFilter<'a> {
    cluster_stream_id: u32,
    stream_consensus_position: u64,
    last_applied_position: &'a mut u64,
    counters: &'a mut SubscriberCounters,
    handler: &'a mut dyn ControlledFragmentHandler,
}

impl<'a> MessageFilter<'a> {
    pub(crate) fn new(
        cluster_stream_id: u32,
        stream_consensus_position: u64,
        last_applied_position: &'a mut u64,
        counters: &'a mut SubscriberCounters,
        handler: &'a mut dyn ControlledFragmentHandler,
    ) -> Self {
        Self {
            cluster_stream_id,
            stream_consensus_position,
            last_applied_position,
            counters,
            handler,
        }
    }
}

impl ControlledFragmentHandler for MessageFilter<'_> {
    fn on_fragment(&mut self, payload: &[u8], header: &FragmentHeader) -> FragmentAction {
        let header_position = header.position;
        let length = payload.len() as u64;
        let fragment_start_position = header_position - length;
        let fragment_stream_id = reserved_value::cluster_stream_id(header.reserved_value);

        debug!(
            "data fragment: header_position={} consensus_position={} our_stream={} fragment_stream={}",
            header_position, self.stream_consensus_position, self.cluster_stream_id, fragment_stream_id
        );

        // Fragments are aligned to term boundaries; one fragment never spans
        // two leadership terms.

        // Consensus has not been reached for this fragment yet.
        if header_position > self.stream_consensus_position {
            return FragmentAction::Abort;
        }

        // Already delivered, or published by this session before it led.
        if fragment_start_position < *self.last_applied_position {
            self.counters.record_stale_skipped();
            return FragmentAction::Continue;
        }

        if fragment_stream_id != self.cluster_stream_id {
            self.counters.record_foreign_skipped();
            return FragmentAction::Continue;
        }

        // Heartbeats are also published in-band on the data stream; they are
        // control noise here.
        if wire::peek_template_id(payload) == Some(wire::CONSENSUS_HEARTBEAT_TEMPLATE_ID) {
            return FragmentAction::Continue;
        }

        let action = self.handler.on_fragment(payload, header);
        if action != FragmentAction::Abort {
            *self.last_applied_position += length;
            self.counters.record_delivered();
        }
        action
    }
}
