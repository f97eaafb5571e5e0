//! Single-reader subscriber that reconstructs an ordered, gap-free stream of
//! committed application fragments from a replicated cluster log. Consumes a
//! data transport (leader publications), a control transport (consensus
//! heartbeats and resends), and a persistent archive for catch-up.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod archive;
pub mod config;
mod filter;
pub mod future_acks;
pub mod position;
pub mod subscriber;
pub mod telemetry;
pub mod transport;
pub mod wire;

pub use archive::{Archive, ArchiveError, SessionReader};
pub use config::{ConfigError, SubscriberConfig, SubscriberConfigStore};
pub use future_acks::{FutureAck, FutureAckQueue};
pub use position::{classify_term, start_consensus_position, TermAdvance};
pub use subscriber::{ClusterSubscriber, SubscriberError};
pub use telemetry::{MetricsRegistry, MetricsSnapshot, SubscriberCounters};
pub use transport::{
    reserved_value, ControlSubscription, ControlledFragmentHandler, DataSubscription,
    FragmentAction, FragmentHeader, PublicationImage, TransportError, FRAME_HEADER_LEN,
};
pub use wire::{
    ConsensusHeartbeat, MessageHeader, Resend, WireError, CONSENSUS_HEARTBEAT_TEMPLATE_ID,
    CONTROL_SCHEMA_ID, CONTROL_SCHEMA_VERSION, MESSAGE_HEADER_LEN, RESEND_TEMPLATE_ID,
};
