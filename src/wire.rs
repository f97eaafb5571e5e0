use std::convert::TryInto;
use thiserror::Error;

pub const MESSAGE_HEADER_LEN: usize = 8;
pub const CONTROL_SCHEMA_ID: u16 = 11;
pub const CONTROL_SCHEMA_VERSION: u16 = 1;
pub const CONSENSUS_HEARTBEAT_TEMPLATE_ID: u16 = 1;
pub const RESEND_TEMPLATE_ID: u16 = 2;

const CONSENSUS_HEARTBEAT_BLOCK_LENGTH: u16 = 32;
const RESEND_BLOCK_LENGTH: u16 = 24;

/// Fixed-length envelope header prefixed to every control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

impl MessageHeader {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < MESSAGE_HEADER_LEN {
            return Err(WireError::Truncated);
        }
        Ok(Self {
            block_length: u16::from_le_bytes(bytes[0..2].try_into().unwrap()),
            template_id: u16::from_le_bytes(bytes[2..4].try_into().unwrap()),
            schema_id: u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
            version: u16::from_le_bytes(bytes[6..8].try_into().unwrap()),
        })
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.block_length.to_le_bytes());
        buf.extend_from_slice(&self.template_id.to_le_bytes());
        buf.extend_from_slice(&self.schema_id.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
    }
}

/// Template id of an envelope, without decoding the rest of the header.
pub fn peek_template_id(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < MESSAGE_HEADER_LEN {
        return None;
    }
    Some(u16::from_le_bytes([bytes[2], bytes[3]]))
}

/// Commit announcement for a leadership term.
///
/// `position` is the consensus position of the end of the committed range,
/// `[stream_start_position, stream_position)` is the same range expressed in
/// the leader publication's stream space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusHeartbeat {
    pub leadership_term: i32,
    pub leader_session_id: i32,
    pub position: u64,
    pub stream_start_position: u64,
    pub stream_position: u64,
}

impl ConsensusHeartbeat {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MESSAGE_HEADER_LEN + CONSENSUS_HEARTBEAT_BLOCK_LENGTH as usize);
        MessageHeader {
            block_length: CONSENSUS_HEARTBEAT_BLOCK_LENGTH,
            template_id: CONSENSUS_HEARTBEAT_TEMPLATE_ID,
            schema_id: CONTROL_SCHEMA_ID,
            version: CONTROL_SCHEMA_VERSION,
        }
        .encode_into(&mut buf);
        buf.extend_from_slice(&self.leadership_term.to_le_bytes());
        buf.extend_from_slice(&self.leader_session_id.to_le_bytes());
        buf.extend_from_slice(&self.position.to_le_bytes());
        buf.extend_from_slice(&self.stream_start_position.to_le_bytes());
        buf.extend_from_slice(&self.stream_position.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let header = MessageHeader::decode(bytes)?;
        if header.template_id != CONSENSUS_HEARTBEAT_TEMPLATE_ID {
            return Err(WireError::UnexpectedTemplate {
                observed: header.template_id,
                expected: CONSENSUS_HEARTBEAT_TEMPLATE_ID,
            });
        }
        if header.block_length < CONSENSUS_HEARTBEAT_BLOCK_LENGTH {
            return Err(WireError::BlockTooShort {
                observed: header.block_length,
                expected: CONSENSUS_HEARTBEAT_BLOCK_LENGTH,
            });
        }
        let body = &bytes[MESSAGE_HEADER_LEN..];
        if body.len() < header.block_length as usize {
            return Err(WireError::Truncated);
        }
        Ok(Self {
            leadership_term: i32::from_le_bytes(body[0..4].try_into().unwrap()),
            leader_session_id: i32::from_le_bytes(body[4..8].try_into().unwrap()),
            position: u64::from_le_bytes(body[8..16].try_into().unwrap()),
            stream_start_position: u64::from_le_bytes(body[16..24].try_into().unwrap()),
            stream_position: u64::from_le_bytes(body[24..32].try_into().unwrap()),
        })
    }
}

/// Authoritative replay of a committed range whose data transport may be
/// unavailable. `start_position` is the consensus position where the body
/// begins; `stream_start_position` is the same point in the announcing
/// leader's stream space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resend {
    pub leader_session_id: i32,
    pub leadership_term: i32,
    pub start_position: u64,
    pub stream_start_position: u64,
    pub body: Vec<u8>,
}

impl Resend {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.body.len() > u32::MAX as usize {
            return Err(WireError::BodyTooLarge {
                len: self.body.len(),
            });
        }
        let mut buf =
            Vec::with_capacity(MESSAGE_HEADER_LEN + RESEND_BLOCK_LENGTH as usize + 4 + self.body.len());
        MessageHeader {
            block_length: RESEND_BLOCK_LENGTH,
            template_id: RESEND_TEMPLATE_ID,
            schema_id: CONTROL_SCHEMA_ID,
            version: CONTROL_SCHEMA_VERSION,
        }
        .encode_into(&mut buf);
        buf.extend_from_slice(&self.leader_session_id.to_le_bytes());
        buf.extend_from_slice(&self.leadership_term.to_le_bytes());
        buf.extend_from_slice(&self.start_position.to_le_bytes());
        buf.extend_from_slice(&self.stream_start_position.to_le_bytes());
        buf.extend_from_slice(&(self.body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let header = MessageHeader::decode(bytes)?;
        if header.template_id != RESEND_TEMPLATE_ID {
            return Err(WireError::UnexpectedTemplate {
                observed: header.template_id,
                expected: RESEND_TEMPLATE_ID,
            });
        }
        if header.block_length < RESEND_BLOCK_LENGTH {
            return Err(WireError::BlockTooShort {
                observed: header.block_length,
                expected: RESEND_BLOCK_LENGTH,
            });
        }
        let body = &bytes[MESSAGE_HEADER_LEN..];
        if body.len() < header.block_length as usize {
            return Err(WireError::Truncated);
        }
        let leader_session_id = i32::from_le_bytes(body[0..4].try_into().unwrap());
        let leadership_term = i32::from_le_bytes(body[4..8].try_into().unwrap());
        let start_position = u64::from_le_bytes(body[8..16].try_into().unwrap());
        let stream_start_position = u64::from_le_bytes(body[16..24].try_into().unwrap());

        // Var-data section follows the announced block so unknown trailing
        // block fields from newer writers are skipped, not misread.
        let var_data = &body[header.block_length as usize..];
        if var_data.len() < 4 {
            return Err(WireError::Truncated);
        }
        let body_length = u32::from_le_bytes(var_data[0..4].try_into().unwrap()) as usize;
        if var_data.len() < 4 + body_length {
            return Err(WireError::Truncated);
        }
        Ok(Self {
            leader_session_id,
            leadership_term,
            start_position,
            stream_start_position,
            body: var_data[4..4 + body_length].to_vec(),
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("control frame too short")]
    Truncated,
    #[error("unexpected template id {observed} (expected {expected})")]
    UnexpectedTemplate { observed: u16, expected: u16 },
    #[error("block length {observed} below minimum {expected}")]
    BlockTooShort { observed: u16, expected: u16 },
    #[error("resend body exceeds u32 limit ({len} bytes)")]
    BodyTooLarge { len: usize },
}
