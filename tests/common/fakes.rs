#![allow(dead_code)]

use commitstream::{
    Archive, ArchiveError, ControlSubscription, ControlledFragmentHandler, DataSubscription,
    FragmentAction, FragmentHeader, PublicationImage, SessionReader, TransportError,
    FRAME_HEADER_LEN,
};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

#[derive(Debug, Clone)]
struct ScriptedFragment {
    payload: Vec<u8>,
    reserved_value: u64,
    end_position: u64,
}

#[derive(Debug)]
struct ImageState {
    session_id: i32,
    position: u64,
    publish_position: u64,
    fragments: VecDeque<ScriptedFragment>,
}

/// Test-side handle for feeding fragments into one publisher session.
#[derive(Clone)]
pub struct ImageFeed {
    state: Rc<RefCell<ImageState>>,
}

impl ImageFeed {
    /// Appends a fragment tagged with a cluster-stream id.
    pub fn publish(&self, payload: &[u8], cluster_stream_id: u32) {
        self.publish_reserved(payload, commitstream::reserved_value::of(cluster_stream_id));
    }

    pub fn publish_reserved(&self, payload: &[u8], reserved_value: u64) {
        let mut state = self.state.borrow_mut();
        let end_position = state.publish_position + payload.len() as u64;
        state.publish_position = end_position;
        state.fragments.push_back(ScriptedFragment {
            payload: payload.to_vec(),
            reserved_value,
            end_position,
        });
    }

    pub fn position(&self) -> u64 {
        self.state.borrow().position
    }
}

/// Image handle the subscriber acquires; shares state with the feed.
pub struct ScriptedImage {
    state: Rc<RefCell<ImageState>>,
}

impl PublicationImage for ScriptedImage {
    fn position(&self) -> u64 {
        self.state.borrow().position
    }

    fn initial_term_id(&self) -> i32 {
        0
    }

    fn term_buffer_length(&self) -> u32 {
        64 * 1024
    }

    fn controlled_poll(
        &mut self,
        handler: &mut dyn ControlledFragmentHandler,
        fragment_limit: usize,
    ) -> Result<usize, TransportError> {
        let mut consumed = 0;
        while consumed < fragment_limit {
            let (fragment, session_id) = {
                let state = self.state.borrow();
                match state.fragments.front() {
                    Some(fragment) => (fragment.clone(), state.session_id),
                    None => break,
                }
            };
            let header = FragmentHeader {
                position: fragment.end_position,
                session_id,
                reserved_value: fragment.reserved_value,
            };
            let action = handler.on_fragment(&fragment.payload, &header);
            if action == FragmentAction::Abort {
                break;
            }
            let mut state = self.state.borrow_mut();
            state.fragments.pop_front();
            state.position = fragment.end_position;
            consumed += 1;
            if action == FragmentAction::Break {
                break;
            }
        }
        Ok(consumed)
    }
}

/// Data transport whose sessions are scripted by the test.
pub struct ScriptedDataTransport {
    images: HashMap<i32, Rc<RefCell<ImageState>>>,
    closes: Rc<Cell<u32>>,
}

impl ScriptedDataTransport {
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
            closes: Rc::new(Cell::new(0)),
        }
    }

    /// Registers a publisher session whose stream starts (and is consumed
    /// from) `join_position`.
    pub fn add_session(&mut self, session_id: i32, join_position: u64) -> ImageFeed {
        let state = Rc::new(RefCell::new(ImageState {
            session_id,
            position: join_position,
            publish_position: join_position,
            fragments: VecDeque::new(),
        }));
        self.images.insert(session_id, state.clone());
        ImageFeed { state }
    }

    pub fn close_count(&self) -> Rc<Cell<u32>> {
        self.closes.clone()
    }
}

impl DataSubscription for ScriptedDataTransport {
    type Image = ScriptedImage;

    fn image_by_session_id(&mut self, session_id: i32) -> Option<ScriptedImage> {
        self.images
            .get(&session_id)
            .map(|state| ScriptedImage {
                state: state.clone(),
            })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

/// Control transport fed with pre-encoded envelopes.
pub struct ScriptedControlTransport {
    frames: Rc<RefCell<VecDeque<Vec<u8>>>>,
    position: u64,
    closes: Rc<Cell<u32>>,
}

#[derive(Clone)]
pub struct ControlFeed {
    frames: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

impl ControlFeed {
    pub fn push(&self, frame: Vec<u8>) {
        self.frames.borrow_mut().push_back(frame);
    }

    pub fn pending(&self) -> usize {
        self.frames.borrow().len()
    }
}

impl ScriptedControlTransport {
    pub fn new() -> (Self, ControlFeed) {
        let frames = Rc::new(RefCell::new(VecDeque::new()));
        (
            Self {
                frames: frames.clone(),
                position: 0,
                closes: Rc::new(Cell::new(0)),
            },
            ControlFeed { frames },
        )
    }

    pub fn close_count(&self) -> Rc<Cell<u32>> {
        self.closes.clone()
    }
}

impl ControlSubscription for ScriptedControlTransport {
    fn controlled_poll(
        &mut self,
        handler: &mut dyn ControlledFragmentHandler,
        fragment_limit: usize,
    ) -> Result<usize, TransportError> {
        let mut consumed = 0;
        while consumed < fragment_limit {
            let frame = {
                let frames = self.frames.borrow();
                match frames.front() {
                    Some(frame) => frame.clone(),
                    None => break,
                }
            };
            let header = FragmentHeader {
                position: self.position + frame.len() as u64,
                session_id: 0,
                reserved_value: 0,
            };
            let action = handler.on_fragment(&frame, &header);
            if action == FragmentAction::Abort {
                break;
            }
            self.frames.borrow_mut().pop_front();
            self.position += frame.len() as u64;
            consumed += 1;
            if action == FragmentAction::Break {
                break;
            }
        }
        Ok(consumed)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ArchivedFragment {
    end_position: u64,
    payload: Vec<u8>,
}

/// Map-backed archive; recordings become visible to open readers.
pub struct MemoryArchive {
    sessions: Rc<RefCell<HashMap<i32, Vec<ArchivedFragment>>>>,
    closes: Rc<Cell<u32>>,
}

#[derive(Clone)]
pub struct ArchiveFeed {
    sessions: Rc<RefCell<HashMap<i32, Vec<ArchivedFragment>>>>,
}

impl ArchiveFeed {
    /// Records one archived fragment spanning
    /// `[start_position, start_position + payload.len())`.
    pub fn record(&self, session_id: i32, start_position: u64, payload: &[u8]) {
        self.sessions
            .borrow_mut()
            .entry(session_id)
            .or_default()
            .push(ArchivedFragment {
                end_position: start_position + payload.len() as u64,
                payload: payload.to_vec(),
            });
    }
}

impl MemoryArchive {
    pub fn new() -> (Self, ArchiveFeed) {
        let sessions = Rc::new(RefCell::new(HashMap::new()));
        (
            Self {
                sessions: sessions.clone(),
                closes: Rc::new(Cell::new(0)),
            },
            ArchiveFeed { sessions },
        )
    }

    pub fn close_count(&self) -> Rc<Cell<u32>> {
        self.closes.clone()
    }
}

impl Archive for MemoryArchive {
    type Reader = MemorySessionReader;

    fn session_reader(&mut self, session_id: i32) -> Option<MemorySessionReader> {
        if !self.sessions.borrow().contains_key(&session_id) {
            return None;
        }
        Some(MemorySessionReader {
            sessions: self.sessions.clone(),
            session_id,
        })
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

pub struct MemorySessionReader {
    sessions: Rc<RefCell<HashMap<i32, Vec<ArchivedFragment>>>>,
    session_id: i32,
}

impl SessionReader for MemorySessionReader {
    fn read_up_to(
        &mut self,
        from_stream_position: u64,
        to_stream_position: u64,
        handler: &mut dyn ControlledFragmentHandler,
    ) -> Result<u64, ArchiveError> {
        // `from` addresses the payload start of the next frame; back up over
        // the frame header to locate the frame itself.
        let next_start = from_stream_position.saturating_sub(FRAME_HEADER_LEN);
        let fragments: Vec<ArchivedFragment> = {
            let sessions = self.sessions.borrow();
            sessions
                .get(&self.session_id)
                .map(|fragments| {
                    fragments
                        .iter()
                        .filter(|fragment| {
                            let start = fragment.end_position - fragment.payload.len() as u64;
                            start >= next_start && fragment.end_position <= to_stream_position
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut reached = 0;
        for fragment in fragments {
            let header = FragmentHeader {
                position: fragment.end_position,
                session_id: self.session_id,
                reserved_value: 0,
            };
            let action = handler.on_fragment(&fragment.payload, &header);
            if action == FragmentAction::Abort {
                break;
            }
            reached = fragment.end_position;
            if action == FragmentAction::Break {
                break;
            }
        }
        Ok(reached)
    }
}

/// Records everything delivered to it; actions can be scripted per call.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    pub delivered: Vec<DeliveredFragment>,
    pub scripted_actions: VecDeque<FragmentAction>,
    pub calls: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredFragment {
    pub payload: Vec<u8>,
    pub position: u64,
    pub session_id: i32,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an action for an upcoming call; unscripted calls continue.
    pub fn script(&mut self, action: FragmentAction) {
        self.scripted_actions.push_back(action);
    }

    pub fn payload_lengths(&self) -> Vec<usize> {
        self.delivered
            .iter()
            .map(|fragment| fragment.payload.len())
            .collect()
    }

    pub fn positions(&self) -> Vec<u64> {
        self.delivered
            .iter()
            .map(|fragment| fragment.position)
            .collect()
    }
}

impl ControlledFragmentHandler for CollectingHandler {
    fn on_fragment(&mut self, payload: &[u8], header: &FragmentHeader) -> FragmentAction {
        self.calls += 1;
        let action = self
            .scripted_actions
            .pop_front()
            .unwrap_or(FragmentAction::Continue);
        if action != FragmentAction::Abort {
            self.delivered.push(DeliveredFragment {
                payload: payload.to_vec(),
                position: header.position,
                session_id: header.session_id,
            });
        }
        action
    }
}
