//! The per-connection transport pipeline.
//!
//! Frames read from the socket travel head to tail through the named handlers
//! (`fire_inbound`); frames written by the server travel tail to head and then to
//! the socket writer (`write`). Any handler may stop a frame by returning `None`.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One raw protocol message: packet id plus undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i32,
    pub payload: BytesMut,
}

impl Frame {
    pub fn new(id: i32, payload: BytesMut) -> Self {
        Self { id, payload }
    }

    pub fn empty(id: i32) -> Self {
        Self::new(id, BytesMut::new())
    }
}

/// A stage in the pipeline. Both directions pass frames through unchanged by default.
pub trait ChannelHandler: Send + Sync {
    /// A frame travelling from the client towards the server's protocol handler.
    fn inbound(&self, frame: Frame) -> Option<Frame> {
        Some(frame)
    }

    /// A frame travelling from the server towards the client.
    fn outbound(&self, frame: Frame) -> Option<Frame> {
        Some(frame)
    }

    /// Called once after the handler has been taken out of the pipeline.
    fn removed(&self) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("No handler named '{0}' in pipeline")]
    MissingHandler(String),
    #[error("A handler named '{0}' is already in the pipeline")]
    DuplicateName(String),
}

#[derive(Clone)]
struct HandlerEntry {
    name: String,
    handler: Arc<dyn ChannelHandler>,
}

/// Ordered, named handler chain. Mutations publish a new handler list, so a
/// frame already in flight finishes against the list it started with.
pub struct Pipeline {
    handlers: RwLock<Arc<Vec<HandlerEntry>>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Append a handler at the tail.
    pub fn add_last(
        &self,
        name: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), PipelineError> {
        self.mutate(|entries| {
            if entries.iter().any(|e| e.name == name) {
                return Err(PipelineError::DuplicateName(name.to_string()));
            }
            entries.push(HandlerEntry {
                name: name.to_string(),
                handler,
            });
            Ok(())
        })
    }

    /// Insert a handler immediately before the handler named `base`.
    pub fn add_before(
        &self,
        base: &str,
        name: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), PipelineError> {
        self.mutate(|entries| {
            if entries.iter().any(|e| e.name == name) {
                return Err(PipelineError::DuplicateName(name.to_string()));
            }
            let index = entries
                .iter()
                .position(|e| e.name == base)
                .ok_or_else(|| PipelineError::MissingHandler(base.to_string()))?;
            entries.insert(
                index,
                HandlerEntry {
                    name: name.to_string(),
                    handler,
                },
            );
            Ok(())
        })
    }

    /// Remove the handler named `name`, if present.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn ChannelHandler>> {
        let removed = self
            .mutate(|entries| {
                let index = entries.iter().position(|e| e.name == name).ok_or(())?;
                Ok::<_, ()>(entries.remove(index).handler)
            })
            .ok()?;
        removed.removed();
        Some(removed)
    }

    /// Remove the handler named `name` only if it is `expected`.
    pub fn remove_if_same(&self, name: &str, expected: &Arc<dyn ChannelHandler>) -> bool {
        let removed = self.mutate(|entries| {
            let index = entries
                .iter()
                .position(|e| e.name == name && same_handler(&e.handler, expected))
                .ok_or(())?;
            Ok(entries.remove(index).handler)
        });
        match removed {
            Ok(handler) => {
                handler.removed();
                true
            }
            Err(()) => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.snapshot()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.handler.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().iter().any(|e| e.name == name)
    }

    /// Handler names, head to tail.
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Pass a frame head to tail. Returns the frame if no handler consumed it.
    pub fn fire_inbound(&self, frame: Frame) -> Option<Frame> {
        let entries = self.snapshot();
        let mut frame = frame;
        for entry in entries.iter() {
            frame = match entry.handler.inbound(frame) {
                Some(next) => next,
                None => {
                    trace!("Inbound frame stopped at '{}'", entry.name);
                    return None;
                }
            };
        }
        Some(frame)
    }

    /// Pass a frame tail to head. Returns the frame if it should reach the socket.
    pub fn fire_outbound(&self, frame: Frame) -> Option<Frame> {
        let entries = self.snapshot();
        let mut frame = frame;
        for entry in entries.iter().rev() {
            frame = match entry.handler.outbound(frame) {
                Some(next) => next,
                None => {
                    trace!("Outbound frame stopped at '{}'", entry.name);
                    return None;
                }
            };
        }
        Some(frame)
    }

    fn snapshot(&self) -> Arc<Vec<HandlerEntry>> {
        let guard = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn mutate<T, E>(
        &self,
        f: impl FnOnce(&mut Vec<HandlerEntry>) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut guard = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<HandlerEntry> = (**guard).clone();
        let result = f(&mut entries)?;
        *guard = Arc::new(entries);
        Ok(result)
    }
}

fn same_handler(a: &Arc<dyn ChannelHandler>, b: &Arc<dyn ChannelHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// The server side of one client socket: its pipeline plus the queue feeding the
/// socket writer. Closing the channel drops the writer queue.
pub struct Channel {
    id: u64,
    peer: Option<SocketAddr>,
    protocol_version: i32,
    pipeline: Pipeline,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl Channel {
    pub fn new(
        peer: Option<SocketAddr>,
        protocol_version: i32,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            protocol_version,
            pipeline: Pipeline::new(),
            outbound: Mutex::new(Some(outbound)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Protocol version the client announced in its handshake.
    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn is_open(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Run a frame read from the socket through the pipeline.
    pub fn fire_inbound(&self, frame: Frame) {
        if let Some(frame) = self.pipeline.fire_inbound(frame) {
            trace!(
                "Channel #{}: inbound frame id=0x{:02X} reached the tail unhandled",
                self.id,
                frame.id
            );
        }
    }

    /// Run a frame through the pipeline towards the socket.
    /// Returns false if a handler dropped it or the channel is closed.
    pub fn write(&self, frame: Frame) -> bool {
        if !self.is_open() {
            return false;
        }
        let Some(frame) = self.pipeline.fire_outbound(frame) else {
            return false;
        };

        let mut outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    debug!("Channel #{}: writer gone, closing", self.id);
                    *outbound = None;
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    /// Stop accepting writes. The socket writer drains what is queued and exits.
    pub fn close(&self) {
        let mut outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        if outbound.take().is_some() {
            debug!("Channel #{} closed", self.id);
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("protocol_version", &self.protocol_version)
            .field("handlers", &self.pipeline.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Records frames it sees and optionally drops them.
    struct Recorder {
        tag: u8,
        drop_id: Option<i32>,
        seen: AtomicUsize,
        removed: AtomicUsize,
    }

    impl Recorder {
        fn build(tag: u8, drop_id: Option<i32>) -> Arc<Self> {
            Arc::new(Self {
                tag,
                drop_id,
                seen: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
            })
        }

        fn new(tag: u8) -> Arc<Self> {
            Self::build(tag, None)
        }

        fn dropping(tag: u8, id: i32) -> Arc<Self> {
            Self::build(tag, Some(id))
        }
    }

    impl ChannelHandler for Recorder {
        fn inbound(&self, mut frame: Frame) -> Option<Frame> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.drop_id == Some(frame.id) {
                return None;
            }
            frame.payload.extend_from_slice(&[self.tag]);
            Some(frame)
        }

        fn outbound(&self, mut frame: Frame) -> Option<Frame> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.drop_id == Some(frame.id) {
                return None;
            }
            frame.payload.extend_from_slice(&[self.tag]);
            Some(frame)
        }

        fn removed(&self) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_before_places_handler() {
        let pipeline = Pipeline::new();
        pipeline.add_last("decoder", Recorder::new(1)).unwrap();
        pipeline.add_last("packet_handler", Recorder::new(2)).unwrap();
        pipeline
            .add_before("packet_handler", "interceptor", Recorder::new(3))
            .unwrap();
        assert_eq!(
            pipeline.names(),
            vec!["decoder", "interceptor", "packet_handler"]
        );
    }

    #[test]
    fn test_add_before_errors() {
        let pipeline = Pipeline::new();
        pipeline.add_last("packet_handler", Recorder::new(1)).unwrap();
        assert_eq!(
            pipeline.add_before("missing", "x", Recorder::new(2)),
            Err(PipelineError::MissingHandler("missing".into()))
        );
        assert_eq!(
            pipeline.add_before("packet_handler", "packet_handler", Recorder::new(2)),
            Err(PipelineError::DuplicateName("packet_handler".into()))
        );
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_directions_traverse_in_opposite_order() {
        let pipeline = Pipeline::new();
        pipeline.add_last("a", Recorder::new(b'a')).unwrap();
        pipeline.add_last("b", Recorder::new(b'b')).unwrap();

        let inbound = pipeline.fire_inbound(Frame::empty(1)).unwrap();
        assert_eq!(&inbound.payload[..], b"ab");

        let outbound = pipeline.fire_outbound(Frame::empty(1)).unwrap();
        assert_eq!(&outbound.payload[..], b"ba");
    }

    #[test]
    fn test_dropping_handler_stops_frame() {
        let pipeline = Pipeline::new();
        let dropper = Recorder::dropping(b'x', 7);
        let after = Recorder::new(b'y');
        pipeline.add_last("dropper", dropper.clone()).unwrap();
        pipeline.add_last("after", after.clone()).unwrap();

        assert!(pipeline.fire_inbound(Frame::empty(7)).is_none());
        assert_eq!(after.seen.load(Ordering::SeqCst), 0);
        assert!(pipeline.fire_inbound(Frame::empty(8)).is_some());
        assert_eq!(after.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_notifies_handler() {
        let pipeline = Pipeline::new();
        let recorder = Recorder::new(1);
        pipeline.add_last("recorder", recorder.clone()).unwrap();

        assert!(pipeline.remove("recorder").is_some());
        assert!(pipeline.remove("recorder").is_none());
        assert_eq!(recorder.removed.load(Ordering::SeqCst), 1);
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_remove_if_same_checks_identity() {
        let pipeline = Pipeline::new();
        let installed: Arc<dyn ChannelHandler> = Recorder::new(1);
        let other: Arc<dyn ChannelHandler> = Recorder::new(1);
        pipeline.add_last("recorder", installed.clone()).unwrap();

        assert!(!pipeline.remove_if_same("recorder", &other));
        assert!(pipeline.contains("recorder"));
        assert!(pipeline.remove_if_same("recorder", &installed));
        assert!(!pipeline.contains("recorder"));
    }

    /// A handler that removes itself while handling a frame still finishes that frame.
    struct SelfRemoving {
        pipeline: Arc<Pipeline>,
    }

    impl ChannelHandler for SelfRemoving {
        fn inbound(&self, mut frame: Frame) -> Option<Frame> {
            self.pipeline.remove("self");
            frame.payload.extend_from_slice(b"s");
            Some(frame)
        }
    }

    #[test]
    fn test_removal_during_flight_affects_next_frame_only() {
        let pipeline = Arc::new(Pipeline::new());
        pipeline
            .add_last(
                "self",
                Arc::new(SelfRemoving {
                    pipeline: pipeline.clone(),
                }),
            )
            .unwrap();
        pipeline.add_last("tail", Recorder::new(b't')).unwrap();

        let first = pipeline.fire_inbound(Frame::empty(1)).unwrap();
        assert_eq!(&first.payload[..], b"st");

        let second = pipeline.fire_inbound(Frame::empty(1)).unwrap();
        assert_eq!(&second.payload[..], b"t");
    }

    #[test]
    fn test_channel_write_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = Channel::new(None, 760, tx);
        channel.pipeline().add_last("recorder", Recorder::new(b'p')).unwrap();

        assert!(channel.is_open());
        assert!(channel.write(Frame::empty(3)));
        let written = rx.try_recv().unwrap();
        assert_eq!(written.id, 3);
        assert_eq!(&written.payload[..], b"p");

        channel.close();
        assert!(!channel.is_open());
        assert!(!channel.write(Frame::empty(4)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_closes_when_writer_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Channel::new(None, 578, tx);
        drop(rx);
        assert!(!channel.is_open());
        assert!(!channel.write(Frame::empty(1)));
    }
}
