use bytes::{BufMut, BytesMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;
use wiretap::*;
use wiretap_protocol_core::write_string;

const CHAT_1_19: i32 = 0x05;
const KEEP_ALIVE_IN_1_19: i32 = 0x12;

/// Stands in for the server's protocol handler: records what reaches it.
#[derive(Default)]
struct ProtocolHandler {
    received: Mutex<Vec<Frame>>,
}

impl ProtocolHandler {
    fn ids(&self) -> Vec<i32> {
        self.received.lock().unwrap().iter().map(|f| f.id).collect()
    }
}

impl ChannelHandler for ProtocolHandler {
    fn inbound(&self, frame: Frame) -> Option<Frame> {
        self.received.lock().unwrap().push(frame);
        None
    }
}

struct Client {
    channel: Arc<Channel>,
    handler: Arc<ProtocolHandler>,
    socket: mpsc::UnboundedReceiver<Frame>,
    profile: GameProfile,
}

impl Client {
    fn new(name: &str) -> Self {
        let (tx, socket) = mpsc::unbounded_channel();
        let channel = Channel::new(None, 760, tx);
        let handler = Arc::new(ProtocolHandler::default());
        channel
            .pipeline()
            .add_last(PACKET_HANDLER, handler.clone())
            .unwrap();
        Self {
            channel,
            handler,
            socket,
            profile: GameProfile::new(Uuid::new_v4(), name),
        }
    }

    fn written(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.socket.try_recv().ok()).collect()
    }
}

fn wiretap_1_19() -> Wiretap {
    Wiretap::initialize(VersionDescriptor::new(1, 19, 2), default_bindings()).unwrap()
}

fn chat_frame(message: &str) -> Frame {
    let mut payload = BytesMut::new();
    write_string(&mut payload, message);
    payload.put_i64(1_700_000_000_000);
    payload.put_i64(7);
    payload.put_u8(0); // no signature
    Frame::new(CHAT_1_19, payload)
}

fn keep_alive(wiretap: &Wiretap, id: i64) -> Packet {
    wiretap
        .packet("KeepAlive", &[("id", FieldValue::Long(id))])
        .unwrap()
}

#[test]
fn cancelled_inbound_chat_never_reaches_protocol_handler() {
    let wiretap = wiretap_1_19();
    let mut client = Client::new("Steve");
    wiretap.attach(client.profile.clone(), &client.channel).unwrap();

    wiretap
        .dispatcher()
        .listen("chat-filter")
        .filter(inbound("ChatMessage"))
        .filter(|e| {
            e.field("message")
                .is_some_and(|m| m.as_str() == Some("secret"))
        })
        .consume(|e| e.cancel());

    client.channel.fire_inbound(chat_frame("secret"));
    client.channel.fire_inbound(chat_frame("hello"));
    assert_eq!(client.handler.ids(), vec![CHAT_1_19]);

    // Outbound traffic for the same player is unaffected.
    wiretap.send(&client.profile.uuid, vec![keep_alive(&wiretap, 1)]);
    let written = client.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].id, 0x20);
}

#[test]
fn subscribers_run_in_order_and_see_cancellation() {
    let wiretap = wiretap_1_19();
    let client = Client::new("Alex");
    wiretap.attach(client.profile.clone(), &client.channel).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    for (name, cancels) in [("s1", false), ("s2", true), ("s3", false), ("s4", false)] {
        let log = Arc::clone(&log);
        wiretap.dispatcher().subscribe_all(name, move |e: &mut PacketEvent| {
            log.lock().unwrap().push((name, e.is_cancelled()));
            if cancels {
                e.cancel();
            }
            Ok(())
        });
    }

    client.channel.fire_inbound(chat_frame("hi"));
    assert_eq!(
        *log.lock().unwrap(),
        vec![("s1", false), ("s2", false), ("s3", true), ("s4", true)]
    );
    assert!(client.handler.ids().is_empty());
}

#[test]
fn failing_subscriber_does_not_block_the_packet() {
    let wiretap = wiretap_1_19();
    let client = Client::new("Alex");
    wiretap.attach(client.profile.clone(), &client.channel).unwrap();

    let after = Arc::new(AtomicUsize::new(0));
    wiretap
        .dispatcher()
        .subscribe_all("broken", |_e: &mut PacketEvent| -> anyhow::Result<()> {
            panic!("subscriber bug")
        });
    wiretap
        .dispatcher()
        .subscribe_all("erroring", |_e: &mut PacketEvent| anyhow::bail!("nope"));
    let counter = Arc::clone(&after);
    wiretap.dispatcher().subscribe_all("counter", move |_e| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    client.channel.fire_inbound(chat_frame("hi"));
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(client.handler.ids(), vec![CHAT_1_19]);
    assert_eq!(wiretap.dispatcher().subscriber_count(), 3);
}

#[test]
fn subscriber_rewrites_are_forwarded() {
    let wiretap = wiretap_1_19();
    let client = Client::new("Alex");
    wiretap.attach(client.profile.clone(), &client.channel).unwrap();

    wiretap
        .dispatcher()
        .listen("shout")
        .filter(inbound("ChatMessage"))
        .try_consume(|e| {
            let loud = e
                .field("message")
                .and_then(|m| m.as_str().map(str::to_uppercase))
                .unwrap_or_default();
            e.packet_mut().set("message", FieldValue::String(loud))?;
            Ok(())
        });

    client.channel.fire_inbound(chat_frame("quiet"));
    let received = client.handler.received.lock().unwrap();
    assert_eq!(received[0], chat_frame("QUIET"));
}

#[test]
fn outbound_packets_can_be_cancelled() {
    let wiretap = wiretap_1_19();
    let mut client = Client::new("Alex");
    wiretap.attach(client.profile.clone(), &client.channel).unwrap();

    wiretap
        .dispatcher()
        .listen("no-keepalive")
        .filter(outbound("KeepAlive"))
        .consume(|e| e.cancel());

    let chat = wiretap.message(&TextComponent::plain("hi"), false).unwrap();
    wiretap.send(
        &client.profile.uuid,
        vec![keep_alive(&wiretap, 1), chat, keep_alive(&wiretap, 2)],
    );
    let ids: Vec<i32> = client.written().iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![0x62]);
}

#[test]
fn unknown_packets_pass_through_as_unknown() {
    let wiretap = wiretap_1_19();
    let client = Client::new("Alex");
    wiretap.attach(client.profile.clone(), &client.channel).unwrap();

    let names = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&names);
    wiretap.dispatcher().subscribe_all("names", move |e| {
        seen.lock().unwrap().push(e.shape_name());
        Ok(())
    });

    client.channel.fire_inbound(Frame::new(0x7F, BytesMut::from(&b"??"[..])));
    let mut payload = BytesMut::new();
    payload.put_i64(99);
    client
        .channel
        .fire_inbound(Frame::new(KEEP_ALIVE_IN_1_19, payload));

    assert_eq!(*names.lock().unwrap(), vec!["Unknown", "KeepAlive"]);
    assert_eq!(client.handler.ids(), vec![0x7F, KEEP_ALIVE_IN_1_19]);
}

#[test]
fn broadcast_skips_disconnected_players() {
    let wiretap = wiretap_1_19();
    let mut online = Client::new("Online");
    let mut gone = Client::new("Gone");
    wiretap.attach(online.profile.clone(), &online.channel).unwrap();
    wiretap.attach(gone.profile.clone(), &gone.channel).unwrap();

    gone.channel.close();
    assert_eq!(wiretap.online().len(), 1);

    wiretap.broadcast(vec![keep_alive(&wiretap, 5)]);
    assert_eq!(online.written().len(), 1);
    assert!(gone.written().is_empty());
}
