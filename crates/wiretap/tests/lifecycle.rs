use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;
use wiretap::*;

struct Sink;

impl ChannelHandler for Sink {}

fn channel(protocol: i32) -> (Arc<Channel>, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let channel = Channel::new(None, protocol, tx);
    channel
        .pipeline()
        .add_last(PACKET_HANDLER, Arc::new(Sink))
        .unwrap();
    (channel, rx)
}

fn profile(name: &str) -> GameProfile {
    GameProfile::new(Uuid::new_v4(), name)
}

fn names(channel: &Channel) -> Vec<String> {
    channel.pipeline().names()
}

#[test]
fn release_selects_matching_adapter() {
    let registry = AdapterRegistry::with_bindings(default_bindings()).unwrap();
    let resolved = |major, minor, patch| {
        registry
            .resolve(&VersionDescriptor::new(major, minor, patch))
            .map(|b| b.version())
    };
    assert_eq!(resolved(1, 19, 0).unwrap(), VersionDescriptor::new(1, 19, 0));
    assert_eq!(resolved(1, 19, 2).unwrap(), VersionDescriptor::new(1, 19, 0));
    assert_eq!(resolved(1, 15, 2).unwrap(), VersionDescriptor::new(1, 15, 0));
    assert!(matches!(
        resolved(1, 12, 2),
        Err(RegistryError::UnsupportedVersion(v)) if v == VersionDescriptor::new(1, 12, 2)
    ));

    let wiretap = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).unwrap();
    assert_eq!(wiretap.adapter().version(), VersionDescriptor::new(1, 19, 0));
    assert_eq!(wiretap.adapter().protocol_version(), 760);
}

#[test]
fn unsupported_release_fails_fast() {
    let err = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), Vec::new())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        WiretapError::Registry(RegistryError::UnsupportedVersion(v)) if v == VersionDescriptor::new(1, 19, 0)
    ));
}

#[test]
fn one_release_per_process() {
    let wiretap = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).unwrap();
    assert_eq!(VersionDescriptor::current(), Some(wiretap.version()));

    let err = Wiretap::initialize(VersionDescriptor::new(1, 15, 2), default_bindings())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        WiretapError::VersionMismatch { installed, requested }
            if installed == VersionDescriptor::new(1, 19, 0)
                && requested == VersionDescriptor::new(1, 15, 2)
    ));
    assert_eq!(VersionDescriptor::current(), Some(VersionDescriptor::new(1, 19, 0)));

    // The same release may be initialized again.
    assert!(Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).is_ok());
}

#[test]
fn register_and_unregister_are_idempotent() {
    let wiretap = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).unwrap();
    let (channel, _rx) = channel(760);
    let connection = wiretap.attach(profile("Alex"), &channel).unwrap();
    let adapter = wiretap.adapter();

    adapter.register(&connection);
    adapter.register(&connection);
    assert_eq!(names(&channel), vec![INTERCEPTOR_NAME, PACKET_HANDLER]);

    adapter.unregister(&connection);
    adapter.unregister(&connection);
    assert_eq!(names(&channel), vec![PACKET_HANDLER]);

    // A fresh splice after removal installs a new interceptor.
    adapter.register(&connection);
    assert_eq!(names(&channel), vec![INTERCEPTOR_NAME, PACKET_HANDLER]);
    assert!(connection.interceptor().is_some_and(|i| i.is_active()));
}

#[test]
fn non_live_connections_are_left_alone() {
    let wiretap = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).unwrap();
    let adapter = Arc::clone(wiretap.adapter());
    let (channel, mut rx) = channel(760);

    let connection = Connection::new(profile("Ghost"), &channel);
    connection.mark_disconnected();
    let keep_alive = wiretap
        .packet("KeepAlive", &[("id", FieldValue::Long(1))])
        .unwrap();

    adapter.register(&connection);
    adapter.send(&connection, vec![keep_alive]);
    adapter.unregister(&connection);

    assert_eq!(names(&channel), vec![PACKET_HANDLER]);
    assert!(rx.try_recv().is_err());
    assert!(!connection.is_intercepted());
}

#[test]
fn unregister_after_disconnect_returns_normally() {
    let wiretap = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).unwrap();
    wiretap
        .dispatcher()
        .subscribe_all("observer", |_e: &mut PacketEvent| Ok(()));
    let before = wiretap.dispatcher().subscriber_ids();

    let player = profile("Alex");
    let (channel, _rx) = channel(760);
    let connection = wiretap.attach(player.clone(), &channel).unwrap();

    drop(channel);
    assert!(!connection.is_live());

    wiretap.adapter().unregister(&connection);
    assert!(wiretap.detach(&player.uuid));
    assert!(!wiretap.detach(&player.uuid));
    assert_eq!(wiretap.dispatcher().subscriber_ids(), before);
}

#[test]
fn send_after_detach_is_a_no_op() {
    let wiretap = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).unwrap();
    let player = profile("Alex");
    let (channel, mut rx) = channel(760);
    let connection = wiretap.attach(player.clone(), &channel).unwrap();

    wiretap.detach(&player.uuid);
    assert!(!connection.is_live());
    assert_eq!(names(&channel), vec![PACKET_HANDLER]);

    let keep_alive = wiretap
        .packet("KeepAlive", &[("id", FieldValue::Long(3))])
        .unwrap();
    wiretap.send_to(&connection, vec![keep_alive.clone()]);
    wiretap.send(&player.uuid, vec![keep_alive]);
    assert!(rx.try_recv().is_err());
}

#[test]
fn reattach_replaces_stale_connection() {
    let wiretap = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).unwrap();
    let player = profile("Alex");
    let (first_channel, _first_rx) = channel(760);
    let (second_channel, _second_rx) = channel(760);

    let first = wiretap.attach(player.clone(), &first_channel).unwrap();
    let second = wiretap.attach(player.clone(), &second_channel).unwrap();

    assert!(!first.is_live());
    assert!(!first_channel.is_open());
    assert!(second.is_live());
    assert_eq!(names(&first_channel), vec![PACKET_HANDLER]);
    assert_eq!(names(&second_channel), vec![INTERCEPTOR_NAME, PACKET_HANDLER]);
    assert!(wiretap
        .connection(&player.uuid)
        .is_some_and(|c| Arc::ptr_eq(&c, &second)));
}

#[test]
fn old_session_teardown_keeps_the_new_one() {
    let wiretap = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).unwrap();
    let player = profile("Alex");
    let (old_channel, _old_rx) = channel(760);
    let (new_channel, mut new_rx) = channel(760);

    let old = wiretap.attach(player.clone(), &old_channel).unwrap();
    let new = wiretap.attach(player.clone(), &new_channel).unwrap();

    // The old socket's task notices the close and tears its session down late.
    assert!(!wiretap.detach_connection(&old));
    assert!(new.is_live());
    assert!(new.is_intercepted());
    assert_eq!(names(&new_channel), vec![INTERCEPTOR_NAME, PACKET_HANDLER]);
    assert!(wiretap
        .connection(&player.uuid)
        .is_some_and(|c| Arc::ptr_eq(&c, &new)));

    let keep_alive = wiretap
        .packet("KeepAlive", &[("id", FieldValue::Long(9))])
        .unwrap();
    let keep_alive_id = keep_alive.id();
    wiretap.send(&player.uuid, vec![keep_alive]);
    assert_eq!(new_rx.try_recv().unwrap().id, keep_alive_id);

    assert!(wiretap.detach_connection(&new));
    assert!(wiretap.connection(&player.uuid).is_none());
    assert_eq!(names(&new_channel), vec![PACKET_HANDLER]);
}

#[test]
fn shutdown_releases_every_connection() {
    let wiretap = Wiretap::initialize(VersionDescriptor::new(1, 19, 0), default_bindings()).unwrap();
    let clients: Vec<_> = (0..3).map(|_| channel(760)).collect();
    let connections: Vec<_> = clients
        .iter()
        .enumerate()
        .map(|(i, (ch, _))| wiretap.attach(profile(&format!("p{i}")), ch).unwrap())
        .collect();
    assert_eq!(wiretap.online().len(), 3);

    wiretap.shutdown();
    wiretap.shutdown();

    assert!(wiretap.online().is_empty());
    for ((channel, _), connection) in clients.iter().zip(&connections) {
        assert_eq!(names(channel), vec![PACKET_HANDLER]);
        assert!(!connection.is_live());
    }
    assert!(matches!(
        wiretap.attach(profile("late"), &clients[0].0),
        Err(WiretapError::ShutDown)
    ));
}
