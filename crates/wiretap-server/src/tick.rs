use crate::config::ServerConfig;
use crate::ecs::*;
use dashmap::DashMap;
use hecs::{Entity, World};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use wiretap::{Connection, Direction, FieldValue, Frame, Packet, Wiretap};
use wiretap_scheduler::SyncQueue;
use wiretap_types::{Location, TextComponent};

/// Last known location per online player, readable off the tick thread.
pub type LocationCache = Arc<DashMap<Uuid, Location>>;

/// Messages from connection tasks to the tick loop.
#[derive(Debug)]
pub enum TickMessage {
    /// A player finished logging in and has been attached.
    Joined { connection: Arc<Connection> },
    /// An inbound frame that made it through the interceptor.
    Packet { player: Uuid, frame: Frame },
    /// The socket behind this connection closed. A newer login for the same player
    /// is left alone.
    Left { connection: Arc<Connection> },
}

/// Tick-thread state. Sync tasks receive it mutably.
pub struct TickContext {
    pub world: World,
    pub wiretap: Arc<Wiretap>,
    pub locations: LocationCache,
    next_entity_id: i32,
}

impl TickContext {
    pub fn new(wiretap: Arc<Wiretap>, locations: LocationCache) -> Self {
        Self {
            world: World::new(),
            wiretap,
            locations,
            next_entity_id: 1,
        }
    }

    pub fn find_player(&self, player: &Uuid) -> Option<Entity> {
        self.world
            .query::<&Profile>()
            .iter()
            .find(|(_, profile)| profile.0.uuid == *player)
            .map(|(entity, _)| entity)
    }

    /// Send a chat line to a player the tick loop still knows. Returns false otherwise.
    pub fn tell(&self, player: &Uuid, text: TextComponent) -> bool {
        let Some(entity) = self.find_player(player) else {
            return false;
        };
        let Ok(session) = self.world.get::<&Session>(entity) else {
            return false;
        };
        match self.wiretap.message(&text, false) {
            Ok(packet) => {
                self.wiretap.send_to(&session.0, vec![packet]);
                true
            }
            Err(e) => {
                warn!("Could not build chat message: {}", e);
                false
            }
        }
    }

    pub fn player_count(&self) -> usize {
        self.world.query::<&Profile>().iter().count()
    }
}

/// The main loop. Runs at 20 TPS and owns the hecs World.
pub async fn run_tick_loop(
    config: Arc<ServerConfig>,
    mut ctx: TickContext,
    mut tick_rx: mpsc::UnboundedReceiver<TickMessage>,
    mut sync_queue: SyncQueue<TickContext>,
    player_count: Arc<AtomicUsize>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let tick_duration = Duration::from_millis(50); // 20 TPS
    let mut tick_count: u64 = 0;

    info!("Tick loop started (20 TPS)");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let tick_start = Instant::now();

        // 1. Joins, packets and leaves from connection tasks
        while let Ok(message) = tick_rx.try_recv() {
            match message {
                TickMessage::Joined { connection } => handle_join(&mut ctx, connection),
                TickMessage::Packet { player, frame } => process_packet(&mut ctx, &player, frame),
                TickMessage::Left { connection } => handle_leave(&mut ctx, &connection),
            }
        }

        // 2. Work handed over by subscribers
        sync_queue.run_pending(&mut ctx);

        // 3. Tick systems
        tick_keep_alive(&config, &mut ctx, tick_count);
        player_count.store(ctx.player_count(), Ordering::Relaxed);

        tick_count += 1;

        let elapsed = tick_start.elapsed();
        if elapsed < tick_duration {
            tokio::time::sleep(tick_duration - elapsed).await;
        } else if tick_count % 100 == 0 {
            warn!("Tick {} took {:?} (over 50ms budget)", tick_count, elapsed);
        }
    }

    ctx.wiretap.shutdown();
    info!("Tick loop stopped after {} ticks", tick_count);
}

fn find_session(ctx: &TickContext, connection: &Arc<Connection>) -> Option<Entity> {
    ctx.world
        .query::<&Session>()
        .iter()
        .find(|(_, session)| Arc::ptr_eq(&session.0, connection))
        .map(|(entity, _)| entity)
}

pub(crate) fn handle_join(ctx: &mut TickContext, connection: Arc<Connection>) {
    let profile = connection.profile().clone();
    // Relogin: the previous session's entity goes away now
    if let Some(stale) = ctx.find_player(&profile.uuid) {
        let _ = ctx.world.despawn(stale);
        debug!("Replaced the entity of {}", profile.name);
    }

    let entity_id = ctx.next_entity_id;
    ctx.next_entity_id += 1;

    ctx.world.spawn((
        EntityId(entity_id),
        Profile(profile.clone()),
        Session(connection),
        PlayerLocation(Location::default()),
        KeepAlive::new(),
    ));
    info!("{} joined (entity {})", profile.name, entity_id);

    ctx.tell(
        &profile.uuid,
        TextComponent::colored(format!("Welcome, {}!", profile.name), "gold"),
    );
}

pub(crate) fn handle_leave(ctx: &mut TickContext, connection: &Arc<Connection>) {
    let Some(entity) = find_session(ctx, connection) else {
        trace!("{} already replaced", connection.profile().name);
        return;
    };
    ctx.locations.remove(&connection.profile().uuid);
    let _ = ctx.world.despawn(entity);
    info!("{} left", connection.profile().name);
}

pub(crate) fn process_packet(ctx: &mut TickContext, player: &Uuid, frame: Frame) {
    let Some(entity) = ctx.find_player(player) else {
        trace!("Packet for unknown player {}", player);
        return;
    };
    let packet = ctx
        .wiretap
        .adapter()
        .shapes()
        .classify(Direction::Inbound, frame);

    match packet.name() {
        "KeepAlive" => {
            let Some(id) = packet.field("id").and_then(|v| v.as_i64()) else {
                return;
            };
            if let Ok(mut ka) = ctx.world.get::<&mut KeepAlive>(entity) {
                if ka.pending == Some(id) {
                    ka.pending = None;
                    trace!("Keep-alive answered after {:?}", ka.last_sent.elapsed());
                }
            }
        }
        "PlayerPosition" | "PlayerPositionAndRotation" | "PlayerRotation" => {
            let location = match ctx.world.get::<&mut PlayerLocation>(entity) {
                Ok(mut current) => {
                    apply_movement(&mut current.0, &packet);
                    current.0
                }
                Err(_) => return,
            };
            ctx.locations.insert(*player, location);
        }
        other => trace!("Ignoring inbound {} (0x{:02X})", other, packet.id()),
    }
}

fn apply_movement(location: &mut Location, packet: &Packet) {
    let double = |name| packet.field(name).and_then(|v| v.as_f64());
    if let (Some(x), Some(y), Some(z)) = (double("x"), double("y"), double("z")) {
        location.position.x = x;
        location.position.y = y;
        location.position.z = z;
    }
    if let (Some(yaw), Some(pitch)) = (double("yaw"), double("pitch")) {
        location.yaw = yaw as f32;
        location.pitch = pitch as f32;
    }
}

/// Every keep-alive interval: players who did not answer the previous keep-alive are
/// disconnected, everyone else gets a new one.
pub(crate) fn tick_keep_alive(config: &ServerConfig, ctx: &mut TickContext, tick_count: u64) {
    if tick_count == 0 || tick_count % config.keep_alive_ticks() != 0 {
        return;
    }

    let now = Instant::now();
    for (_e, (profile, session, ka)) in ctx
        .world
        .query::<(&Profile, &Session, &mut KeepAlive)>()
        .iter()
    {
        if ka.pending.is_some() {
            info!(
                "{} missed a keep-alive sent {:?} ago, disconnecting",
                profile.0.name,
                now.duration_since(ka.last_sent)
            );
            kick(&ctx.wiretap, &session.0, "Timed out");
            continue;
        }

        let id: i64 = rand::random();
        match ctx
            .wiretap
            .packet("KeepAlive", &[("id", FieldValue::Long(id))])
        {
            Ok(packet) => {
                ctx.wiretap.send_to(&session.0, vec![packet]);
                ka.pending = Some(id);
                ka.last_sent = now;
            }
            Err(e) => warn!("Could not build keep-alive: {}", e),
        }
    }
}

/// Send a disconnect and close the channel. The connection task cleans up after the
/// socket winds down.
fn kick(wiretap: &Wiretap, connection: &Connection, reason: &str) {
    let reason = TextComponent::plain(reason).to_json();
    match wiretap.packet("Disconnect", &[("reason", FieldValue::String(reason))]) {
        Ok(packet) => wiretap.send_to(connection, vec![packet]),
        Err(e) => warn!("Could not build disconnect: {}", e),
    }
    if let Some(channel) = connection.channel() {
        channel.close();
    }
    debug!("Kicked {}", connection.profile().name);
}
