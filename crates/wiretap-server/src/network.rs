use crate::config::ServerConfig;
use crate::tick::TickMessage;
use anyhow::Result;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use wiretap::{Channel, ChannelHandler, Frame, GameProfile, TextComponent, Wiretap, PACKET_HANDLER};
use wiretap_protocol_core::{
    ensure_remaining, read_string, read_varint, write_string, write_varint, ConnectionState,
    Transport,
};

// Handshake, status and login packet ids
const HANDSHAKE: i32 = 0x00;
const STATUS_REQUEST: i32 = 0x00;
const STATUS_RESPONSE: i32 = 0x00;
const PING: i32 = 0x01;
const LOGIN_START: i32 = 0x00;
const LOGIN_DISCONNECT: i32 = 0x00;
const SET_COMPRESSION: i32 = 0x03;

/// Hands frames that survived interception to the tick loop. Installed under
/// [`PACKET_HANDLER`], so the interceptor splices in ahead of it.
pub struct TickForwarder {
    player: Uuid,
    tick_tx: mpsc::UnboundedSender<TickMessage>,
}

impl TickForwarder {
    pub fn new(player: Uuid, tick_tx: mpsc::UnboundedSender<TickMessage>) -> Self {
        Self { player, tick_tx }
    }
}

impl ChannelHandler for TickForwarder {
    fn inbound(&self, frame: Frame) -> Option<Frame> {
        let message = TickMessage::Packet {
            player: self.player,
            frame,
        };
        if self.tick_tx.send(message).is_err() {
            trace!("Tick loop gone, dropping inbound frame");
        }
        None
    }
}

/// Handle a single client connection through handshake and status or login.
/// A successful login continues in play state until the socket closes.
pub async fn handle_connection(
    stream: TcpStream,
    config: Arc<ServerConfig>,
    wiretap: Arc<Wiretap>,
    tick_tx: mpsc::UnboundedSender<TickMessage>,
    player_count_fn: impl Fn() -> usize,
) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            debug!("Dropping connection without a peer address: {}", e);
            return;
        }
    };
    let mut transport = Transport::new(stream);

    let result = match handle_pre_play(&mut transport, &config, &wiretap, peer, &player_count_fn).await {
        Ok(Some((profile, protocol))) => {
            enter_play(transport, peer, protocol, profile, wiretap, tick_tx).await
        }
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        debug!("Connection {} ended: {}", peer, e);
    }
}

/// Returns the logged-in profile and protocol version, or `None` when the exchange
/// ended before play state.
async fn handle_pre_play(
    transport: &mut Transport,
    config: &ServerConfig,
    wiretap: &Wiretap,
    peer: SocketAddr,
    player_count_fn: &impl Fn() -> usize,
) -> Result<Option<(GameProfile, i32)>> {
    // === Handshake ===
    let mut frame = transport.read_frame().await?;
    if frame.id != HANDSHAKE {
        return Err(anyhow::anyhow!("Expected handshake, got 0x{:02X}", frame.id));
    }
    let data = &mut frame.payload;
    let protocol_version = read_varint(data)?;
    let address = read_string(data, 255)?;
    ensure_remaining(&*data, 2)?;
    let port = data.get_u16();
    let next_state = read_varint(data)?;
    debug!(
        "Handshake from {}: protocol={}, address={}:{}, next_state={}",
        peer, protocol_version, address, port, next_state
    );

    match ConnectionState::from_handshake_next(next_state) {
        Some(ConnectionState::Status) => {
            handle_status(transport, config, wiretap, player_count_fn).await?;
            Ok(None)
        }
        Some(ConnectionState::Login) => {
            let expected = wiretap.adapter().protocol_version();
            if protocol_version != expected {
                warn!(
                    "Client {} has protocol version {}, expected {}",
                    peer, protocol_version, expected
                );
                let reason = TextComponent::plain(format!(
                    "This server runs {} (protocol {})",
                    wiretap.version(),
                    expected
                ));
                transport
                    .write_frame(&Frame::new(LOGIN_DISCONNECT, string_payload(&reason.to_json())))
                    .await?;
                return Ok(None);
            }
            let profile = handle_login(transport, config, wiretap).await?;
            Ok(Some((profile, protocol_version)))
        }
        _ => Err(anyhow::anyhow!("Invalid next state: {}", next_state)),
    }
}

async fn handle_status(
    transport: &mut Transport,
    config: &ServerConfig,
    wiretap: &Wiretap,
    player_count_fn: &impl Fn() -> usize,
) -> Result<()> {
    loop {
        let frame = transport.read_frame().await?;
        match frame.id {
            STATUS_REQUEST => {
                let response_json = format!(
                    r#"{{"version":{{"name":"{}","protocol":{}}},"players":{{"max":{},"online":{}}},"description":{}}}"#,
                    wiretap.version(),
                    wiretap.adapter().protocol_version(),
                    config.max_players,
                    player_count_fn(),
                    TextComponent::plain(config.motd.as_str()).to_json()
                );
                transport
                    .write_frame(&Frame::new(STATUS_RESPONSE, string_payload(&response_json)))
                    .await?;
            }
            PING => {
                // Echo the payload back and hang up
                transport.write_frame(&Frame::new(PING, frame.payload)).await?;
                return Ok(());
            }
            other => debug!("Ignoring status packet id=0x{:02X}", other),
        }
    }
}

async fn handle_login(
    transport: &mut Transport,
    config: &ServerConfig,
    wiretap: &Wiretap,
) -> Result<GameProfile> {
    let mut frame = transport.read_frame().await?;
    if frame.id != LOGIN_START {
        return Err(anyhow::anyhow!("Expected Login Start, got 0x{:02X}", frame.id));
    }
    let name = read_string(&mut frame.payload, 16)?;
    info!("Login Start from: {}", name);

    if let Some(threshold) = config.compression_threshold {
        let mut payload = BytesMut::new();
        write_varint(&mut payload, threshold);
        transport
            .write_frame(&Frame::new(SET_COMPRESSION, payload))
            .await?;
        transport.enable_compression(threshold);
    }

    let profile = GameProfile::new(offline_uuid(&name), name);
    transport
        .write_frame(&wiretap.adapter().login_success(&profile))
        .await?;
    Ok(profile)
}

/// Move into play state: build the connection's channel, attach it for interception
/// and pump frames until either side goes away.
async fn enter_play(
    transport: Transport,
    peer: SocketAddr,
    protocol: i32,
    profile: GameProfile,
    wiretap: Arc<Wiretap>,
    tick_tx: mpsc::UnboundedSender<TickMessage>,
) -> Result<()> {
    let player = profile.uuid;
    let player_name = profile.name.clone();

    // Channel: pipeline -> writer task (outbound frames)
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let channel = Channel::new(Some(peer), protocol, out_tx);
    channel.pipeline().add_last(
        PACKET_HANDLER,
        Arc::new(TickForwarder::new(player, tick_tx.clone())),
    )?;

    let connection = wiretap.attach(profile, &channel)?;
    let joined = TickMessage::Joined {
        connection: Arc::clone(&connection),
    };
    if tick_tx.send(joined).is_err() {
        wiretap.detach_connection(&connection);
        return Err(anyhow::anyhow!("Tick loop is not running"));
    }

    let (mut reader, mut writer) = transport.into_split();

    // Writer task: drains the channel's queue until the channel closes
    let writer_name = player_name.clone();
    let mut writer_handle = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                debug!("Writer error for {}: {}", writer_name, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    // Reader: every frame goes through the pipeline, interceptor first
    let mut writer_done = false;
    loop {
        tokio::select! {
            result = reader.read_frame() => match result {
                // A newer login for this player replaced the session
                Ok(_) if !connection.is_live() => break,
                Ok(frame) => channel.fire_inbound(frame),
                Err(e) => {
                    debug!("Reader error for {}: {}", player_name, e);
                    break;
                }
            },
            _ = &mut writer_handle => {
                writer_done = true;
                break;
            }
        }
    }

    wiretap.detach_connection(&connection);
    channel.close();
    let _ = tick_tx.send(TickMessage::Left { connection });
    if !writer_done {
        let _ = writer_handle.await;
    }
    info!("{} disconnected", player_name);
    Ok(())
}

fn string_payload(s: &str) -> BytesMut {
    let mut payload = BytesMut::new();
    write_string(&mut payload, s);
    payload
}

/// Generate an offline-mode UUID from a player name.
pub fn offline_uuid(name: &str) -> Uuid {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let input = format!("OfflinePlayer:{}", name);
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    let h1 = hasher.finish();
    input.len().hash(&mut hasher);
    let h2 = hasher.finish();
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&h1.to_be_bytes());
    bytes[8..].copy_from_slice(&h2.to_be_bytes());
    bytes[6] = (bytes[6] & 0x0f) | 0x30;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}
