//! Play-state packets of protocol 578 (1.15.2).

use wiretap_protocol_core::{field, FieldKind, PacketShape, ShapeTable};

pub const TELEPORT_CONFIRM: i32 = 0x00;
pub const CHAT_MESSAGE: i32 = 0x03;
pub const INTERACT_ENTITY: i32 = 0x0E;
pub const KEEP_ALIVE_IN: i32 = 0x0F;
pub const PLAYER_POSITION: i32 = 0x11;
pub const PLAYER_POSITION_AND_ROTATION: i32 = 0x12;
pub const PLAYER_ROTATION: i32 = 0x13;

pub const SYSTEM_CHAT: i32 = 0x0F;
pub const DISCONNECT: i32 = 0x1B;
pub const KEEP_ALIVE_OUT: i32 = 0x21;

pub const LOGIN_SUCCESS: i32 = 0x02;

/// Chat positions understood by 1.15 clients.
pub const POSITION_SYSTEM: i8 = 1;
pub const POSITION_ACTION_BAR: i8 = 2;

static TELEPORT_CONFIRM_SHAPE: PacketShape = PacketShape {
    name: "TeleportConfirm",
    fields: &[field("teleport_id", FieldKind::VarInt)],
};

static CHAT_MESSAGE_SHAPE: PacketShape = PacketShape {
    name: "ChatMessage",
    fields: &[field("message", FieldKind::String)],
};

static INTERACT_ENTITY_SHAPE: PacketShape = PacketShape {
    name: "InteractEntity",
    fields: &[
        field("entity_id", FieldKind::VarInt),
        field("action", FieldKind::VarInt),
    ],
};

static KEEP_ALIVE_SHAPE: PacketShape = PacketShape {
    name: "KeepAlive",
    fields: &[field("id", FieldKind::Long)],
};

static PLAYER_POSITION_SHAPE: PacketShape = PacketShape {
    name: "PlayerPosition",
    fields: &[
        field("x", FieldKind::Double),
        field("y", FieldKind::Double),
        field("z", FieldKind::Double),
        field("on_ground", FieldKind::Bool),
    ],
};

static PLAYER_POSITION_AND_ROTATION_SHAPE: PacketShape = PacketShape {
    name: "PlayerPositionAndRotation",
    fields: &[
        field("x", FieldKind::Double),
        field("y", FieldKind::Double),
        field("z", FieldKind::Double),
        field("yaw", FieldKind::Float),
        field("pitch", FieldKind::Float),
        field("on_ground", FieldKind::Bool),
    ],
};

static PLAYER_ROTATION_SHAPE: PacketShape = PacketShape {
    name: "PlayerRotation",
    fields: &[
        field("yaw", FieldKind::Float),
        field("pitch", FieldKind::Float),
        field("on_ground", FieldKind::Bool),
    ],
};

static DISCONNECT_SHAPE: PacketShape = PacketShape {
    name: "Disconnect",
    fields: &[field("reason", FieldKind::String)],
};

/// Clientbound chat; `position` picks chat box, system line or action bar.
static SYSTEM_CHAT_SHAPE: PacketShape = PacketShape {
    name: "SystemChat",
    fields: &[
        field("content", FieldKind::String),
        field("position", FieldKind::Byte),
    ],
};

pub static SHAPES: ShapeTable = ShapeTable::new(
    &[
        (TELEPORT_CONFIRM, &TELEPORT_CONFIRM_SHAPE),
        (CHAT_MESSAGE, &CHAT_MESSAGE_SHAPE),
        (INTERACT_ENTITY, &INTERACT_ENTITY_SHAPE),
        (KEEP_ALIVE_IN, &KEEP_ALIVE_SHAPE),
        (PLAYER_POSITION, &PLAYER_POSITION_SHAPE),
        (PLAYER_POSITION_AND_ROTATION, &PLAYER_POSITION_AND_ROTATION_SHAPE),
        (PLAYER_ROTATION, &PLAYER_ROTATION_SHAPE),
    ],
    &[
        (SYSTEM_CHAT, &SYSTEM_CHAT_SHAPE),
        (DISCONNECT, &DISCONNECT_SHAPE),
        (KEEP_ALIVE_OUT, &KEEP_ALIVE_SHAPE),
    ],
);
