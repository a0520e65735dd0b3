use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Height of a standing player's eyes above their feet.
pub const EYE_HEIGHT: f64 = 1.62;

/// A 3D position with double precision.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Distance on the horizontal (x/z) plane, ignoring height.
    pub fn horizontal_distance(&self, other: &Vec3d) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

/// A position plus view direction, as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub position: Vec3d,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn new(position: Vec3d, yaw: f32, pitch: f32) -> Self {
        Self {
            position,
            yaw,
            pitch,
        }
    }

    /// The location of the eyes for a player standing at this location.
    pub fn eye(&self) -> Location {
        Location {
            position: Vec3d::new(
                self.position.x,
                self.position.y + EYE_HEIGHT,
                self.position.z,
            ),
            ..*self
        }
    }
}

/// A player's identity (UUID + name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameProfile {
    pub uuid: Uuid,
    pub name: String,
}

impl GameProfile {
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for GameProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}

/// Text component for chat messages (simplified JSON text).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextComponent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub extra: Vec<TextComponent>,
}

impl TextComponent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
            bold: None,
            extra: Vec::new(),
        }
    }

    pub fn colored(text: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            color: Some(color.into()),
            ..Self::plain(text)
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"text":""}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizontal_distance_ignores_height() {
        let a = Vec3d::new(0.0, 64.0, 0.0);
        let b = Vec3d::new(3.0, 10.0, 4.0);
        assert_eq!(a.horizontal_distance(&b), 5.0);
    }

    #[test]
    fn test_eye_location() {
        let loc = Location::new(Vec3d::new(1.0, 60.0, 1.0), 90.0, -10.0);
        let eye = loc.eye();
        assert!((eye.position.y - 61.62).abs() < 1e-9);
        assert_eq!(eye.yaw, 90.0);
        assert_eq!(eye.pitch, -10.0);
    }

    #[test]
    fn test_text_component_json() {
        let json = TextComponent::colored("hi", "red").to_json();
        assert_eq!(json, r#"{"text":"hi","color":"red"}"#);
    }
}
