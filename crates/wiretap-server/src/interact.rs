use crate::config::InteractTarget;
use wiretap_types::Location;

/// Decides which line of a stacked target a player clicked, from where their eyes are.
pub trait LineSelector: Send + Sync {
    fn select(&self, eye: &Location, target: &InteractTarget) -> Option<usize>;
}

/// Projects the player's line of sight onto the target's vertical axis and buckets the
/// hit height into fixed-size steps counted down from just above the top line.
pub struct StackedLines {
    pub step: f64,
}

impl StackedLines {
    pub fn new(step: f64) -> Self {
        Self { step }
    }
}

impl LineSelector for StackedLines {
    fn select(&self, eye: &Location, target: &InteractTarget) -> Option<usize> {
        let lines = target.lines.len();
        if lines == 0 || self.step <= 0.0 {
            return None;
        }

        let distance = eye.position.horizontal_distance(&target.position);
        let look_up = -(eye.pitch as f64);

        let top = (target.line_distance / 2.0) * (lines as f64 + 2.0) + target.position.y;
        let hit = distance * look_up.to_radians().tan() + eye.position.y;

        let index = ((top - hit) / self.step).ceil();
        if index < 0.0 || index >= lines as f64 {
            None
        } else {
            Some(index as usize)
        }
    }
}
