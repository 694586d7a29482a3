use serde::{Deserialize, Serialize};

/// Stable identifier of a page, unaffected by reordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

/// Visual rotation of a page in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateDirection {
    Clockwise,
    CounterClockwise,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Normalize any multiple of 90 (negative values included) into a rotation.
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            _ => Some(Rotation::Deg270),
        }
    }

    pub fn rotated(self, direction: RotateDirection) -> Self {
        let delta = match direction {
            RotateDirection::Clockwise => 90,
            RotateDirection::CounterClockwise => -90,
        };
        Self::from_degrees(i64::from(self.degrees()) + delta).unwrap_or_default()
    }

    /// Whether width and height swap on screen
    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Rotation::from_degrees(i64::from(value))
            .ok_or_else(|| format!("rotation must be a multiple of 90, got {value}"))
    }
}

/// One page of the working document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: PageId,
    /// 1-based index of the page in the source document
    pub original_index: u32,
    #[serde(default)]
    pub rotation: Rotation,
}

impl Page {
    pub fn new(id: PageId, original_index: u32) -> Self {
        Self { id, original_index, rotation: Rotation::Deg0 }
    }
}
