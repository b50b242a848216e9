use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use model::PixelRect;
use serde::{Deserialize, Serialize};

/// Traversal order of the tiles inside each device queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileOrder {
    #[default]
    Center,
    RightToLeft,
    LeftToRight,
    TopToBottom,
    BottomToTop,
    HilbertSpiral,
}

impl TileOrder {
    pub const ALL: [TileOrder; 6] = [
        TileOrder::Center,
        TileOrder::RightToLeft,
        TileOrder::LeftToRight,
        TileOrder::TopToBottom,
        TileOrder::BottomToTop,
        TileOrder::HilbertSpiral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TileOrder::Center => "center",
            TileOrder::RightToLeft => "right_to_left",
            TileOrder::LeftToRight => "left_to_right",
            TileOrder::TopToBottom => "top_to_bottom",
            TileOrder::BottomToTop => "bottom_to_top",
            TileOrder::HilbertSpiral => "hilbert_spiral",
        }
    }

    /// Rows are generated bottom-up already, so a bucket in that order needs no sorting.
    pub(crate) fn needs_sort(self) -> bool {
        !matches!(self, TileOrder::BottomToTop | TileOrder::HilbertSpiral)
    }

    /// Ordering of two tiles inside a bucket. `center` is the image center in pixels.
    pub(crate) fn compare(self, center: (u32, u32), a: &PixelRect, b: &PixelRect) -> Ordering {
        match self {
            TileOrder::Center => {
                center_distance_squared(center, a).cmp(&center_distance_squared(center, b))
            }
            TileOrder::LeftToRight => a.x.cmp(&b.x).then(a.y.cmp(&b.y)),
            TileOrder::RightToLeft => b.x.cmp(&a.x).then(a.y.cmp(&b.y)),
            TileOrder::TopToBottom => b.y.cmp(&a.y).then(a.x.cmp(&b.x)),
            TileOrder::BottomToTop | TileOrder::HilbertSpiral => {
                a.y.cmp(&b.y).then(a.x.cmp(&b.x))
            }
        }
    }
}

fn center_distance_squared(center: (u32, u32), rect: &PixelRect) -> i64 {
    let dx = i64::from(center.0) - i64::from(rect.x + rect.width / 2);
    let dy = i64::from(center.1) - i64::from(rect.y + rect.height / 2);
    dx * dx + dy * dy
}

impl fmt::Display for TileOrder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTileOrderError {
    input: String,
}

impl fmt::Display for ParseTileOrderError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "unknown tile order `{}`, expected one of ", self.input)?;
        for (position, order) in TileOrder::ALL.iter().enumerate() {
            if position > 0 {
                formatter.write_str(", ")?;
            }
            formatter.write_str(order.as_str())?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseTileOrderError {}

impl FromStr for TileOrder {
    type Err = ParseTileOrderError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_lowercase().replace('-', "_");
        TileOrder::ALL
            .into_iter()
            .find(|order| order.as_str() == normalized)
            .ok_or_else(|| ParseTileOrderError {
                input: input.to_owned(),
            })
    }
}
