use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pixel budget for the first progressive pass, expressed as an edge length.
///
/// Serialized as a plain number or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub enum ResolutionLimit {
    Limited(u32),
    Unlimited,
}

impl Default for ResolutionLimit {
    fn default() -> Self {
        ResolutionLimit::Limited(64)
    }
}

const UNLIMITED: &str = "unlimited";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Edge(u32),
    Keyword(String),
}

impl TryFrom<LimitRepr> for ResolutionLimit {
    type Error = String;

    fn try_from(repr: LimitRepr) -> Result<Self, Self::Error> {
        match repr {
            LimitRepr::Edge(edge) => Ok(ResolutionLimit::Limited(edge)),
            LimitRepr::Keyword(keyword) => keyword.parse(),
        }
    }
}

impl From<ResolutionLimit> for LimitRepr {
    fn from(limit: ResolutionLimit) -> Self {
        match limit {
            ResolutionLimit::Limited(edge) => LimitRepr::Edge(edge),
            ResolutionLimit::Unlimited => LimitRepr::Keyword(UNLIMITED.to_owned()),
        }
    }
}

impl FromStr for ResolutionLimit {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.eq_ignore_ascii_case(UNLIMITED) {
            return Ok(ResolutionLimit::Unlimited);
        }
        input
            .parse()
            .map(ResolutionLimit::Limited)
            .map_err(|_| format!("expected a resolution edge or `{UNLIMITED}`, got `{input}`"))
    }
}

impl fmt::Display for ResolutionLimit {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionLimit::Limited(edge) => write!(formatter, "{edge}"),
            ResolutionLimit::Unlimited => formatter.write_str(UNLIMITED),
        }
    }
}

/// Smallest power-of-two divider that brings `width * height` within `start_resolution^2`.
///
/// Halved extents are clamped to one pixel, so the loop always terminates. An unlimited
/// start resolution never reduces the image.
pub fn compute_divider(width: u32, height: u32, start_resolution: ResolutionLimit) -> u32 {
    let ResolutionLimit::Limited(start_resolution) = start_resolution else {
        return 1;
    };
    let edge = u64::from(start_resolution.max(1));
    let budget = edge * edge;

    let mut width = u64::from(width);
    let mut height = u64::from(height);
    let mut divider = 1u32;
    while width * height > budget {
        width = (width / 2).max(1);
        height = (height / 2).max(1);
        divider <<= 1;
    }
    divider
}

/// Divider used by the first progressive step after a reset.
///
/// One level finer than the budget allows, since the viewport usually still shows the
/// previous, already refined image.
pub fn first_progressive_divider(divider: u32, pixel_size: u32) -> u32 {
    (divider / 2).max(pixel_size)
}
