use std::fmt;
use std::str::FromStr;

use model::{BufferParams, ResolutionLimit, compute_divider, first_progressive_divider};
use serde::{Deserialize, Serialize};

const UNLIMITED: &str = "unlimited";

/// Requested samples per pixel. Serialized as a number or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SampleLimitRepr", into = "SampleLimitRepr")]
pub enum SampleLimit {
    Finite(u32),
    Unlimited,
}

impl SampleLimit {
    /// Sample count used in step arithmetic. Unlimited counts as `u32::MAX`.
    pub fn count(self) -> u32 {
        match self {
            SampleLimit::Finite(count) => count,
            SampleLimit::Unlimited => u32::MAX,
        }
    }

    pub fn is_unlimited(self) -> bool {
        self == SampleLimit::Unlimited
    }
}

impl Default for SampleLimit {
    fn default() -> Self {
        SampleLimit::Finite(16)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SampleLimitRepr {
    Count(u32),
    Keyword(String),
}

impl TryFrom<SampleLimitRepr> for SampleLimit {
    type Error = String;

    fn try_from(repr: SampleLimitRepr) -> Result<Self, Self::Error> {
        match repr {
            SampleLimitRepr::Count(count) => Ok(SampleLimit::Finite(count)),
            SampleLimitRepr::Keyword(keyword) => keyword.parse(),
        }
    }
}

impl From<SampleLimit> for SampleLimitRepr {
    fn from(limit: SampleLimit) -> Self {
        match limit {
            SampleLimit::Finite(count) => SampleLimitRepr::Count(count),
            SampleLimit::Unlimited => SampleLimitRepr::Keyword(UNLIMITED.to_owned()),
        }
    }
}

impl FromStr for SampleLimit {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.eq_ignore_ascii_case(UNLIMITED) {
            return Ok(SampleLimit::Unlimited);
        }
        input
            .parse()
            .map(SampleLimit::Finite)
            .map_err(|_| format!("expected a sample count or `{UNLIMITED}`, got `{input}`"))
    }
}

impl fmt::Display for SampleLimit {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleLimit::Finite(count) => write!(formatter, "{count}"),
            SampleLimit::Unlimited => formatter.write_str(UNLIMITED),
        }
    }
}

/// Sub-range `[start, start + num)` of samples to render, for partial re-renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRange {
    pub start: u32,
    pub num: u32,
}

impl SampleRange {
    pub fn end(self) -> i64 {
        i64::from(self.start) + i64::from(self.num)
    }
}

/// Sample target of a session together with its optional sub-range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleBudget {
    pub samples: SampleLimit,
    pub range: Option<SampleRange>,
}

impl SampleBudget {
    pub fn effective_samples(&self) -> u32 {
        match self.range {
            Some(range) => range.num,
            None => self.samples.count(),
        }
    }

    pub fn range_start(&self) -> i64 {
        self.range.map_or(0, |range| i64::from(range.start))
    }

    /// Sample index at which the session is complete.
    pub fn end_sample(&self) -> i64 {
        match self.range {
            Some(range) => range.end(),
            None => i64::from(self.samples.count()),
        }
    }

    /// Samples rendered by one full resolution step.
    pub fn step_samples(&self, progressive: bool) -> u32 {
        if progressive {
            1
        } else {
            self.effective_samples()
        }
    }

    /// Estimated pixel samples of the whole session, `0` when the sample count is unlimited.
    ///
    /// Progressive sessions render one sample per pixel for every coarse step above
    /// `pixel_size`, then the effective sample count at `pixel_size`. Scheduled denoising adds
    /// one pass over the step's buffer per step: once for an offline session, once per coarse
    /// step and per sample for a progressive one.
    pub fn total_pixel_samples(
        &self,
        params: &BufferParams,
        start_resolution: ResolutionLimit,
        pixel_size: u32,
        progressive: bool,
        schedule_denoising: bool,
    ) -> u64 {
        if self.samples.is_unlimited() {
            return 0;
        }

        // Pixel samples plus the denoise pass of one step rendering one sample per pixel.
        let step_work = |pixels: u64| {
            if schedule_denoising {
                pixels.saturating_mul(2)
            } else {
                pixels
            }
        };

        let mut total = 0u64;
        if progressive {
            let initial = compute_divider(params.width, params.height, start_resolution);
            let mut divider = first_progressive_divider(initial, pixel_size);
            while divider > pixel_size {
                total = total.saturating_add(step_work(params.divided(divider).pixel_count()));
                divider >>= 1;
            }
        }

        let full = params.divided(pixel_size).pixel_count();
        let samples = u64::from(self.effective_samples());
        if progressive {
            total = total.saturating_add(samples.saturating_mul(step_work(full)));
        } else {
            total = total.saturating_add(samples.saturating_mul(full));
            if schedule_denoising {
                total = total.saturating_add(full);
            }
        }
        total
    }
}
