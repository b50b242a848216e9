use serde::Serialize;

/// Pixel samples finished so far against the session estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub completed_pixel_samples: u64,
    pub total_pixel_samples: u64,
    /// `None` while the total is indeterminate (unlimited samples).
    pub fraction: Option<f64>,
}

impl Progress {
    pub fn new(completed_pixel_samples: u64, total_pixel_samples: u64) -> Self {
        let fraction = (total_pixel_samples > 0).then(|| {
            (completed_pixel_samples as f64 / total_pixel_samples as f64).min(1.0)
        });
        Self {
            completed_pixel_samples,
            total_pixel_samples,
            fraction,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.fraction.is_none()
    }
}
