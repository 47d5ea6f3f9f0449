//! Concentration field storage.

use super::BackendError;

/// The U and V concentration fields of one grid.
///
/// Data is stored row-major: `idx = y * width + x`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcentrationFields {
    /// Grid width (X dimension).
    pub width: usize,
    /// Grid height (Y dimension).
    pub height: usize,
    /// Substrate concentration.
    pub u: Vec<f32>,
    /// Activator concentration.
    pub v: Vec<f32>,
}

impl ConcentrationFields {
    /// Allocate both fields filled with constant values.
    ///
    /// Allocation failure is reported instead of aborting.
    pub fn try_filled(width: usize, height: usize, u: f32, v: f32) -> Result<Self, BackendError> {
        let len = width
            .checked_mul(height)
            .ok_or_else(|| BackendError::Allocation {
                bytes: usize::MAX,
                reason: format!("grid {width}x{height} overflows usize"),
            })?;
        Ok(Self {
            width,
            height,
            u: try_filled_vec(len, u)?,
            v: try_filled_vec(len, v)?,
        })
    }

    /// Get total grid size (width * height).
    #[inline]
    pub fn grid_size(&self) -> usize {
        self.width * self.height
    }

    /// Convert (x, y) coordinates to flat index.
    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// Get (u, v) at (x, y).
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> (f32, f32) {
        let i = self.idx(x, y);
        (self.u[i], self.v[i])
    }

    /// Set (u, v) at (x, y).
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, u: f32, v: f32) {
        let i = self.idx(x, y);
        self.u[i] = u;
        self.v[i] = v;
    }
}

/// Allocate a vector of `len` copies of `value`, reporting allocation failure.
pub(crate) fn try_filled_vec(len: usize, value: f32) -> Result<Vec<f32>, BackendError> {
    let bytes = len.saturating_mul(std::mem::size_of::<f32>());
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| BackendError::Allocation {
        bytes,
        reason: e.to_string(),
    })?;
    data.resize(len, value);
    Ok(data)
}

/// Field statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SimulationStats {
    pub min_u: f32,
    pub max_u: f32,
    pub mean_u: f32,
    pub min_v: f32,
    pub max_v: f32,
    pub mean_v: f32,
    /// True when no value is NaN or infinite.
    pub all_finite: bool,
}

impl SimulationStats {
    /// Compute statistics from fields.
    pub fn from_fields(fields: &ConcentrationFields) -> Self {
        let (min_u, max_u, mean_u, finite_u) = summarize(&fields.u);
        let (min_v, max_v, mean_v, finite_v) = summarize(&fields.v);
        Self {
            min_u,
            max_u,
            mean_u,
            min_v,
            max_v,
            mean_v,
            all_finite: finite_u && finite_v,
        }
    }

    /// Check that every value lies in `[lo, hi]`.
    pub fn within(&self, lo: f32, hi: f32) -> bool {
        self.all_finite
            && self.min_u >= lo
            && self.min_v >= lo
            && self.max_u <= hi
            && self.max_v <= hi
    }
}

fn summarize(values: &[f32]) -> (f32, f32, f32, bool) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    let mut finite = true;

    for &v in values {
        finite &= v.is_finite();
        min = min.min(v);
        max = max.max(v);
        sum += v as f64;
    }

    let mean = if values.is_empty() {
        0.0
    } else {
        (sum / values.len() as f64) as f32
    };
    (min, max, mean, finite)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_fields() {
        let fields = ConcentrationFields::try_filled(32, 16, 1.0, 0.0).unwrap();
        assert_eq!(fields.grid_size(), 512);
        assert_eq!(fields.u.len(), 512);
        assert!(fields.u.iter().all(|&u| u == 1.0));
        assert!(fields.v.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_row_major_indexing() {
        let mut fields = ConcentrationFields::try_filled(16, 16, 1.0, 0.0).unwrap();
        fields.set(3, 2, 0.5, 0.25);
        assert_eq!(fields.idx(3, 2), 35);
        assert_eq!(fields.u[35], 0.5);
        assert_eq!(fields.get(3, 2), (0.5, 0.25));
    }

    #[test]
    fn test_overflowing_grid_is_resource_error() {
        let result = ConcentrationFields::try_filled(usize::MAX, 2, 1.0, 0.0);
        assert!(matches!(result, Err(BackendError::Allocation { .. })));
    }

    #[test]
    fn test_stats() {
        let mut fields = ConcentrationFields::try_filled(16, 16, 1.0, 0.0).unwrap();
        fields.set(0, 0, 0.5, 0.25);
        let stats = SimulationStats::from_fields(&fields);
        assert_eq!(stats.min_u, 0.5);
        assert_eq!(stats.max_u, 1.0);
        assert_eq!(stats.max_v, 0.25);
        assert!(stats.all_finite);
        assert!(stats.within(0.0, 1.0));

        fields.set(1, 1, f32::NAN, 0.0);
        let stats = SimulationStats::from_fields(&fields);
        assert!(!stats.all_finite);
        assert!(!stats.within(-1.0, 2.0));
    }

    #[test]
    fn test_stats_serialize_to_json() {
        let fields = ConcentrationFields::try_filled(16, 16, 1.0, 0.0).unwrap();
        let stats = SimulationStats::from_fields(&fields);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["mean_u"], 1.0);
        assert_eq!(json["max_v"], 0.0);
        assert_eq!(json["all_finite"], true);

        let parsed: SimulationStats = serde_json::from_value(json).unwrap();
        assert!(parsed.within(0.0, 1.0));
    }
}
