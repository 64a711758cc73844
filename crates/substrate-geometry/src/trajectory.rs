//! Trajectory decimation: capping a physicality's point sequence at 16
//! evenly spaced samples, per `spec.md` §3 "Trajectory cap".

use crate::point::Vec4;

/// Maximum number of points a stored trajectory may carry.
pub const MAX_TRAJECTORY_POINTS: usize = 16;

/// If `points` has 16 or fewer entries, return it unchanged. Otherwise
/// return exactly 16 points, indexed by `floor(i * (n-1) / 15)` for
/// `i = 0..16`, so the result always starts at the first point and ends at
/// the last.
pub fn decimate(points: &[Vec4]) -> Vec<Vec4> {
    let n = points.len();
    if n <= MAX_TRAJECTORY_POINTS {
        return points.to_vec();
    }
    (0..MAX_TRAJECTORY_POINTS)
        .map(|i| {
            let idx = (i * (n - 1)) / (MAX_TRAJECTORY_POINTS - 1);
            points[idx]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_trajectory_is_unchanged() {
        let pts = vec![Vec4::new(1.0, 0.0, 0.0, 0.0), Vec4::new(0.0, 1.0, 0.0, 0.0)];
        assert_eq!(decimate(&pts), pts);
    }

    #[test]
    fn exactly_sixteen_is_unchanged() {
        let pts: Vec<Vec4> = (0..16)
            .map(|i| Vec4::new(i as f64, 0.0, 0.0, 0.0))
            .collect();
        assert_eq!(decimate(&pts).len(), 16);
        assert_eq!(decimate(&pts), pts);
    }

    #[test]
    fn long_trajectory_decimates_to_sixteen() {
        let pts: Vec<Vec4> = (0..100)
            .map(|i| Vec4::new(i as f64, 0.0, 0.0, 0.0))
            .collect();
        let d = decimate(&pts);
        assert_eq!(d.len(), 16);
        assert_eq!(d[0], pts[0]);
        assert_eq!(d[15], pts[99]);
    }

    #[test]
    fn decimation_indices_are_monotone_nondecreasing() {
        let pts: Vec<Vec4> = (0..1000)
            .map(|i| Vec4::new(i as f64, 0.0, 0.0, 0.0))
            .collect();
        let d = decimate(&pts);
        for pair in d.windows(2) {
            assert!(pair[0].x <= pair[1].x);
        }
    }
}
