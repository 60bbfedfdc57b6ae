//! Smoothed direction of travel.
//!
//! The direction at point `i` points from `i` toward the average of the next
//! `k = min(remaining - 1, lookahead)` positions. Angles are in `[0, 2π)`.
//! When that vector has no length (last point, or no net movement) the
//! direction is [`NO_DIRECTION`]; consumers treat it as "no direction", never
//! as an angle.

use std::f64::consts::TAU;

/// Sentinel for "stationary / undefined".
pub const NO_DIRECTION: f32 = -1.0;

pub const DEFAULT_LOOKAHEAD: usize = 1;

/// Direction at `positions[i]`. Panics if `i` is out of bounds.
pub fn direction_at(positions: &[[f64; 2]], i: usize, lookahead: usize) -> f32 {
    let here = positions[i];
    let k = (positions.len() - i - 1).min(lookahead);

    let target = if k == 0 {
        here
    } else {
        let weight = 1.0 / k as f64;
        positions[i + 1..=i + k]
            .iter()
            .fold([0.0, 0.0], |acc, p| {
                [acc[0] + p[0] * weight, acc[1] + p[1] * weight]
            })
    };

    let dx = target[0] - here[0];
    let dy = target[1] - here[1];
    if dx.hypot(dy) < f64::EPSILON {
        return NO_DIRECTION;
    }

    let mut radians = dy.atan2(dx);
    if radians < 0.0 {
        radians += TAU;
    }

    // Angles a hair under 2π round up to 2π in f32.
    let radians = radians as f32;
    if radians >= std::f32::consts::TAU {
        0.0
    } else {
        radians
    }
}

/// Directions for a whole trajectory, one per position.
pub fn directions(positions: &[[f64; 2]], lookahead: usize) -> Vec<f32> {
    (0..positions.len())
        .map(|i| direction_at(positions, i, lookahead))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn cardinal_directions() {
        let east = [[0.0, 0.0], [1.0, 0.0]];
        let north = [[0.0, 0.0], [0.0, 1.0]];
        let west = [[0.0, 0.0], [-1.0, 0.0]];
        let south = [[0.0, 0.0], [0.0, -1.0]];

        assert!(close(direction_at(&east, 0, 1), 0.0));
        assert!(close(direction_at(&north, 0, 1), FRAC_PI_2));
        assert!(close(direction_at(&west, 0, 1), PI));
        assert!(close(direction_at(&south, 0, 1), 3.0 * FRAC_PI_2));
    }

    #[test]
    fn last_point_has_no_direction() {
        let path = [[0.0, 0.0], [1.0, 1.0]];
        assert_eq!(direction_at(&path, 1, 1), NO_DIRECTION);
    }

    #[test]
    fn stationary_points_have_no_direction() {
        let path = [[5.0, 5.0], [5.0, 5.0], [5.0, 5.0]];
        assert!(directions(&path, 1).iter().all(|&d| d == NO_DIRECTION));
    }

    #[test]
    fn lookahead_averages_the_next_points() {
        // The next two points average to (1, 0), straight east.
        let path = [[0.0, 0.0], [1.0, 1.0], [1.0, -1.0]];
        assert!(close(direction_at(&path, 0, 2), 0.0));
        assert!(close(direction_at(&path, 0, 1), PI / 4.0));
        // Lookahead is clipped at the end of the path.
        assert!(close(direction_at(&path, 1, 5), 3.0 * FRAC_PI_2));
    }

    #[test]
    fn zero_net_displacement_over_window_is_undefined() {
        // Out and back: the two-point average is the start itself.
        let path = [[0.0, 0.0], [1.0, 0.0], [-1.0, 0.0]];
        assert_eq!(direction_at(&path, 0, 2), NO_DIRECTION);
    }

    #[test]
    fn defined_angles_stay_in_range() {
        let mut path = Vec::new();
        for step in 0..720 {
            let t = step as f64 * 0.5_f64.to_radians();
            path.push([t.cos() * 0.01, t.sin() * 0.01]);
        }
        for lookahead in 1..4 {
            for d in directions(&path, lookahead) {
                assert!(d == NO_DIRECTION || (0.0..std::f32::consts::TAU).contains(&d));
            }
        }
    }
}
