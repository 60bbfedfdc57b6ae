//! Fixed-capacity structure-of-arrays buffers for bulk upload.
//!
//! Each per-point field lives in its own contiguous array, all indexed by the
//! same point slot. Filling stops at capacity; whatever does not fit is
//! dropped without an error. Only whole points are ever written.

use log::debug;

use crate::segment::Trip;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillOrder {
    /// Trip after trip, until capacity runs out.
    #[default]
    Sequential,
    /// One point from each trip per pass, cycling until capacity runs out.
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripBuffers {
    capacity: usize,
    len: usize,
    dropped: usize,
    /// `[lng, lat]` pairs, `2 * capacity` floats.
    pub positions: Vec<f32>,
    pub directions: Vec<f32>,
    pub timestamps: Vec<f32>,
    pub occupancies: Vec<f32>,
    /// Point timestamp minus the first timestamp of its trip.
    pub trip_durations: Vec<f32>,
}

impl TripBuffers {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            len: 0,
            dropped: 0,
            positions: vec![0.0; capacity * 2],
            directions: vec![0.0; capacity],
            timestamps: vec![0.0; capacity],
            occupancies: vec![0.0; capacity],
            trip_durations: vec![0.0; capacity],
        }
    }

    pub fn fill(trips: &[Trip], capacity: usize, order: FillOrder) -> Self {
        let mut buffers = Self::with_capacity(capacity);
        match order {
            FillOrder::Sequential => buffers.fill_sequential(trips),
            FillOrder::RoundRobin => buffers.fill_round_robin(trips),
        }

        let total: usize = trips.iter().map(|t| t.points.len()).sum();
        buffers.dropped = total - buffers.len;
        if buffers.dropped > 0 {
            debug!(
                "capacity {} reached; {} of {} points not loaded",
                capacity, buffers.dropped, total
            );
        }
        buffers
    }

    fn fill_sequential(&mut self, trips: &[Trip]) {
        'trips: for trip in trips {
            for index in 0..trip.points.len() {
                if self.is_full() {
                    break 'trips;
                }
                self.push_point(trip, index);
            }
        }
    }

    fn fill_round_robin(&mut self, trips: &[Trip]) {
        let longest = trips.iter().map(|t| t.points.len()).max().unwrap_or(0);
        for index in 0..longest {
            for trip in trips.iter().filter(|t| index < t.points.len()) {
                if self.is_full() {
                    return;
                }
                self.push_point(trip, index);
            }
        }
    }

    fn push_point(&mut self, trip: &Trip, index: usize) {
        let point = &trip.points[index];
        let slot = self.len;

        self.positions[slot * 2] = point.position[0] as f32;
        self.positions[slot * 2 + 1] = point.position[1] as f32;
        self.directions[slot] = point.direction;
        self.timestamps[slot] = point.timestamp as f32;
        self.occupancies[slot] = if trip.occupied { 1.0 } else { 0.0 };
        self.trip_durations[slot] = (point.timestamp - trip.start_timestamp()) as f32;

        self.len += 1;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of filled point slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Points that did not fit.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
