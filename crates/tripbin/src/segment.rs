//! Cutting flat point streams into trajectories.
//!
//! A new trajectory starts when the entity id changes, or (when occupancy is
//! tracked) when the occupied flag flips. Both checks look only at the
//! previous point, so one cab produces a record per ride and per idle stretch.

use std::collections::VecDeque;

use crate::error::Result;
use crate::format::{Point, Trajectory};
use crate::time::WeekClock;

#[derive(Debug, Default)]
pub struct Segmenter {
    split_on_occupancy: bool,
    current: Option<Trajectory>,
}

impl Segmenter {
    pub fn new(split_on_occupancy: bool) -> Self {
        Self {
            split_on_occupancy,
            current: None,
        }
    }

    /// Feed the next point. Returns the trajectory this point closed, if any.
    pub fn push(&mut self, id: u32, point: Point) -> Option<Trajectory> {
        if let Some(current) = self.current.as_mut() {
            let same_state = !self.split_on_occupancy
                || current
                    .points
                    .last()
                    .map_or(true, |last| last.occupied == point.occupied);

            if current.id == Some(id) && same_state {
                current.points.push(point);
                return None;
            }
        }

        self.current.replace(Trajectory::new(Some(id), vec![point]))
    }

    /// Close the open trajectory at end of input.
    pub fn flush(&mut self) -> Option<Trajectory> {
        self.current.take()
    }
}

/// Segment a whole in-memory point stream.
pub fn segment<I>(points: I, split_on_occupancy: bool) -> Vec<Trajectory>
where
    I: IntoIterator<Item = (u32, Point)>,
{
    let mut segmenter = Segmenter::new(split_on_occupancy);
    let mut out: Vec<Trajectory> = points
        .into_iter()
        .filter_map(|(id, point)| segmenter.push(id, point))
        .collect();
    out.extend(segmenter.flush());
    out
}

/// One continuous state of one entity, as the renderer sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub id: Option<u32>,
    pub occupied: bool,
    pub points: Vec<Point>,
}

impl Trip {
    pub fn start_timestamp(&self) -> f64 {
        self.points.first().map_or(0.0, |p| p.timestamp)
    }

    pub fn time_of_day(&self, clock: &WeekClock) -> u32 {
        clock.time_of_day(self.start_timestamp() as u32)
    }

    pub fn is_weekday(&self, clock: &WeekClock) -> bool {
        clock.is_weekday(self.start_timestamp() as u32)
    }
}

impl From<Trajectory> for Trip {
    fn from(trajectory: Trajectory) -> Self {
        Self {
            id: trajectory.id,
            occupied: trajectory.points.first().is_some_and(|p| p.occupied),
            points: trajectory.points,
        }
    }
}

/// Re-segments decoded records into trips.
///
/// Records with an id are merged or split on id/occupancy boundaries, even
/// across record boundaries. Records without an id are already one trip each.
pub struct Trips<I> {
    records: I,
    segmenter: Segmenter,
    ready: VecDeque<Trip>,
    done: bool,
}

impl<I> Trips<I>
where
    I: Iterator<Item = Result<Trajectory>>,
{
    pub fn new(records: I, split_on_occupancy: bool) -> Self {
        Self {
            records,
            segmenter: Segmenter::new(split_on_occupancy),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<I> Iterator for Trips<I>
where
    I: Iterator<Item = Result<Trajectory>>,
{
    type Item = Result<Trip>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(trip) = self.ready.pop_front() {
                return Some(Ok(trip));
            }
            if self.done {
                return None;
            }

            match self.records.next() {
                None => {
                    self.done = true;
                    self.ready.extend(self.segmenter.flush().map(Trip::from));
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                Some(Ok(trajectory)) => match trajectory.id {
                    None => {
                        self.ready.extend(self.segmenter.flush().map(Trip::from));
                        self.ready.push_back(trajectory.into());
                    }
                    Some(id) => {
                        for point in trajectory.points {
                            if let Some(closed) = self.segmenter.push(id, point) {
                                self.ready.push_back(closed.into());
                            }
                        }
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::format::{decode, RecordLayout};

    fn pt(t: f64, occupied: bool) -> Point {
        Point::new(t, [t, t]).with_occupied(occupied)
    }

    #[test]
    fn splits_on_id_and_occupancy() {
        let stream = vec![
            (1, pt(0.0, true)),
            (1, pt(1.0, true)),
            (1, pt(2.0, false)),
            (2, pt(3.0, false)),
            (2, pt(4.0, false)),
        ];
        let records = segment(stream, true);
        let counts: Vec<_> = records.iter().map(|r| r.points.len()).collect();
        assert_eq!(counts, vec![2, 1, 2]);
        assert_eq!(records[1].id, Some(1));
        assert_eq!(records[2].id, Some(2));
    }

    #[test]
    fn ignores_occupancy_when_not_tracked() {
        let stream = vec![(1, pt(0.0, true)), (1, pt(1.0, false)), (2, pt(2.0, false))];
        let counts: Vec<_> = segment(stream, false)
            .iter()
            .map(|r| r.points.len())
            .collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[test]
    fn returning_id_starts_a_new_record() {
        let stream = vec![(1, pt(0.0, true)), (2, pt(1.0, true)), (1, pt(2.0, true))];
        assert_eq!(segment(stream, true).len(), 3);
    }

    #[test]
    fn trips_follow_state_across_records() {
        let layout = RecordLayout::CAB_V1;
        let mut floats = Vec::new();
        // One cab record holding a ride and an idle stretch.
        Trajectory::new(Some(3), vec![pt(0.0, true), pt(1.0, true), pt(2.0, false)])
            .encode_into(&layout, &mut floats)
            .unwrap();
        // Same cab, same state: continues the idle trip.
        Trajectory::new(Some(3), vec![pt(3.0, false)])
            .encode_into(&layout, &mut floats)
            .unwrap();

        let trips: Vec<Trip> = Trips::new(decode(&floats, &layout), true)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(trips.len(), 2);
        assert!(trips[0].occupied);
        assert_eq!(trips[0].points.len(), 2);
        assert!(!trips[1].occupied);
        assert_eq!(trips[1].points.len(), 2);
        assert_eq!(trips[1].start_timestamp(), 2.0);
    }

    #[test]
    fn anonymous_records_stay_whole() {
        let layout = RecordLayout::TRIPS;
        let mut floats = Vec::new();
        for _ in 0..3 {
            Trajectory::new(None, vec![pt(0.0, false), pt(1.0, false)])
                .encode_into(&layout, &mut floats)
                .unwrap();
        }
        let trips: Vec<Trip> = Trips::new(decode(&floats, &layout), true)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(trips.len(), 3);
        assert!(trips.iter().all(|t| t.id.is_none() && t.points.len() == 2));
    }

    #[test]
    fn decode_errors_end_the_sequence() {
        let floats = [1.0_f32, 9.0];
        let mut trips = Trips::new(decode(&floats, &RecordLayout::POINTS), false);
        assert!(matches!(trips.next(), Some(Err(Error::Truncated { .. }))));
        assert!(trips.next().is_none());
    }

    #[test]
    fn trip_time_helpers() {
        let clock = WeekClock::default();
        let trip = Trip::from(Trajectory::new(Some(1), vec![pt(5.0 * 1440.0 + 30.0, true)]));
        assert_eq!(trip.time_of_day(&clock), 30);
        assert!(!trip.is_weekday(&clock));
    }
}
