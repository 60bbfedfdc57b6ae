//! Running per-column statistics, computed in the same pass as encoding.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{DataType, Value};

/// A scalar for single-float columns, an array for vectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Numeric {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Numeric {
    fn from_components(components: &[f64]) -> Self {
        match components {
            [single] => Numeric::Scalar(*single),
            many => Numeric::Vector(many.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Counts {
    Numeric {
        nonnull: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        sum: Option<Numeric>,
    },
    /// Value -> occurrences, for strings and booleans.
    Histogram(BTreeMap<String, u64>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub counts: Counts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extent: Option<[Numeric; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<Numeric>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Numeric {
        nonnull: u64,
        sum: Vec<f64>,
        min: Vec<f64>,
        max: Vec<f64>,
    },
    Histogram(BTreeMap<String, u64>),
}

impl Accumulator {
    pub fn new(data_type: DataType) -> Self {
        if data_type.is_numeric() {
            let width = data_type.width();
            Accumulator::Numeric {
                nonnull: 0,
                sum: vec![0.0; width],
                min: vec![f64::INFINITY; width],
                max: vec![f64::NEG_INFINITY; width],
            }
        } else {
            Accumulator::Histogram(BTreeMap::new())
        }
    }

    /// Fold in one non-null value. The caller has already checked its type.
    pub fn observe(&mut self, value: &Value) {
        match self {
            Accumulator::Numeric {
                nonnull,
                sum,
                min,
                max,
            } => {
                let seconds;
                let components = match value.unix_seconds() {
                    Some(s) => {
                        seconds = [s as f64];
                        &seconds[..]
                    }
                    None => value.components().unwrap_or_default(),
                };

                *nonnull += 1;
                for (i, &v) in components.iter().enumerate() {
                    sum[i] += v;
                    min[i] = min[i].min(v);
                    max[i] = max[i].max(v);
                }
            }
            Accumulator::Histogram(counts) => {
                let key = match value {
                    Value::String(s) => s.clone(),
                    Value::Boolean(b) => b.to_string(),
                    other => format!("{other:?}"),
                };
                *counts.entry(key).or_insert(0) += 1;
            }
        }
    }

    pub fn nonnull(&self) -> u64 {
        match self {
            Accumulator::Numeric { nonnull, .. } => *nonnull,
            Accumulator::Histogram(counts) => counts.values().sum(),
        }
    }

    /// Derive the final statistics, including the mean.
    pub fn finish(&self) -> ColumnStats {
        match self {
            Accumulator::Numeric {
                nonnull,
                sum,
                min,
                max,
            } => {
                if *nonnull == 0 {
                    return ColumnStats {
                        counts: Counts::Numeric {
                            nonnull: 0,
                            sum: None,
                        },
                        extent: None,
                        mean: None,
                    };
                }

                let n = *nonnull as f64;
                let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
                ColumnStats {
                    counts: Counts::Numeric {
                        nonnull: *nonnull,
                        sum: Some(Numeric::from_components(sum)),
                    },
                    extent: Some([Numeric::from_components(min), Numeric::from_components(max)]),
                    mean: Some(Numeric::from_components(&mean)),
                }
            }
            Accumulator::Histogram(counts) => ColumnStats {
                counts: Counts::Histogram(counts.clone()),
                extent: None,
                mean: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn scalar_stats() {
        let mut acc = Accumulator::new(DataType::Float);
        for v in [4.0, -2.0, 10.0] {
            acc.observe(&Value::Float(v));
        }
        let stats = acc.finish();
        assert_eq!(
            stats.counts,
            Counts::Numeric {
                nonnull: 3,
                sum: Some(Numeric::Scalar(12.0))
            }
        );
        assert_eq!(
            stats.extent,
            Some([Numeric::Scalar(-2.0), Numeric::Scalar(10.0)])
        );
        assert_eq!(stats.mean, Some(Numeric::Scalar(4.0)));
    }

    #[test]
    fn vector_stats_are_componentwise() {
        let mut acc = Accumulator::new(DataType::Vec2);
        acc.observe(&Value::Vec2([1.0, 8.0]));
        acc.observe(&Value::Vec2([3.0, 2.0]));
        let stats = acc.finish();
        assert_eq!(
            stats.extent,
            Some([
                Numeric::Vector(vec![1.0, 2.0]),
                Numeric::Vector(vec![3.0, 8.0])
            ])
        );
        assert_eq!(stats.mean, Some(Numeric::Vector(vec![2.0, 5.0])));
    }

    #[test]
    fn datetimes_aggregate_as_seconds() {
        let mut acc = Accumulator::new(DataType::Datetime);
        acc.observe(&Value::Datetime(Utc.timestamp_opt(100, 0).unwrap()));
        acc.observe(&Value::Datetime(Utc.timestamp_opt(300, 0).unwrap()));
        assert_eq!(acc.finish().mean, Some(Numeric::Scalar(200.0)));
    }

    #[test]
    fn strings_and_booleans_keep_histograms() {
        let mut acc = Accumulator::new(DataType::String);
        for s in ["b", "a", "b"] {
            acc.observe(&Value::String(s.into()));
        }
        assert_eq!(acc.nonnull(), 3);
        let stats = acc.finish();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json, serde_json::json!({ "counts": { "a": 1, "b": 2 } }));

        let mut flags = Accumulator::new(DataType::Boolean);
        flags.observe(&Value::Boolean(true));
        let json = serde_json::to_value(flags.finish()).unwrap();
        assert_eq!(json["counts"]["true"], 1);
    }

    #[test]
    fn numeric_json_shape() {
        let mut acc = Accumulator::new(DataType::Float);
        acc.observe(&Value::Float(10.0));
        let json = serde_json::to_value(acc.finish()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "counts": { "nonnull": 1, "sum": 10.0 },
                "extent": [10.0, 10.0],
                "mean": 10.0
            })
        );
    }
}
