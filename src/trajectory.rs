use std::{fs::File, io::Read, path::Path};

use log::{debug, warn};

use crate::vehicle_link::{PositionNedYaw, VelocityNedYaw};

pub const TRAJECTORY_COLUMNS: [&str; 9] = [
    "time", "pos_n", "pos_e", "pos_d", "yaw", "vel_n", "vel_e", "vel_d", "yaw_rate",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    /// Mission time in seconds
    pub t: f64,
    pub position: PositionNedYaw,
    pub velocity: VelocityNedYaw,
}

impl Waypoint {
    fn from_row(row: &[f64; 9]) -> Self {
        Self {
            t: row[0],
            position: PositionNedYaw {
                north_m: row[1],
                east_m: row[2],
                down_m: row[3],
                yaw_deg: row[4],
            },
            velocity: VelocityNedYaw {
                north_m_s: row[5],
                east_m_s: row[6],
                down_m_s: row[7],
                yaw_rate_deg_s: row[8],
            },
        }
    }

    fn values(&self) -> [f64; 9] {
        [
            self.t,
            self.position.north_m,
            self.position.east_m,
            self.position.down_m,
            self.position.yaw_deg,
            self.velocity.north_m_s,
            self.velocity.east_m_s,
            self.velocity.down_m_s,
            self.velocity.yaw_rate_deg_s,
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot open trajectory {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed trajectory: {0}")]
    Csv(#[from] csv::Error),

    #[error("trajectory has no waypoints")]
    Empty,

    #[error("row {row}: missing column {column}")]
    MissingField { row: usize, column: &'static str },

    #[error("row {row}: expected {expected} columns, found {found}")]
    TooManyFields {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("row {row}: column {column} is not a number: {value:?}")]
    InvalidNumber {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("row {row}: column {column} is not finite")]
    NonFinite { row: usize, column: &'static str },

    #[error("row {row}: time {current} is earlier than previous time {previous}")]
    Unsorted {
        row: usize,
        previous: f64,
        current: f64,
    },
}

/// Time-indexed waypoint table, immutable once loaded. Never empty.
#[derive(Debug, Clone)]
pub struct Trajectory {
    waypoints: Vec<Waypoint>,
}

impl Trajectory {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let trajectory = Self::from_reader(file)?;
        debug!(
            "Loaded {} waypoints spanning {:.2}s from {}",
            trajectory.len(),
            trajectory.duration(),
            path.display()
        );
        Ok(trajectory)
    }

    /// Reads a CSV with a header row and the columns of [`TRAJECTORY_COLUMNS`]
    /// in that order. Header names are not checked, only their count.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut waypoints = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            // 1-based, header is row 0
            let row = i + 1;
            if record.len() > TRAJECTORY_COLUMNS.len() {
                return Err(LoadError::TooManyFields {
                    row,
                    expected: TRAJECTORY_COLUMNS.len(),
                    found: record.len(),
                });
            }

            let mut values = [0.0f64; 9];
            for (column_index, column) in TRAJECTORY_COLUMNS.iter().enumerate() {
                let field = match record.get(column_index) {
                    Some(field) if !field.is_empty() => field,
                    _ => return Err(LoadError::MissingField { row, column }),
                };
                let value: f64 = field.parse().map_err(|_| LoadError::InvalidNumber {
                    row,
                    column,
                    value: field.to_string(),
                })?;
                values[column_index] = value;
            }
            waypoints.push(Waypoint::from_row(&values));
        }

        Self::from_waypoints(waypoints)
    }

    pub fn from_waypoints(waypoints: Vec<Waypoint>) -> Result<Self, LoadError> {
        if waypoints.is_empty() {
            return Err(LoadError::Empty);
        }

        for (i, waypoint) in waypoints.iter().enumerate() {
            let row = i + 1;
            for (value, column) in waypoint.values().iter().zip(TRAJECTORY_COLUMNS) {
                if !value.is_finite() {
                    return Err(LoadError::NonFinite { row, column });
                }
            }
            if i > 0 && waypoint.t < waypoints[i - 1].t {
                return Err(LoadError::Unsorted {
                    row,
                    previous: waypoints[i - 1].t,
                    current: waypoint.t,
                });
            }
        }

        if waypoints[0].t < 0.0 {
            warn!("Trajectory starts at negative time {}", waypoints[0].t);
        }

        Ok(Self { waypoints })
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&Waypoint> {
        self.waypoints.get(index)
    }

    /// Row 0, used to seed the offboard setpoint stream before playback.
    pub fn initial(&self) -> &Waypoint {
        &self.waypoints[0]
    }

    pub fn last(&self) -> &Waypoint {
        &self.waypoints[self.waypoints.len() - 1]
    }

    /// Timestamp of the last waypoint.
    pub fn duration(&self) -> f64 {
        self.last().t
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }
}

#[cfg(test)]
pub(crate) fn waypoint_at(t: f64, north: f64, north_speed: f64) -> Waypoint {
    Waypoint {
        t,
        position: PositionNedYaw {
            north_m: north,
            ..Default::default()
        },
        velocity: VelocityNedYaw {
            north_m_s: north_speed,
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HEADER: &str = "time,pos_n,pos_e,pos_d,yaw,vel_n,vel_e,vel_d,yaw_rate\n";

    fn parse(body: &str) -> Result<Trajectory, LoadError> {
        Trajectory::from_reader(format!("{}{}", HEADER, body).as_bytes())
    }

    #[test]
    fn load_square_fixture() {
        let trajectory = Trajectory::load("./test-trajectories/square.csv").unwrap();
        assert_eq!(trajectory.len(), 9);
        assert_eq!(trajectory.initial().t, 0.0);
        assert_eq!(trajectory.initial().position.down_m, -5.0);
        assert_eq!(trajectory.duration(), 8.0);
        assert!(trajectory
            .waypoints()
            .windows(2)
            .all(|pair| pair[0].t <= pair[1].t));
    }

    #[test]
    fn columns_map_to_position_and_velocity() {
        let trajectory = parse("1.5,1,2,-3,90,0.5,0.25,-0.125,10\n").unwrap();
        let waypoint = trajectory.at(0).unwrap();
        assert_eq!(waypoint.t, 1.5);
        assert_eq!(
            waypoint.position,
            PositionNedYaw {
                north_m: 1.0,
                east_m: 2.0,
                down_m: -3.0,
                yaw_deg: 90.0,
            }
        );
        assert_eq!(
            waypoint.velocity,
            VelocityNedYaw {
                north_m_s: 0.5,
                east_m_s: 0.25,
                down_m_s: -0.125,
                yaw_rate_deg_s: 10.0,
            }
        );
        assert!(trajectory.at(1).is_none());
    }

    #[test]
    fn equal_timestamps_are_allowed() {
        let trajectory = parse("0,0,0,0,0,0,0,0,0\n0,1,0,0,0,0,0,0,0\n").unwrap();
        assert_eq!(trajectory.len(), 2);
    }

    #[test]
    fn reject_unsorted() {
        let result = Trajectory::load("./test-trajectories/unsorted.csv");
        assert!(matches!(
            result,
            Err(LoadError::Unsorted {
                row: 3,
                previous,
                current,
            }) if previous == 2.0 && current == 1.0
        ));
    }

    #[test]
    fn reject_header_only() {
        assert!(matches!(parse(""), Err(LoadError::Empty)));
    }

    #[test]
    fn reject_missing_field() {
        assert!(matches!(
            parse("0,0,0,0,0,0,0,0\n"),
            Err(LoadError::MissingField {
                row: 1,
                column: "yaw_rate"
            })
        ));
        assert!(matches!(
            parse("0,0,0,,0,0,0,0,0\n"),
            Err(LoadError::MissingField {
                row: 1,
                column: "pos_d"
            })
        ));
    }

    #[test]
    fn reject_extra_field() {
        assert!(matches!(
            parse("0,0,0,0,0,0,0,0,0,7\n"),
            Err(LoadError::TooManyFields {
                row: 1,
                expected: 9,
                found: 10
            })
        ));
    }

    #[test]
    fn reject_non_numeric() {
        assert!(matches!(
            parse("0,0,0,0,0,0,0,0,0\n1,north,0,0,0,0,0,0,0\n"),
            Err(LoadError::InvalidNumber { row: 2, column: "pos_n", .. })
        ));
    }

    #[test]
    fn reject_non_finite() {
        assert!(matches!(
            parse("0,0,0,0,0,NaN,0,0,0\n"),
            Err(LoadError::NonFinite { row: 1, column: "vel_n" })
        ));
    }

    #[test]
    fn reject_missing_file() {
        assert!(matches!(
            Trajectory::load("./test-trajectories/does-not-exist.csv"),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn from_waypoints_validates() {
        assert!(matches!(
            Trajectory::from_waypoints(vec![]),
            Err(LoadError::Empty)
        ));
        assert!(matches!(
            Trajectory::from_waypoints(vec![waypoint_at(1.0, 0.0, 0.0), waypoint_at(0.5, 0.0, 0.0)]),
            Err(LoadError::Unsorted { row: 2, .. })
        ));
    }
}
