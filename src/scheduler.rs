use std::time::Duration;

use log::{info, trace, warn};
use tokio::time::MissedTickBehavior;

use crate::abort::AbortSignal;
use crate::setpoint_log::SetpointCsvWriter;
use crate::trajectory::{Trajectory, Waypoint};
use crate::vehicle_link::{LinkError, PositionNedYaw, VehicleLink, VelocityNedYaw};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointCommand {
    pub position: PositionNedYaw,
    pub velocity: VelocityNedYaw,
}

impl From<&Waypoint> for SetpointCommand {
    fn from(waypoint: &Waypoint) -> Self {
        Self {
            position: waypoint.position,
            velocity: waypoint.velocity,
        }
    }
}

/// One emission: which waypoint was sent at which mission time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackTick {
    pub tick: u64,
    pub elapsed: f64,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSummary {
    pub ticks: u64,
    /// Mission time at completion
    pub elapsed: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("trajectory is empty")]
    EmptyTrajectory,

    #[error("tick interval must be positive, got {0:?}")]
    InvalidTickInterval(Duration),

    #[error("setpoint for tick {tick} not sent: {source}")]
    Setpoint { tick: u64, source: LinkError },

    #[error("aborted by operator after tick {tick}")]
    Aborted { tick: u64 },
}

/// Index into the trajectory plus elapsed mission time.
///
/// Elapsed time is `ticks * tick_interval` rather than a running sum so long
/// playbacks do not drift.
#[derive(Debug, Clone)]
pub struct PlaybackCursor {
    index: usize,
    ticks: u64,
    tick_interval_s: f64,
}

impl PlaybackCursor {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            index: 0,
            ticks: 0,
            tick_interval_s: tick_interval.as_secs_f64(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn elapsed(&self) -> f64 {
        self.ticks as f64 * self.tick_interval_s
    }

    pub fn is_exhausted(&self, trajectory: &Trajectory) -> bool {
        self.index >= trajectory.len()
    }

    /// Waypoint to emit on the current tick, `None` once exhausted.
    pub fn waypoint<'t>(&self, trajectory: &'t Trajectory) -> Option<&'t Waypoint> {
        trajectory.at(self.index)
    }

    pub fn current_tick(&self) -> PlaybackTick {
        PlaybackTick {
            tick: self.ticks,
            elapsed: self.elapsed(),
            index: self.index,
        }
    }

    /// Accounts for one tick interval, then skips every waypoint whose
    /// timestamp is strictly behind the new elapsed time.
    pub fn advance(&mut self, trajectory: &Trajectory) {
        self.ticks += 1;
        let elapsed = self.elapsed();
        while let Some(waypoint) = trajectory.at(self.index) {
            if elapsed > waypoint.t {
                self.index += 1;
            } else {
                break;
            }
        }
    }
}

pub struct TrajectoryScheduler {
    tick_interval: Duration,
    recorder: Option<SetpointCsvWriter>,
}

impl TrajectoryScheduler {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: SetpointCsvWriter) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    fn check(&self, trajectory: &Trajectory) -> Result<(), PlaybackError> {
        if self.tick_interval.is_zero() {
            return Err(PlaybackError::InvalidTickInterval(self.tick_interval));
        }
        if trajectory.is_empty() {
            return Err(PlaybackError::EmptyTrajectory);
        }
        Ok(())
    }

    /// Every tick `run` would emit, computed without a link or a clock.
    pub fn plan(&self, trajectory: &Trajectory) -> Result<Vec<PlaybackTick>, PlaybackError> {
        self.check(trajectory)?;
        let mut cursor = PlaybackCursor::new(self.tick_interval);
        let mut ticks = Vec::new();
        while !cursor.is_exhausted(trajectory) {
            ticks.push(cursor.current_tick());
            cursor.advance(trajectory);
        }
        Ok(ticks)
    }

    /// Streams the trajectory to the vehicle. Must only be called while
    /// offboard control is active.
    pub async fn run<L: VehicleLink + ?Sized>(
        &mut self,
        link: &mut L,
        trajectory: &Trajectory,
        abort: &AbortSignal,
    ) -> Result<PlaybackSummary, PlaybackError> {
        self.check(trajectory)?;
        info!(
            "Performing trajectory: {} waypoints over {:.2}s, one setpoint every {:?}",
            trajectory.len(),
            trajectory.duration(),
            self.tick_interval
        );

        let mut cursor = PlaybackCursor::new(self.tick_interval);
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of an interval completes immediately
        interval.tick().await;

        while let Some(waypoint) = cursor.waypoint(trajectory) {
            let tick = cursor.current_tick();
            if abort.is_aborted() {
                return Err(PlaybackError::Aborted { tick: tick.tick });
            }

            let setpoint = SetpointCommand::from(waypoint);
            trace!(
                "tick {} t={:.3}s waypoint {} {:?}",
                tick.tick,
                tick.elapsed,
                tick.index,
                setpoint.position
            );
            link.offboard_set_position_velocity(setpoint.position, setpoint.velocity)
                .await
                .map_err(|source| PlaybackError::Setpoint {
                    tick: tick.tick,
                    source,
                })?;
            self.record(&tick, waypoint);

            tokio::select! {
                biased;
                _ = abort.triggered() => return Err(PlaybackError::Aborted { tick: tick.tick }),
                _ = interval.tick() => {}
            }

            cursor.advance(trajectory);
        }

        self.flush_recorder();
        info!(
            "-- Finished trajectory after {} ticks ({:.2}s)",
            cursor.ticks(),
            cursor.elapsed()
        );
        Ok(PlaybackSummary {
            ticks: cursor.ticks(),
            elapsed: cursor.elapsed(),
        })
    }

    fn record(&mut self, tick: &PlaybackTick, waypoint: &Waypoint) {
        if let Some(recorder) = &mut self.recorder {
            if let Err(e) = recorder.write(tick, waypoint) {
                // losing the log must not interrupt the setpoint stream
                warn!("Setpoint recorder failed, recording disabled: {:?}", e);
                self.recorder = None;
            }
        }
    }

    fn flush_recorder(&mut self) {
        if let Some(recorder) = &mut self.recorder {
            if let Err(e) = recorder.flush() {
                warn!("Failed to flush setpoint recorder: {:?}", e);
            }
        }
    }
}

impl Drop for TrajectoryScheduler {
    fn drop(&mut self) {
        self.flush_recorder();
    }
}
