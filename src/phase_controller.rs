use std::{future::Future, time::Duration};

use futures::{stream::BoxStream, StreamExt};
use log::{error, info, warn};

use crate::abort::AbortSignal;
use crate::config::MissionConfig;
use crate::flight_phase::{FlightPhase, Guard};
use crate::offboard_guard::{OffboardSessionGuard, OffboardTimeouts};
use crate::scheduler::{PlaybackError, PlaybackSummary, TrajectoryScheduler};
use crate::setpoint_log::SetpointCsvWriter;
use crate::trajectory::Trajectory;
use crate::vehicle_link::{ConnectionState, LandedState, LinkError, OffboardError, VehicleLink};

#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    #[error("{phase}: waiting for {guard} failed: {source}")]
    Link {
        phase: FlightPhase,
        guard: Guard,
        source: LinkError,
    },

    #[error("{phase}: timed out after {timeout:?} waiting for {guard}")]
    Timeout {
        phase: FlightPhase,
        guard: Guard,
        timeout: Duration,
    },

    #[error("{phase}: {source}")]
    Offboard {
        phase: FlightPhase,
        source: OffboardError,
    },

    #[error("{phase}: {source}")]
    Playback {
        phase: FlightPhase,
        source: PlaybackError,
    },

    #[error("{phase}: aborted by operator")]
    Aborted { phase: FlightPhase },
}

impl MissionError {
    /// Phase the controller was in when the error occurred.
    pub fn phase(&self) -> FlightPhase {
        match self {
            MissionError::Link { phase, .. }
            | MissionError::Timeout { phase, .. }
            | MissionError::Offboard { phase, .. }
            | MissionError::Playback { phase, .. }
            | MissionError::Aborted { phase } => *phase,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MissionReport {
    /// Every phase entered, starting with `Disconnected`
    pub phases: Vec<FlightPhase>,
    pub playback: PlaybackSummary,
}

/// Races `future` against the guard's timeout and the operator abort.
async fn guarded<T, F>(
    phase: FlightPhase,
    guard: Guard,
    timeout: Option<Duration>,
    abort: &AbortSignal,
    future: F,
) -> Result<T, MissionError>
where
    F: Future<Output = Result<T, MissionError>>,
{
    let bounded = async {
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, future).await {
                Ok(result) => result,
                Err(_) => Err(MissionError::Timeout {
                    phase,
                    guard,
                    timeout,
                }),
            },
            None => future.await,
        }
    };
    tokio::select! {
        biased;
        _ = abort.triggered() => Err(MissionError::Aborted { phase }),
        result = bounded => result,
    }
}

/// Consumes `stream` until `predicate` holds.
async fn wait_for<T>(
    phase: FlightPhase,
    guard: Guard,
    stream_name: &'static str,
    mut stream: BoxStream<'static, T>,
    predicate: impl Fn(&T) -> bool,
) -> Result<(), MissionError> {
    while let Some(value) = stream.next().await {
        if predicate(&value) {
            return Ok(());
        }
    }
    Err(MissionError::Link {
        phase,
        guard,
        source: LinkError::StreamClosed(stream_name),
    })
}

fn command_failed(phase: FlightPhase, guard: Guard) -> impl Fn(LinkError) -> MissionError {
    move |source| MissionError::Link {
        phase,
        guard,
        source,
    }
}

fn offboard_failed(phase: FlightPhase, guard: Guard) -> impl Fn(OffboardError) -> MissionError {
    move |source| match source {
        OffboardError::TimedOut { timeout, .. } => MissionError::Timeout {
            phase,
            guard,
            timeout,
        },
        OffboardError::Aborted { .. } => MissionError::Aborted { phase },
        source => MissionError::Offboard { phase, source },
    }
}

/// Walks one vehicle from `Disconnected` to `Disarmed`, or to `Aborted` on
/// the first failed guard.
pub struct PhaseController<L: VehicleLink> {
    link: L,
    config: MissionConfig,
    abort: AbortSignal,
    phase: FlightPhase,
    phases: Vec<FlightPhase>,
    offboard: OffboardSessionGuard,
    /// Set before the controller's own disarm goes out
    disarm_sent: bool,
    recorder: Option<SetpointCsvWriter>,
}

impl<L: VehicleLink> PhaseController<L> {
    pub fn new(link: L, config: MissionConfig, abort: AbortSignal) -> Self {
        let offboard = OffboardSessionGuard::new()
            .with_timeouts(OffboardTimeouts {
                start: config.guard_timeout(Guard::OffboardStarted),
                stop: config.guard_timeout(Guard::OffboardStopped),
                disarm: config.guard_timeout(Guard::DisarmAccepted),
            })
            .with_abort(abort.clone());
        Self {
            link,
            config,
            abort,
            phase: FlightPhase::Disconnected,
            phases: vec![FlightPhase::Disconnected],
            offboard,
            disarm_sent: false,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: SetpointCsvWriter) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn phases(&self) -> &[FlightPhase] {
        &self.phases
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Flies the whole mission. On error the controller ends in
    /// [`FlightPhase::Aborted`] after its safety actions.
    pub async fn run(
        &mut self,
        address: &str,
        trajectory: &Trajectory,
    ) -> Result<MissionReport, MissionError> {
        match self.fly(address, trajectory).await {
            Ok(playback) => Ok(MissionReport {
                phases: self.phases.clone(),
                playback,
            }),
            Err(e) => {
                self.abort_mission(&e).await;
                Err(e)
            }
        }
    }

    fn advance(&mut self, satisfied: Guard) {
        let from = self.phase;
        let Some(to) = from.successor() else {
            error!("No phase after {}, ignoring {}", from, satisfied);
            return;
        };
        debug_assert_eq!(from.exit_guard(), Some(satisfied));
        self.phase = to;
        self.phases.push(to);
        info!("-- {} -> {} ({})", from, to, satisfied);
    }

    async fn fly(
        &mut self,
        address: &str,
        trajectory: &Trajectory,
    ) -> Result<PlaybackSummary, MissionError> {
        let abort = self.abort.clone();

        info!("Connecting to the vehicle at {}...", address);
        let (phase, guard) = (self.phase, Guard::Connected);
        let link = &mut self.link;
        guarded(phase, guard, self.config.guard_timeout(guard), &abort, async {
            link.connect(address)
                .await
                .map_err(command_failed(phase, guard))?;
            let states = link.connection_state();
            wait_for(phase, guard, "connection state", states, |state| {
                *state == ConnectionState::Connected
            })
            .await
        })
        .await?;
        self.advance(guard);

        info!("Checking global position and home position...");
        let (phase, guard) = (self.phase, Guard::PositionOk);
        let health = self.link.health();
        guarded(
            phase,
            guard,
            self.config.guard_timeout(guard),
            &abort,
            wait_for(phase, guard, "health", health, |health| health.position_ok()),
        )
        .await?;
        self.advance(guard);

        info!("Arming...");
        let (phase, guard) = (self.phase, Guard::ArmAccepted);
        let link = &mut self.link;
        guarded(phase, guard, self.config.guard_timeout(guard), &abort, async {
            link.arm().await.map_err(command_failed(phase, guard))
        })
        .await?;
        self.advance(guard);

        info!("Taking off...");
        let (phase, guard) = (self.phase, Guard::InAir);
        let link = &mut self.link;
        guarded(phase, guard, self.config.guard_timeout(guard), &abort, async {
            link.takeoff().await.map_err(command_failed(phase, guard))?;
            let landed = link.landed_state();
            wait_for(phase, guard, "landed state", landed, |state| {
                *state == LandedState::InAir
            })
            .await
        })
        .await?;
        self.advance(guard);

        // the guard bounds its own request and never cuts its disarm short
        let (phase, guard) = (self.phase, Guard::OffboardStarted);
        self.offboard
            .enter(&mut self.link, trajectory.initial())
            .await
            .map_err(offboard_failed(phase, guard))?;
        self.advance(guard);

        let (phase, guard) = (self.phase, Guard::TrajectoryExhausted);
        let mut scheduler = TrajectoryScheduler::new(self.config.tick_interval());
        if let Some(recorder) = self.recorder.take() {
            scheduler = scheduler.with_recorder(recorder);
        }
        let link = &mut self.link;
        let playback = guarded(phase, guard, self.config.guard_timeout(guard), &abort, async {
            scheduler
                .run(&mut *link, trajectory, &abort)
                .await
                .map_err(|source| match source {
                    PlaybackError::Aborted { .. } => MissionError::Aborted { phase },
                    source => MissionError::Playback { phase, source },
                })
        })
        .await?;
        self.advance(guard);

        info!("Returning to launch...");
        let (phase, guard) = (self.phase, Guard::ReturnToLaunchAccepted);
        let link = &mut self.link;
        guarded(phase, guard, self.config.guard_timeout(guard), &abort, async {
            link.return_to_launch()
                .await
                .map_err(command_failed(phase, guard))
        })
        .await?;
        self.advance(guard);

        let (phase, guard) = (self.phase, Guard::OnGround);
        let landed = self.link.landed_state();
        guarded(
            phase,
            guard,
            self.config.guard_timeout(guard),
            &abort,
            wait_for(phase, guard, "landed state", landed, |state| {
                *state == LandedState::OnGround
            }),
        )
        .await?;
        self.advance(guard);

        let (phase, guard) = (self.phase, Guard::OffboardStopped);
        self.offboard
            .exit(&mut self.link)
            .await
            .map_err(offboard_failed(phase, guard))?;

        info!("Disarming...");
        let guard = Guard::DisarmAccepted;
        self.disarm_sent = true;
        let link = &mut self.link;
        guarded(phase, guard, self.config.guard_timeout(guard), &abort, async {
            link.disarm().await.map_err(command_failed(phase, guard))
        })
        .await?;
        self.advance(guard);

        Ok(playback)
    }

    async fn abort_mission(&mut self, e: &MissionError) {
        let from = self.phase;
        if from.is_terminal() {
            return;
        }
        error!("Mission failed: {}", e);
        self.phase = FlightPhase::Aborted;
        self.phases.push(FlightPhase::Aborted);
        info!("-- {} -> {}", from, FlightPhase::Aborted);

        self.offboard.abandon(&mut self.link).await;

        if from == FlightPhase::Disconnected || self.disarm_sent || self.offboard.disarm_issued() {
            return;
        }
        warn!("-- Disarming for safety");
        let disarm = self.link.disarm();
        let result = match self.config.guard_timeout(Guard::DisarmAccepted) {
            Some(timeout) => tokio::time::timeout(timeout, disarm)
                .await
                .unwrap_or_else(|_| {
                    Err(LinkError::CommandRejected {
                        command: "disarm",
                        reason: format!("no answer within {:?}", timeout),
                    })
                }),
            None => disarm.await,
        };
        if let Err(e) = result {
            error!("Safety disarm failed: {}", e);
        }
    }
}
