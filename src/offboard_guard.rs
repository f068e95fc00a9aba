use std::{future::Future, time::Duration};

use log::{error, info, warn};

use crate::abort::AbortSignal;
use crate::trajectory::Waypoint;
use crate::vehicle_link::{OffboardDirection, OffboardError, VehicleLink};

/// Acknowledgement limits for the commands the guard sends. `None` waits
/// forever.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OffboardTimeouts {
    pub start: Option<Duration>,
    pub stop: Option<Duration>,
    pub disarm: Option<Duration>,
}

/// Owns the offboard session of one mission.
///
/// Entry and exit share one failure path: if the vehicle refuses either
/// direction, does not answer in time, or the operator aborts while the
/// request is in flight, it is disarmed once and the error is returned.
/// Only the request is interruptible; the disarm always runs to completion
/// or to its own timeout. Nothing is retried.
pub struct OffboardSessionGuard {
    engaged: bool,
    disarm_issued: bool,
    timeouts: OffboardTimeouts,
    abort: AbortSignal,
}

impl Default for OffboardSessionGuard {
    fn default() -> Self {
        Self::new()
    }
}

async fn bounded<F>(
    timeout: Option<Duration>,
    direction: OffboardDirection,
    request: F,
) -> Result<(), OffboardError>
where
    F: Future<Output = Result<(), OffboardError>>,
{
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(OffboardError::TimedOut { direction, timeout }),
        },
        None => request.await,
    }
}

impl OffboardSessionGuard {
    pub fn new() -> Self {
        Self {
            engaged: false,
            disarm_issued: false,
            timeouts: OffboardTimeouts::default(),
            abort: AbortSignal::never(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: OffboardTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// True once the failure path has sent its disarm, whether or not the
    /// vehicle acknowledged it.
    pub fn disarm_issued(&self) -> bool {
        self.disarm_issued
    }

    /// Seeds the stream with `initial` as a position setpoint, then starts
    /// offboard. The vehicle refuses the mode switch without a prior setpoint.
    pub async fn enter<L: VehicleLink + ?Sized>(
        &mut self,
        link: &mut L,
        initial: &Waypoint,
    ) -> Result<(), OffboardError> {
        info!("Starting offboard control...");
        self.transition(link, OffboardDirection::Start, Some(initial))
            .await
    }

    pub async fn exit<L: VehicleLink + ?Sized>(&mut self, link: &mut L) -> Result<(), OffboardError> {
        info!("Stopping offboard control...");
        self.transition(link, OffboardDirection::Stop, None).await
    }

    /// Stops an engaged session on the abort path, bounded by the stop
    /// timeout. Failures are only logged and nothing is disarmed here, the
    /// caller owns the safety disarm.
    pub async fn abandon<L: VehicleLink + ?Sized>(&mut self, link: &mut L) {
        if !self.engaged {
            return;
        }
        self.engaged = false;
        let direction = OffboardDirection::Stop;
        if let Err(e) = bounded(self.timeouts.stop, direction, link.offboard_stop()).await {
            warn!("Could not stop offboard while aborting: {}", e);
        }
    }

    async fn transition<L: VehicleLink + ?Sized>(
        &mut self,
        link: &mut L,
        direction: OffboardDirection,
        seed: Option<&Waypoint>,
    ) -> Result<(), OffboardError> {
        let timeout = match direction {
            OffboardDirection::Start => self.timeouts.start,
            OffboardDirection::Stop => self.timeouts.stop,
        };
        let abort = self.abort.clone();
        let result = tokio::select! {
            biased;
            _ = abort.triggered() => Err(OffboardError::Aborted { direction }),
            result = bounded(timeout, direction, Self::request(&mut *link, direction, seed)) => result,
        };
        match result {
            Ok(()) => {
                self.engaged = direction == OffboardDirection::Start;
                info!("-- Offboard {} accepted", direction);
                Ok(())
            }
            Err(e) => {
                error!("{}", e);
                self.engaged = false;
                self.disarm(link, direction).await;
                Err(e)
            }
        }
    }

    async fn disarm<L: VehicleLink + ?Sized>(&mut self, link: &mut L, direction: OffboardDirection) {
        warn!("-- Disarming after failed offboard {}", direction);
        self.disarm_issued = true;
        let result = match self.timeouts.disarm {
            Some(timeout) => match tokio::time::timeout(timeout, link.disarm()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("no answer within {:?}", timeout)),
            },
            None => link.disarm().await.map_err(|e| e.to_string()),
        };
        if let Err(e) = result {
            error!("Safety disarm failed: {}", e);
        }
    }

    async fn request<L: VehicleLink + ?Sized>(
        link: &mut L,
        direction: OffboardDirection,
        seed: Option<&Waypoint>,
    ) -> Result<(), OffboardError> {
        match direction {
            OffboardDirection::Start => {
                if let Some(seed) = seed {
                    link.offboard_set_position(seed.position)
                        .await
                        .map_err(|source| OffboardError::Link { direction, source })?;
                }
                link.offboard_start().await
            }
            OffboardDirection::Stop => link.offboard_stop().await,
        }
    }
}
