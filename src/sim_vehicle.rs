use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time::Instant};

use crate::vehicle_link::{
    ConnectionState, Health, LandedState, LinkError, OffboardDirection, OffboardError,
    PositionNedYaw, VehicleLink, VelocityNedYaw,
};

/// Behaviour of the in-process vehicle behind `sim://`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    pub connect_delay_s: f64,
    /// Counted from the moment the link reports connected
    pub health_delay_s: f64,
    pub takeoff_delay_s: f64,
    pub landing_delay_s: f64,
    /// Longest setpoint gap tolerated in offboard before failsafe
    pub offboard_timeout_s: f64,
    /// Time the vehicle takes to answer each of these commands
    pub offboard_start_delay_s: f64,
    pub offboard_stop_delay_s: f64,
    pub disarm_delay_s: f64,
    pub never_connect: bool,
    pub never_healthy: bool,
    pub reject_arm: bool,
    pub reject_offboard_start: bool,
    pub reject_offboard_stop: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            connect_delay_s: 0.5,
            health_delay_s: 2.0,
            takeoff_delay_s: 5.0,
            landing_delay_s: 10.0,
            offboard_timeout_s: 0.5,
            offboard_start_delay_s: 0.0,
            offboard_stop_delay_s: 0.0,
            disarm_delay_s: 0.0,
            never_connect: false,
            never_healthy: false,
            reject_arm: false,
            reject_offboard_start: false,
            reject_offboard_stop: false,
        }
    }
}

impl SimConfig {
    /// No delays, nothing rejected.
    pub fn instant() -> Self {
        Self {
            connect_delay_s: 0.0,
            health_delay_s: 0.0,
            takeoff_delay_s: 0.0,
            landing_delay_s: 0.0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let delays = [
            ("connect_delay_s", self.connect_delay_s),
            ("health_delay_s", self.health_delay_s),
            ("takeoff_delay_s", self.takeoff_delay_s),
            ("landing_delay_s", self.landing_delay_s),
            ("offboard_timeout_s", self.offboard_timeout_s),
            ("offboard_start_delay_s", self.offboard_start_delay_s),
            ("offboard_stop_delay_s", self.offboard_stop_delay_s),
            ("disarm_delay_s", self.disarm_delay_s),
        ];
        for (name, seconds) in delays {
            if Duration::try_from_secs_f64(seconds).is_err() {
                return Err(format!(
                    "simulator {} must be a non-negative number of seconds, got {}",
                    name, seconds
                ));
            }
        }
        Ok(())
    }
}

/// Out-of-range delays sleep forever instead of panicking.
fn delay(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX)
}

async fn respond_after(seconds: f64) {
    if seconds > 0.0 {
        tokio::time::sleep(delay(seconds)).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand {
    Connect(String),
    Arm,
    Disarm,
    Takeoff,
    ReturnToLaunch,
    SetPosition(PositionNedYaw),
    SetPositionVelocity(PositionNedYaw, VelocityNedYaw),
    OffboardStart,
    OffboardStop,
}

#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub at: Instant,
    pub command: LinkCommand,
}

pub struct SimulatedVehicle {
    config: SimConfig,
    connection: Arc<watch::Sender<ConnectionState>>,
    health: Arc<watch::Sender<Health>>,
    landed: Arc<watch::Sender<LandedState>>,
    connected: bool,
    armed: bool,
    offboard_active: bool,
    seeded: bool,
    last_setpoint_at: Option<Instant>,
    failsafe_triggered: bool,
    commands: Vec<CommandRecord>,
}

fn watch_stream<T: Clone + Send + Sync + 'static>(rx: watch::Receiver<T>) -> BoxStream<'static, T> {
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}

fn after<T: Send + Sync + 'static>(delay_s: f64, tx: &Arc<watch::Sender<T>>, value: T) {
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay(delay_s)).await;
        tx.send_replace(value);
    });
}

impl SimulatedVehicle {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            connection: Arc::new(watch::channel(ConnectionState::Disconnected).0),
            health: Arc::new(watch::channel(Health::default()).0),
            landed: Arc::new(watch::channel(LandedState::OnGround).0),
            connected: false,
            armed: false,
            offboard_active: false,
            seeded: false,
            last_setpoint_at: None,
            failsafe_triggered: false,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[CommandRecord] {
        &self.commands
    }

    pub fn count(&self, command: &LinkCommand) -> usize {
        self.commands
            .iter()
            .filter(|record| &record.command == command)
            .count()
    }

    /// Every setpoint received, in order, with the velocity when one was sent.
    pub fn setpoints(&self) -> Vec<(Instant, PositionNedYaw, Option<VelocityNedYaw>)> {
        self.commands
            .iter()
            .filter_map(|record| match record.command {
                LinkCommand::SetPosition(position) => Some((record.at, position, None)),
                LinkCommand::SetPositionVelocity(position, velocity) => {
                    Some((record.at, position, Some(velocity)))
                }
                _ => None,
            })
            .collect()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_offboard_active(&self) -> bool {
        self.offboard_active
    }

    /// Set when the setpoint stream paused longer than the offboard timeout
    /// while offboard was active.
    pub fn failsafe_triggered(&self) -> bool {
        self.failsafe_triggered
    }

    fn log(&mut self, command: LinkCommand) {
        self.commands.push(CommandRecord {
            at: Instant::now(),
            command,
        });
    }

    fn current_landed_state(&self) -> LandedState {
        *self.landed.borrow()
    }

    fn rejected(command: &'static str, reason: &str) -> LinkError {
        LinkError::CommandRejected {
            command,
            reason: reason.to_string(),
        }
    }

    fn receive_setpoint(&mut self) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        let now = Instant::now();
        if self.offboard_active {
            if let Some(last) = self.last_setpoint_at {
                let gap = now - last;
                if gap.as_secs_f64() > self.config.offboard_timeout_s {
                    warn!("Simulated vehicle: setpoint stream stalled for {:?}, failsafe", gap);
                    self.failsafe_triggered = true;
                }
            }
        }
        self.last_setpoint_at = Some(now);
        self.seeded = true;
        Ok(())
    }
}

#[async_trait]
impl VehicleLink for SimulatedVehicle {
    async fn connect(&mut self, address: &str) -> Result<(), LinkError> {
        self.log(LinkCommand::Connect(address.to_string()));
        if self.config.never_connect {
            debug!("Simulated vehicle: staying silent on {}", address);
            return Ok(());
        }
        self.connected = true;
        after(
            self.config.connect_delay_s,
            &self.connection,
            ConnectionState::Connected,
        );
        if !self.config.never_healthy {
            after(
                self.config.connect_delay_s + self.config.health_delay_s,
                &self.health,
                Health {
                    global_position_ok: true,
                    home_position_ok: true,
                },
            );
        }
        info!("Simulated vehicle listening on {}", address);
        Ok(())
    }

    fn connection_state(&self) -> BoxStream<'static, ConnectionState> {
        watch_stream(self.connection.subscribe())
    }

    fn health(&self) -> BoxStream<'static, Health> {
        watch_stream(self.health.subscribe())
    }

    fn landed_state(&self) -> BoxStream<'static, LandedState> {
        watch_stream(self.landed.subscribe())
    }

    async fn arm(&mut self) -> Result<(), LinkError> {
        self.log(LinkCommand::Arm);
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if self.config.reject_arm {
            return Err(Self::rejected("arm", "pre-arm checks failed"));
        }
        if !self.health.borrow().position_ok() {
            return Err(Self::rejected("arm", "position not ok"));
        }
        self.armed = true;
        Ok(())
    }

    async fn disarm(&mut self) -> Result<(), LinkError> {
        self.log(LinkCommand::Disarm);
        respond_after(self.config.disarm_delay_s).await;
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if self.current_landed_state() != LandedState::OnGround {
            warn!("Simulated vehicle: disarmed while {:?}", self.current_landed_state());
        }
        self.armed = false;
        self.offboard_active = false;
        Ok(())
    }

    async fn takeoff(&mut self) -> Result<(), LinkError> {
        self.log(LinkCommand::Takeoff);
        if !self.armed {
            return Err(Self::rejected("takeoff", "not armed"));
        }
        self.landed.send_replace(LandedState::TakingOff);
        after(self.config.takeoff_delay_s, &self.landed, LandedState::InAir);
        Ok(())
    }

    async fn return_to_launch(&mut self) -> Result<(), LinkError> {
        self.log(LinkCommand::ReturnToLaunch);
        if self.current_landed_state() != LandedState::InAir {
            return Err(Self::rejected("return to launch", "not in air"));
        }
        // leaving offboard for the RTL mode
        self.offboard_active = false;
        self.landed.send_replace(LandedState::Landing);
        after(self.config.landing_delay_s, &self.landed, LandedState::OnGround);
        Ok(())
    }

    async fn offboard_set_position(&mut self, position: PositionNedYaw) -> Result<(), LinkError> {
        self.log(LinkCommand::SetPosition(position));
        self.receive_setpoint()
    }

    async fn offboard_set_position_velocity(
        &mut self,
        position: PositionNedYaw,
        velocity: VelocityNedYaw,
    ) -> Result<(), LinkError> {
        self.log(LinkCommand::SetPositionVelocity(position, velocity));
        self.receive_setpoint()
    }

    async fn offboard_start(&mut self) -> Result<(), OffboardError> {
        self.log(LinkCommand::OffboardStart);
        respond_after(self.config.offboard_start_delay_s).await;
        let rejected = |reason: &str| OffboardError::Rejected {
            direction: OffboardDirection::Start,
            reason: reason.to_string(),
        };
        if !self.connected {
            return Err(OffboardError::Link {
                direction: OffboardDirection::Start,
                source: LinkError::NotConnected,
            });
        }
        if self.config.reject_offboard_start {
            return Err(rejected("command denied"));
        }
        if !self.armed {
            return Err(rejected("not armed"));
        }
        if !self.seeded {
            return Err(rejected("no setpoint set"));
        }
        self.offboard_active = true;
        Ok(())
    }

    async fn offboard_stop(&mut self) -> Result<(), OffboardError> {
        self.log(LinkCommand::OffboardStop);
        respond_after(self.config.offboard_stop_delay_s).await;
        if !self.connected {
            return Err(OffboardError::Link {
                direction: OffboardDirection::Stop,
                source: LinkError::NotConnected,
            });
        }
        if self.config.reject_offboard_stop {
            return Err(OffboardError::Rejected {
                direction: OffboardDirection::Stop,
                reason: "command denied".to_string(),
            });
        }
        self.offboard_active = false;
        self.seeded = false;
        Ok(())
    }
}
