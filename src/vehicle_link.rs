use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Position setpoint in the local NED frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionNedYaw {
    pub north_m: f64,
    pub east_m: f64,
    pub down_m: f64,
    pub yaw_deg: f64,
}

/// Velocity feed-forward in the local NED frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityNedYaw {
    pub north_m_s: f64,
    pub east_m_s: f64,
    pub down_m_s: f64,
    pub yaw_rate_deg_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Health {
    pub global_position_ok: bool,
    pub home_position_ok: bool,
}

impl Health {
    pub fn position_ok(&self) -> bool {
        self.global_position_ok && self.home_position_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandedState {
    Unknown,
    OnGround,
    TakingOff,
    InAir,
    Landing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffboardDirection {
    Start,
    Stop,
}

impl std::fmt::Display for OffboardDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OffboardDirection::Start => write!(f, "start"),
            OffboardDirection::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("vehicle is not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("{command} rejected: {reason}")]
    CommandRejected {
        command: &'static str,
        reason: String,
    },

    #[error("{0} stream closed")]
    StreamClosed(&'static str),

    #[error("unsupported link address: {0}")]
    UnsupportedAddress(String),
}

#[derive(Debug, thiserror::Error)]
pub enum OffboardError {
    #[error("offboard {direction} rejected: {reason}")]
    Rejected {
        direction: OffboardDirection,
        reason: String,
    },

    #[error("offboard {direction} failed: {source}")]
    Link {
        direction: OffboardDirection,
        source: LinkError,
    },

    #[error("offboard {direction} not acknowledged within {timeout:?}")]
    TimedOut {
        direction: OffboardDirection,
        timeout: Duration,
    },

    #[error("offboard {direction} interrupted by operator abort")]
    Aborted { direction: OffboardDirection },
}

impl OffboardError {
    pub fn direction(&self) -> OffboardDirection {
        match self {
            OffboardError::Rejected { direction, .. } => *direction,
            OffboardError::Link { direction, .. } => *direction,
            OffboardError::TimedOut { direction, .. } => *direction,
            OffboardError::Aborted { direction } => *direction,
        }
    }
}

/// Remote flight-control link to a single vehicle.
///
/// Telemetry streams yield the current value first, then every change.
/// The link is assumed to be exclusively owned by one controller: nothing
/// else may arm, disarm or switch modes while a mission is running.
#[async_trait]
pub trait VehicleLink: Send {
    async fn connect(&mut self, address: &str) -> Result<(), LinkError>;

    fn connection_state(&self) -> BoxStream<'static, ConnectionState>;
    fn health(&self) -> BoxStream<'static, Health>;
    fn landed_state(&self) -> BoxStream<'static, LandedState>;

    async fn arm(&mut self) -> Result<(), LinkError>;
    async fn disarm(&mut self) -> Result<(), LinkError>;
    async fn takeoff(&mut self) -> Result<(), LinkError>;
    async fn return_to_launch(&mut self) -> Result<(), LinkError>;

    async fn offboard_set_position(&mut self, position: PositionNedYaw) -> Result<(), LinkError>;
    async fn offboard_set_position_velocity(
        &mut self,
        position: PositionNedYaw,
        velocity: VelocityNedYaw,
    ) -> Result<(), LinkError>;

    /// Requires a setpoint to have been sent first, otherwise the vehicle
    /// refuses the mode switch.
    async fn offboard_start(&mut self) -> Result<(), OffboardError>;
    async fn offboard_stop(&mut self) -> Result<(), OffboardError>;
}

/// Transport selected by the `--addr` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAddress {
    Simulated,
}

impl LinkAddress {
    pub fn parse(address: &str) -> Result<Self, LinkError> {
        match address.split_once("://") {
            Some(("sim", _)) => Ok(LinkAddress::Simulated),
            _ => Err(LinkError::UnsupportedAddress(address.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_link_address() {
        assert_eq!(LinkAddress::parse("sim://").unwrap(), LinkAddress::Simulated);
        assert_eq!(
            LinkAddress::parse("sim://local").unwrap(),
            LinkAddress::Simulated
        );
        assert!(matches!(
            LinkAddress::parse("udp://:14540"),
            Err(LinkError::UnsupportedAddress(_))
        ));
        assert!(LinkAddress::parse("serial").is_err());
    }

    #[test]
    fn health_requires_both_positions() {
        let mut health = Health {
            global_position_ok: true,
            home_position_ok: false,
        };
        assert!(!health.position_ok());
        health.home_position_ok = true;
        assert!(health.position_ok());
    }
}
