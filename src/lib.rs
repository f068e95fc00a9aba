pub mod abort;
pub mod config;
pub mod flight_phase;
pub mod offboard_guard;
pub mod phase_controller;
pub mod scheduler;
pub mod setpoint_log;
pub mod sim_vehicle;
pub mod trajectory;
pub mod vehicle_link;

pub use abort::{abort_channel, AbortHandle, AbortSignal};
pub use config::{read_mission_config, MissionConfig};
pub use flight_phase::{FlightPhase, Guard};
pub use offboard_guard::{OffboardSessionGuard, OffboardTimeouts};
pub use phase_controller::{MissionError, MissionReport, PhaseController};
pub use scheduler::{PlaybackCursor, PlaybackError, TrajectoryScheduler};
pub use sim_vehicle::{SimConfig, SimulatedVehicle};
pub use trajectory::{LoadError, Trajectory, Waypoint};
pub use vehicle_link::{LinkAddress, LinkError, OffboardError, VehicleLink};

#[cfg(test)]
mod tests;
