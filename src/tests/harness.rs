use std::time::Duration;

use crate::abort::{abort_channel, AbortHandle};
use crate::config::MissionConfig;
use crate::flight_phase::FlightPhase;
use crate::phase_controller::{MissionError, MissionReport, PhaseController};
use crate::setpoint_log::SetpointCsvWriter;
use crate::sim_vehicle::{LinkCommand, SimConfig, SimulatedVehicle};
use crate::trajectory::Trajectory;

/// 0.125s ticks keep mission times exact in binary floating point.
pub fn mission_config(simulator: SimConfig) -> MissionConfig {
    MissionConfig {
        tick_interval_s: 0.125,
        simulator,
        ..Default::default()
    }
}

pub struct MissionTestingHarness {
    pub controller: PhaseController<SimulatedVehicle>,
    pub trajectory: Trajectory,
    pub config: MissionConfig,
    abort_handle: Option<AbortHandle>,
}

impl MissionTestingHarness {
    pub fn new(trajectory_path: &str, config: MissionConfig) -> Self {
        let trajectory = Trajectory::load(trajectory_path).unwrap();
        config.validate().unwrap();
        let (abort_handle, abort_signal) = abort_channel();
        let vehicle = SimulatedVehicle::new(config.simulator.clone());
        Self {
            controller: PhaseController::new(vehicle, config.clone(), abort_signal),
            trajectory,
            config,
            abort_handle: Some(abort_handle),
        }
    }

    pub fn with_simulator(trajectory_path: &str, simulator: SimConfig) -> Self {
        Self::new(trajectory_path, mission_config(simulator))
    }

    pub fn with_recorder(mut self, recorder: SetpointCsvWriter) -> Self {
        self.controller = self.controller.with_recorder(recorder);
        self
    }

    pub fn abort_after(&mut self, delay: Duration) {
        let handle = self.abort_handle.take().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.abort();
        });
    }

    pub async fn run(&mut self) -> Result<MissionReport, MissionError> {
        self.controller.run("sim://", &self.trajectory).await
    }

    pub fn vehicle(&self) -> &SimulatedVehicle {
        self.controller.link()
    }

    pub fn commands(&self) -> Vec<LinkCommand> {
        self.vehicle()
            .commands()
            .iter()
            .map(|record| record.command.clone())
            .collect()
    }

    pub fn count(&self, command: &LinkCommand) -> usize {
        self.vehicle().count(command)
    }

    pub fn phases(&self) -> &[FlightPhase] {
        self.controller.phases()
    }

    /// Holds for every run, successful or not.
    pub fn verify_invariants(&self) {
        let phases = self.phases();
        assert_eq!(phases[0], FlightPhase::Disconnected);
        for pair in phases.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "illegal transition {} -> {}",
                pair[0],
                pair[1]
            );
        }
        assert!(self.controller.phase().is_terminal());
        assert_eq!(self.controller.phase(), *phases.last().unwrap());

        let commands = self.commands();
        if phases.contains(&FlightPhase::OffboardActive) {
            let seed = commands
                .iter()
                .position(|command| matches!(command, LinkCommand::SetPosition(_)))
                .expect("offboard entered without a seed setpoint");
            let start = commands
                .iter()
                .position(|command| *command == LinkCommand::OffboardStart)
                .expect("offboard entered without a start request");
            assert!(seed < start);
            assert!(commands[..start]
                .iter()
                .all(|command| !matches!(command, LinkCommand::SetPositionVelocity(..))));
        }

        // playback setpoints never continue after leaving offboard
        if let Some(last_setpoint) = commands
            .iter()
            .rposition(|command| matches!(command, LinkCommand::SetPositionVelocity(..)))
        {
            assert!(commands[..last_setpoint]
                .iter()
                .all(|command| *command != LinkCommand::ReturnToLaunch
                    && *command != LinkCommand::Disarm));
        }

        assert!(self.count(&LinkCommand::Arm) <= 1);
        assert!(self.count(&LinkCommand::OffboardStart) <= 1);
        assert!(self.count(&LinkCommand::Disarm) <= 1);
        assert!(!self.vehicle().failsafe_triggered());
    }
}
