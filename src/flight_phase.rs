use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlightPhase {
    Disconnected,
    Connected,
    Healthy,
    Armed,
    Airborne,
    OffboardActive,
    TrajectoryComplete,
    Landing,
    Landed,
    Disarmed,
    Aborted,
}

impl FlightPhase {
    /// The only phase reachable from `self` other than [`FlightPhase::Aborted`].
    pub fn successor(self) -> Option<FlightPhase> {
        match self {
            FlightPhase::Disconnected => Some(FlightPhase::Connected),
            FlightPhase::Connected => Some(FlightPhase::Healthy),
            FlightPhase::Healthy => Some(FlightPhase::Armed),
            FlightPhase::Armed => Some(FlightPhase::Airborne),
            FlightPhase::Airborne => Some(FlightPhase::OffboardActive),
            FlightPhase::OffboardActive => Some(FlightPhase::TrajectoryComplete),
            FlightPhase::TrajectoryComplete => Some(FlightPhase::Landing),
            FlightPhase::Landing => Some(FlightPhase::Landed),
            FlightPhase::Landed => Some(FlightPhase::Disarmed),
            FlightPhase::Disarmed | FlightPhase::Aborted => None,
        }
    }

    /// Guard that must hold before leaving `self` for its successor.
    pub fn exit_guard(self) -> Option<Guard> {
        match self {
            FlightPhase::Disconnected => Some(Guard::Connected),
            FlightPhase::Connected => Some(Guard::PositionOk),
            FlightPhase::Healthy => Some(Guard::ArmAccepted),
            FlightPhase::Armed => Some(Guard::InAir),
            FlightPhase::Airborne => Some(Guard::OffboardStarted),
            FlightPhase::OffboardActive => Some(Guard::TrajectoryExhausted),
            FlightPhase::TrajectoryComplete => Some(Guard::ReturnToLaunchAccepted),
            FlightPhase::Landing => Some(Guard::OnGround),
            FlightPhase::Landed => Some(Guard::DisarmAccepted),
            FlightPhase::Disarmed | FlightPhase::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FlightPhase::Disarmed | FlightPhase::Aborted)
    }

    pub fn can_transition_to(self, next: FlightPhase) -> bool {
        if next == FlightPhase::Aborted {
            !self.is_terminal()
        } else {
            self.successor() == Some(next)
        }
    }
}

impl std::fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A precondition the controller waits on. Also the key of the per-guard
/// timeout table in the mission config.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    Connected,
    PositionOk,
    ArmAccepted,
    InAir,
    OffboardStarted,
    TrajectoryExhausted,
    ReturnToLaunchAccepted,
    OnGround,
    OffboardStopped,
    DisarmAccepted,
}

impl std::fmt::Display for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Guard::Connected => "connection established",
            Guard::PositionOk => "global and home position ok",
            Guard::ArmAccepted => "arm accepted",
            Guard::InAir => "vehicle in air",
            Guard::OffboardStarted => "offboard started",
            Guard::TrajectoryExhausted => "trajectory exhausted",
            Guard::ReturnToLaunchAccepted => "return to launch accepted",
            Guard::OnGround => "vehicle on ground",
            Guard::OffboardStopped => "offboard stopped",
            Guard::DisarmAccepted => "disarm accepted",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn successors_walk_every_phase_once() {
        let mut phase = FlightPhase::Disconnected;
        let mut visited = vec![phase];
        while let Some(next) = phase.successor() {
            assert!(next > phase);
            assert!(phase.exit_guard().is_some());
            phase = next;
            visited.push(phase);
        }
        assert_eq!(phase, FlightPhase::Disarmed);
        assert_eq!(visited.len(), 10);
        assert!(!visited.contains(&FlightPhase::Aborted));
    }

    #[test]
    fn no_skipping() {
        assert!(FlightPhase::Airborne.can_transition_to(FlightPhase::OffboardActive));
        assert!(!FlightPhase::Armed.can_transition_to(FlightPhase::OffboardActive));
        assert!(!FlightPhase::OffboardActive.can_transition_to(FlightPhase::Airborne));
        assert!(!FlightPhase::Landed.can_transition_to(FlightPhase::Landed));
    }

    #[test]
    fn aborted_only_from_non_terminal() {
        assert!(FlightPhase::Disconnected.can_transition_to(FlightPhase::Aborted));
        assert!(FlightPhase::OffboardActive.can_transition_to(FlightPhase::Aborted));
        assert!(FlightPhase::Landed.can_transition_to(FlightPhase::Aborted));
        assert!(!FlightPhase::Disarmed.can_transition_to(FlightPhase::Aborted));
        assert!(!FlightPhase::Aborted.can_transition_to(FlightPhase::Aborted));
        assert_eq!(FlightPhase::Aborted.successor(), None);
    }

    #[test]
    fn guard_names_deserialize() {
        let guard: Guard = serde_json::from_str("\"position_ok\"").unwrap();
        assert_eq!(guard, Guard::PositionOk);
        assert_eq!(Guard::OnGround.to_string(), "vehicle on ground");
    }
}
