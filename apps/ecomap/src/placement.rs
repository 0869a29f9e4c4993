use crate::report::LatLng;
use thiserror::Error;

/// Pin-placement state. The candidate coordinate only exists while a pin is
/// being placed or its submission form is open.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Placement {
    #[default]
    Idle,
    Placing {
        candidate: LatLng,
    },
    Confirmed {
        candidate: LatLng,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlacementEvent {
    Add { center: LatLng },
    DragEnd { position: LatLng },
    Confirm,
    Cancel,
    SubmitCompleted,
}

impl PlacementEvent {
    fn name(&self) -> &'static str {
        match self {
            PlacementEvent::Add { .. } => "add",
            PlacementEvent::DragEnd { .. } => "drag",
            PlacementEvent::Confirm => "confirm",
            PlacementEvent::Cancel => "cancel",
            PlacementEvent::SubmitCompleted => "complete submission",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("sign in to add a report")]
    Unauthenticated,

    #[error("cannot {event} while {state}")]
    Invalid {
        state: &'static str,
        event: &'static str,
    },
}

impl Placement {
    pub fn name(&self) -> &'static str {
        match self {
            Placement::Idle => "idle",
            Placement::Placing { .. } => "placing",
            Placement::Confirmed { .. } => "confirmed",
        }
    }

    pub fn candidate(&self) -> Option<LatLng> {
        match self {
            Placement::Idle => None,
            Placement::Placing { candidate } | Placement::Confirmed { candidate } => {
                Some(*candidate)
            }
        }
    }

    /// Returns the next state, or an error leaving `self` as the current state.
    pub fn apply(
        self,
        event: PlacementEvent,
        authenticated: bool,
    ) -> Result<Placement, TransitionError> {
        match (self, event) {
            (Placement::Idle, PlacementEvent::Add { center }) => {
                if !authenticated {
                    return Err(TransitionError::Unauthenticated);
                }
                Ok(Placement::Placing { candidate: center })
            }
            (Placement::Placing { .. }, PlacementEvent::DragEnd { position }) => {
                Ok(Placement::Placing {
                    candidate: position,
                })
            }
            (Placement::Placing { candidate }, PlacementEvent::Confirm) => {
                Ok(Placement::Confirmed { candidate })
            }
            (Placement::Placing { .. }, PlacementEvent::Cancel)
            | (Placement::Confirmed { .. }, PlacementEvent::Cancel)
            | (Placement::Confirmed { .. }, PlacementEvent::SubmitCompleted) => Ok(Placement::Idle),
            (state, event) => Err(TransitionError::Invalid {
                state: state.name(),
                event: event.name(),
            }),
        }
    }
}
