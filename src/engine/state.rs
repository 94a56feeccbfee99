//! Engine state machine.

// -------------------------------------------------------------------------------------------------

/// Record/playback state of a [`GranularEngine`](crate::GranularEngine).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    strum::VariantNames,
)]
#[repr(u8)]
pub enum EngineState {
    /// Grain engines are silent and don't record. Loop engines keep recording into their
    /// rolling buffer, so a loop can be captured at any time.
    #[default]
    Idle = 0,
    /// Input gets written into the record buffer.
    Recording = 1,
    /// The record buffer is frozen and played back.
    Playing = 2,
}

impl EngineState {
    /// Resolve the state transition for the given trigger event.
    pub fn transition(self, event: EngineEvent) -> Transition {
        let to = match event {
            EngineEvent::Record => EngineState::Recording,
            EngineEvent::Play => EngineState::Playing,
            EngineEvent::Toggle => {
                if self == EngineState::Recording {
                    EngineState::Playing
                } else {
                    EngineState::Recording
                }
            }
            EngineEvent::Idle => EngineState::Idle,
        };
        Transition { from: self, to }
    }

    pub(crate) fn from_repr(value: u8) -> Self {
        match value {
            1 => EngineState::Recording,
            2 => EngineState::Playing,
            _ => EngineState::Idle,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Discrete trigger events which drive the [`EngineState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum EngineEvent {
    /// Start recording.
    Record,
    /// Start playing back the recorded buffer.
    Play,
    /// Switch from recording to playing, or start recording from any other state.
    Toggle,
    /// Stop recording and playback. Captured loops are kept.
    Idle,
}

// -------------------------------------------------------------------------------------------------

/// A resolved state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: EngineState,
    pub to: EngineState,
}

impl Transition {
    /// True if the transition changes the state.
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }

    /// True when the transition enters the given state from some other state.
    pub fn enters(&self, state: EngineState) -> bool {
        self.to == state && self.from != state
    }
}

// -------------------------------------------------------------------------------------------------
