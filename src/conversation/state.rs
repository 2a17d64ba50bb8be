/// Where the reading currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversationState {
    /// Constructed, not yet started.
    #[default]
    Idle,
    /// Intro clip or text is playing; skippable.
    IntroPlayback,
    /// A scripted opening question is on screen.
    IntroQuestion,
    /// Choices are shown and the player may act.
    SteadyState,
    /// A chat turn (with its retries) is outstanding.
    RequestInFlight,
    /// The spoken line is being synthesized or played.
    SpeechPlayback,
    /// Skippable audio was cut short; passes straight on to what follows it.
    Cancelled,
    /// A turn was aborted; passes straight back to the previous choices.
    Error,
}

impl ConversationState {
    /// Whether player choices are accepted in this state.
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::IntroQuestion | Self::SteadyState)
    }

    /// Whether the intro has not yet handed over to the first choices.
    pub fn is_before_choices(self) -> bool {
        matches!(self, Self::Idle | Self::IntroPlayback | Self::Cancelled)
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::IntroPlayback => "intro_playback",
            Self::IntroQuestion => "intro_question",
            Self::SteadyState => "steady_state",
            Self::RequestInFlight => "request_in_flight",
            Self::SpeechPlayback => "speech_playback",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_choice_states_accept_input() {
        assert!(ConversationState::SteadyState.accepts_input());
        assert!(ConversationState::IntroQuestion.accepts_input());
        assert!(!ConversationState::RequestInFlight.accepts_input());
        assert!(!ConversationState::Idle.accepts_input());
    }

    #[test]
    fn intro_states_come_before_choices() {
        assert!(ConversationState::Idle.is_before_choices());
        assert!(ConversationState::IntroPlayback.is_before_choices());
        assert!(ConversationState::Cancelled.is_before_choices());
        assert!(!ConversationState::SteadyState.is_before_choices());
        assert!(!ConversationState::Error.is_before_choices());
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(ConversationState::RequestInFlight.to_string(), "request_in_flight");
        assert_eq!(ConversationState::default(), ConversationState::Idle);
    }
}
