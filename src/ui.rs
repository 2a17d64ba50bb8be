//! Host-facing presentation seams.
//!
//! The core never draws anything itself. It pushes text and choices into a
//! [`ReadingUi`], raises a talking flag on an [`Animator`], and receives
//! player input as [`UiEvent`]s over a channel.

/// Display surface for the reading.
pub trait ReadingUi: Send + Sync {
    /// Show a line of text (the spoken line, intro text or scripted question).
    fn display_text(&self, text: &str);

    /// Replace the three choice buttons.
    fn present_choices(&self, choices: &[String; 3]);

    /// Enable or disable player input on the choices.
    fn set_interactable(&self, interactable: bool);

    /// Show or hide the reading surface.
    fn set_visible(&self, visible: bool);
}

/// Receives the boolean talking signal while speech plays.
pub trait Animator: Send + Sync {
    /// Set a named boolean animation parameter.
    fn set_bool(&self, name: &str, value: bool);
}

/// Animator for hosts without a character rig.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnimation;

impl Animator for NoAnimation {
    fn set_bool(&self, _name: &str, _value: bool) {}
}

/// Player input delivered to [`Orchestrator::run`](crate::conversation::Orchestrator::run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// A choice button (0-based) was pressed.
    ChoiceSelected(usize),
    /// The player asked to skip the current skippable playback.
    SkipRequested,
    /// Free-form text typed by the player.
    TextSubmitted(String),
}
