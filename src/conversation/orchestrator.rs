//! Turn-taking state machine for a reading.
//!
//! A turn is: append the player's contribution, ask the chat endpoint for a
//! structured reply (retrying only when the reply cannot be parsed), speak the
//! reply, then put three choices back on screen. At most one turn runs at a
//! time; triggers arriving mid-turn are dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::{BoxFuture, OptionFuture};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::message::ChatMessage;
use super::session::SessionContext;
use super::state::ConversationState;
use crate::config::{FortuneConfig, MAX_PARSE_ATTEMPTS};
use crate::error::{FortuneError, Result};
use crate::playback::{AudioOutput, PlaybackOutcome, PlaybackSynchronizer, SilentOutput, load_clip};
use crate::reply::{
    CHOICE_COUNT, FortuneResponse, ParseOutcome, ReplyParser, StructuredReplyParser,
    normalize_choices,
};
use crate::sanitize::sanitize;
use crate::transport::{ChatRequest, ChatTransport, SpeechRequest, SpeechTransport};
use crate::ui::{Animator, NoAnimation, ReadingUi, UiEvent};

/// User turn appended after an unparseable reply when another attempt follows.
pub const CORRECTIVE_INSTRUCTION: &str = "Reply using ONLY the schema \
{\"spoken\": string, \"choices\": [string, string, string]} and nothing else.";

/// How a single turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply was parsed, spoken and its choices presented.
    Completed(FortuneResponse),
    /// Another turn was already in flight; nothing happened.
    Dropped,
    /// The selection did not name a choice on screen; nothing happened.
    Rejected,
    /// The chat endpoint failed; previous choices were restored.
    TransportFailed,
    /// Every attempt produced unparseable output; previous choices were restored.
    ParseExhausted,
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// The services an [`Orchestrator`] drives.
pub struct Collaborators {
    pub chat: Arc<dyn ChatTransport>,
    /// `None` means speech credentials are missing; replies are text-only.
    pub speech: Option<Arc<dyn SpeechTransport>>,
    pub parser: Arc<dyn ReplyParser>,
    pub ui: Arc<dyn ReadingUi>,
    pub output: Arc<dyn AudioOutput>,
    pub animator: Arc<dyn Animator>,
}

impl Collaborators {
    /// Text-only collaborators: no speech, silent output, no animation.
    pub fn new(chat: Arc<dyn ChatTransport>, ui: Arc<dyn ReadingUi>) -> Self {
        Self {
            chat,
            speech: None,
            parser: Arc::new(StructuredReplyParser),
            ui,
            output: Arc::new(SilentOutput),
            animator: Arc::new(NoAnimation),
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechTransport>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn ReplyParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = output;
        self
    }

    pub fn with_animator(mut self, animator: Arc<dyn Animator>) -> Self {
        self.animator = animator;
        self
    }
}

/// Releases the single-flight flag when the turn ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives a reading session.
pub struct Orchestrator {
    config: FortuneConfig,
    chat: Arc<dyn ChatTransport>,
    speech: Option<Arc<dyn SpeechTransport>>,
    parser: Arc<dyn ReplyParser>,
    ui: Arc<dyn ReadingUi>,
    playback: PlaybackSynchronizer,
    session: Mutex<SessionContext>,
    in_flight: AtomicBool,
}

impl Orchestrator {
    pub fn new(config: FortuneConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            chat,
            speech,
            parser,
            ui,
            output,
            animator,
        } = collaborators;

        if speech.is_none() {
            warn!("speech credentials missing; replies will be shown as text only");
        }

        let playback =
            PlaybackSynchronizer::new(output, animator, config.ui.talking_param.clone());
        let session = SessionContext::new(config.chat.system_prompt.clone(), config.ui.log_transcript);

        Self {
            config,
            chat,
            speech,
            parser,
            ui,
            playback,
            session: Mutex::new(session),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConversationState {
        self.with_session(|s| s.state())
    }

    /// Snapshot of the transcript, system prompt first.
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.with_session(|s| s.log().messages().to_vec())
    }

    pub fn current_choices(&self) -> Option<[String; CHOICE_COUNT]> {
        self.with_session(|s| s.choices().cloned())
    }

    pub fn is_request_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run the intro, then either the scripted question or the opening turn.
    ///
    /// Returns the opening turn's outcome when one was run. Calling this on a
    /// session that has already started does nothing.
    pub async fn start(&self) -> Option<TurnOutcome> {
        if self.state() != ConversationState::Idle {
            warn!(state = %self.state(), "session already started");
            return None;
        }

        self.ui.set_visible(true);
        self.start_music();
        self.transition(ConversationState::IntroPlayback);
        self.play_intro().await;

        let intro = &self.config.intro;
        if intro.has_scripted_question() {
            let question = sanitize(&intro.question);
            let choices = normalize_choices(&intro.choices);
            self.ui.display_text(&question);
            self.with_session(|s| {
                s.append(ChatMessage::assistant(question.clone()));
                s.set_choices(choices.clone());
            });
            self.ui.present_choices(&choices);
            self.ui.set_interactable(true);
            self.transition(ConversationState::IntroQuestion);
            return None;
        }

        self.transition(ConversationState::SteadyState);
        let opening = self.config.chat.opening_prompt.trim();
        if opening.is_empty() {
            self.ui.set_interactable(true);
            return None;
        }
        Some(self.run_turn(Some(opening.to_owned())).await)
    }

    /// Answer with the choice at `index` (0-based).
    pub async fn select_choice(&self, index: usize) -> TurnOutcome {
        if self.is_request_in_flight() || self.state().is_before_choices() {
            debug!(index, "selection dropped: turn in flight or intro pending");
            return TurnOutcome::Dropped;
        }
        let Some(choice) = self.with_session(|s| s.choices().and_then(|c| c.get(index).cloned()))
        else {
            debug!(index, "selection rejected: no such choice on screen");
            return TurnOutcome::Rejected;
        };
        info!(index, %choice, "choice selected");
        self.run_turn(Some(choice)).await
    }

    /// Answer with free-form text.
    ///
    /// Dropped until the intro has finished.
    pub async fn submit(&self, text: &str) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            return TurnOutcome::Rejected;
        }
        self.run_turn(Some(text.to_owned())).await
    }

    /// Cut short the current playback if it is skippable.
    pub fn skip(&self) -> bool {
        let skipped = self.playback.skip();
        if skipped {
            info!("playback skipped");
        } else {
            debug!("skip ignored: nothing skippable playing");
        }
        skipped
    }

    /// Drive the session from UI events until shutdown or the channel closes.
    ///
    /// Choices and text arriving while a turn is pending are dropped. Skip
    /// requests are handled immediately so the intro can be cut short. When
    /// the channel closes, the pending turn is allowed to finish.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for host-level errors.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<UiEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut pending: Option<BoxFuture<'_, Option<TurnOutcome>>> = Some(Box::pin(self.start()));
        let mut closed = false;

        loop {
            if closed && pending.is_none() {
                break;
            }
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("shutdown requested");
                    self.playback.output().stop();
                    break;
                }
                Some(outcome) = OptionFuture::from(pending.as_mut()), if pending.is_some() => {
                    pending = None;
                    if let Some(outcome) = outcome {
                        log_outcome(&outcome);
                    }
                }
                event = events.recv(), if !closed => match event {
                    None => {
                        debug!("event channel closed");
                        closed = true;
                    }
                    Some(UiEvent::SkipRequested) => {
                        self.skip();
                    }
                    Some(event) if pending.is_some() => {
                        debug!(?event, "event dropped: turn pending");
                    }
                    Some(UiEvent::ChoiceSelected(index)) => {
                        pending = Some(Box::pin(async move { Some(self.select_choice(index).await) }));
                    }
                    Some(UiEvent::TextSubmitted(text)) => {
                        pending = Some(Box::pin(async move { Some(self.submit(&text).await) }));
                    }
                },
            }
        }
        Ok(())
    }

    async fn run_turn(&self, user_text: Option<String>) -> TurnOutcome {
        let Some(_guard) = self.try_claim() else {
            debug!("turn dropped: another turn in flight");
            return TurnOutcome::Dropped;
        };
        let state = self.state();
        if state.is_before_choices() {
            debug!(%state, "turn dropped: intro not finished");
            return TurnOutcome::Dropped;
        }

        let (previous_state, previous_choices) = self.with_session(|s| {
            if let Some(text) = user_text {
                s.append(ChatMessage::user(text));
            }
            let previous = s.transition(ConversationState::RequestInFlight);
            (previous, s.choices().cloned())
        });
        self.ui.set_interactable(false);

        let mut last_reason = String::new();
        for attempt in 1..=MAX_PARSE_ATTEMPTS {
            let request = self.with_session(|s| {
                ChatRequest::new(self.config.chat.model.clone(), s.log().messages())
            });

            let payload = match self.chat.send(&request).await {
                Ok(payload) => payload,
                Err(e) => {
                    error!(attempt, error = %e, "chat request failed; turn aborted");
                    self.restore(previous_state, previous_choices);
                    return TurnOutcome::TransportFailed;
                }
            };

            match self.parser.parse(&payload) {
                ParseOutcome::Success {
                    response,
                    canonical_json,
                } => {
                    debug!(attempt, "reply parsed");
                    self.with_session(|s| s.append(ChatMessage::assistant(canonical_json)));
                    self.deliver(&response).await;
                    return TurnOutcome::Completed(response);
                }
                ParseOutcome::Failure { reason } => {
                    warn!(attempt, %reason, "unusable reply");
                    if attempt < MAX_PARSE_ATTEMPTS {
                        self.with_session(|s| s.append(ChatMessage::user(CORRECTIVE_INSTRUCTION)));
                    }
                    last_reason = reason;
                }
            }
        }

        let err = FortuneError::Parse(format!(
            "no parseable reply after {MAX_PARSE_ATTEMPTS} attempts: {last_reason}"
        ));
        error!(code = err.code(), error = %err, "turn aborted");
        self.restore(previous_state, previous_choices);
        TurnOutcome::ParseExhausted
    }

    /// Speak the reply (when there is anything to say) and present its choices.
    async fn deliver(&self, response: &FortuneResponse) {
        let spoken = sanitize(&response.spoken);
        if !spoken.is_empty() {
            self.speak(&spoken).await;
        }

        self.with_session(|s| s.set_choices(response.choices.clone()));
        self.ui.present_choices(&response.choices);
        self.ui.set_interactable(true);
        self.transition(ConversationState::SteadyState);
    }

    /// Show `text` and play it as speech, degrading to text-only on any failure.
    async fn speak(&self, text: &str) {
        self.transition(ConversationState::SpeechPlayback);
        self.ui.display_text(text);

        let Some(speech) = &self.speech else {
            debug!("no speech transport; text only");
            return;
        };

        let settings = &self.config.speech;
        let request = SpeechRequest::new(
            text,
            settings.model_id.clone(),
            settings.stability,
            settings.similarity_boost,
        );
        let clip = match speech.synthesize(&request).await {
            Ok(clip) if clip.is_empty() => {
                warn!("speech endpoint returned an empty clip; text only");
                return;
            }
            Ok(clip) => clip,
            Err(e) => {
                warn!(error = %e, "speech synthesis failed; text only");
                return;
            }
        };

        if let PlaybackOutcome::Failed(reason) = self.playback.play(&clip, false).await {
            warn!(%reason, "speech playback failed");
        }
    }

    async fn play_intro(&self) {
        let intro = &self.config.intro;
        if !intro.has_playback() {
            debug!("no intro configured");
            return;
        }

        let text = sanitize(&intro.text);
        if !text.is_empty() {
            self.ui.display_text(&text);
        }

        if let Some(path) = &intro.clip {
            match load_clip(path) {
                Ok(clip) if !clip.is_empty() => {
                    if self.playback.play(&clip, true).await == PlaybackOutcome::Cancelled {
                        self.transition(ConversationState::Cancelled);
                    }
                }
                Ok(_) => warn!(path = %path.display(), "intro clip is empty"),
                Err(e) => warn!(path = %path.display(), error = %e, "cannot load intro clip"),
            }
        }

        if !text.is_empty() {
            self.with_session(|s| s.append(ChatMessage::assistant(text)));
        }
    }

    fn start_music(&self) {
        let music = &self.config.music;
        let Some(path) = music.clip.as_ref().filter(|_| music.autoplay) else {
            return;
        };
        let started =
            load_clip(path).and_then(|clip| self.playback.output().start_background(&clip, music));
        if let Err(e) = started {
            warn!(path = %path.display(), error = %e, "background music unavailable");
        }
    }

    /// Put the previous choices back after an aborted turn.
    fn restore(
        &self,
        previous_state: ConversationState,
        previous_choices: Option<[String; CHOICE_COUNT]>,
    ) {
        self.transition(ConversationState::Error);
        if let Some(choices) = &previous_choices {
            self.ui.present_choices(choices);
        }
        self.ui.set_interactable(true);
        let resume = if previous_state.accepts_input() {
            previous_state
        } else {
            ConversationState::SteadyState
        };
        self.transition(resume);
    }

    fn try_claim(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(&self.in_flight))
    }

    fn transition(&self, next: ConversationState) {
        self.with_session(|s| {
            s.transition(next);
        });
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut SessionContext) -> R) -> R {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }
}

fn log_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Completed(_) => debug!("turn completed"),
        TurnOutcome::Dropped | TurnOutcome::Rejected => debug!(?outcome, "turn ignored"),
        TurnOutcome::TransportFailed | TurnOutcome::ParseExhausted => {
            warn!(?outcome, "turn aborted; previous choices restored")
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::float_cmp
    )]

    use super::*;
    use crate::config::IntroConfig;
    use crate::conversation::Role;
    use crate::playback::AudioClip;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    // ── Mocks ─────────────────────────────────────────────────────

    #[derive(Default)]
    struct Gate {
        entered: Notify,
        release: Notify,
    }

    #[derive(Default)]
    struct ScriptedChat {
        replies: Mutex<VecDeque<Result<String>>>,
        requests: Mutex<Vec<ChatRequest>>,
        gate: Option<Gate>,
    }

    impl ScriptedChat {
        fn with_replies(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        fn gated(replies: Vec<Result<String>>) -> Self {
            Self {
                gate: Some(Gate::default()),
                ..Self::with_replies(replies)
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedChat {
        async fn send(&self, request: &ChatRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(FortuneError::Transport("no scripted reply".into())))
        }
    }

    #[derive(Clone, Copy)]
    enum SpeechMode {
        Clip,
        Empty,
        Fail,
    }

    struct ScriptedSpeech {
        mode: SpeechMode,
        requests: Mutex<Vec<SpeechRequest>>,
    }

    impl ScriptedSpeech {
        fn new(mode: SpeechMode) -> Self {
            Self {
                mode,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SpeechTransport for ScriptedSpeech {
        async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioClip> {
            self.requests.lock().unwrap().push(request.clone());
            match self.mode {
                SpeechMode::Clip => Ok(AudioClip::new(vec![1u8; 32], Some("audio/mpeg".into()))),
                SpeechMode::Empty => Ok(AudioClip::default()),
                SpeechMode::Fail => Err(FortuneError::Auth("bad key".into())),
            }
        }
    }

    #[derive(Default)]
    struct CountingFailParser {
        calls: AtomicUsize,
    }

    impl ReplyParser for CountingFailParser {
        fn parse(&self, _payload: &str) -> ParseOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ParseOutcome::Failure {
                reason: "always fails".into(),
            }
        }
    }

    /// Accepts anything as a reply with nothing to say.
    struct SilentReplyParser;

    impl ReplyParser for SilentReplyParser {
        fn parse(&self, _payload: &str) -> ParseOutcome {
            let response = FortuneResponse::new("", &["Wait", "Listen"]);
            ParseOutcome::Success {
                canonical_json: response.to_canonical_json(),
                response,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum UiCall {
        Text(String),
        Choices([String; 3]),
        Interactable(bool),
        Visible(bool),
    }

    #[derive(Default)]
    struct RecordingUi {
        calls: Mutex<Vec<UiCall>>,
    }

    impl RecordingUi {
        fn calls(&self) -> Vec<UiCall> {
            self.calls.lock().unwrap().clone()
        }

        fn last_choices(&self) -> Option<[String; 3]> {
            self.calls().into_iter().rev().find_map(|c| match c {
                UiCall::Choices(c) => Some(c),
                _ => None,
            })
        }

        fn last_interactable(&self) -> Option<bool> {
            self.calls().into_iter().rev().find_map(|c| match c {
                UiCall::Interactable(b) => Some(b),
                _ => None,
            })
        }
    }

    impl ReadingUi for RecordingUi {
        fn display_text(&self, text: &str) {
            self.calls.lock().unwrap().push(UiCall::Text(text.to_owned()));
        }
        fn present_choices(&self, choices: &[String; 3]) {
            self.calls.lock().unwrap().push(UiCall::Choices(choices.clone()));
        }
        fn set_interactable(&self, interactable: bool) {
            self.calls
                .lock()
                .unwrap()
                .push(UiCall::Interactable(interactable));
        }
        fn set_visible(&self, visible: bool) {
            self.calls.lock().unwrap().push(UiCall::Visible(visible));
        }
    }

    #[derive(Default)]
    struct RecordingOutput {
        plays: AtomicUsize,
        stops: AtomicUsize,
        gate: Option<Gate>,
    }

    #[async_trait]
    impl AudioOutput for RecordingOutput {
        async fn play(&self, _clip: &AudioClip) -> Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingAnimator {
        calls: Mutex<Vec<bool>>,
    }

    impl Animator for RecordingAnimator {
        fn set_bool(&self, name: &str, value: bool) {
            assert_eq!(name, "isTalking");
            self.calls.lock().unwrap().push(value);
        }
    }

    // ── Helpers ───────────────────────────────────────────────────

    fn reply(spoken: &str, choices: &[&str]) -> Result<String> {
        let content = serde_json::json!({ "spoken": spoken, "choices": choices }).to_string();
        Ok(serde_json::json!({ "choices": [{ "message": { "content": content } }] }).to_string())
    }

    struct Harness {
        orch: Orchestrator,
        chat: Arc<ScriptedChat>,
        ui: Arc<RecordingUi>,
        output: Arc<RecordingOutput>,
        animator: Arc<RecordingAnimator>,
    }

    fn harness(
        config: FortuneConfig,
        chat: ScriptedChat,
        speech: Option<Arc<ScriptedSpeech>>,
        parser: Option<Arc<dyn ReplyParser>>,
        output: RecordingOutput,
    ) -> Harness {
        let chat = Arc::new(chat);
        let ui = Arc::new(RecordingUi::default());
        let output = Arc::new(output);
        let animator = Arc::new(RecordingAnimator::default());

        let mut collaborators = Collaborators::new(chat.clone(), ui.clone())
            .with_output(output.clone())
            .with_animator(animator.clone());
        if let Some(speech) = speech {
            collaborators = collaborators.with_speech(speech);
        }
        if let Some(parser) = parser {
            collaborators = collaborators.with_parser(parser);
        }

        Harness {
            orch: Orchestrator::new(config, collaborators),
            chat,
            ui,
            output,
            animator,
        }
    }

    fn scripted_config() -> FortuneConfig {
        let mut config = FortuneConfig::default();
        config.intro = IntroConfig {
            clip: None,
            text: String::new(),
            question: "What brings you to the cards?".into(),
            choices: vec!["Love".into(), "Money".into(), "Health".into()],
        };
        config
    }

    // ── Tests ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn opening_turn_then_choice_end_to_end() {
        let speech = Arc::new(ScriptedSpeech::new(SpeechMode::Clip));
        let h = harness(
            FortuneConfig::default(),
            ScriptedChat::with_replies(vec![
                reply("The stars align.", &["Ask about love", "Ask about work", "Leave"]),
                reply("Love is near.", &["More", "Less", "Leave"]),
            ]),
            Some(speech.clone()),
            None,
            RecordingOutput::default(),
        );

        let outcome = h.orch.start().await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(h.orch.state(), ConversationState::SteadyState);

        let transcript = h.orch.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].role, Role::System);
        assert_eq!(transcript[1], ChatMessage::user("Greet me and begin the reading."));
        assert_eq!(transcript[2].role, Role::Assistant);
        let logged: serde_json::Value = serde_json::from_str(&transcript[2].content).unwrap();
        assert_eq!(logged["spoken"], "The stars align.");

        assert_eq!(speech.requests.lock().unwrap()[0].text, "The stars align.");
        assert_eq!(h.output.plays.load(Ordering::SeqCst), 1);
        assert_eq!(*h.animator.calls.lock().unwrap(), vec![true, false]);
        assert!(h.ui.calls().contains(&UiCall::Text("The stars align.".into())));
        assert_eq!(
            h.ui.last_choices().unwrap(),
            ["Ask about love", "Ask about work", "Leave"].map(String::from)
        );

        let outcome = h.orch.select_choice(1).await;
        assert!(outcome.is_completed());
        let transcript = h.orch.transcript();
        assert_eq!(transcript.len(), 5);
        assert_eq!(transcript[3], ChatMessage::user("Ask about work"));
        let second = &h.chat.requests.lock().unwrap()[1];
        assert_eq!(second.messages.last().unwrap(), &ChatMessage::user("Ask about work"));
        assert!(!h.orch.is_request_in_flight());
    }

    #[tokio::test]
    async fn parse_failures_retry_three_times_then_restore() {
        let parser = Arc::new(CountingFailParser::default());
        let h = harness(
            scripted_config(),
            ScriptedChat::with_replies(vec![
                reply("a", &[]),
                reply("b", &[]),
                reply("c", &[]),
                reply("never sent", &[]),
            ]),
            None,
            Some(parser.clone()),
            RecordingOutput::default(),
        );

        assert!(h.orch.start().await.is_none());
        let before = h.orch.current_choices().unwrap();
        let outcome = h.orch.select_choice(0).await;

        assert_eq!(outcome, TurnOutcome::ParseExhausted);
        assert_eq!(parser.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.chat.calls(), 3);

        let transcript = h.orch.transcript();
        // system, question, choice, corrective, corrective
        assert_eq!(transcript.len(), 5);
        assert_eq!(transcript[2], ChatMessage::user("Love"));
        assert_eq!(transcript[3], ChatMessage::user(CORRECTIVE_INSTRUCTION));
        assert_eq!(transcript[4], ChatMessage::user(CORRECTIVE_INSTRUCTION));

        assert_eq!(h.orch.current_choices().unwrap(), before);
        assert_eq!(h.ui.last_choices().unwrap(), before);
        assert_eq!(h.ui.last_interactable(), Some(true));
        assert!(h.orch.state().accepts_input());
        assert!(!h.orch.is_request_in_flight());
    }

    #[tokio::test]
    async fn retry_succeeds_on_second_attempt() {
        let h = harness(
            FortuneConfig::default(),
            ScriptedChat::with_replies(vec![
                Ok("I refuse to use JSON.".into()),
                reply("Fine.", &["One", "Two", "Three"]),
            ]),
            None,
            None,
            RecordingOutput::default(),
        );

        assert!(h.orch.start().await.unwrap().is_completed());
        let transcript = h.orch.transcript();
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[2], ChatMessage::user(CORRECTIVE_INSTRUCTION));
        assert_eq!(transcript[3].role, Role::Assistant);
        assert_eq!(h.chat.calls(), 2);
    }

    #[tokio::test]
    async fn transport_failure_aborts_without_retry() {
        let h = harness(
            scripted_config(),
            ScriptedChat::with_replies(vec![Err(FortuneError::Transport("refused".into()))]),
            None,
            None,
            RecordingOutput::default(),
        );

        h.orch.start().await;
        let outcome = h.orch.select_choice(2).await;

        assert_eq!(outcome, TurnOutcome::TransportFailed);
        assert_eq!(h.chat.calls(), 1);
        let transcript = h.orch.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[2], ChatMessage::user("Health"));
        assert_eq!(h.ui.last_interactable(), Some(true));
        assert_eq!(h.orch.current_choices().unwrap()[0], "Love");
    }

    #[tokio::test]
    async fn transport_failure_on_retry_restores_choices() {
        let h = harness(
            scripted_config(),
            ScriptedChat::with_replies(vec![
                Ok("The cards are silent.".into()),
                Err(FortuneError::Transport("reset by peer".into())),
                reply("never sent", &["a", "b", "c"]),
            ]),
            None,
            None,
            RecordingOutput::default(),
        );

        h.orch.start().await;
        let before = h.orch.current_choices().unwrap();
        let outcome = h.orch.select_choice(0).await;

        assert_eq!(outcome, TurnOutcome::TransportFailed);
        assert_eq!(h.chat.calls(), 2);
        let transcript = h.orch.transcript();
        assert_eq!(
            transcript[transcript.len() - 2..],
            [
                ChatMessage::user("Love"),
                ChatMessage::user(CORRECTIVE_INSTRUCTION)
            ]
        );
        assert_eq!(h.orch.current_choices().unwrap(), before);
        assert_eq!(h.ui.last_choices().unwrap(), before);
        assert_eq!(h.ui.last_interactable(), Some(true));
        assert_eq!(h.orch.state(), ConversationState::IntroQuestion);
        assert!(!h.orch.is_request_in_flight());
    }

    #[tokio::test]
    async fn second_trigger_while_in_flight_is_dropped() {
        let h = harness(
            scripted_config(),
            ScriptedChat::gated(vec![reply("Hm.", &["x", "y", "z"])]),
            None,
            None,
            RecordingOutput::default(),
        );
        h.orch.start().await;
        let gate = h.chat.gate.as_ref().unwrap();

        let first = h.orch.select_choice(0);
        tokio::pin!(first);
        tokio::select! {
            _ = &mut first => panic!("first turn finished before the transport was released"),
            () = gate.entered.notified() => {}
        }

        assert!(h.orch.is_request_in_flight());
        assert_eq!(h.orch.state(), ConversationState::RequestInFlight);
        let len = h.orch.transcript().len();

        assert_eq!(h.orch.select_choice(1).await, TurnOutcome::Dropped);
        assert_eq!(h.orch.submit("hurry up").await, TurnOutcome::Dropped);
        assert_eq!(h.orch.transcript().len(), len);
        assert_eq!(h.chat.calls(), 1);

        gate.release.notify_one();
        assert!(first.await.is_completed());
        assert!(!h.orch.is_request_in_flight());
    }

    #[tokio::test]
    async fn missing_speech_credentials_fall_back_to_text() {
        let h = harness(
            FortuneConfig::default(),
            ScriptedChat::with_replies(vec![reply("*whispers* Hello [pause]", &[])]),
            None,
            None,
            RecordingOutput::default(),
        );

        let outcome = h.orch.start().await.unwrap();
        assert!(outcome.is_completed());
        assert!(h.ui.calls().contains(&UiCall::Text("Hello".into())));
        assert_eq!(h.output.plays.load(Ordering::SeqCst), 0);
        assert!(h.animator.calls.lock().unwrap().is_empty());
        assert_eq!(
            h.orch.current_choices().unwrap(),
            crate::reply::DEFAULT_CHOICES.map(String::from)
        );
    }

    #[tokio::test]
    async fn speech_failure_and_empty_clip_fall_back_to_text() {
        for mode in [SpeechMode::Fail, SpeechMode::Empty] {
            let speech = Arc::new(ScriptedSpeech::new(mode));
            let h = harness(
                FortuneConfig::default(),
                ScriptedChat::with_replies(vec![reply("Beware.", &["a", "b", "c"])]),
                Some(speech.clone()),
                None,
                RecordingOutput::default(),
            );

            assert!(h.orch.start().await.unwrap().is_completed());
            assert_eq!(speech.requests.lock().unwrap().len(), 1);
            assert_eq!(h.output.plays.load(Ordering::SeqCst), 0);
            assert!(h.ui.calls().contains(&UiCall::Text("Beware.".into())));
            assert_eq!(h.ui.last_interactable(), Some(true));
            assert_eq!(h.orch.state(), ConversationState::SteadyState);
        }
    }

    #[tokio::test]
    async fn empty_spoken_presents_choices_without_speaking() {
        let speech = Arc::new(ScriptedSpeech::new(SpeechMode::Clip));
        let h = harness(
            FortuneConfig::default(),
            ScriptedChat::with_replies(vec![Ok("anything".into())]),
            Some(speech.clone()),
            Some(Arc::new(SilentReplyParser)),
            RecordingOutput::default(),
        );

        assert!(h.orch.start().await.unwrap().is_completed());
        assert!(speech.requests.lock().unwrap().is_empty());
        assert!(!h.ui.calls().iter().any(|c| matches!(c, UiCall::Text(_))));
        assert_eq!(
            h.ui.last_choices().unwrap(),
            ["Wait", "Listen", crate::reply::FILLER_CHOICE].map(String::from)
        );
        assert_eq!(h.orch.state(), ConversationState::SteadyState);
    }

    #[tokio::test]
    async fn speech_request_uses_snapped_settings() {
        let speech = Arc::new(ScriptedSpeech::new(SpeechMode::Clip));
        let mut config = FortuneConfig::default();
        config.speech.stability = 0.8;
        config.speech.similarity_boost = 3.0;
        let h = harness(
            config,
            ScriptedChat::with_replies(vec![reply("Hi", &["a", "b", "c"])]),
            Some(speech.clone()),
            None,
            RecordingOutput::default(),
        );

        h.orch.start().await;
        let request = speech.requests.lock().unwrap()[0].clone();
        assert_eq!(request.voice_settings.stability, 1.0);
        assert_eq!(request.voice_settings.similarity_boost, 1.0);
    }

    #[tokio::test]
    async fn scripted_question_never_contacts_chat() {
        let h = harness(
            scripted_config(),
            ScriptedChat::default(),
            None,
            None,
            RecordingOutput::default(),
        );

        assert!(h.orch.start().await.is_none());
        assert_eq!(h.chat.calls(), 0);
        assert_eq!(h.orch.state(), ConversationState::IntroQuestion);
        assert_eq!(
            h.orch.transcript()[1],
            ChatMessage::assistant("What brings you to the cards?")
        );
        assert_eq!(
            h.orch.current_choices().unwrap(),
            ["Love", "Money", "Health"].map(String::from)
        );
        assert!(h.ui.calls().contains(&UiCall::Visible(true)));
        assert_eq!(h.ui.last_interactable(), Some(true));
    }

    #[tokio::test]
    async fn skipping_intro_still_logs_intro_line() {
        let dir = tempfile::tempdir().unwrap();
        let clip_path = dir.path().join("intro.mp3");
        std::fs::write(&clip_path, b"ID3 not really audio").unwrap();

        let mut config = FortuneConfig::default();
        config.chat.opening_prompt = String::new();
        config.intro.clip = Some(clip_path);
        config.intro.text = "Welcome, (softly) seeker.".into();

        let h = harness(
            config,
            ScriptedChat::default(),
            None,
            None,
            RecordingOutput {
                gate: Some(Gate::default()),
                ..RecordingOutput::default()
            },
        );
        let gate = h.output.gate.as_ref().unwrap();

        let start = h.orch.start();
        tokio::pin!(start);
        tokio::select! {
            _ = &mut start => panic!("intro finished before it was skipped"),
            () = gate.entered.notified() => {}
        }
        assert_eq!(h.orch.state(), ConversationState::IntroPlayback);
        assert!(h.orch.skip());

        assert!(start.await.is_none());
        assert_eq!(h.output.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.orch.transcript()[1], ChatMessage::assistant("Welcome, seeker."));
        assert_eq!(h.orch.state(), ConversationState::SteadyState);
        assert_eq!(h.chat.calls(), 0);
    }

    #[tokio::test]
    async fn turns_are_dropped_while_intro_plays() {
        let dir = tempfile::tempdir().unwrap();
        let clip_path = dir.path().join("intro.mp3");
        std::fs::write(&clip_path, b"ID3 not really audio").unwrap();

        let mut config = FortuneConfig::default();
        config.chat.opening_prompt = String::new();
        config.intro.clip = Some(clip_path);
        config.intro.text = "Welcome.".into();

        let h = harness(
            config,
            ScriptedChat::with_replies(vec![reply("Hi", &["a", "b", "c"])]),
            None,
            None,
            RecordingOutput {
                gate: Some(Gate::default()),
                ..RecordingOutput::default()
            },
        );
        let gate = h.output.gate.as_ref().unwrap();

        let start = h.orch.start();
        tokio::pin!(start);
        tokio::select! {
            _ = &mut start => panic!("intro finished before release"),
            () = gate.entered.notified() => {}
        }

        assert_eq!(h.orch.submit("hello").await, TurnOutcome::Dropped);
        assert_eq!(h.orch.select_choice(0).await, TurnOutcome::Dropped);
        assert_eq!(h.chat.calls(), 0);
        assert_eq!(h.orch.transcript().len(), 1);
        assert_eq!(h.output.plays.load(Ordering::SeqCst), 1);

        assert!(h.orch.skip());
        assert!(start.await.is_none());
        let transcript = h.orch.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::System);
        assert_eq!(transcript[1], ChatMessage::assistant("Welcome."));

        assert!(h.orch.submit("hello").await.is_completed());
        assert_eq!(h.orch.transcript()[2], ChatMessage::user("hello"));
    }

    #[tokio::test]
    async fn speech_is_not_skippable() {
        let speech = Arc::new(ScriptedSpeech::new(SpeechMode::Clip));
        let h = harness(
            FortuneConfig::default(),
            ScriptedChat::with_replies(vec![reply("Listen.", &["a", "b", "c"])]),
            Some(speech),
            None,
            RecordingOutput {
                gate: Some(Gate::default()),
                ..RecordingOutput::default()
            },
        );
        let gate = h.output.gate.as_ref().unwrap();

        let start = h.orch.start();
        tokio::pin!(start);
        tokio::select! {
            _ = &mut start => panic!("speech finished before release"),
            () = gate.entered.notified() => {}
        }
        assert_eq!(h.orch.state(), ConversationState::SpeechPlayback);
        assert!(!h.orch.skip());

        gate.release.notify_one();
        assert!(start.await.unwrap().is_completed());
        assert_eq!(h.output.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_selections_are_rejected_without_side_effects() {
        let h = harness(
            scripted_config(),
            ScriptedChat::default(),
            None,
            None,
            RecordingOutput::default(),
        );

        assert_eq!(h.orch.select_choice(0).await, TurnOutcome::Dropped);
        h.orch.start().await;
        let len = h.orch.transcript().len();
        assert_eq!(h.orch.select_choice(3).await, TurnOutcome::Rejected);
        assert_eq!(h.orch.submit("   ").await, TurnOutcome::Rejected);
        assert_eq!(h.orch.transcript().len(), len);
        assert_eq!(h.chat.calls(), 0);
    }

    #[tokio::test]
    async fn start_twice_is_a_noop() {
        let h = harness(
            scripted_config(),
            ScriptedChat::default(),
            None,
            None,
            RecordingOutput::default(),
        );
        h.orch.start().await;
        let len = h.orch.transcript().len();
        assert!(h.orch.start().await.is_none());
        assert_eq!(h.orch.transcript().len(), len);
    }

    #[tokio::test]
    async fn run_dispatches_events_until_channel_closes() {
        let h = harness(
            scripted_config(),
            ScriptedChat::with_replies(vec![reply("Money flows.", &["a", "b", "c"])]),
            None,
            None,
            RecordingOutput::default(),
        );
        let (tx, rx) = mpsc::channel(8);
        tx.send(UiEvent::SkipRequested).await.unwrap();
        tx.send(UiEvent::ChoiceSelected(1)).await.unwrap();
        drop(tx);

        h.orch.run(rx, CancellationToken::new()).await.unwrap();

        let transcript = h.orch.transcript();
        assert_eq!(transcript[2], ChatMessage::user("Money"));
        assert_eq!(transcript[3].role, Role::Assistant);
        assert_eq!(h.orch.current_choices().unwrap(), ["a", "b", "c"].map(String::from));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness(
            scripted_config(),
            ScriptedChat::default(),
            None,
            None,
            RecordingOutput::default(),
        );
        let (_tx, rx) = mpsc::channel::<UiEvent>(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        h.orch.run(rx, shutdown).await.unwrap();
        assert_eq!(h.output.stops.load(Ordering::SeqCst), 1);
    }
}
