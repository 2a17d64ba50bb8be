use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{AudioClip, AudioOutput};
use crate::ui::Animator;

/// How a [`PlaybackSynchronizer::play`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The clip played to the end.
    Completed,
    /// A skip stopped the clip early.
    Cancelled,
    /// The output could not play the clip.
    Failed(String),
}

struct PlaybackSession {
    id: Uuid,
    token: CancellationToken,
    skippable: bool,
}

/// Plays one clip at a time and keeps the talking flag in step with it.
pub struct PlaybackSynchronizer {
    output: Arc<dyn AudioOutput>,
    animator: Arc<dyn Animator>,
    talking_param: String,
    session: Mutex<Option<PlaybackSession>>,
}

impl PlaybackSynchronizer {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        animator: Arc<dyn Animator>,
        talking_param: impl Into<String>,
    ) -> Self {
        Self {
            output,
            animator,
            talking_param: talking_param.into(),
            session: Mutex::new(None),
        }
    }

    /// The output this synchronizer drives.
    pub fn output(&self) -> &Arc<dyn AudioOutput> {
        &self.output
    }

    /// Play `clip`, raising the talking flag for its duration.
    ///
    /// Only `skippable` sessions react to [`skip`](Self::skip). The talking
    /// flag is lowered on every exit path.
    pub async fn play(&self, clip: &AudioClip, skippable: bool) -> PlaybackOutcome {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        *self.lock() = Some(PlaybackSession {
            id,
            token: token.clone(),
            skippable,
        });
        debug!(%id, skippable, bytes = clip.len(), "playback started");

        self.animator.set_bool(&self.talking_param, true);
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => {
                self.output.stop();
                PlaybackOutcome::Cancelled
            }
            result = self.output.play(clip) => match result {
                Ok(()) => PlaybackOutcome::Completed,
                Err(e) => {
                    warn!(%id, error = %e, "playback failed");
                    PlaybackOutcome::Failed(e.message())
                }
            },
        };
        self.animator.set_bool(&self.talking_param, false);

        let mut session = self.lock();
        if session.as_ref().is_some_and(|s| s.id == id) {
            *session = None;
        }
        debug!(%id, ?outcome, "playback ended");
        outcome
    }

    /// Cancel the current session if it is skippable.
    ///
    /// Returns `true` when something was cancelled.
    pub fn skip(&self) -> bool {
        match self.lock().as_ref() {
            Some(session) if session.skippable && !session.token.is_cancelled() => {
                session.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Whether a clip is currently playing.
    #[cfg(test)]
    fn is_playing(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<PlaybackSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
