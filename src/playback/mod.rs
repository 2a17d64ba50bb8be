//! Audio clips, the output seam and speech/animation synchronisation.

mod synchronizer;

pub use synchronizer::{PlaybackOutcome, PlaybackSynchronizer};

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::config::MusicConfig;
use crate::error::Result;

/// Encoded audio (mp3, wav, ...) as returned by the speech endpoint or read
/// from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioClip {
    /// Encoded audio bytes.
    pub bytes: Bytes,
    /// MIME type when known, e.g. `audio/mpeg`.
    pub content_type: Option<String>,
}

impl AudioClip {
    /// Wrap encoded bytes.
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }

    /// Whether the clip carries no audio at all.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Length of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Read an audio file into a clip, guessing the MIME type from its extension.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn load_clip(path: &Path) -> Result<AudioClip> {
    let bytes = std::fs::read(path)?;
    let content_type = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(mime_for_extension)
        .map(String::from);
    Ok(AudioClip::new(bytes, content_type))
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        "m4a" | "mp4" => Some("audio/mp4"),
        "aac" => Some("audio/aac"),
        _ => None,
    }
}

/// Device (or virtual) audio output.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play a clip, resolving once it has finished or been stopped.
    async fn play(&self, clip: &AudioClip) -> Result<()>;

    /// Stop whatever [`play`](Self::play) is currently doing.
    fn stop(&self);

    /// Start a music clip on a separate channel that never blocks turns.
    fn start_background(&self, clip: &AudioClip, music: &MusicConfig) -> Result<()> {
        let _ = (clip, music);
        warn!("background music not supported by this audio output");
        Ok(())
    }
}

/// Output that plays nothing and finishes immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentOutput;

#[async_trait]
impl AudioOutput for SilentOutput {
    async fn play(&self, _clip: &AudioClip) -> Result<()> {
        Ok(())
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn load_clip_reads_bytes_and_guesses_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intro.MP3");
        std::fs::write(&path, b"ID3fake").unwrap();

        let clip = load_clip(&path).unwrap();
        assert_eq!(clip.len(), 7);
        assert_eq!(clip.content_type.as_deref(), Some("audio/mpeg"));
    }

    #[test]
    fn load_clip_unknown_extension_has_no_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("music.bin");
        std::fs::write(&path, b"x").unwrap();
        assert!(load_clip(&path).unwrap().content_type.is_none());
    }

    #[test]
    fn load_clip_missing_file_is_io_error() {
        let err = load_clip(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
    }

    #[test]
    fn empty_clip_is_degenerate() {
        assert!(AudioClip::default().is_empty());
        assert!(!AudioClip::new(vec![1u8], None).is_empty());
    }

    #[tokio::test]
    async fn silent_output_completes() {
        let output = SilentOutput;
        output.play(&AudioClip::new(vec![1u8], None)).await.unwrap();
        output
            .start_background(&AudioClip::default(), &MusicConfig::default())
            .unwrap();
    }
}
