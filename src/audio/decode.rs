use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{FortuneError, Result};
use crate::playback::AudioClip;

/// Decode an in-memory clip to mono f32 samples and its native sample rate.
///
/// Multi-channel audio is down-mixed by averaging.
///
/// # Errors
///
/// Returns [`FortuneError::Playback`] if the format cannot be probed or
/// decoded.
pub fn decode_to_mono_f32(clip: &AudioClip) -> Result<(Vec<f32>, u32)> {
    let source = Cursor::new(clip.bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    match clip.content_type.as_deref() {
        Some("audio/mpeg") => {
            hint.with_extension("mp3");
        }
        Some("audio/wav") | Some("audio/x-wav") => {
            hint.with_extension("wav");
        }
        Some(mime) => {
            hint.mime_type(mime);
        }
        None => {}
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| FortuneError::Playback(format!("unrecognised audio: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| FortuneError::Playback("clip has no audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| FortuneError::Playback("clip has no sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| FortuneError::Playback(format!("no decoder for clip: {e}")))?;

    let mut out = Vec::new();
    let mut buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(FortuneError::Playback(format!("audio read error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(FortuneError::Playback(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let frames = decoded.frames() as u64;
        let needed = usize::try_from(frames)
            .unwrap_or(usize::MAX)
            .saturating_mul(channels);
        if buf.as_ref().is_none_or(|b| b.capacity() < needed) {
            buf = Some(SampleBuffer::<f32>::new(frames, spec));
        }
        let Some(sample_buf) = buf.as_mut() else {
            continue;
        };
        sample_buf.copy_interleaved_ref(decoded);

        let data = sample_buf.samples();
        if channels == 1 {
            out.extend_from_slice(data);
        } else {
            out.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    Ok((out, sample_rate))
}

/// Linear-interpolation resampler for mono audio.
pub fn resample_linear_mono(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate || from_rate == 0 {
        return input.to_vec();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let out_len = (input.len() as f64 * ratio).round() as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let i0 = (pos.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let t = (pos - pos.floor()) as f32;
            input[i0] * (1.0 - t) + input[i1] * t
        })
        .collect()
}
