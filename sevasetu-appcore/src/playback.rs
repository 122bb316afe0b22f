use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use sevasetu_core::TtsClip;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedClip {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Plays synthesized speech. Implementations must return quickly; playback itself
/// runs elsewhere and ends with a call to `AssistantService::playback_finished`.
pub trait AudioPlayer: Send + Sync {
    /// Returns `Ok(true)` once audio is actually playing, `Ok(false)` when the clip
    /// was accepted but nothing will be heard.
    fn play(&self, clip: &DecodedClip) -> anyhow::Result<bool>;

    fn stop(&self);
}

/// Drops every clip. Used when the host has no audio output wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPlayer;

impl AudioPlayer for NoopPlayer {
    fn play(&self, clip: &DecodedClip) -> anyhow::Result<bool> {
        log::debug!("Dropping {} bytes of {}", clip.bytes.len(), clip.mime_type);
        Ok(false)
    }

    fn stop(&self) {}
}

pub fn decode_clip(clip: &TtsClip) -> anyhow::Result<DecodedClip> {
    let bytes = STANDARD
        .decode(clip.audio_b64.trim())
        .context("decode TTS audio base64")?;
    if bytes.is_empty() {
        anyhow::bail!("TTS audio is empty");
    }
    Ok(DecodedClip {
        mime_type: clip.mime_type.clone(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_valid_clip() {
        let clip = TtsClip {
            mime_type: "audio/wav".into(),
            audio_b64: STANDARD.encode(b"RIFF0000WAVE"),
        };
        let decoded = decode_clip(&clip).unwrap();
        assert_eq!(decoded.bytes, b"RIFF0000WAVE");
        assert_eq!(decoded.mime_type, "audio/wav");
    }

    #[test]
    fn rejects_garbage() {
        let clip = TtsClip {
            mime_type: "audio/wav".into(),
            audio_b64: "***".into(),
        };
        assert!(decode_clip(&clip).is_err());
    }

    #[test]
    fn noop_player_reports_nothing_playing() {
        let clip = DecodedClip {
            mime_type: "audio/wav".into(),
            bytes: b"RIFF".to_vec(),
        };
        assert!(!NoopPlayer.play(&clip).unwrap());
    }
}
