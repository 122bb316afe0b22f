pub mod playback;
pub mod service;

pub use playback::{AudioPlayer, DecodedClip, NoopPlayer, decode_clip};
pub use service::{AssistantService, ServiceSnapshot, user_facing_audio_error};
