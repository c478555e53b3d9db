//! # Audio Module
//!
//! Audio handling for the voice pipeline, independent of any transport:
//!
//! - **codec**: stateless conversions between float samples, 16-bit PCM,
//!   resampled rates, and base64 wire encoding, plus volume measurement
//! - **playback**: the ordered playback queue that plays asynchronously
//!   arriving synthesized-audio fragments strictly in arrival order
//!
//! ## Audio Format:
//! The pipeline works in 16-bit little-endian mono PCM throughout. Microphone
//! input arrives at 16kHz; the live model produces 24kHz output.

pub mod codec;
pub mod playback;
