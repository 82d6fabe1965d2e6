//! Audio sources and the chunk container.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod encoder;
pub mod recorder;
pub mod wav;
