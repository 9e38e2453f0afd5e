pub mod analysis;
pub mod features;
pub mod spectrum;
pub mod syllable;
pub mod vad;
