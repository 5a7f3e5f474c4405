pub mod aggregator;
pub mod converter;
pub mod ring_buffer;
pub mod wav_format;
