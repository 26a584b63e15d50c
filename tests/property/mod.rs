//! Property-based tests

mod channels_proptest;
mod codec_proptest;
