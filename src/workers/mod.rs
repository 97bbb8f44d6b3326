pub mod encoder;
pub mod transcoder;
