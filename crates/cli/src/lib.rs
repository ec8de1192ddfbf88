//! Library side of the `image-tagger` binary.
pub mod report;
