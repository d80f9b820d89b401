//! Integration tests exercising the public accumulator API

pub mod fast_accumulator;
pub mod fixtures;
