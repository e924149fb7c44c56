mod sample;

pub use sample::*;
