// src/nmea/mod.rs
pub mod codec;
pub mod parser;
pub mod sentence;
pub mod state;

pub use parser::NmeaParser;
pub use sentence::{Frame, Sentence, Talker};
pub use state::{CycleMode, NmeaState};
