pub mod assembler;
pub mod configuration;
pub mod emulator;
pub mod error;
pub mod port;
pub mod properties;
pub mod reader;
pub mod registers;
pub mod session;
pub mod state;
pub mod waveform;

pub use crate::assembler::RowStatus;
pub use crate::configuration::Configuration;
pub use crate::emulator::Emulator;
pub use crate::error::Error;
pub use crate::port::Configuration as PortConfiguration;
pub use crate::port::Port;
pub use crate::properties::PROPERTIES;
pub use crate::registers::AdcMode;
pub use crate::session::Session;
pub use crate::state::State;

pub use bincode;
pub use libc;
