use crate::registers;
use crate::state;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("mapping {path:?} failed ({message})")]
    Mapping { path: String, message: String },

    #[error("register offset {offset:#06x} is outside the mapped window ({size:#x} bytes)")]
    OutOfBounds { offset: u32, size: usize },

    #[error("{operation} requires {expected}, the session is {actual}")]
    State {
        operation: state::Operation,
        expected: state::Expected,
        actual: state::State,
    },

    #[error("opcode {index} is invalid (state {state:#010x}, duration {duration:#x})")]
    InvalidOpcode { index: usize, state: u32, duration: u32 },

    #[error("no opcode has been uploaded since the last reset")]
    EmptyProgram,

    #[error("the program needs {required} bytes of sequence memory ({available} available)")]
    ProgramOverflow { required: u32, available: u32 },

    #[error("the FIFO stalled ({polls} polls, {elapsed:?})")]
    Stalled {
        polls: u32,
        elapsed: std::time::Duration,
    },

    #[error("the buffer holds {actual} samples ({expected} expected)")]
    BufferSize { expected: usize, actual: usize },

    #[error("ADC mode {mode:?} is not available with {generation:?} converters")]
    AdcMode {
        mode: registers::AdcMode,
        generation: Option<registers::AdcGeneration>,
    },

    #[error("rows, columns and amplifiers must be strictly positive")]
    EmptyGeometry,
}
