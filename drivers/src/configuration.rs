use crate::waveform;

/// Durations of the row program, in sequencer ticks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Timing {
    pub settle: u32,
    pub serial_shift: u32,
    pub reset_gate: u32,
    pub summing_well: u32,
    pub dc_restore: u32,
    pub integrate: u32,
    pub dump: u32,
    pub hold: u32,
    pub convert: u32,
    pub parallel: u32,
    pub rearm: u32,
}

/// Words the FPGA appends after each row's payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Trailer {
    Crc,
    CrcAndRow,
}

/// States from which a row read is accepted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LineTolerance {
    Armed,
    /// Also resume after a row interrupted by a stall.
    ArmedOrReading,
}

/// Clock lines forced to a fixed level during row programs.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Hold {
    pub on: Vec<waveform::Signal>,
    pub off: Vec<waveform::Signal>,
}

impl Hold {
    pub fn is_empty(&self) -> bool {
        self.on.is_empty() && self.off.is_empty()
    }

    /// Returns `levels` with the held lines forced, `off` applied last.
    pub fn apply(&self, mut levels: waveform::Levels) -> waveform::Levels {
        for signal in &self.on {
            levels.set(*signal);
        }
        for signal in &self.off {
            levels.clear(*signal);
        }
        levels
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Polling {
    pub interval: std::time::Duration,
    pub maximum_polls: u32,
    pub filler_words: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Configuration {
    pub timing: Timing,
    pub hold: Hold,
    pub trailer: Trailer,
    pub line_tolerance: LineTolerance,
    pub polling: Polling,
    pub reset_settle: std::time::Duration,
    pub arm_settle: std::time::Duration,
    pub progress_interval: u32,
}

impl Configuration {
    pub fn deserialize_bincode(data: &[u8]) -> bincode::Result<Configuration> {
        bincode::deserialize(data)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        crate::properties::PROPERTIES.default_configuration
    }
}
