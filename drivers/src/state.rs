use crate::configuration;
use crate::error::Error;

/// Lifecycle of a readout session.
///
/// `Unknown` covers the moments between a control write and the settle
/// delay that follows it, and any sequence interrupted by a register
/// error. `Failed` is entered when an upload is aborted and on release.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum State {
    Off,
    Unknown,
    Idle,
    Armed,
    Reading,
    Failed,
}

impl std::fmt::Display for State {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            Self::Off => "OFF",
            Self::Unknown => "UNKNOWN",
            Self::Idle => "IDLE",
            Self::Armed => "ARMED",
            Self::Reading => "READING",
            Self::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operation {
    Configure,
    Reset,
    Upload,
    Arm,
    ReadLine,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            Self::Configure => "configure",
            Self::Reset => "reset",
            Self::Upload => "upload",
            Self::Arm => "arm",
            Self::ReadLine => "read line",
        })
    }
}

/// Legal source states of an operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Expected(pub &'static [State]);

impl std::fmt::Display for Expected {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, state) in self.0.iter().enumerate() {
            if index > 0 {
                formatter.write_str(" or ")?;
            }
            write!(formatter, "{state}")?;
        }
        Ok(())
    }
}

impl State {
    fn require(
        self,
        operation: Operation,
        legal: &'static [State],
        target: State,
    ) -> Result<State, Error> {
        if legal.contains(&self) {
            Ok(target)
        } else {
            Err(Error::State {
                operation,
                expected: Expected(legal),
                actual: self,
            })
        }
    }

    pub fn configure(self) -> Result<State, Error> {
        self.require(Operation::Configure, &[State::Off], State::Idle)
    }

    /// A forced reset clamps any state to `Idle`.
    pub fn reset(self, force: bool) -> Result<State, Error> {
        if force {
            Ok(State::Idle)
        } else {
            self.require(Operation::Reset, &[State::Idle], State::Idle)
        }
    }

    pub fn upload(self) -> Result<State, Error> {
        self.require(Operation::Upload, &[State::Idle], State::Idle)
    }

    pub fn arm(self) -> Result<State, Error> {
        self.require(Operation::Arm, &[State::Idle], State::Armed)
    }

    pub fn begin_line(self, tolerance: configuration::LineTolerance) -> Result<State, Error> {
        match tolerance {
            configuration::LineTolerance::Armed => {
                self.require(Operation::ReadLine, &[State::Armed], State::Reading)
            }
            configuration::LineTolerance::ArmedOrReading => self.require(
                Operation::ReadLine,
                &[State::Armed, State::Reading],
                State::Reading,
            ),
        }
    }

    pub fn end_line(self) -> Result<State, Error> {
        self.require(Operation::ReadLine, &[State::Reading], State::Armed)
    }

    pub fn finish(self) -> State {
        State::Idle
    }

    /// The session passes through `Failed` while the hardware is torn down.
    pub fn release(self) -> State {
        State::Off
    }
}
