//! Clock sequencing programs.
//!
//! The FPGA's waveform unit walks a table of 32-bit opcodes. The high 17
//! bits hold the level of every clock line, the low 15 bits hold how many
//! ticks those levels are driven for.

use crate::configuration;
use crate::error::Error;

/// Duration of one sequencer tick.
pub const TICK: std::time::Duration = std::time::Duration::from_nanos(40);

pub const DURATION_MASK: u32 = (1 << 15) - 1;

pub const STATE_MASK: u32 = !DURATION_MASK;

/// Capacity of the sequencer's block RAM, in opcodes.
pub const SEQUENCE_MEMORY_WORDS: u32 = 8192;

macro_rules! signals {
    ($($name:ident: $bit:literal, $description:literal),+ $(,)?) => {
        paste::paste! {
            #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
            pub enum Signal {
                $(
                    [<$name:camel>],
                )+
            }

            impl Signal {
                pub const ALL: &'static [Signal] = &[
                    $(
                        Signal::[<$name:camel>],
                    )+
                ];

                pub fn bit(self) -> u32 {
                    match self {
                        $(
                            Self::[<$name:camel>] => $bit,
                        )+
                    }
                }

                pub fn label(self) -> &'static str {
                    match self {
                        $(
                            Self::[<$name:camel>] => stringify!([<$name:upper>]),
                        )+
                    }
                }

                pub fn description(self) -> &'static str {
                    match self {
                        $(
                            Self::[<$name:camel>] => $description,
                        )+
                    }
                }

                pub fn mask(self) -> u32 {
                    1 << self.bit()
                }
            }

            impl std::str::FromStr for Signal {
                type Err = ParseSignalError;

                fn from_str(string: &str) -> Result<Self, Self::Err> {
                    Signal::ALL
                        .iter()
                        .copied()
                        .find(|signal| signal.label().eq_ignore_ascii_case(string))
                        .ok_or_else(|| ParseSignalError { on: string.to_owned() })
                }
            }
        }
    };
}

signals! {
    crc: 15, "CRC Control",
    p1: 16, "Parallel 1",
    p2: 17, "Parallel 2",
    p3: 18, "Parallel 3",
    tg: 19, "Transfer Gate",
    s1: 20, "Serial 1",
    s2: 21, "Serial 2",
    rg: 22, "Reset Gate",
    sw: 23, "Summing Well",
    dcr: 24, "DC Restore",
    ir: 25, "Integrate Reset",
    i_m: 26, "Integrate Minus",
    i_p: 27, "Integrate Plus",
    cnv: 28, "ADC Convert",
    sck: 29, "ADC SCK Burst",
    dg: 30, "Drain Gate",
    irq: 31, "Interrupt",
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseSignalError {
    on: String,
}

impl std::fmt::Display for ParseSignalError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "unknown clock signal \"{}\"", self.on)
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Levels of every clock line, one bit per [`Signal`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Levels(u32);

impl Levels {
    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn set(&mut self, signal: Signal) -> &mut Self {
        self.0 |= signal.mask();
        self
    }

    pub fn clear(&mut self, signal: Signal) -> &mut Self {
        self.0 &= !signal.mask();
        self
    }

    pub fn is_set(self, signal: Signal) -> bool {
        self.0 & signal.mask() != 0
    }
}

/// A validated (levels, duration) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Opcode {
    state: u32,
    duration: u32,
}

impl Opcode {
    /// Returns `None` if `state` has bits in the duration field or
    /// `duration` has bits in the state field.
    pub fn new(state: u32, duration: u32) -> Option<Self> {
        if state & DURATION_MASK != 0 || duration & STATE_MASK != 0 {
            None
        } else {
            Some(Self { state, duration })
        }
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn word(&self) -> u32 {
        self.state | self.duration
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            state: word & STATE_MASK,
            duration: word & DURATION_MASK,
        }
    }
}

/// An ordered list of opcodes, validated as it is built.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Program {
    opcodes: Vec<Opcode>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the current levels for `duration` ticks.
    pub fn emit(&mut self, levels: Levels, duration: u32) -> Result<(), Error> {
        let opcode = Opcode::new(levels.bits(), duration).ok_or(Error::InvalidOpcode {
            index: self.opcodes.len(),
            state: levels.bits(),
            duration,
        })?;
        self.opcodes.push(opcode);
        Ok(())
    }

    pub fn push(&mut self, opcode: Opcode) {
        self.opcodes.push(opcode);
    }

    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }

    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    pub fn ticks(&self) -> u64 {
        self.opcodes
            .iter()
            .map(|opcode| opcode.duration() as u64)
            .sum()
    }

    /// Time the sequencer spends walking the program once.
    pub fn row_time(&self) -> std::time::Duration {
        TICK * self.ticks() as u32
    }

    pub fn readout_time(&self, rows: u32) -> std::time::Duration {
        self.row_time() * rows
    }
}

/// Builds the program that clocks out one row of `columns` pixels per
/// amplifier then shifts the parallel register by one row.
///
/// Lines named in `hold` keep their forced level in every opcode.
pub fn row_program(
    columns: u32,
    timing: &configuration::Timing,
    hold: &configuration::Hold,
) -> Result<Program, Error> {
    use Signal::*;
    let mut program = Program::new();
    let mut levels = Levels::default();
    levels
        .clear(P1)
        .set(P2)
        .clear(P3)
        .set(Tg)
        .set(S1)
        .clear(S2)
        .set(Rg)
        .set(Sw)
        .clear(Dcr)
        .clear(Ir)
        .clear(IM)
        .clear(IP)
        .set(Cnv)
        .clear(Sck)
        .set(Dg)
        .clear(Irq)
        .clear(Crc);
    program.emit(hold.apply(levels), timing.settle)?;

    for _ in 0..columns {
        // serial shift, reset gate low, ADC clock burst for the previous pixel
        levels
            .clear(S1)
            .set(S2)
            .clear(Rg)
            .set(Dcr)
            .set(Ir)
            .set(Sck);
        program.emit(hold.apply(levels), timing.serial_shift)?;

        levels.set(Rg).clear(Sck);
        program.emit(hold.apply(levels), timing.reset_gate)?;

        // charge into the summing well
        levels.set(S1).clear(S2).clear(Sw).clear(Ir).clear(Cnv);
        program.emit(hold.apply(levels), timing.summing_well)?;

        levels.clear(Dcr);
        program.emit(hold.apply(levels), timing.dc_restore)?;

        levels.set(IM);
        program.emit(hold.apply(levels), timing.integrate)?;

        levels.clear(IM).set(Sw);
        program.emit(hold.apply(levels), timing.dump)?;

        levels.set(IP);
        program.emit(hold.apply(levels), timing.integrate)?;

        levels.clear(IP);
        program.emit(hold.apply(levels), timing.hold)?;

        levels.set(Cnv);
        program.emit(hold.apply(levels), timing.convert)?;
    }

    // three-phase parallel transfer
    levels.set(P1).clear(Rg).set(Dcr);
    program.emit(hold.apply(levels), timing.parallel)?;

    levels.clear(P2).clear(Tg).set(Crc);
    program.emit(hold.apply(levels), timing.parallel)?;

    levels.set(P3).clear(Crc);
    program.emit(hold.apply(levels), timing.parallel)?;

    levels.clear(P1);
    program.emit(hold.apply(levels), timing.parallel)?;

    levels.set(P2).set(Tg);
    program.emit(hold.apply(levels), timing.parallel)?;

    levels.set(P1);
    program.emit(hold.apply(levels), timing.parallel)?;

    // reset gate re-armed and DC restore released together
    levels.set(Rg).clear(Dcr);
    program.emit(hold.apply(levels), timing.rearm)?;

    Ok(program)
}

/// Holds `on` high and `off` low, every other line low, for one settle
/// period. Used to park the clock lines between exposures.
pub fn levels_program(
    on: &[Signal],
    off: &[Signal],
    timing: &configuration::Timing,
) -> Result<Program, Error> {
    let mut program = Program::new();
    let mut levels = Levels::default();
    for signal in on {
        levels.set(*signal);
    }
    for signal in off {
        levels.clear(*signal);
    }
    program.emit(levels, timing.settle)?;
    Ok(program)
}
