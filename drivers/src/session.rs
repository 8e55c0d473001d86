use crate::assembler;
use crate::configuration;
use crate::error::Error;
use crate::port;
use crate::port::Port;
use crate::reader::WordReader;
use crate::registers::{
    AdcGeneration, AdcMode, BramAddress, BramWriteData, Id, Register, WpuControl, WpuCount,
    WpuStartStop,
};
use crate::state::State;
use crate::waveform;

/// Exclusive owner of a mapped FPGA.
///
/// Every operation checks the lifecycle state first and leaves it unchanged
/// when the check fails. Dropping an armed session stops the clocks.
pub struct Session<P: Port> {
    port: P,
    state: State,
    configuration: configuration::Configuration,
    adc_generation: Option<AdcGeneration>,
    reader: WordReader,
    control: WpuControl,
    start: u32,
    cursor: u32,
    program: waveform::Program,
    row_buffer: Vec<u32>,
}

impl Session<port::Mmap> {
    pub fn open(
        port_configuration: &port::Configuration,
        configuration: configuration::Configuration,
    ) -> Result<Self, Error> {
        Self::configure(port::Mmap::open(port_configuration)?, configuration)
    }
}

impl<P: Port> Session<P> {
    pub fn configure(port: P, configuration: configuration::Configuration) -> Result<Self, Error> {
        let mut session = Self {
            port,
            state: State::Off,
            adc_generation: None,
            reader: WordReader::new(configuration.polling.clone()),
            configuration,
            control: WpuControl::default(),
            start: 0,
            cursor: 0,
            program: waveform::Program::new(),
            row_buffer: Vec::new(),
        };
        let target = session.state.configure()?;
        session.state = State::Unknown;
        match Id::read(&mut session.port) {
            Ok(id) => {
                session.adc_generation = id.adc_generation();
                match session.adc_generation {
                    Some(generation) => tracing::info!(
                        "FPGA version {:#06x} ({generation:?} ADC)",
                        id.fpga_version()
                    ),
                    None => tracing::warn!(
                        "FPGA version {:#06x} has an unknown ADC generation",
                        id.fpga_version()
                    ),
                }
                session.state = target;
                Ok(session)
            }
            Err(error) => {
                session.state = State::Off;
                Err(error)
            }
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn configuration(&self) -> &configuration::Configuration {
        &self.configuration
    }

    /// Opcodes uploaded since the last reset.
    pub fn program(&self) -> &waveform::Program {
        &self.program
    }

    /// Converter generation detected at configuration time.
    pub fn adc_generation(&self) -> Option<AdcGeneration> {
        self.adc_generation
    }

    /// Overrides the detected converter generation.
    pub fn set_adc_generation(&mut self, generation: AdcGeneration) {
        self.adc_generation = Some(generation);
    }

    /// Forces `on` high and `off` low in every opcode of the row programs
    /// built from now on. `off` wins for a line named in both.
    pub fn hold_clocks(&mut self, on: &[waveform::Signal], off: &[waveform::Signal]) {
        self.configuration.hold = configuration::Hold {
            on: on.to_vec(),
            off: off.to_vec(),
        };
        tracing::debug!("read clocks held on {on:?}, held off {off:?}");
    }

    pub fn fpga_version(&mut self) -> Result<Id, Error> {
        Id::read(&mut self.port)
    }

    pub fn peek(&mut self, address: u32) -> Result<u32, Error> {
        let value = self.port.read(address)?;
        tracing::debug!(
            "peek {} ({address:#06x}) = {value:#010x}",
            crate::registers::name(address).unwrap_or("?")
        );
        Ok(value)
    }

    pub fn poke(&mut self, address: u32, value: u32) -> Result<(), Error> {
        tracing::debug!(
            "poke {} ({address:#06x}) = {value:#010x}",
            crate::registers::name(address).unwrap_or("?")
        );
        self.port.write(address, value)
    }

    fn write_control(&mut self, control: WpuControl) -> Result<(), Error> {
        self.control = control;
        control.write(&mut self.port)
    }

    /// Clears sequence memory and both FIFOs.
    ///
    /// Without `force` the session must be idle. The sequencer is left in
    /// reset with its clock disabled, ready for an upload.
    pub fn reset_readout(&mut self, force: bool) -> Result<(), Error> {
        let target = self.state.reset(force)?;
        if self.state != State::Idle {
            tracing::warn!("forcing a reset from {}", self.state);
        }
        self.state = State::Unknown;
        self.control = WpuControl {
            wpu_rst: 1,
            ..Default::default()
        };
        let fifo_resets = WpuControl {
            fifo_read_reset: 1,
            fifo_write_reset: 1,
            ..Default::default()
        };
        self.port.pulse(
            WpuControl::ADDRESS,
            self.control.value(),
            fifo_resets.value(),
        )?;
        std::thread::sleep(self.configuration.reset_settle);
        self.reader.clear();
        self.start = 0;
        self.cursor = 0;
        self.program = waveform::Program::new();
        self.state = target;
        Ok(())
    }

    /// Writes one opcode at the cursor and returns its byte address.
    pub fn send_opcode(&mut self, opcode: waveform::Opcode) -> Result<u32, Error> {
        let target = self.state.upload()?;
        if let Err(error) = self.check_capacity(1) {
            self.state = State::Failed;
            return Err(error);
        }
        self.state = State::Unknown;
        let address = self.write_opcode(opcode)?;
        self.state = target;
        Ok(address)
    }

    /// Writes a whole program after the opcodes already uploaded and
    /// returns the address of its last opcode.
    pub fn upload(&mut self, program: &waveform::Program) -> Result<u32, Error> {
        let target = self.state.upload()?;
        if program.is_empty() {
            return Err(Error::EmptyProgram);
        }
        if let Err(error) = self.check_capacity(program.len() as u32) {
            self.state = State::Failed;
            return Err(error);
        }
        self.state = State::Unknown;
        let mut address = self.cursor;
        for opcode in program.opcodes() {
            address = self.write_opcode(*opcode)?;
        }
        tracing::debug!("uploaded {} opcodes, last at {address:#06x}", program.len());
        self.state = target;
        Ok(address)
    }

    /// Uploads the row readout program at `start` and returns the byte
    /// address of its last opcode.
    ///
    /// The program is validated before anything is written, an invalid
    /// opcode fails the session.
    pub fn build_row_program(&mut self, start: u32, columns: u32) -> Result<u32, Error> {
        self.state.upload()?;
        let program = match waveform::row_program(
            columns,
            &self.configuration.timing,
            &self.configuration.hold,
        ) {
            Ok(program) => program,
            Err(error) => {
                tracing::error!("row program rejected: {error}");
                self.state = State::Failed;
                return Err(error);
            }
        };
        self.start = start;
        self.cursor = start;
        self.program = waveform::Program::new();
        self.upload(&program)
    }

    /// Builds the clocking for holding `on` high and `off` low, then runs
    /// it for one row.
    pub fn set_clock_levels(
        &mut self,
        on: &[waveform::Signal],
        off: &[waveform::Signal],
        adc_mode: AdcMode,
    ) -> Result<(), Error> {
        self.reset_readout(false)?;
        let program = match waveform::levels_program(on, off, &self.configuration.timing) {
            Ok(program) => program,
            Err(error) => {
                self.state = State::Failed;
                return Err(error);
            }
        };
        self.upload(&program)?;
        self.arm_readout(1, false, adc_mode)?;
        self.finish_readout()
    }

    fn check_capacity(&self, opcodes: u32) -> Result<(), Error> {
        let required = self.cursor as u64 + opcodes as u64 * 4;
        let available = waveform::SEQUENCE_MEMORY_WORDS * 4;
        if required > available as u64 {
            Err(Error::ProgramOverflow {
                required: required.min(u32::MAX as u64) as u32,
                available,
            })
        } else {
            Ok(())
        }
    }

    fn write_opcode(&mut self, opcode: waveform::Opcode) -> Result<u32, Error> {
        let address = self.cursor;
        BramAddress { address }.write(&mut self.port)?;
        BramWriteData {
            duration: opcode.duration(),
            state: opcode.state() >> 15,
        }
        .write(&mut self.port)?;
        self.cursor += 4;
        self.program.push(opcode);
        Ok(address)
    }

    /// Programs the loop bounds and row count, then walks the synch clock
    /// through reset, release and enable.
    pub fn arm_readout(&mut self, rows: u32, test: bool, adc_mode: AdcMode) -> Result<(), Error> {
        let target = self.state.arm()?;
        if self.program.is_empty() {
            return Err(Error::EmptyProgram);
        }
        let adc_bits = self
            .adc_generation
            .and_then(|generation| adc_mode.bits(generation))
            .ok_or(Error::AdcMode {
                mode: adc_mode,
                generation: self.adc_generation,
            })?;
        self.state = State::Unknown;
        // the sequencer addresses its memory in words
        WpuStartStop {
            start: self.start / 4,
            stop: (self.cursor - 4) / 4,
        }
        .write(&mut self.port)?;
        WpuCount { rows }.write(&mut self.port)?;
        self.write_control(WpuControl {
            wpu_rst: 1,
            en_synch: 1,
            ..Default::default()
        })?;
        self.write_control(WpuControl {
            wpu_rst: 1,
            ..Default::default()
        })?;
        self.write_control(WpuControl::default())?;
        self.write_control(WpuControl {
            en_synch: 1,
            wpu_test: test as u32,
            adc_mode: adc_bits,
            ..Default::default()
        })?;
        std::thread::sleep(self.configuration.arm_settle);
        self.reader.clear();
        tracing::info!(
            "armed for {rows} rows ({} opcodes per row, expected readout time {:?})",
            self.program.len(),
            self.program.readout_time(rows)
        );
        let hold = &self.configuration.hold;
        if !hold.is_empty() {
            tracing::info!("clocks held on {:?}, held off {:?}", hold.on, hold.off);
        }
        self.state = target;
        Ok(())
    }

    /// Resets, uploads the row program and arms in one call. Returns the
    /// expected readout time.
    pub fn configure_for_readout(
        &mut self,
        rows: u32,
        columns: u32,
        test: bool,
        adc_mode: AdcMode,
    ) -> Result<std::time::Duration, Error> {
        self.reset_readout(false)?;
        self.build_row_program(0, columns)?;
        self.arm_readout(rows, test, adc_mode)?;
        Ok(self.program.readout_time(rows))
    }

    /// Reads `words.len()` payload words of `row` and checks its trailer.
    ///
    /// A stall leaves the session in `Reading`.
    pub fn read_raw_line(
        &mut self,
        words: &mut [u32],
        row: u32,
    ) -> Result<assembler::RowStatus, Error> {
        self.state = self.state.begin_line(self.configuration.line_tolerance)?;
        let status = assembler::read_raw_line(
            &mut self.reader,
            &mut self.port,
            words,
            row,
            self.configuration.trailer,
        )?;
        self.state = self.state.end_line()?;
        if !status.is_ok() {
            tracing::warn!("row {row}: {status}");
        }
        Ok(status)
    }

    /// Reads one row of samples into `pixels`.
    pub fn read_line(
        &mut self,
        pixels: &mut [u16],
        row: u32,
    ) -> Result<assembler::RowStatus, Error> {
        let mut words = std::mem::take(&mut self.row_buffer);
        words.clear();
        words.resize(assembler::words_for_pixels(pixels.len()), 0);
        let result = self.read_raw_line(&mut words, row);
        if result.is_ok() {
            assembler::unpack(&words, pixels);
        }
        self.row_buffer = words;
        result
    }

    /// Reads a full image and returns the number of bad rows.
    pub fn read_image(
        &mut self,
        rows: u32,
        columns: u32,
        amplifiers: u32,
        image: &mut [u16],
    ) -> Result<usize, Error> {
        self.read_image_with(rows, columns, amplifiers, image, |_, _| {})
    }

    /// Same as [`Session::read_image`], calling `on_row` after each row.
    ///
    /// Bad rows are counted and kept. The readout is finished whatever
    /// happens once the first row has been requested.
    pub fn read_image_with<OnRow>(
        &mut self,
        rows: u32,
        columns: u32,
        amplifiers: u32,
        image: &mut [u16],
        mut on_row: OnRow,
    ) -> Result<usize, Error>
    where
        OnRow: FnMut(u32, assembler::RowStatus),
    {
        if rows == 0 || columns == 0 || amplifiers == 0 {
            return Err(Error::EmptyGeometry);
        }
        let row_pixels = columns as usize * amplifiers as usize;
        let expected = rows as usize * row_pixels;
        if image.len() != expected {
            return Err(Error::BufferSize {
                expected,
                actual: image.len(),
            });
        }
        self.state.begin_line(self.configuration.line_tolerance)?;
        let fifo_reset = WpuControl {
            fifo_read_reset: 1,
            ..Default::default()
        };
        let mut outcome = self
            .port
            .pulse(WpuControl::ADDRESS, self.control.value(), fifo_reset.value())
            .map(|()| 0);
        self.reader.clear();
        if outcome.is_ok() {
            let mut bad_rows = 0;
            for (row, pixels) in (0..rows).zip(image.chunks_mut(row_pixels)) {
                match self.read_line(pixels, row) {
                    Ok(status) => {
                        if !status.is_ok() {
                            bad_rows += 1;
                        }
                        if row % self.configuration.progress_interval.max(1) == 0
                            || row == rows - 1
                            || !status.is_ok()
                        {
                            tracing::info!("end line {row} ({status})");
                        }
                        on_row(row, status);
                    }
                    Err(error) => {
                        tracing::error!("readout interrupted at row {row}: {error}");
                        outcome = Err(error);
                        break;
                    }
                }
            }
            if outcome.is_ok() {
                outcome = Ok(bad_rows);
            }
        }
        let finished = self.finish_readout();
        let bad_rows = outcome?;
        finished?;
        if bad_rows > 0 {
            tracing::warn!("{bad_rows} of {rows} rows failed their checks");
        }
        Ok(bad_rows)
    }

    /// Stops the clocks. The session is idle afterwards even if the write
    /// fails.
    pub fn finish_readout(&mut self) -> Result<(), Error> {
        self.state = self.state.finish();
        self.write_control(WpuControl::default())
    }

    /// Stops the clocks and unmaps the device.
    pub fn release(mut self) -> Result<(), Error> {
        self.state = State::Failed;
        let result = self.write_control(WpuControl::default());
        self.state = self.state.release();
        tracing::info!("session released");
        result
    }
}

impl<P: Port> Drop for Session<P> {
    fn drop(&mut self) {
        if self.state != State::Off {
            let _ = self.write_control(WpuControl::default());
        }
    }
}
