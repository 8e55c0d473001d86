//! Software model of the readout FPGA.
//!
//! The emulator decodes the program written to sequence memory to find how
//! many conversions happen per row, then produces rows lazily as the FIFO
//! depth is polled. Faults (bad checksums, wrong row indices, stalled
//! pipelines, hung sequencers) can be injected per row.

use crate::assembler;
use crate::configuration;
use crate::error::Error;
use crate::port::Port;
use crate::registers::{
    BramAddress, BramWriteData, DdrCount, DdrReadData, DdrWriteData, Eeprom, Id, Status,
    WpuControl, WpuCount, WpuStartStop, WpuStatus,
};
use crate::waveform;

pub const DEFAULT_ID: u32 = 0x0000_0083;

/// Sample produced for `pixel` of `row`.
pub fn pattern(row: u32, pixel: u32, test: bool) -> u16 {
    if test {
        (row.wrapping_add(pixel) & 0xffff) as u16
    } else {
        (0x8000 + (pixel.wrapping_mul(7).wrapping_add(row.wrapping_mul(13)) % 1000)) as u16
    }
}

#[derive(Debug, Default)]
struct Faults {
    corrupt_crc: std::collections::BTreeSet<u32>,
    wrong_row: std::collections::BTreeSet<u32>,
    stalls: std::collections::BTreeMap<u32, usize>,
    hang_from: Option<u32>,
    refused: std::collections::BTreeSet<u32>,
}

#[derive(Debug)]
struct Fpga {
    id: u32,
    amplifiers: u32,
    trailer: configuration::Trailer,
    control: WpuControl,
    bram: Vec<u32>,
    bram_address: u32,
    count: u32,
    start_stop: WpuStartStop,
    running: bool,
    test: bool,
    columns: u32,
    next_row: u32,
    fifo: std::collections::VecDeque<u32>,
    pipeline: std::collections::VecDeque<u32>,
    faults: Faults,
    control_writes: Vec<u32>,
    filler_words: u32,
    fifo_resets: u32,
}

impl Fpga {
    fn start(&mut self) {
        let stop = self.start_stop.stop as usize;
        let program = &self.bram[..(stop + 1).min(self.bram.len())];
        let mut previous = true;
        self.columns = 0;
        for word in program {
            let convert = word & waveform::Signal::Cnv.mask() != 0;
            if convert && !previous {
                self.columns += 1;
            }
            previous = convert;
        }
        self.running = true;
        self.test = self.control.wpu_test == 1;
        self.next_row = 0;
        tracing::debug!(
            "emulator started: {} rows of {} columns",
            self.count,
            self.columns
        );
    }

    fn produces(&self) -> bool {
        self.running
            && self.next_row < self.count
            && self.faults.hang_from.map_or(true, |row| self.next_row < row)
    }

    fn generate_row(&mut self) {
        let row = self.next_row;
        self.next_row += 1;
        let pixels = self.columns * self.amplifiers;
        let mut words = vec![0u32; assembler::words_for_pixels(pixels as usize)];
        for (index, word) in words.iter_mut().enumerate() {
            let low = pattern(row, index as u32 * 2, self.test) as u32;
            let high = if (index as u32) * 2 + 1 < pixels {
                pattern(row, index as u32 * 2 + 1, self.test) as u32
            } else {
                0
            };
            *word = low | (high << 16);
        }
        let mut crc = assembler::Crc16::new();
        for word in &words {
            crc.update_word(*word);
        }
        let mut crc_word = assembler::CRC_TAG | crc.value() as u32;
        if self.faults.corrupt_crc.contains(&row) {
            crc_word ^= 1;
        }
        words.push(crc_word);
        if self.trailer == configuration::Trailer::CrcAndRow {
            let mut row_word = assembler::ROW_TAG | (row & 0xffff);
            if self.faults.wrong_row.contains(&row) {
                row_word = assembler::ROW_TAG | (row.wrapping_add(1) & 0xffff);
            }
            words.push(row_word);
        }
        let stuck = self
            .faults
            .stalls
            .get(&row)
            .copied()
            .unwrap_or(0)
            .min(words.len());
        let visible = words.len() - stuck;
        self.fifo.extend(&words[..visible]);
        self.pipeline.extend(&words[visible..]);
    }

    fn depth(&mut self) -> u32 {
        if self.fifo.is_empty() && self.pipeline.is_empty() && self.produces() {
            self.generate_row();
        }
        self.fifo.len() as u32
    }

    fn write_control(&mut self, value: u32) {
        let control = WpuControl::from_value(value);
        self.control_writes.push(value);
        if control.wpu_rst == 1 {
            self.running = false;
            self.bram_address = 0;
        }
        if control.fifo_read_reset == 1 || control.fifo_write_reset == 1 {
            self.fifo.clear();
            self.pipeline.clear();
            self.fifo_resets += 1;
        }
        if control.en_synch == 0 {
            self.running = false;
        } else if control.wpu_rst == 0 && !self.running {
            self.control = control;
            self.start();
        }
        self.control = control;
    }
}

/// Shared handle on an emulated FPGA; clones see the same hardware.
#[derive(Debug, Clone)]
pub struct Emulator(std::sync::Arc<std::sync::Mutex<Fpga>>);

impl Emulator {
    pub fn new(amplifiers: u32, trailer: configuration::Trailer) -> Self {
        Self(std::sync::Arc::new(std::sync::Mutex::new(Fpga {
            id: DEFAULT_ID,
            amplifiers,
            trailer,
            control: WpuControl::default(),
            bram: vec![0; waveform::SEQUENCE_MEMORY_WORDS as usize],
            bram_address: 0,
            count: 0,
            start_stop: WpuStartStop::default(),
            running: false,
            test: false,
            columns: 0,
            next_row: 0,
            fifo: std::collections::VecDeque::new(),
            pipeline: std::collections::VecDeque::new(),
            faults: Faults::default(),
            control_writes: Vec::new(),
            filler_words: 0,
            fifo_resets: 0,
        })))
    }

    fn fpga(&self) -> std::sync::MutexGuard<'_, Fpga> {
        self.0.lock().expect("mutex is not poisoned")
    }

    pub fn set_id(&self, id: u32) {
        self.fpga().id = id;
    }

    /// Flips the checksum of `row`.
    pub fn corrupt_crc(&self, row: u32) {
        self.fpga().faults.corrupt_crc.insert(row);
    }

    /// Echoes the wrong index after `row`.
    pub fn misnumber_row(&self, row: u32) {
        self.fpga().faults.wrong_row.insert(row);
    }

    /// Holds the last `words` words of `row` in the deserializer until
    /// filler words are written.
    pub fn stall(&self, row: u32, words: usize) {
        self.fpga().faults.stalls.insert(row, words);
    }

    /// Stops producing data from `row` onwards.
    pub fn hang_from(&self, row: u32) {
        self.fpga().faults.hang_from = Some(row);
    }

    /// Makes every access to `address` fail.
    pub fn refuse(&self, address: u32) {
        self.fpga().faults.refused.insert(address);
    }

    pub fn program(&self) -> Vec<u32> {
        let fpga = self.fpga();
        let stop = fpga.start_stop.stop as usize;
        fpga.bram[..(stop + 1).min(fpga.bram.len())].to_vec()
    }

    pub fn opcode(&self, index: usize) -> u32 {
        self.fpga().bram[index]
    }

    pub fn start_stop(&self) -> WpuStartStop {
        self.fpga().start_stop
    }

    pub fn row_count(&self) -> u32 {
        self.fpga().count
    }

    pub fn columns(&self) -> u32 {
        self.fpga().columns
    }

    pub fn control(&self) -> WpuControl {
        self.fpga().control
    }

    pub fn control_writes(&self) -> Vec<u32> {
        self.fpga().control_writes.clone()
    }

    pub fn filler_words(&self) -> u32 {
        self.fpga().filler_words
    }

    pub fn fifo_resets(&self) -> u32 {
        self.fpga().fifo_resets
    }

    pub fn rows_produced(&self) -> u32 {
        self.fpga().next_row
    }
}

impl Port for Emulator {
    fn read(&mut self, address: u32) -> Result<u32, Error> {
        let mut fpga = self.fpga();
        if fpga.faults.refused.contains(&address) {
            return Err(Error::OutOfBounds {
                offset: address,
                size: 0,
            });
        }
        Ok(match address {
            Id::ADDRESS => fpga.id,
            Status::ADDRESS | Eeprom::ADDRESS => 0,
            BramAddress::ADDRESS => fpga.bram_address,
            WpuControl::ADDRESS => crate::registers::Register::value(&fpga.control),
            WpuCount::ADDRESS => fpga.count,
            WpuStartStop::ADDRESS => crate::registers::Register::value(&fpga.start_stop),
            WpuStatus::ADDRESS => (fpga.produces() && fpga.pipeline.is_empty()) as u32,
            DdrCount::ADDRESS => fpga.depth(),
            DdrReadData::ADDRESS => fpga.fifo.pop_front().unwrap_or(0),
            _ => {
                return Err(Error::OutOfBounds {
                    offset: address,
                    size: WINDOW_SIZE,
                })
            }
        })
    }

    fn write(&mut self, address: u32, value: u32) -> Result<(), Error> {
        let mut fpga = self.fpga();
        if fpga.faults.refused.contains(&address) {
            return Err(Error::OutOfBounds {
                offset: address,
                size: 0,
            });
        }
        match address {
            BramAddress::ADDRESS => fpga.bram_address = value,
            BramWriteData::ADDRESS => {
                let index = (fpga.bram_address / 4) as usize;
                let size = fpga.bram.len();
                match fpga.bram.get_mut(index) {
                    Some(slot) => *slot = value,
                    None => {
                        return Err(Error::OutOfBounds {
                            offset: index as u32 * 4,
                            size: size * 4,
                        })
                    }
                }
            }
            WpuControl::ADDRESS => fpga.write_control(value),
            WpuCount::ADDRESS => fpga.count = value,
            WpuStartStop::ADDRESS => fpga.start_stop = WpuStartStop::from_value(value),
            DdrWriteData::ADDRESS => {
                fpga.filler_words += 1;
                let stuck: Vec<u32> = fpga.pipeline.drain(..).collect();
                fpga.fifo.extend(stuck);
            }
            Id::ADDRESS | Status::ADDRESS | Eeprom::ADDRESS => (),
            _ => {
                return Err(Error::OutOfBounds {
                    offset: address,
                    size: WINDOW_SIZE,
                })
            }
        }
        Ok(())
    }
}

const WINDOW_SIZE: usize = 4096;
