use crate::configuration;
use crate::error::Error;
use crate::port::Port;
use crate::registers::{DdrCount, DdrReadData, DdrWriteData, Register, WpuStatus};

/// Written to the write side of the FIFO to push stalled words through
/// the deserializer.
pub const FILLER_WORD: u32 = 0x0000_0000;

/// Drains the hardware FIFO one word at a time.
///
/// The depth register is only read once the words it announced last time
/// have been consumed.
#[derive(Debug, Clone)]
pub struct WordReader {
    available: u32,
    polling: configuration::Polling,
}

impl WordReader {
    pub fn new(polling: configuration::Polling) -> Self {
        Self {
            available: 0,
            polling,
        }
    }

    /// Words announced by the depth register and not read yet.
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Forgets announced words, after a FIFO reset.
    pub fn clear(&mut self) {
        self.available = 0;
    }

    pub fn read_word<P: Port + ?Sized>(&mut self, port: &mut P) -> Result<u32, Error> {
        if self.available == 0 {
            self.available = self.wait(port)?;
        }
        let word = DdrReadData::read(port)?.value;
        self.available -= 1;
        Ok(word)
    }

    fn wait<P: Port + ?Sized>(&mut self, port: &mut P) -> Result<u32, Error> {
        let words = DdrCount::read(port)?.words;
        if words > 0 {
            return Ok(words);
        }
        let start = std::time::Instant::now();
        let mut polls = 0;
        loop {
            std::thread::sleep(self.polling.interval);
            polls += 1;
            let words = DdrCount::read(port)?.words;
            if words > 0 {
                if polls > 1 {
                    tracing::debug!("{words} words ready after {polls} polls");
                }
                return Ok(words);
            }
            if polls >= self.polling.maximum_polls {
                return Err(Error::Stalled {
                    polls,
                    elapsed: start.elapsed(),
                });
            }
            if WpuStatus::read(port)?.value == 0 {
                tracing::debug!(
                    "FIFO empty and sequencer idle, writing {} filler words",
                    self.polling.filler_words
                );
                for _ in 0..self.polling.filler_words {
                    DdrWriteData {
                        value: FILLER_WORD,
                    }
                    .write(port)?;
                }
            }
        }
    }
}
