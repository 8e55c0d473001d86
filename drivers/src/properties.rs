use crate::configuration;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Detector<Configuration> {
    pub name: &'static str,
    pub rows: u32,
    pub columns: u32,
    pub amplifiers: u32,
    pub default_configuration: Configuration,
}

impl<Configuration> Detector<Configuration> {
    pub fn pixels(&self) -> usize {
        self.rows as usize * self.columns as usize * self.amplifiers as usize
    }
}

pub const PROPERTIES: Detector<configuration::Configuration> = Detector {
    name: "PFS 8-amplifier CCD",
    rows: 4300,
    columns: 552,
    amplifiers: 8,
    default_configuration: configuration::Configuration {
        timing: configuration::Timing {
            settle: 100,
            serial_shift: 16,
            reset_gate: 8,
            summing_well: 8,
            dc_restore: 8,
            integrate: 120,
            dump: 8,
            hold: 4,
            convert: 44,
            parallel: 1000,
            rearm: 52,
        },
        hold: configuration::Hold {
            on: Vec::new(),
            off: Vec::new(),
        },
        trailer: configuration::Trailer::Crc,
        line_tolerance: configuration::LineTolerance::Armed,
        polling: configuration::Polling {
            interval: std::time::Duration::from_millis(5),
            maximum_polls: 2000,
            filler_words: 8,
        },
        reset_settle: std::time::Duration::from_millis(10),
        arm_settle: std::time::Duration::from_millis(10),
        progress_interval: 100,
    },
};
