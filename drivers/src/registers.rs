use crate::error::Error;
use crate::port::Port;

pub trait Register {
    fn address(&self) -> u32;

    fn value(&self) -> u32;

    fn write<P: Port + ?Sized>(&self, port: &mut P) -> Result<(), Error> {
        port.write(self.address(), self.value())
    }
}

macro_rules! register {
    ($name:ident, $address:literal, {$($subname:ident: $substart:literal..$subend:literal),+ $(,)?}) => {
        #[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
        pub struct $name {
            $(
                pub $subname: u32,
            )+
        }
        $(
            const _: () = assert!($substart < $subend);
        )+
        impl $name {
            pub const ADDRESS: u32 = $address;

            pub fn from_value(value: u32) -> Self {
                Self {
                    $(
                        $subname: (((value as u64) >> $substart)
                            & ((1u64 << ($subend - $substart)) - 1)) as u32,
                    )+
                }
            }

            pub fn read<P: Port + ?Sized>(port: &mut P) -> Result<Self, Error> {
                Ok(Self::from_value(port.read($address)?))
            }
        }
        impl Register for $name {
            fn address(&self) -> u32 {
                $address
            }
            fn value(&self) -> u32 {
                0u32
                $(
                    | ((self.$subname & (((1u64 << ($subend - $substart)) - 1) as u32)) << $substart)
                )+
            }
        }
    };
}

macro_rules! registers {
    ($($name:ident, $address:literal, $fields:tt;)+) => {
        $(
            register! { $name, $address, $fields }
        )+

        /// Name of the register at a byte offset, if the offset is mapped.
        pub fn name(address: u32) -> Option<&'static str> {
            match address {
                $(
                    $address => Some(stringify!($name)),
                )+
                _ => None,
            }
        }
    };
}

registers! {
    Id, 0x00, {
        version: 0..16,
        reserved_16_32: 16..32,
    };
    Status, 0x04, { value: 0..32 };
    Eeprom, 0x08, { value: 0..32 };
    BramWriteData, 0x14, {
        duration: 0..15,
        state: 15..32,
    };
    BramAddress, 0x18, { address: 0..32 };
    WpuControl, 0x20, {
        en_synch: 0..1,
        wpu_rst: 1..2,
        wpu_test: 2..3,
        adc_mode: 3..5,
        fifo_read_reset: 5..6,
        fifo_write_reset: 6..7,
        reserved_7_32: 7..32,
    };
    WpuCount, 0x24, { rows: 0..32 };
    WpuStartStop, 0x28, {
        start: 0..16,
        stop: 16..32,
    };
    WpuStatus, 0x2C, { value: 0..32 };
    DdrReadData, 0x50, { value: 0..32 };
    DdrWriteData, 0x54, { value: 0..32 };
    DdrCount, 0x58, { words: 0..32 };
}

impl Id {
    /// Version as reported to operators (the register holds it minus one).
    pub fn fpga_version(&self) -> u32 {
        self.version + 1
    }

    pub fn adc_generation(&self) -> Option<AdcGeneration> {
        match self.version & 0x00f0 {
            0x70 => Some(AdcGeneration::Old),
            0x80 => Some(AdcGeneration::New),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AdcGeneration {
    /// 18-bit converters with the sign bit forced to zero.
    Old,
    /// Full signed 18-bit converters.
    New,
}

/// Which 16 of the converter's 18 bits reach the FIFO.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AdcMode {
    /// Drops the two most significant bits.
    Lsb,
    /// Drops the least and the most significant bits.
    Mid,
    /// Drops the two least significant bits, new converters only.
    Msb,
}

impl AdcMode {
    /// Control register field for this mode.
    ///
    /// Old boards read `0b11` as "drop two MSBs" and must never see `0b0x`,
    /// which selects the 16-bit board layout.
    pub fn bits(self, generation: AdcGeneration) -> Option<u32> {
        match (generation, self) {
            (AdcGeneration::Old, AdcMode::Lsb) => Some(0b11),
            (AdcGeneration::Old, AdcMode::Mid) => Some(0b10),
            (AdcGeneration::Old, AdcMode::Msb) => None,
            (AdcGeneration::New, AdcMode::Lsb) => Some(0b01),
            (AdcGeneration::New, AdcMode::Mid) => Some(0b10),
            (AdcGeneration::New, AdcMode::Msb) => Some(0b11),
        }
    }

    pub fn default_for(generation: AdcGeneration) -> Self {
        match generation {
            AdcGeneration::Old => AdcMode::Mid,
            AdcGeneration::New => AdcMode::Msb,
        }
    }
}
