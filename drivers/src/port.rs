use crate::error::Error;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Configuration {
    pub bus_id: String,
}

impl Configuration {
    pub fn deserialize_bincode(data: &[u8]) -> bincode::Result<Configuration> {
        bincode::deserialize(data)
    }

    pub fn resource_path(&self) -> String {
        format!("/sys/bus/pci/devices/{}/resource0", self.bus_id)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            bus_id: "0000:03:00.0".to_owned(),
        }
    }
}

/// Access to the FPGA's 32-bit registers, addressed by byte offset.
pub trait Port {
    fn read(&mut self, address: u32) -> Result<u32, Error>;

    fn write(&mut self, address: u32, value: u32) -> Result<(), Error>;

    /// Raises `mask` on top of `value` then drops it back, one write each.
    fn pulse(&mut self, address: u32, value: u32, mask: u32) -> Result<(), Error> {
        self.write(address, value | mask)?;
        self.write(address, value & !mask)
    }
}

struct Window(std::ptr::NonNull<u32>);

unsafe impl Send for Window {}

/// BAR0 of the FPGA, mapped from its sysfs resource file.
///
/// The mapping lives as long as the value.
pub struct Mmap {
    window: Window,
    size: usize,
    path: String,
}

impl Mmap {
    pub fn open(configuration: &Configuration) -> Result<Self, Error> {
        let path = configuration.resource_path();
        let mapping_error = |message: String| Error::Mapping {
            path: path.clone(),
            message,
        };
        let c_path = std::ffi::CString::new(path.as_str())
            .map_err(|error| mapping_error(error.to_string()))?;
        // SAFETY: c_path is a valid NUL-terminated string
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd == -1 {
            return Err(mapping_error(std::io::Error::last_os_error().to_string()));
        }
        // SAFETY: sysconf has no preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        // SAFETY: fd is open, the kernel picks the address
        let pointer = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        let map_error = std::io::Error::last_os_error();
        // SAFETY: the mapping keeps its own reference to the file
        unsafe { libc::close(fd) };
        if pointer == libc::MAP_FAILED {
            return Err(mapping_error(map_error.to_string()));
        }
        let window = std::ptr::NonNull::new(pointer as *mut u32)
            .ok_or_else(|| mapping_error("mmap returned a null pointer".to_owned()))?;
        tracing::info!("mapped {size} bytes of {path}");
        Ok(Self {
            window: Window(window),
            size,
            path,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn word(&self, address: u32) -> Result<*mut u32, Error> {
        if address % 4 != 0 || address as usize + 4 > self.size {
            return Err(Error::OutOfBounds {
                offset: address,
                size: self.size,
            });
        }
        // SAFETY: the offset is aligned and inside the mapping
        Ok(unsafe { self.window.0.as_ptr().add(address as usize / 4) })
    }
}

impl Port for Mmap {
    fn read(&mut self, address: u32) -> Result<u32, Error> {
        let word = self.word(address)?;
        // SAFETY: word points inside the live mapping, registers have side effects
        let value = unsafe { word.read_volatile() };
        tracing::trace!("read {address:#06x} = {value:#010x}");
        Ok(value)
    }

    fn write(&mut self, address: u32, value: u32) -> Result<(), Error> {
        let word = self.word(address)?;
        tracing::trace!("write {address:#06x} = {value:#010x}");
        // SAFETY: word points inside the live mapping
        unsafe { word.write_volatile(value) };
        Ok(())
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        // SAFETY: the window was returned by mmap with this size
        unsafe {
            libc::munmap(self.window.0.as_ptr() as *mut libc::c_void, self.size);
        }
        tracing::info!("unmapped {}", self.path);
    }
}
