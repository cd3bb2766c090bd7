use std::io;

/// Byte-oriented register bus. Each call is one atomic transfer.
pub trait RegisterBus {
    /// Returns the bytes read; callers validate the length.
    fn read_block(&mut self, device: u16, register: u8, length: usize) -> io::Result<Vec<u8>>;

    fn write_block(&mut self, device: u16, register: u8, data: &[u8]) -> io::Result<()>;
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    fn read_block(&mut self, device: u16, register: u8, length: usize) -> io::Result<Vec<u8>> {
        (**self).read_block(device, register, length)
    }

    fn write_block(&mut self, device: u16, register: u8, data: &[u8]) -> io::Result<()> {
        (**self).write_block(device, register, data)
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for Box<T> {
    fn read_block(&mut self, device: u16, register: u8, length: usize) -> io::Result<Vec<u8>> {
        (**self).read_block(device, register, length)
    }

    fn write_block(&mut self, device: u16, register: u8, data: &[u8]) -> io::Result<()> {
        (**self).write_block(device, register, data)
    }
}

#[cfg(feature = "i2c-hardware")]
pub use linux::LinuxI2cBus;

#[cfg(feature = "i2c-hardware")]
mod linux {
    use super::RegisterBus;
    use i2cdev::core::I2CDevice;
    use i2cdev::linux::LinuxI2CDevice;
    use log::debug;
    use std::collections::HashMap;
    use std::io;

    /// SMBus block transfers on a Linux `/dev/i2c-N` character device.
    pub struct LinuxI2cBus {
        path: String,
        devices: HashMap<u16, LinuxI2CDevice>,
    }

    impl LinuxI2cBus {
        pub fn new(path: &str) -> Self {
            LinuxI2cBus {
                path: path.to_string(),
                devices: HashMap::new(),
            }
        }

        fn device(&mut self, address: u16) -> io::Result<&mut LinuxI2CDevice> {
            if !self.devices.contains_key(&address) {
                debug!("Opening {} for device 0x{:02X}", self.path, address);
                let device = LinuxI2CDevice::new(&self.path, address).map_err(io::Error::from)?;
                self.devices.insert(address, device);
            }
            self.devices
                .get_mut(&address)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "i2c device not open"))
        }
    }

    impl RegisterBus for LinuxI2cBus {
        fn read_block(&mut self, device: u16, register: u8, length: usize) -> io::Result<Vec<u8>> {
            let len = u8::try_from(length).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "SMBus block exceeds 255 bytes")
            })?;
            self.device(device)?
                .smbus_read_i2c_block_data(register, len)
                .map_err(io::Error::from)
        }

        fn write_block(&mut self, device: u16, register: u8, data: &[u8]) -> io::Result<()> {
            self.device(device)?
                .smbus_write_i2c_block_data(register, data)
                .map_err(io::Error::from)
        }
    }
}
