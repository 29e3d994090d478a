//! Per-CPU system bus.
//!
//! Devices are registered in a fixed order; the first device whose decode
//! accepts an address owns the access. Overlaps are legal and resolved by
//! registration order; the CPLD register files intentionally shadow the
//! head of mailbox A's region on the buses that carry both. Unmapped reads
//! return the open-bus value `$FF`; unmapped writes are dropped.

use std::cell::RefCell;
use std::rc::Rc;

use sano_core::cpu::Bus24;

use crate::cartridge::Cartridge;
use crate::cpld1_audio::CpldAudio;
use crate::cpld2_video::CpldVideo;
use crate::cpld3_raster::CpldRaster;
use crate::mailbox::Mailbox;
use crate::ram::Ram;

const OPEN_BUS: u8 = 0xFF;

/// Every kind of device that can sit on a SANo bus. Device kinds are finite
/// and known, so dispatch is a match rather than a trait object.
#[derive(Clone)]
pub enum Device {
    Ram(Rc<RefCell<Ram>>),
    Mailbox(Rc<RefCell<Mailbox>>),
    Cartridge(Rc<RefCell<Cartridge>>),
    CpldAudio(Rc<RefCell<CpldAudio>>),
    CpldVideo(Rc<RefCell<CpldVideo>>),
    CpldRaster(Rc<RefCell<CpldRaster>>),
}

impl Device {
    /// Address-decode only; never mutates.
    fn decode(&self, flat: u32) -> bool {
        match self {
            Device::Ram(d) => d.borrow().decode(flat),
            Device::Mailbox(d) => d.borrow().decode(flat),
            Device::Cartridge(d) => d.borrow().decode(flat),
            Device::CpldAudio(d) => d.borrow().decode(flat),
            Device::CpldVideo(d) => d.borrow().decode(flat),
            Device::CpldRaster(d) => d.borrow().decode(flat),
        }
    }

    fn read(&self, flat: u32) -> u8 {
        match self {
            Device::Ram(d) => d.borrow().read(flat),
            // Mailbox reads clear the new-data flag.
            Device::Mailbox(d) => d.borrow_mut().read(flat),
            Device::Cartridge(d) => d.borrow().read(flat),
            Device::CpldAudio(d) => d.borrow().read(flat),
            Device::CpldVideo(d) => d.borrow().read(flat),
            Device::CpldRaster(d) => d.borrow().read(flat),
        }
    }

    fn write(&self, flat: u32, value: u8) {
        match self {
            Device::Ram(d) => d.borrow_mut().store(flat, value),
            Device::Mailbox(d) => d.borrow_mut().store(flat, value),
            Device::Cartridge(d) => d.borrow_mut().store(flat, value),
            Device::CpldAudio(d) => d.borrow_mut().store(flat, value),
            Device::CpldVideo(d) => d.borrow_mut().store(flat, value),
            Device::CpldRaster(d) => d.borrow_mut().store(flat, value),
        }
    }
}

pub struct SystemBus {
    name: &'static str,
    devices: Vec<Device>,
}

impl SystemBus {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            devices: Vec::new(),
        }
    }

    pub fn register(&mut self, device: Device) {
        self.devices.push(device);
    }

    /// Drop the cartridge from this bus, if registered.
    pub fn unregister_cartridge(&mut self) {
        self.devices.retain(|d| !matches!(d, Device::Cartridge(_)));
    }

    pub fn read(&self, addr: u32) -> u8 {
        let flat = addr & 0xFFFFFF;
        for device in &self.devices {
            if device.decode(flat) {
                return device.read(flat);
            }
        }
        OPEN_BUS
    }

    pub fn write(&self, addr: u32, value: u8) {
        let flat = addr & 0xFFFFFF;
        for device in &self.devices {
            if device.decode(flat) {
                device.write(flat, value);
                return;
            }
        }
        // Unmapped write dropped.
    }

    pub fn read16(&self, addr: u32) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr + 1) as u16;
        (hi << 8) | lo
    }

    pub fn write16(&self, addr: u32, value: u16) {
        self.write(addr, (value & 0xFF) as u8);
        self.write(addr + 1, (value >> 8) as u8);
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Bus24 for SystemBus {
    fn read(&self, addr: u32) -> u8 {
        SystemBus::read(self, addr)
    }

    fn write(&mut self, addr: u32, value: u8) {
        SystemBus::write(self, addr, value)
    }
}
