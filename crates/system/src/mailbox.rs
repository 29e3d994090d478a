//! Inter-CPU mailbox.
//!
//! A small dual-ported buffer mapped on two buses. A write sets the
//! `new_data` flag and latches a write event; a read clears `new_data`.
//! The emulator polls the write event after every instruction and hands it
//! to the CPLD watching this mailbox; the `new_data` level drives the peer
//! CPU's IRQ pin until the data is consumed.

use sano_core::logging::{log, LogCategory, LogLevel};

pub struct Mailbox {
    base: u32,
    name: &'static str,
    data: Vec<u8>,
    new_data: bool,
    busy: bool,
    write_event: bool,
}

impl Mailbox {
    pub fn new(base: u32, size: u32, name: &'static str) -> Self {
        Self {
            base,
            name,
            data: vec![0; size as usize],
            new_data: false,
            busy: false,
            write_event: false,
        }
    }

    pub fn decode(&self, flat: u32) -> bool {
        flat >= self.base && flat < self.base + self.data.len() as u32
    }

    /// Bus read; consuming data clears the `new_data` flag.
    pub fn read(&mut self, flat: u32) -> u8 {
        let offset = flat.wrapping_sub(self.base) as usize;
        if offset < self.data.len() {
            self.new_data = false;
            self.data[offset]
        } else {
            log(LogCategory::Bus, LogLevel::Warn, || {
                format!("Mailbox {}: read out of bounds at offset ${:06X}", self.name, offset)
            });
            0xFF
        }
    }

    /// Read by offset from the mailbox base. Same semantics as [`read`].
    ///
    /// [`read`]: Mailbox::read
    pub fn read_offset(&mut self, offset: usize) -> u8 {
        let base = self.base;
        self.read(base + offset as u32)
    }

    /// Inspect a byte without consuming the `new_data` flag. Used by the
    /// CPLD command dispatch to decide whether a write is a boot command
    /// before anything is consumed.
    pub fn peek_offset(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(0xFF)
    }

    pub fn store(&mut self, flat: u32, value: u8) {
        let offset = flat.wrapping_sub(self.base) as usize;
        if offset < self.data.len() {
            self.data[offset] = value;
            self.new_data = true;
            self.write_event = true;
        } else {
            log(LogCategory::Bus, LogLevel::Warn, || {
                format!("Mailbox {}: write out of bounds at offset ${:06X}", self.name, offset)
            });
        }
    }

    pub fn has_new_data(&self) -> bool {
        self.new_data
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Take the latched write edge, clearing it.
    pub fn take_write_event(&mut self) -> bool {
        std::mem::take(&mut self.write_event)
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
        self.new_data = false;
        self.busy = false;
        self.write_event = false;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
