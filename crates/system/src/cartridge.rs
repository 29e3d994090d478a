//! Cartridge: bank-switched ROM with optional save RAM.
//!
//! Memory map (all regions decoded by this device):
//!
//! | Region | Range | Behavior |
//! |---|---|---|
//! | Reset vector mirror | `$00FFFC-$00FFFF` | reads ROM at the flat address |
//! | Bank-0 ROM mirror | `$008000-$00FFFF` | reads ROM at the flat address |
//! | Bank register | `$420000` | write low nibble selects the ROM bank |
//! | ROM window | `$C00000-$FFFFFF` | reads `rom[bank * 4 MiB + offset]` |
//! | Save RAM | `$700000-$70FFFF` | 64 KiB read/write |

use crate::SanoError;
use sano_core::logging::{log, LogCategory, LogLevel};

pub const ROM_WINDOW_START: u32 = 0xC00000;
pub const ROM_WINDOW_END: u32 = 0xFFFFFF;

pub const BANK_REGISTER: u32 = 0x420000;

pub const SAVE_RAM_START: u32 = 0x700000;
pub const SAVE_RAM_END: u32 = 0x70FFFF;
pub const SAVE_RAM_SIZE: usize = 0x10000;

pub const MAX_BANKS: u8 = 16;
pub const BANK_SIZE: u32 = 0x400000;

const HEADER_SIZE: usize = 256;

/// The 256-byte header at the start of every ROM image.
///
/// Layout: three 24-bit entry points, three 24-bit resource pointers,
/// 32-byte title, version byte. A zero secondary entry point means that
/// CPU boots through its mailbox instead of the header.
#[derive(Debug, Clone)]
pub struct RomHeader {
    pub main_entry: u32,
    pub graphics_entry: u32,
    pub sound_entry: u32,
    pub palette_ptr: u32,
    pub tile_ptr: u32,
    pub audio_ptr: u32,
    pub title: String,
    pub version: u8,
}

impl RomHeader {
    fn parse(rom: &[u8]) -> Self {
        let read24 = |at: usize| -> u32 {
            rom[at] as u32 | (rom[at + 1] as u32) << 8 | (rom[at + 2] as u32) << 16
        };

        let title_bytes = &rom[18..50];
        let title_len = title_bytes.iter().position(|&b| b == 0).unwrap_or(32);
        let title = String::from_utf8_lossy(&title_bytes[..title_len]).into_owned();

        Self {
            main_entry: read24(0),
            graphics_entry: read24(3),
            sound_entry: read24(6),
            palette_ptr: read24(9),
            tile_ptr: read24(12),
            audio_ptr: read24(15),
            title,
            version: rom[50],
        }
    }

    /// The main entry point must land in the ROM window; secondary entry
    /// points may instead be zero, meaning that CPU is held in reset until
    /// its mailbox boot command arrives.
    pub fn is_valid(&self) -> bool {
        let in_window = |e: u32| (ROM_WINDOW_START..=ROM_WINDOW_END).contains(&e);
        in_window(self.main_entry)
            && (self.graphics_entry == 0 || in_window(self.graphics_entry))
            && (self.sound_entry == 0 || in_window(self.sound_entry))
    }
}

pub struct Cartridge {
    rom: Vec<u8>,
    save_ram: Vec<u8>,
    current_bank: u8,
    header: RomHeader,
}

impl Cartridge {
    /// Load a raw ROM image. Rejects empty images, images larger than the
    /// 64 MiB bank space, and images shorter than the header.
    pub fn load(data: &[u8]) -> Result<Self, SanoError> {
        if data.is_empty() {
            return Err(SanoError::InvalidRom("ROM image is empty".to_string()));
        }
        if data.len() > (BANK_SIZE as usize) * MAX_BANKS as usize {
            return Err(SanoError::InvalidRom(format!(
                "ROM image too large ({} bytes, maximum 64 MiB)",
                data.len()
            )));
        }
        if data.len() < HEADER_SIZE {
            return Err(SanoError::InvalidRom(format!(
                "ROM image too small for header ({} bytes)",
                data.len()
            )));
        }

        let header = RomHeader::parse(data);
        if !header.is_valid() {
            log(LogCategory::Bus, LogLevel::Warn, || {
                format!(
                    "Cartridge: header entry points out of range (main=${:06X} gfx=${:06X} snd=${:06X})",
                    header.main_entry, header.graphics_entry, header.sound_entry
                )
            });
        }

        log(LogCategory::Bus, LogLevel::Info, || {
            format!(
                "Cartridge: loaded \"{}\" v{} ({} bytes, {} banks, main entry ${:06X})",
                header.title,
                header.version,
                data.len(),
                data.len().div_ceil(BANK_SIZE as usize),
                header.main_entry
            )
        });

        Ok(Self {
            rom: data.to_vec(),
            save_ram: Vec::new(),
            current_bank: 0,
            header,
        })
    }

    pub fn decode(&self, flat: u32) -> bool {
        matches!(flat, 0x008000..=0x00FFFF)
            || (ROM_WINDOW_START..=ROM_WINDOW_END).contains(&flat)
            || flat == BANK_REGISTER
            || (SAVE_RAM_START..=SAVE_RAM_END).contains(&flat)
    }

    pub fn read(&self, flat: u32) -> u8 {
        // Bank-0 mirror covers the reset vectors at $00FFFC as well.
        if matches!(flat, 0x008000..=0x00FFFF) {
            return self.rom.get(flat as usize).copied().unwrap_or(0xFF);
        }

        if (ROM_WINDOW_START..=ROM_WINDOW_END).contains(&flat) {
            let rom_addr =
                self.current_bank as usize * BANK_SIZE as usize + (flat - ROM_WINDOW_START) as usize;
            return self.rom.get(rom_addr).copied().unwrap_or(0xFF);
        }

        if (SAVE_RAM_START..=SAVE_RAM_END).contains(&flat) {
            let offset = (flat - SAVE_RAM_START) as usize;
            return self.save_ram.get(offset).copied().unwrap_or(0xFF);
        }

        0xFF
    }

    pub fn store(&mut self, flat: u32, value: u8) {
        if flat == BANK_REGISTER {
            self.set_bank(value & 0x0F);
            return;
        }

        if (SAVE_RAM_START..=SAVE_RAM_END).contains(&flat) {
            if self.save_ram.is_empty() {
                self.create_save_ram();
            }
            let offset = (flat - SAVE_RAM_START) as usize;
            if offset < self.save_ram.len() {
                self.save_ram[offset] = value;
            }
            return;
        }

        // ROM is read-only; other writes are dropped.
    }

    /// Select the ROM window bank. Out-of-range values select bank 0.
    pub fn set_bank(&mut self, bank: u8) {
        self.current_bank = if bank >= MAX_BANKS { 0 } else { bank };
    }

    pub fn current_bank(&self) -> u8 {
        self.current_bank
    }

    pub fn bank_count(&self) -> usize {
        self.rom.len().div_ceil(BANK_SIZE as usize)
    }

    pub fn rom_size(&self) -> usize {
        self.rom.len()
    }

    pub fn header(&self) -> &RomHeader {
        &self.header
    }

    pub fn has_save_ram(&self) -> bool {
        !self.save_ram.is_empty()
    }

    /// Allocate the 64 KiB save RAM, $FF-filled like fresh flash.
    pub fn create_save_ram(&mut self) {
        if self.save_ram.is_empty() {
            self.save_ram = vec![0xFF; SAVE_RAM_SIZE];
            log(LogCategory::Bus, LogLevel::Info, || {
                "Cartridge: created 64 KiB save RAM".to_string()
            });
        }
    }

    /// Restore save RAM from a previously persisted byte slice; shorter
    /// slices fill the head and leave the rest $FF.
    pub fn load_save_ram(&mut self, data: &[u8]) {
        self.create_save_ram();
        let len = data.len().min(SAVE_RAM_SIZE);
        self.save_ram[..len].copy_from_slice(&data[..len]);
    }

    /// Save RAM contents for persistence; `None` if never written.
    pub fn save_ram(&self) -> Option<&[u8]> {
        if self.save_ram.is_empty() {
            None
        } else {
            Some(&self.save_ram)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with_header(size: usize, main: u32, gfx: u32, snd: u32) -> Vec<u8> {
        let mut rom = vec![0u8; size];
        let write24 = |rom: &mut [u8], at: usize, v: u32| {
            rom[at] = v as u8;
            rom[at + 1] = (v >> 8) as u8;
            rom[at + 2] = (v >> 16) as u8;
        };
        write24(&mut rom, 0, main);
        write24(&mut rom, 3, gfx);
        write24(&mut rom, 6, snd);
        rom[18..22].copy_from_slice(b"TEST");
        rom[50] = 1;
        rom
    }

    #[test]
    fn test_load_rejects_empty() {
        assert!(Cartridge::load(&[]).is_err());
    }

    #[test]
    fn test_load_rejects_truncated_header() {
        assert!(Cartridge::load(&[0u8; 128]).is_err());
    }

    #[test]
    fn test_load_rejects_oversized() {
        // A 64 MiB + 1 image; allocation is cheap enough for a test.
        let rom = vec![0u8; 64 * 1024 * 1024 + 1];
        assert!(Cartridge::load(&rom).is_err());
    }

    #[test]
    fn test_header_parse() {
        let rom = rom_with_header(0x8000, 0xC00000, 0, 0xC10000);
        let cart = Cartridge::load(&rom).unwrap();
        assert_eq!(cart.header().main_entry, 0xC00000);
        assert_eq!(cart.header().graphics_entry, 0);
        assert_eq!(cart.header().sound_entry, 0xC10000);
        assert_eq!(cart.header().title, "TEST");
        assert_eq!(cart.header().version, 1);
        assert!(cart.header().is_valid());
    }

    #[test]
    fn test_header_invalid_main_entry() {
        let rom = rom_with_header(0x8000, 0x001000, 0, 0);
        let cart = Cartridge::load(&rom).unwrap();
        assert!(!cart.header().is_valid());
    }

    #[test]
    fn test_header_invalid_secondary_entry() {
        let rom = rom_with_header(0x8000, 0xC00000, 0x001000, 0);
        let cart = Cartridge::load(&rom).unwrap();
        assert!(!cart.header().is_valid());
    }

    #[test]
    fn test_reset_vector_mirror() {
        let mut rom = rom_with_header(0x10000, 0xC00000, 0, 0);
        rom[0xFFFC] = 0x34;
        rom[0xFFFD] = 0x12;
        let cart = Cartridge::load(&rom).unwrap();
        assert_eq!(cart.read(0x00FFFC), 0x34);
        assert_eq!(cart.read(0x00FFFD), 0x12);
    }

    #[test]
    fn test_bank0_rom_mirror() {
        let mut rom = rom_with_header(0x10000, 0xC00000, 0, 0);
        rom[0x8000] = 0xA5;
        let cart = Cartridge::load(&rom).unwrap();
        assert_eq!(cart.read(0x008000), 0xA5);
        assert!(!cart.decode(0x007FFF));
    }

    #[test]
    fn test_rom_window_banking() {
        // 8 MiB image: two banks with distinct markers.
        let mut rom = rom_with_header(0x800000, 0xC00000, 0, 0);
        rom[0x000100] = 0x11;
        rom[0x400000] = 0x22;
        let mut cart = Cartridge::load(&rom).unwrap();

        assert_eq!(cart.read(0xC00100), 0x11);
        cart.store(BANK_REGISTER, 1);
        assert_eq!(cart.current_bank(), 1);
        assert_eq!(cart.read(0xC00000), 0x22);
        cart.store(BANK_REGISTER, 0);
        assert_eq!(cart.read(0xC00100), 0x11);
    }

    #[test]
    fn test_bank_register_masks_low_nibble() {
        let rom = rom_with_header(0x8000, 0xC00000, 0, 0);
        let mut cart = Cartridge::load(&rom).unwrap();
        cart.store(BANK_REGISTER, 0xF7);
        assert_eq!(cart.current_bank(), 0x07);
        cart.store(BANK_REGISTER, 0xFF);
        assert_eq!(cart.current_bank(), 0x0F);
    }

    #[test]
    fn test_set_bank_clamps_out_of_range() {
        let rom = rom_with_header(0x8000, 0xC00000, 0, 0);
        let mut cart = Cartridge::load(&rom).unwrap();
        cart.set_bank(16);
        assert_eq!(cart.current_bank(), 0);
    }

    #[test]
    fn test_rom_window_out_of_range_is_open_bus() {
        let rom = rom_with_header(0x8000, 0xC00000, 0, 0);
        let mut cart = Cartridge::load(&rom).unwrap();
        cart.set_bank(3);
        assert_eq!(cart.read(0xC00000), 0xFF);
    }

    #[test]
    fn test_rom_writes_dropped() {
        let mut rom = rom_with_header(0x8000, 0xC00000, 0, 0);
        rom[0x100] = 0x77;
        let mut cart = Cartridge::load(&rom).unwrap();
        cart.store(0xC00100, 0x00);
        assert_eq!(cart.read(0xC00100), 0x77);
    }

    #[test]
    fn test_save_ram_created_on_first_write() {
        let rom = rom_with_header(0x8000, 0xC00000, 0, 0);
        let mut cart = Cartridge::load(&rom).unwrap();
        assert!(!cart.has_save_ram());
        assert_eq!(cart.read(0x700000), 0xFF);

        cart.store(0x700000, 0x42);
        assert!(cart.has_save_ram());
        assert_eq!(cart.read(0x700000), 0x42);
        assert_eq!(cart.read(0x700001), 0xFF);
    }

    #[test]
    fn test_save_ram_round_trip() {
        let rom = rom_with_header(0x8000, 0xC00000, 0, 0);
        let mut cart = Cartridge::load(&rom).unwrap();
        cart.load_save_ram(&[1, 2, 3]);
        assert_eq!(cart.read(0x700002), 3);

        let saved = cart.save_ram().unwrap().to_vec();
        let mut cart2 = Cartridge::load(&rom).unwrap();
        cart2.load_save_ram(&saved);
        assert_eq!(cart2.read(0x700000), 1);
        assert_eq!(cart2.read(0x700002), 3);
    }

    #[test]
    fn test_bank_count() {
        let rom = rom_with_header(0x800000, 0xC00000, 0, 0);
        let cart = Cartridge::load(&rom).unwrap();
        assert_eq!(cart.bank_count(), 2);
    }
}
