//! CPLD #1: audio FIFO serializer.
//!
//! Eight independent 256-sample FIFOs drained at the 32 kHz sample rate.
//! When a drain drops a channel below the IRQ threshold its pending bit is
//! set in the status register and the IRQ line asserts until cleared.
//! CPLD1 also watches mailbox B for the sound-CPU boot command.
//!
//! Register map (`$400100-$40011F`):
//!
//! | Offset | Register |
//! |---|---|
//! | `$00 + 2·ch` | FIFO write port (byte sample, sign-extended `<< 8`; dropped when full) |
//! | `$10 + ch` | FIFO fill level |
//! | `$18` | IRQ status, bit per channel |
//! | `$1A` | IRQ clear, write-1-to-clear per bit |
//! | `$1C` | IRQ threshold (default 128) |
//! | `$1E` | bit 0: master enable |

use std::collections::VecDeque;

use sano_core::logging::{log, LogCategory, LogLevel};

use crate::mailbox::Mailbox;
use crate::ram::Ram;

pub const BASE_ADDRESS: u32 = 0x400100;
pub const SIZE: u32 = 0x20;

pub const NUM_CHANNELS: usize = 8;
pub const FIFO_DEPTH: usize = 256;

const DEFAULT_IRQ_THRESHOLD: u8 = 128;
const BOOT_COMMAND_COPY: u8 = 0x01;

struct AudioFifo {
    samples: VecDeque<i16>,
    irq_pending: bool,
}

impl AudioFifo {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(FIFO_DEPTH),
            irq_pending: false,
        }
    }

    /// Fill level as the 8-bit status register reports it (256 wraps to 0).
    fn level(&self) -> u8 {
        self.samples.len() as u8
    }

    fn is_full(&self) -> bool {
        self.samples.len() >= FIFO_DEPTH
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.irq_pending = false;
    }
}

pub struct CpldAudio {
    fifos: [AudioFifo; NUM_CHANNELS],
    irq_threshold: u8,
    irq_status: u8,
    enabled: bool,
}

impl CpldAudio {
    pub fn new() -> Self {
        Self {
            fifos: std::array::from_fn(|_| AudioFifo::new()),
            irq_threshold: DEFAULT_IRQ_THRESHOLD,
            irq_status: 0,
            enabled: true,
        }
    }

    pub fn reset(&mut self) {
        for fifo in &mut self.fifos {
            fifo.clear();
        }
        self.irq_threshold = DEFAULT_IRQ_THRESHOLD;
        self.irq_status = 0;
        self.enabled = true;
    }

    pub fn decode(&self, flat: u32) -> bool {
        (BASE_ADDRESS..BASE_ADDRESS + SIZE).contains(&flat)
    }

    pub fn read(&self, flat: u32) -> u8 {
        let offset = flat.wrapping_sub(BASE_ADDRESS);
        match offset {
            0x10..=0x17 => self.fifos[(offset - 0x10) as usize].level(),
            0x18 => self.irq_status,
            0x1C => self.irq_threshold,
            0x1E => self.enabled as u8,
            _ => 0x00,
        }
    }

    pub fn store(&mut self, flat: u32, value: u8) {
        let offset = flat.wrapping_sub(BASE_ADDRESS);

        // FIFO write ports: even offsets $00-$0E, one port per channel.
        if offset <= 0x0E && offset % 2 == 0 {
            let channel = (offset / 2) as usize;
            let sample = (value as i16) << 8;
            if !self.fifos[channel].is_full() {
                self.fifos[channel].samples.push_back(sample);
            }
            // Full FIFO drops the sample silently.
            return;
        }

        match offset {
            0x1A => {
                for ch in 0..NUM_CHANNELS {
                    if value & (1 << ch) != 0 {
                        self.fifos[ch].irq_pending = false;
                        self.irq_status &= !(1 << ch);
                    }
                }
            }
            0x1C => {
                self.irq_threshold = value;
            }
            0x1E => {
                self.enabled = value & 0x01 != 0;
            }
            _ => {}
        }
    }

    /// 32 kHz drain: pop one sample from each non-empty FIFO and flag any
    /// channel that lands below the IRQ threshold.
    pub fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        for ch in 0..NUM_CHANNELS {
            let fifo = &mut self.fifos[ch];
            if fifo.samples.pop_front().is_some() && fifo.level() < self.irq_threshold {
                if !fifo.irq_pending {
                    fifo.irq_pending = true;
                    self.irq_status |= 1 << ch;
                }
            }
        }
    }

    /// IRQ line level: asserted while any channel has a pending bit.
    pub fn irq_asserted(&self) -> bool {
        self.irq_status != 0
    }

    /// Mix the front sample of every non-empty FIFO into a stereo frame.
    /// Observation only: nothing is popped; the 32 kHz tick drains.
    pub fn get_audio_frame(&self) -> (i16, i16) {
        let mut mix: i32 = 0;
        for fifo in &self.fifos {
            if let Some(&sample) = fifo.samples.front() {
                mix += sample as i32;
            }
        }
        mix /= NUM_CHANNELS as i32;
        let sample = mix.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        (sample, sample)
    }

    pub fn fifo_level(&self, channel: usize) -> u8 {
        if channel < NUM_CHANNELS {
            self.fifos[channel].level()
        } else {
            0
        }
    }

    pub fn irq_status(&self) -> u8 {
        self.irq_status
    }

    /// Handle a mailbox B write. A `$01` command copies a payload into
    /// sound RAM and returns `true`, signalling the emulator to release the
    /// sound CPU's reset line. Anything else returns `false` and is left
    /// for the generic mailbox IRQ path.
    ///
    /// Command layout: `[cmd, dest_lo, dest_hi, len_lo, len_hi, payload...]`.
    pub fn handle_mailbox_command(&mut self, mailbox: &mut Mailbox, sound_ram: &mut Ram) -> bool {
        if mailbox.peek_offset(0) != BOOT_COMMAND_COPY {
            return false;
        }

        let _ = mailbox.read_offset(0);
        let dest = mailbox.read_offset(1) as u16 | (mailbox.read_offset(2) as u16) << 8;
        let length = mailbox.read_offset(3) as u16 | (mailbox.read_offset(4) as u16) << 8;

        log(LogCategory::Audio, LogLevel::Info, || {
            format!(
                "CPLD1: boot command, copying {} bytes to sound RAM ${:04X}",
                length, dest
            )
        });

        for i in 0..length {
            let byte = mailbox.read_offset(5 + i as usize);
            sound_ram.store(dest.wrapping_add(i) as u32, byte);
        }

        true
    }
}

impl Default for CpldAudio {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_samples(cpld: &mut CpldAudio, channel: u32, count: usize) {
        for i in 0..count {
            cpld.store(BASE_ADDRESS + channel * 2, i as u8);
        }
    }

    #[test]
    fn test_fifo_write_and_level() {
        let mut cpld = CpldAudio::new();
        push_samples(&mut cpld, 0, 3);
        assert_eq!(cpld.read(BASE_ADDRESS + 0x10), 3);
        assert_eq!(cpld.read(BASE_ADDRESS + 0x11), 0);
    }

    #[test]
    fn test_fifo_sample_sign_extension() {
        let mut cpld = CpldAudio::new();
        cpld.store(BASE_ADDRESS, 0x80);
        assert_eq!(cpld.get_audio_frame().0, (-32768i32 / 8) as i16);
    }

    #[test]
    fn test_fifo_full_drops() {
        let mut cpld = CpldAudio::new();
        push_samples(&mut cpld, 2, FIFO_DEPTH + 10);
        // 256 reads back as 0 through the 8-bit level register.
        assert_eq!(cpld.read(BASE_ADDRESS + 0x12), 0);
        assert_eq!(cpld.fifos[2].samples.len(), FIFO_DEPTH);
    }

    #[test]
    fn test_tick_drains_one_per_channel() {
        let mut cpld = CpldAudio::new();
        cpld.store(BASE_ADDRESS + 0x1C, 0); // threshold 0, no IRQs
        push_samples(&mut cpld, 0, 5);
        push_samples(&mut cpld, 3, 2);

        cpld.tick();
        assert_eq!(cpld.fifo_level(0), 4);
        assert_eq!(cpld.fifo_level(3), 1);
        assert_eq!(cpld.fifo_level(1), 0);
    }

    #[test]
    fn test_threshold_irq_fires_on_crossing_tick() {
        let mut cpld = CpldAudio::new();
        push_samples(&mut cpld, 3, 200);

        // Level stays >= 128 for the first 72 ticks.
        for _ in 0..72 {
            cpld.tick();
        }
        assert_eq!(cpld.irq_status() & 0x08, 0);

        // 73rd tick: 128 -> 127, below the threshold.
        cpld.tick();
        assert_ne!(cpld.irq_status() & 0x08, 0);
        assert!(cpld.irq_asserted());
    }

    #[test]
    fn test_irq_clear_write_one_to_clear() {
        let mut cpld = CpldAudio::new();
        push_samples(&mut cpld, 0, 1);
        push_samples(&mut cpld, 1, 1);
        cpld.tick();
        assert_eq!(cpld.irq_status(), 0x03);

        cpld.store(BASE_ADDRESS + 0x1A, 0x01);
        assert_eq!(cpld.irq_status(), 0x02);
        assert!(cpld.irq_asserted());
        cpld.store(BASE_ADDRESS + 0x1A, 0x02);
        assert!(!cpld.irq_asserted());
    }

    #[test]
    fn test_master_enable_gates_tick() {
        let mut cpld = CpldAudio::new();
        push_samples(&mut cpld, 0, 4);
        cpld.store(BASE_ADDRESS + 0x1E, 0x00);
        cpld.tick();
        assert_eq!(cpld.fifo_level(0), 4);
        cpld.store(BASE_ADDRESS + 0x1E, 0x01);
        cpld.tick();
        assert_eq!(cpld.fifo_level(0), 3);
    }

    #[test]
    fn test_audio_frame_mixes_front_samples() {
        let mut cpld = CpldAudio::new();
        cpld.store(BASE_ADDRESS, 0x10); // channel 0: 0x1000
        cpld.store(BASE_ADDRESS + 2, 0x10); // channel 1: 0x1000
        let (l, r) = cpld.get_audio_frame();
        assert_eq!(l, 0x2000 / 8);
        assert_eq!(l, r);
        // Observation does not pop.
        assert_eq!(cpld.fifo_level(0), 1);
    }

    #[test]
    fn test_boot_command_copies_to_sound_ram() {
        let mut cpld = CpldAudio::new();
        let mut mailbox = Mailbox::new(0x410000, 1024, "B");
        let mut sound_ram = Ram::new(0, 0x10000, "Sound RAM");

        for (i, byte) in [0x01, 0x00, 0x02, 0x03, 0x00, 0xDE, 0xAD, 0xBE]
            .iter()
            .enumerate()
        {
            mailbox.store(0x410000 + i as u32, *byte);
        }

        assert!(cpld.handle_mailbox_command(&mut mailbox, &mut sound_ram));
        assert_eq!(sound_ram.read(0x0200), 0xDE);
        assert_eq!(sound_ram.read(0x0201), 0xAD);
        assert_eq!(sound_ram.read(0x0202), 0xBE);
        // The copy consumed the mailbox contents.
        assert!(!mailbox.has_new_data());
    }

    #[test]
    fn test_non_boot_command_passes_through() {
        let mut cpld = CpldAudio::new();
        let mut mailbox = Mailbox::new(0x410000, 1024, "B");
        let mut sound_ram = Ram::new(0, 0x10000, "Sound RAM");

        mailbox.store(0x410000, 0x7F);
        assert!(!cpld.handle_mailbox_command(&mut mailbox, &mut sound_ram));
    }
}
