//! CPLD #2: video timing generator and VRAM arbiter.
//!
//! Tracks the raster position at the 13.5 MHz pixel clock, exposes H/V
//! blanking status, pends the VBlank IRQ on frame wrap, arbitrates
//! graphics-CPU VRAM access, and watches mailbox A for the graphics-CPU
//! boot command. The register file also carries the renderer's inputs:
//! display mode, layer enables, per-layer scroll/control, and the global
//! effect registers.
//!
//! Register map (`$400200-$40023F`):
//!
//! | Offset | Register |
//! |---|---|
//! | `$00` | MODE: bit 0: 480i; bits 0..1: render mode 0-3 |
//! | `$01` | LAYER_ENABLE: bits 0..4: BG0,BG1,FG0,FG1,HUD; bit 5: sprites |
//! | `$02-$03` | RASTER_LINE (ro) |
//! | `$04-$05` | RASTER_X (ro) |
//! | `$06` | VBLANK_STATUS (ro) |
//! | `$08` | HBLANK_STATUS (ro) |
//! | `$0A` | VBLANK_IRQ_CLEAR (any nonzero write) |
//! | `$0C` | BRIGHTNESS 0..31 |
//! | `$0D-$0F` | TINT_R/G/B (signed) |
//! | `$10+i*8` | layer i: SCROLLX lo/hi, SCROLLY lo/hi, CONTROL, PRIORITY |
//! | `$38` | MOSAIC size |
//! | `$39` | WINDOW_CTRL: bit 0: enable, bit 1: invert |
//! | `$3A-$3B` | WINDOW_X0/X1 (in 2-pixel units) |
//!
//! Layer CONTROL: bits 0..1 bpp (0=2bpp, 1=4bpp, 2=8bpp), bit 2 tile size
//! (16×16 when set), bit 3 map size (64×64 when set), bits 4..7 palette
//! bank.

use sano_core::logging::{log, LogCategory, LogLevel};

use crate::mailbox::Mailbox;
use crate::ram::Ram;

pub const BASE_ADDRESS: u32 = 0x400200;
pub const SIZE: u32 = 0x40;

pub const PIXELS_PER_LINE: u16 = 857;
pub const LINES_PER_FRAME_240P: u16 = 262;
pub const LINES_PER_FRAME_480I: u16 = 525;

const HBLANK_START: u16 = 0;
const HBLANK_END: u16 = 137;

const VBLANK_LINES: u16 = 22;

pub const NUM_LAYERS: usize = 5;

const BOOT_COMMAND_COPY: u8 = 0x01;

/// Per-layer render configuration, decoded from the layer register block.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerConfig {
    pub scroll_x: u16,
    pub scroll_y: u16,
    pub control: u8,
    pub priority: u8,
}

impl LayerConfig {
    /// Bits per pixel: 2, 4 or 8.
    pub fn bpp(&self) -> u8 {
        match self.control & 0x03 {
            0 => 2,
            1 => 4,
            _ => 8,
        }
    }

    /// Tile edge in pixels: 8 or 16.
    pub fn tile_size(&self) -> u16 {
        if self.control & 0x04 != 0 {
            16
        } else {
            8
        }
    }

    /// Map edge in tiles: 32 or 64.
    pub fn map_size(&self) -> u16 {
        if self.control & 0x08 != 0 {
            64
        } else {
            32
        }
    }

    pub fn pal_bank(&self) -> u8 {
        (self.control >> 4) & 0x0F
    }
}

/// Global post-processing settings read by the renderer.
#[derive(Debug, Clone, Copy)]
pub struct EffectConfig {
    pub brightness: u8,
    pub tint_r: i8,
    pub tint_g: i8,
    pub tint_b: i8,
    pub mosaic: u8,
    pub window_ctrl: u8,
    pub window_x0: u8,
    pub window_x1: u8,
}

pub struct CpldVideo {
    mode: u8,
    layer_enable: u8,
    raster_line: u16,
    raster_x: u16,
    in_vblank: bool,
    in_hblank: bool,
    vblank_irq_pending: bool,
    vblank_edge: bool,
    brightness: u8,
    tint: [i8; 3],
    layers: [LayerConfig; NUM_LAYERS],
    mosaic: u8,
    window_ctrl: u8,
    window_x0: u8,
    window_x1: u8,
}

impl CpldVideo {
    pub fn new() -> Self {
        let mut cpld = Self {
            mode: 0,
            layer_enable: 0x3F,
            raster_line: 0,
            raster_x: 0,
            in_vblank: true,
            in_hblank: true,
            vblank_irq_pending: false,
            vblank_edge: false,
            brightness: 31,
            tint: [0; 3],
            layers: [LayerConfig::default(); NUM_LAYERS],
            mosaic: 0,
            window_ctrl: 0,
            window_x0: 0,
            window_x1: 0,
        };
        cpld.update_blanking();
        cpld
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn decode(&self, flat: u32) -> bool {
        (BASE_ADDRESS..BASE_ADDRESS + SIZE).contains(&flat)
    }

    pub fn read(&self, flat: u32) -> u8 {
        let offset = flat.wrapping_sub(BASE_ADDRESS);
        match offset {
            0x00 => self.mode,
            0x01 => self.layer_enable,
            0x02 => self.raster_line as u8,
            0x03 => (self.raster_line >> 8) as u8,
            0x04 => self.raster_x as u8,
            0x05 => (self.raster_x >> 8) as u8,
            0x06 => self.in_vblank as u8,
            0x08 => self.in_hblank as u8,
            0x0C => self.brightness,
            0x0D => self.tint[0] as u8,
            0x0E => self.tint[1] as u8,
            0x0F => self.tint[2] as u8,
            0x10..=0x37 => {
                let layer = &self.layers[(offset as usize - 0x10) / 8];
                match (offset - 0x10) % 8 {
                    0 => layer.scroll_x as u8,
                    1 => (layer.scroll_x >> 8) as u8,
                    2 => layer.scroll_y as u8,
                    3 => (layer.scroll_y >> 8) as u8,
                    4 => layer.control,
                    5 => layer.priority,
                    _ => 0x00,
                }
            }
            0x38 => self.mosaic,
            0x39 => self.window_ctrl,
            0x3A => self.window_x0,
            0x3B => self.window_x1,
            _ => 0x00,
        }
    }

    pub fn store(&mut self, flat: u32, value: u8) {
        let offset = flat.wrapping_sub(BASE_ADDRESS);
        match offset {
            0x00 => {
                self.mode = value;
                self.update_blanking();
            }
            0x01 => self.layer_enable = value,
            0x0A => {
                if value != 0 {
                    self.vblank_irq_pending = false;
                }
            }
            0x0C => self.brightness = value & 0x1F,
            0x0D => self.tint[0] = value as i8,
            0x0E => self.tint[1] = value as i8,
            0x0F => self.tint[2] = value as i8,
            0x10..=0x37 => {
                let layer = &mut self.layers[(offset as usize - 0x10) / 8];
                match (offset - 0x10) % 8 {
                    0 => layer.scroll_x = (layer.scroll_x & 0xFF00) | value as u16,
                    1 => layer.scroll_x = (layer.scroll_x & 0x00FF) | (value as u16) << 8,
                    2 => layer.scroll_y = (layer.scroll_y & 0xFF00) | value as u16,
                    3 => layer.scroll_y = (layer.scroll_y & 0x00FF) | (value as u16) << 8,
                    4 => layer.control = value,
                    5 => layer.priority = value,
                    _ => {}
                }
            }
            0x38 => self.mosaic = value,
            0x39 => self.window_ctrl = value,
            0x3A => self.window_x0 = value,
            0x3B => self.window_x1 = value,
            _ => {}
        }
    }

    /// Advance one pixel clock. Returns `Some(line)` when a new scanline
    /// begins; line 0 marks the frame wrap, which also pends the VBlank
    /// IRQ if it is not already pending.
    pub fn tick(&mut self) -> Option<u16> {
        self.raster_x += 1;

        let mut new_line = None;
        if self.raster_x >= PIXELS_PER_LINE {
            self.raster_x = 0;
            self.raster_line += 1;

            if self.raster_line >= self.total_lines() {
                self.raster_line = 0;
                if !self.vblank_irq_pending {
                    self.vblank_irq_pending = true;
                    self.vblank_edge = true;
                    log(LogCategory::Interrupts, LogLevel::Debug, || {
                        "CPLD2: VBlank IRQ pending".to_string()
                    });
                }
            }
            new_line = Some(self.raster_line);
        }

        self.update_blanking();
        new_line
    }

    fn update_blanking(&mut self) {
        self.in_hblank = (HBLANK_START..=HBLANK_END).contains(&self.raster_x);

        if self.interlaced() {
            // 480i: one blanking interval per field.
            self.in_vblank = self.raster_line < VBLANK_LINES
                || (LINES_PER_FRAME_240P..LINES_PER_FRAME_240P + VBLANK_LINES)
                    .contains(&self.raster_line);
        } else {
            self.in_vblank = self.raster_line < VBLANK_LINES;
        }
    }

    /// The graphics CPU may touch VRAM only while the raster is blanked.
    /// The gate is advisory: the bus does not enforce it.
    pub fn allow_g_cpu_vram_access(&self) -> bool {
        self.in_hblank || self.in_vblank
    }

    fn interlaced(&self) -> bool {
        self.mode & 0x01 != 0
    }

    fn total_lines(&self) -> u16 {
        if self.interlaced() {
            LINES_PER_FRAME_480I
        } else {
            LINES_PER_FRAME_240P
        }
    }

    pub fn raster_line(&self) -> u16 {
        self.raster_line
    }

    pub fn raster_x(&self) -> u16 {
        self.raster_x
    }

    pub fn in_vblank(&self) -> bool {
        self.in_vblank
    }

    pub fn in_hblank(&self) -> bool {
        self.in_hblank
    }

    pub fn vblank_irq_pending(&self) -> bool {
        self.vblank_irq_pending
    }

    /// Take the VBlank rising edge, clearing it.
    pub fn take_vblank_edge(&mut self) -> bool {
        std::mem::take(&mut self.vblank_edge)
    }

    /// Render mode 0-3 (0 = framebuffer, 1 = standard, 2 = max layers,
    /// 3 = background only). Shares the MODE register with the 480i bit.
    pub fn render_mode(&self) -> u8 {
        self.mode & 0x03
    }

    pub fn layer_enable(&self) -> u8 {
        self.layer_enable
    }

    pub fn layer(&self, index: usize) -> LayerConfig {
        self.layers[index]
    }

    pub fn effects(&self) -> EffectConfig {
        EffectConfig {
            brightness: self.brightness,
            tint_r: self.tint[0],
            tint_g: self.tint[1],
            tint_b: self.tint[2],
            mosaic: self.mosaic,
            window_ctrl: self.window_ctrl,
            window_x0: self.window_x0,
            window_x1: self.window_x1,
        }
    }

    /// Handle a mailbox A write. A `$01` command copies a payload into
    /// graphics RAM and returns `true`, signalling the emulator to release
    /// the graphics CPU's reset line; other commands are left for the
    /// generic mailbox IRQ path.
    pub fn handle_mailbox_command(&mut self, mailbox: &mut Mailbox, graphics_ram: &mut Ram) -> bool {
        if mailbox.peek_offset(0) != BOOT_COMMAND_COPY {
            return false;
        }

        let _ = mailbox.read_offset(0);
        let dest = mailbox.read_offset(1) as u16 | (mailbox.read_offset(2) as u16) << 8;
        let length = mailbox.read_offset(3) as u16 | (mailbox.read_offset(4) as u16) << 8;

        log(LogCategory::Video, LogLevel::Info, || {
            format!(
                "CPLD2: boot command, copying {} bytes to VRAM ${:04X}",
                length, dest
            )
        });

        for i in 0..length {
            let byte = mailbox.read_offset(5 + i as usize);
            graphics_ram.store(dest.wrapping_add(i) as u32, byte);
        }

        true
    }
}

impl Default for CpldVideo {
    fn default() -> Self {
        Self::new()
    }
}
