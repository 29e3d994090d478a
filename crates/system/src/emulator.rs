//! Top-level orchestrator.
//!
//! Owns every component, wires the buses, and drives the per-frame loop:
//! budget cycles through the master clock, step each CPU against its bus,
//! service the timing and mailbox edges between instructions, and render
//! the frame once all three CPUs have caught up.
//!
//! Boot protocol: on reset each CPU whose ROM header entry point is
//! non-zero starts there; a zero entry point keeps that CPU in reset until
//! the main CPU writes a `$01` copy command into its mailbox, at which
//! point the watching CPLD copies the payload into the target's RAM and
//! the reset line is released with the program address at `$00:0000`.

use std::cell::RefCell;
use std::rc::Rc;

use sano_core::addr::Address;
use sano_core::cpu::{CpuCore, IdleCpu};
use sano_core::logging::{log, LogCategory, LogLevel};
use sano_core::types::Frame;

use crate::bus::{Device, SystemBus};
use crate::cartridge::Cartridge;
use crate::clock::{ClockEvent, MasterClock};
use crate::cpld1_audio::CpldAudio;
use crate::cpld2_video::CpldVideo;
use crate::cpld3_raster::CpldRaster;
use crate::mailbox::Mailbox;
use crate::mixer::AudioMixer;
use crate::ram::Ram;
use crate::renderer::VideoRenderer;
use crate::SanoError;

const MAIN_RAM_SIZE: u32 = 128 * 1024;
const GRAPHICS_RAM_SIZE: u32 = 512 * 1024;
const SOUND_RAM_SIZE: u32 = 64 * 1024;

const MAILBOX_A_BASE: u32 = 0x400000;
const MAILBOX_B_BASE: u32 = 0x410000;
const MAILBOX_SIZE: u32 = 1024;

/// The three CPUs, in the order the frame loop runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpuId {
    Main,
    Graphics,
    Sound,
}

pub struct Emulator {
    clock: MasterClock,

    main_ram: Rc<RefCell<Ram>>,
    graphics_ram: Rc<RefCell<Ram>>,
    sound_ram: Rc<RefCell<Ram>>,
    mailbox_a: Rc<RefCell<Mailbox>>,
    mailbox_b: Rc<RefCell<Mailbox>>,

    cpld1: Rc<RefCell<CpldAudio>>,
    cpld2: Rc<RefCell<CpldVideo>>,
    cpld3: Rc<RefCell<CpldRaster>>,

    cartridge: Option<Rc<RefCell<Cartridge>>>,

    main_bus: SystemBus,
    graphics_bus: SystemBus,
    sound_bus: SystemBus,

    main_cpu: Box<dyn CpuCore>,
    graphics_cpu: Box<dyn CpuCore>,
    sound_cpu: Box<dyn CpuCore>,

    renderer: VideoRenderer,
    mixer: AudioMixer,

    running: bool,
    paused: bool,
}

impl Emulator {
    /// Build the machine with stand-in CPUs. Production wiring swaps in
    /// real cores via [`with_cpus`].
    ///
    /// [`with_cpus`]: Emulator::with_cpus
    pub fn new() -> Self {
        Self::with_cpus(
            Box::new(IdleCpu::new()),
            Box::new(IdleCpu::new()),
            Box::new(IdleCpu::new()),
        )
    }

    pub fn with_cpus(
        main_cpu: Box<dyn CpuCore>,
        graphics_cpu: Box<dyn CpuCore>,
        sound_cpu: Box<dyn CpuCore>,
    ) -> Self {
        let main_ram = Rc::new(RefCell::new(Ram::new(0, MAIN_RAM_SIZE, "Main RAM")));
        let graphics_ram = Rc::new(RefCell::new(Ram::new(0, GRAPHICS_RAM_SIZE, "Graphics RAM")));
        let sound_ram = Rc::new(RefCell::new(Ram::new(0, SOUND_RAM_SIZE, "Sound RAM")));

        let mailbox_a = Rc::new(RefCell::new(Mailbox::new(MAILBOX_A_BASE, MAILBOX_SIZE, "A")));
        let mailbox_b = Rc::new(RefCell::new(Mailbox::new(MAILBOX_B_BASE, MAILBOX_SIZE, "B")));

        let cpld1 = Rc::new(RefCell::new(CpldAudio::new()));
        let cpld2 = Rc::new(RefCell::new(CpldVideo::new()));
        let cpld3 = Rc::new(RefCell::new(CpldRaster::new()));

        // Registration order is load-bearing: the CPLD register files must
        // shadow the overlapping head of mailbox A's region.
        let mut main_bus = SystemBus::new("main");
        main_bus.register(Device::Ram(main_ram.clone()));
        main_bus.register(Device::CpldAudio(cpld1.clone()));
        main_bus.register(Device::CpldVideo(cpld2.clone()));
        main_bus.register(Device::CpldRaster(cpld3.clone()));
        main_bus.register(Device::Mailbox(mailbox_a.clone()));
        main_bus.register(Device::Mailbox(mailbox_b.clone()));

        let mut graphics_bus = SystemBus::new("graphics");
        graphics_bus.register(Device::Ram(graphics_ram.clone()));
        graphics_bus.register(Device::CpldVideo(cpld2.clone()));
        graphics_bus.register(Device::CpldRaster(cpld3.clone()));
        graphics_bus.register(Device::Mailbox(mailbox_a.clone()));

        let mut sound_bus = SystemBus::new("sound");
        sound_bus.register(Device::Ram(sound_ram.clone()));
        sound_bus.register(Device::CpldAudio(cpld1.clone()));
        sound_bus.register(Device::Mailbox(mailbox_b.clone()));

        let renderer = VideoRenderer::new(graphics_ram.clone(), cpld2.clone(), cpld3.clone());
        let mixer = AudioMixer::new(cpld1.clone());

        Self {
            clock: MasterClock::new(),
            main_ram,
            graphics_ram,
            sound_ram,
            mailbox_a,
            mailbox_b,
            cpld1,
            cpld2,
            cpld3,
            cartridge: None,
            main_bus,
            graphics_bus,
            sound_bus,
            main_cpu,
            graphics_cpu,
            sound_cpu,
            renderer,
            mixer,
            running: false,
            paused: false,
        }
    }

    /// Load a ROM image and register the cartridge on all three buses,
    /// replacing any previous cartridge.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), SanoError> {
        let cartridge = Rc::new(RefCell::new(Cartridge::load(data)?));

        self.unload_rom();
        self.main_bus.register(Device::Cartridge(cartridge.clone()));
        self.graphics_bus
            .register(Device::Cartridge(cartridge.clone()));
        self.sound_bus.register(Device::Cartridge(cartridge.clone()));
        self.cartridge = Some(cartridge);
        Ok(())
    }

    pub fn unload_rom(&mut self) {
        if self.running {
            self.stop();
        }
        self.main_bus.unregister_cartridge();
        self.graphics_bus.unregister_cartridge();
        self.sound_bus.unregister_cartridge();
        self.cartridge = None;
    }

    pub fn is_rom_loaded(&self) -> bool {
        self.cartridge.is_some()
    }

    /// Power-on reset. Each CPU either starts at its header entry point or
    /// stays in reset awaiting the mailbox boot.
    pub fn reset(&mut self) {
        let entries = self.cartridge.as_ref().map(|c| {
            let header = c.borrow().header().clone();
            (header.main_entry, header.graphics_entry, header.sound_entry)
        });
        let (main_entry, graphics_entry, sound_entry) = entries.unwrap_or((0, 0, 0));

        for (cpu, entry, id) in [
            (&mut self.main_cpu, main_entry, CpuId::Main),
            (&mut self.graphics_cpu, graphics_entry, CpuId::Graphics),
            (&mut self.sound_cpu, sound_entry, CpuId::Sound),
        ] {
            cpu.set_res_pin(true);
            cpu.set_irq_pin(false);
            if entry != 0 {
                cpu.set_res_pin(false);
                cpu.set_program_address(Address::from_flat(entry));
                log(LogCategory::Cpu, LogLevel::Info, || {
                    format!("{:?} CPU released at ${:06X}", id, entry)
                });
            } else {
                log(LogCategory::Cpu, LogLevel::Info, || {
                    format!("{:?} CPU held in reset (mailbox boot)", id)
                });
            }
        }

        self.clock.reset();
    }

    pub fn run(&mut self) {
        if !self.is_rom_loaded() {
            log(LogCategory::Cpu, LogLevel::Warn, || {
                "cannot run: no ROM loaded".to_string()
            });
            return;
        }
        self.running = true;
        self.paused = false;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Run one 60 Hz frame: advance the cycle targets, let each CPU catch
    /// up, then render.
    pub fn run_frame(&mut self) {
        if !self.running || self.paused {
            return;
        }

        self.clock.run_frame();

        self.run_cpu(CpuId::Main);
        self.run_cpu(CpuId::Graphics);
        self.run_cpu(CpuId::Sound);

        self.renderer.render_frame();
    }

    fn run_cpu(&mut self, id: CpuId) {
        loop {
            if !self.running {
                break;
            }
            let behind = match id {
                CpuId::Main => self.clock.should_run_main_cpu(),
                CpuId::Graphics => self.clock.should_run_graphics_cpu(),
                CpuId::Sound => self.clock.should_run_sound_cpu(),
            };
            if !behind {
                break;
            }

            // A core reporting zero cycles would stall the budget loop.
            let cycles = match id {
                CpuId::Main => {
                    let c = self.main_cpu.execute_next_instruction(&mut self.main_bus);
                    let c = c.max(1);
                    self.clock.add_main_cycles(c);
                    c
                }
                CpuId::Graphics => {
                    let c = self
                        .graphics_cpu
                        .execute_next_instruction(&mut self.graphics_bus);
                    let c = c.max(1);
                    self.clock.add_graphics_cycles(c);
                    c
                }
                CpuId::Sound => {
                    let c = self.sound_cpu.execute_next_instruction(&mut self.sound_bus);
                    let c = c.max(1);
                    self.clock.add_sound_cycles(c);
                    c
                }
            };

            // CPLD2 runs at the pixel clock, one tick per graphics cycle.
            if id == CpuId::Graphics {
                let mut cpld2 = self.cpld2.borrow_mut();
                for _ in 0..cycles {
                    cpld2.tick();
                }
            }

            self.dispatch_clock_events();
            self.service_mailboxes();
            self.sync_irq_lines();
        }
    }

    /// Single-step one instruction on the main CPU.
    pub fn step(&mut self) {
        if !self.running {
            return;
        }
        let cycles = self
            .main_cpu
            .execute_next_instruction(&mut self.main_bus)
            .max(1);
        self.clock.add_main_cycles(cycles);
        self.dispatch_clock_events();
        self.service_mailboxes();
        self.sync_irq_lines();
    }

    fn dispatch_clock_events(&mut self) {
        for event in self.clock.take_events() {
            match event {
                ClockEvent::Scanline(line) => {
                    self.cpld3.borrow_mut().on_hsync(line);
                }
                ClockEvent::VBlank => {
                    // The bus-visible VBlank IRQ comes from CPLD2's own
                    // raster wrap; the clock edge marks the frame boundary.
                }
                ClockEvent::AudioSample => {
                    self.cpld1.borrow_mut().tick();
                }
            }
        }
    }

    /// Dispatch latched mailbox writes to the watching CPLD. A handled
    /// boot command releases the target CPU at `$00:0000`; anything else
    /// is left pending so the peer IRQ line stays asserted.
    fn service_mailboxes(&mut self) {
        if self.mailbox_a.borrow_mut().take_write_event() {
            let handled = {
                let mut mailbox = self.mailbox_a.borrow_mut();
                let mut vram = self.graphics_ram.borrow_mut();
                self.cpld2
                    .borrow_mut()
                    .handle_mailbox_command(&mut mailbox, &mut vram)
            };
            if handled {
                log(LogCategory::Cpu, LogLevel::Info, || {
                    "releasing Graphics CPU reset".to_string()
                });
                self.graphics_cpu.set_res_pin(false);
                self.graphics_cpu.set_program_address(Address::new(0, 0));
            }
        }

        if self.mailbox_b.borrow_mut().take_write_event() {
            let handled = {
                let mut mailbox = self.mailbox_b.borrow_mut();
                let mut ram = self.sound_ram.borrow_mut();
                self.cpld1
                    .borrow_mut()
                    .handle_mailbox_command(&mut mailbox, &mut ram)
            };
            if handled {
                log(LogCategory::Cpu, LogLevel::Info, || {
                    "releasing Sound CPU reset".to_string()
                });
                self.sound_cpu.set_res_pin(false);
                self.sound_cpu.set_program_address(Address::new(0, 0));
            }
        }
    }

    /// Level-derive every IRQ pin from component state. Pins stay
    /// asserted until the underlying condition is acknowledged.
    fn sync_irq_lines(&mut self) {
        self.main_cpu
            .set_irq_pin(self.cpld2.borrow().vblank_irq_pending());
        self.graphics_cpu.set_irq_pin(
            self.cpld3.borrow().irq_pending() || self.mailbox_a.borrow().has_new_data(),
        );
        self.sound_cpu.set_irq_pin(
            self.cpld1.borrow().irq_asserted() || self.mailbox_b.borrow().has_new_data(),
        );
    }

    pub fn framebuffer(&self) -> &Frame {
        self.renderer.frame()
    }

    /// Fill `buffer` with `frames` interleaved 32 kHz stereo frames.
    pub fn generate_samples(&mut self, buffer: &mut [i16], frames: usize) {
        self.mixer.generate_samples(buffer, frames);
    }

    pub fn mixer_mut(&mut self) -> &mut AudioMixer {
        &mut self.mixer
    }

    pub fn frame_count(&self) -> u64 {
        self.clock.frame_count()
    }

    pub fn emulation_speed(&self) -> f64 {
        self.clock.emulation_speed()
    }

    /// Restore the cartridge's save RAM from a persisted byte slice.
    pub fn load_save_ram(&mut self, data: &[u8]) -> Result<(), SanoError> {
        let cartridge = self.cartridge.as_ref().ok_or(SanoError::NoCartridge)?;
        cartridge.borrow_mut().load_save_ram(data);
        Ok(())
    }

    /// Save RAM contents for persistence; `None` when absent or never
    /// written.
    pub fn save_ram(&self) -> Option<Vec<u8>> {
        let cartridge = self.cartridge.as_ref()?;
        let cartridge = cartridge.borrow();
        cartridge.save_ram().map(|bytes| bytes.to_vec())
    }

    /// Diagnostics snapshot for the CLI and tests.
    pub fn debug_state(&self) -> serde_json::Value {
        let pc = |cpu: &dyn CpuCore| {
            let addr = cpu.program_address();
            serde_json::json!({
                "bank": addr.bank(),
                "offset": addr.offset(),
                "in_reset": cpu.res_pin(),
            })
        };

        serde_json::json!({
            "frame": self.clock.frame_count(),
            "cycles": {
                "main": self.clock.main_cycles(),
                "graphics": self.clock.graphics_cycles(),
                "sound": self.clock.sound_cycles(),
            },
            "cpus": {
                "main": pc(self.main_cpu.as_ref()),
                "graphics": pc(self.graphics_cpu.as_ref()),
                "sound": pc(self.sound_cpu.as_ref()),
            },
            "raster": {
                "line": self.cpld2.borrow().raster_line(),
                "pixel": self.cpld2.borrow().raster_x(),
                "vblank": self.cpld2.borrow().in_vblank(),
            },
            "mailboxes": {
                "a_new_data": self.mailbox_a.borrow().has_new_data(),
                "b_new_data": self.mailbox_b.borrow().has_new_data(),
            },
            "bank": self.cartridge.as_ref().map(|c| c.borrow().current_bank()),
        })
    }

    // Component handles for tests and frontends.

    pub fn main_bus(&self) -> &SystemBus {
        &self.main_bus
    }

    pub fn graphics_bus(&self) -> &SystemBus {
        &self.graphics_bus
    }

    pub fn sound_bus(&self) -> &SystemBus {
        &self.sound_bus
    }

    pub fn main_cpu(&self) -> &dyn CpuCore {
        self.main_cpu.as_ref()
    }

    pub fn graphics_cpu(&self) -> &dyn CpuCore {
        self.graphics_cpu.as_ref()
    }

    pub fn sound_cpu(&self) -> &dyn CpuCore {
        self.sound_cpu.as_ref()
    }

    pub fn main_ram(&self) -> Rc<RefCell<Ram>> {
        self.main_ram.clone()
    }

    pub fn graphics_ram(&self) -> Rc<RefCell<Ram>> {
        self.graphics_ram.clone()
    }

    pub fn sound_ram(&self) -> Rc<RefCell<Ram>> {
        self.sound_ram.clone()
    }

    pub fn mailbox_a(&self) -> Rc<RefCell<Mailbox>> {
        self.mailbox_a.clone()
    }

    pub fn mailbox_b(&self) -> Rc<RefCell<Mailbox>> {
        self.mailbox_b.clone()
    }

    pub fn cpld1(&self) -> Rc<RefCell<CpldAudio>> {
        self.cpld1.clone()
    }

    pub fn cpld2(&self) -> Rc<RefCell<CpldVideo>> {
        self.cpld2.clone()
    }

    pub fn cpld3(&self) -> Rc<RefCell<CpldRaster>> {
        self.cpld3.clone()
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}
