//! Master clock: one notion of time for three CPUs, video, and audio.
//!
//! The graphics CPU runs at the 13.5 MHz pixel clock and serves as the
//! master counter; scanline position and the 32 kHz audio cadence are both
//! derived from it. Each CPU has a per-frame cycle target; `run_frame`
//! advances the targets and the per-CPU loops execute until they catch up.
//!
//! Cross-component edges are reported as [`ClockEvent`]s drained by the
//! emulator rather than delivered through callbacks.

use std::time::Instant;

pub const MAIN_CPU_FREQ: u32 = 7_159_000;
pub const GRAPHICS_CPU_FREQ: u32 = 13_500_000;
pub const SOUND_CPU_FREQ: u32 = 4_773_000;

pub const FRAME_RATE: u32 = 60;
pub const SCANLINES_PER_FRAME: u32 = 240;
pub const TOTAL_SCANLINES: u32 = 262;
pub const PIXELS_PER_SCANLINE: u32 = 858;

pub const AUDIO_SAMPLE_RATE: u32 = 32_000;

pub const CYCLES_PER_FRAME_MAIN: u32 = MAIN_CPU_FREQ / FRAME_RATE;
pub const CYCLES_PER_FRAME_GRAPHICS: u32 = GRAPHICS_CPU_FREQ / FRAME_RATE;
pub const CYCLES_PER_FRAME_SOUND: u32 = SOUND_CPU_FREQ / FRAME_RATE;

pub const AUDIO_SAMPLES_PER_FRAME: u32 = AUDIO_SAMPLE_RATE / FRAME_RATE;

/// Timing edges derived from cycle advancement, in occurrence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// The raster entered a new scanline.
    Scanline(u16),
    /// The raster crossed from the active area into vertical blanking.
    VBlank,
    /// A 32 kHz audio sample is due.
    AudioSample,
}

pub struct MasterClock {
    main_cycles: u64,
    graphics_cycles: u64,
    sound_cycles: u64,
    /// Master counter; tracks the graphics CPU, the fastest clock.
    master_cycles: u64,

    frame_count: u64,
    current_scanline: u32,
    current_pixel: u32,

    target_main_cycles: u64,
    target_graphics_cycles: u64,
    target_sound_cycles: u64,

    audio_sample_counter: u64,
    audio_samples_this_frame: u32,

    events: Vec<ClockEvent>,
    real_time_start: Instant,
}

impl MasterClock {
    pub fn new() -> Self {
        let mut clock = Self {
            main_cycles: 0,
            graphics_cycles: 0,
            sound_cycles: 0,
            master_cycles: 0,
            frame_count: 0,
            current_scanline: 0,
            current_pixel: 0,
            target_main_cycles: 0,
            target_graphics_cycles: 0,
            target_sound_cycles: 0,
            audio_sample_counter: 0,
            audio_samples_this_frame: 0,
            events: Vec::new(),
            real_time_start: Instant::now(),
        };
        clock.reset();
        clock
    }

    pub fn reset(&mut self) {
        self.main_cycles = 0;
        self.graphics_cycles = 0;
        self.sound_cycles = 0;
        self.master_cycles = 0;
        self.frame_count = 0;
        self.current_scanline = 0;
        self.current_pixel = 0;
        self.audio_sample_counter = 0;
        self.audio_samples_this_frame = 0;
        self.events.clear();

        self.target_main_cycles = CYCLES_PER_FRAME_MAIN as u64;
        self.target_graphics_cycles = CYCLES_PER_FRAME_GRAPHICS as u64;
        self.target_sound_cycles = CYCLES_PER_FRAME_SOUND as u64;

        self.real_time_start = Instant::now();
    }

    pub fn add_main_cycles(&mut self, cycles: u32) {
        self.main_cycles += cycles as u64;
        self.update_video_timing();
        self.update_audio_timing();
    }

    pub fn add_graphics_cycles(&mut self, cycles: u32) {
        self.graphics_cycles += cycles as u64;
        self.master_cycles = self.graphics_cycles;
        self.update_video_timing();
        self.update_audio_timing();
    }

    pub fn add_sound_cycles(&mut self, cycles: u32) {
        self.sound_cycles += cycles as u64;
        self.update_audio_timing();
    }

    /// Derive scanline/pixel from the graphics cycle count (one cycle per
    /// pixel at the pixel clock) and emit edge events.
    fn update_video_timing(&mut self) {
        let cycles_this_frame = self.graphics_cycles % (CYCLES_PER_FRAME_GRAPHICS as u64);
        let total_pixels = cycles_this_frame as u32;

        let old_scanline = self.current_scanline;
        self.current_scanline = total_pixels / PIXELS_PER_SCANLINE;
        self.current_pixel = total_pixels % PIXELS_PER_SCANLINE;

        if self.current_scanline != old_scanline {
            self.events
                .push(ClockEvent::Scanline(self.current_scanline as u16));
        }

        if old_scanline < SCANLINES_PER_FRAME && self.current_scanline >= SCANLINES_PER_FRAME {
            self.events.push(ClockEvent::VBlank);
        }
    }

    /// Emit one `AudioSample` per 32 kHz period the master counter has
    /// crossed since the last update.
    fn update_audio_timing(&mut self) {
        let expected_samples =
            self.master_cycles * AUDIO_SAMPLE_RATE as u64 / GRAPHICS_CPU_FREQ as u64;
        while self.audio_sample_counter < expected_samples {
            self.events.push(ClockEvent::AudioSample);
            self.audio_sample_counter += 1;
            self.audio_samples_this_frame += 1;
        }
    }

    /// Advance the per-frame targets and count the frame.
    pub fn run_frame(&mut self) {
        self.target_main_cycles = self.main_cycles + CYCLES_PER_FRAME_MAIN as u64;
        self.target_graphics_cycles = self.graphics_cycles + CYCLES_PER_FRAME_GRAPHICS as u64;
        self.target_sound_cycles = self.sound_cycles + CYCLES_PER_FRAME_SOUND as u64;
        self.audio_samples_this_frame = 0;
        self.frame_count += 1;
    }

    pub fn should_run_main_cpu(&self) -> bool {
        self.main_cycles < self.target_main_cycles
    }

    pub fn should_run_graphics_cpu(&self) -> bool {
        self.graphics_cycles < self.target_graphics_cycles
    }

    pub fn should_run_sound_cpu(&self) -> bool {
        self.sound_cycles < self.target_sound_cycles
    }

    /// Hand the accumulated timing edges to the caller.
    pub fn take_events(&mut self) -> Vec<ClockEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn main_cycles(&self) -> u64 {
        self.main_cycles
    }

    pub fn graphics_cycles(&self) -> u64 {
        self.graphics_cycles
    }

    pub fn sound_cycles(&self) -> u64 {
        self.sound_cycles
    }

    pub fn master_cycles(&self) -> u64 {
        self.master_cycles
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn current_scanline(&self) -> u32 {
        self.current_scanline
    }

    pub fn current_pixel(&self) -> u32 {
        self.current_pixel
    }

    pub fn is_vblank(&self) -> bool {
        self.current_scanline >= SCANLINES_PER_FRAME
    }

    pub fn audio_samples_this_frame(&self) -> u32 {
        self.audio_samples_this_frame
    }

    /// Ratio of emulated to real elapsed time since reset; 1.0 is
    /// real-time.
    pub fn emulation_speed(&self) -> f64 {
        let real_micros = self.real_time_start.elapsed().as_micros() as u64;
        if real_micros == 0 {
            return 1.0;
        }
        let emulated_micros = self.graphics_cycles * 1_000_000 / GRAPHICS_CPU_FREQ as u64;
        emulated_micros as f64 / real_micros as f64
    }
}

impl Default for MasterClock {
    fn default() -> Self {
        Self::new()
    }
}
