//! SANo console emulation.
//!
//! The SANo carries three 65C816-family CPUs (main, graphics, sound) on
//! independent buses, three companion CPLDs (audio FIFO serializer, video
//! timing generator, raster effects engine), two inter-CPU mailboxes, a
//! bank-switched cartridge, a scanline video renderer and an 8-channel
//! audio mixer. The [`Emulator`] owns every component and drives them in
//! lockstep from the master clock; the CPU cores themselves come from
//! outside through the `sano_core::cpu::CpuCore` pin interface.

#![allow(clippy::upper_case_acronyms)]

pub mod bus;
pub mod cartridge;
pub mod clock;
pub mod cpld1_audio;
pub mod cpld2_video;
pub mod cpld3_raster;
pub mod emulator;
pub mod mailbox;
pub mod mixer;
pub mod ram;
pub mod renderer;

pub use emulator::Emulator;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SanoError {
    #[error("Invalid ROM: {0}")]
    InvalidRom(String),
    #[error("No cartridge loaded")]
    NoCartridge,
}
