//! Core primitives shared by the SANo emulator crates.

pub mod addr;
pub mod cpu;
pub mod logging;

pub mod types {
    use serde::{Deserialize, Serialize};

    /// An RGBA framebuffer, packed as `0xAARRGGBB`.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u32>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height) as usize],
            }
        }
    }

    pub type AudioSample = i16;
}
