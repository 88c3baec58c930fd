//! # PX Logic utilities
//!
//! Loading of the images a PX Logic device is provisioned with: the USB microcontroller's
//! bootloader and application firmware, and the FPGA reset and configuration bitstreams.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod images;
pub mod resources;
