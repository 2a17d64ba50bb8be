//! Speaker output for the terminal host: symphonia decoding plus cpal.

mod decode;
mod device;

pub use decode::{decode_to_mono_f32, resample_linear_mono};
pub use device::DeviceOutput;
