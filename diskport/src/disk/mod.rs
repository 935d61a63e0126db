//! Disk image operations.
//!
//! This module provides the image model and the conversion engine:
//! - `ImageSource`, `ImageInfo`, `ImageFormat` - what an image is
//! - `SizeQuantity` - volume sizes as qemu-img understands them
//! - `ImageOperations` - the operation set, implemented by `QemuImg`
//! - `preallocation` - fastest-first preallocation fallback chain

pub mod constants;
mod block;
mod convert;
mod image;
mod info;
mod operations;
pub mod preallocation;
mod qemu_img;
mod size;

pub use block::{ZeroFillPass, zero_fill_plan};
pub use convert::resolve_cache_mode;
pub use image::{CacheMode, CacheModeHint, ImageFormat, ImageInfo, ImageSource};
pub use info::{check_image_info, parse_image_info};
pub use operations::ImageOperations;
pub use qemu_img::QemuImg;
pub use size::SizeQuantity;
