//! SOCI Wrapper CLI - builds and pushes a SOCI index for one image.

pub mod args;
pub mod process;
pub mod signals;
