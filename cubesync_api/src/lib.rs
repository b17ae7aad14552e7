//! Shared cubesync data models consumed by the core library and provider crates.

pub mod conflict;
pub mod delta;
pub mod pinctrl;

pub use conflict::*;
pub use delta::*;
pub use pinctrl::*;
