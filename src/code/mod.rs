//! Installing compiled code into the code cache.
//!
//! The compiler describes its output as a [`CompiledCode`], usually by way of a serialized
//! [`stream`]. The [`CodeInstaller`] checks it, lays it out in a [`CodeBuffer`], applies its
//! relocations and builds the tables the VM needs (oop maps, debug info, exception tables and
//! dependencies), then hands the result to the VM as an nmethod or a runtime stub.

mod buffer;
mod compiled_code;
mod debug_info;
mod dependencies;
mod exception_tables;
mod installer;
mod offsets;
mod oop_map;
pub mod platform;
pub mod stream;

pub use self::buffer::*;
pub use self::compiled_code::*;
pub use self::debug_info::{
    DebugInformationRecorder, LocationType, MonitorValue, ObjectValue, PcDesc, ScopeMode, ScopeRecord, ScopeValue,
};
pub use self::dependencies::*;
pub use self::exception_tables::*;
pub use self::installer::{CodeInstaller, InstallOutcome, InstalledBlob, PreparedCode};
pub(crate) use self::installer::bind_nmethod_mirror;
pub use self::offsets::*;
pub use self::oop_map::*;
