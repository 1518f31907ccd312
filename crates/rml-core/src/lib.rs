//! Core types shared by every RML crate.
//!
//! This crate defines the address vocabulary ([`Va`], [`Rva`]), the error
//! taxonomy ([`RmlError`]), and the [`ModuleImage`] abstraction over a module
//! mapped into the current process. Everything above this crate works against
//! `ModuleImage` snapshots, so the discovery and hooking layers can be
//! exercised against synthetic images without a live host.

mod address;
mod error;
mod image;
mod kinds;

pub use self::{
    address::{Rva, Va},
    error::RmlError,
    image::{ModuleImage, OwnedImage},
    kinds::{DataModelKind, PermissionLevel},
};

#[cfg(windows)]
pub use self::image::live::LiveModule;
