//! Binary discovery for RML.
//!
//! Everything the framework knows about the host binary comes out of this
//! crate: wildcard byte-pattern scanning over a module snapshot
//! ([`Pattern`], [`PatternBatch`]), the PE section table ([`SectionTable`]),
//! and MSVC RTTI recovery ([`RttiScanner`]), which turns the host's
//! complete-object-locator chains into a class-name-to-vtable map without a
//! hand-maintained offset table.
//!
//! The scan passes run once at attach time. A pattern batch that fails to
//! resolve is a fatal startup error; an RTTI candidate that fails validation
//! is silently rejected.

mod batch;
mod pattern;
pub mod rtti;
mod sections;

pub use self::{
    batch::{MatchHandle, PatternBatch},
    pattern::Pattern,
    rtti::{RttiInfo, RttiMap, RttiScanner},
    sections::{Section, SectionTable},
};
