//! # tg-core
//!
//! Core types and capability traits for ToyGen.
//!
//! This crate provides:
//! - The shared [`Error`]/[`Result`] types.
//! - Value types for the generation boundary: [`Variable`], [`VariableSet`],
//!   [`EventBuffer`] and [`EventTable`].
//! - The capability traits consumed by the generation planner: [`Density`],
//!   [`DensityModel`] and [`EventSampler`]. High-level planning logic depends
//!   only on these traits, never on a concrete model representation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Density, DensityModel, EventSampler, GeneratorCode};
pub use types::{EventBuffer, EventTable, Variable, VariableKind, VariableSet};
