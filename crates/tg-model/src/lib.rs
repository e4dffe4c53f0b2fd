//! # tg-model
//!
//! A concrete density model for ToyGen.
//!
//! This crate provides:
//! - [`GraphDensity`]: a density over an explicit directed dependency graph
//!   (fundamental leaves and derived formula nodes), built through
//!   [`GraphDensityBuilder`] with full build-time validation.
//! - An analytic-generator registry, so a model can declare which variable
//!   subsets it generates in closed form.
//! - Numerical marginalization via Gauss-Legendre tensor quadrature, used to
//!   construct the reduced density that drives accept-reject sampling.
//!
//! The planner in `tg-gen` consumes this model only through the
//! `tg_core::DensityModel` capability trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph;
pub mod quad;

mod reduce;

pub use graph::{GenerateFn, GraphDensity, GraphDensityBuilder, ValueFn};
