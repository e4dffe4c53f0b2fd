//! Capability traits for the generation boundary.
//!
//! The planner (`tg-gen`) queries a model exclusively through
//! [`DensityModel`], so the classification algorithm stays independent of how
//! a concrete model stores its dependency graph. The residual sampler is
//! consumed through [`EventSampler`].

use rand::RngCore;
use serde::Serialize;
use std::fmt;

use crate::types::{EventBuffer, VariableSet};
use crate::Result;

/// An opaque analytic-generator method code.
///
/// Issued by a model from [`DensityModel::analytic_generator`] and threaded
/// back unchanged into [`DensityModel::generate_into`]. The planner never
/// interprets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GeneratorCode(pub u32);

/// Evaluate a non-negative (not necessarily normalized) density at one event
/// point.
///
/// `Debug` is a supertrait so boxed densities show up in diagnostics and
/// test assertions.
pub trait Density: Send + Sync + fmt::Debug {
    /// Stable name, used in diagnostics.
    fn name(&self) -> &str;

    /// Density value at `event`.
    ///
    /// Returns `Err` when a required slot is missing from the buffer.
    /// Anomalous values (negative or non-finite) are reported through the
    /// model's error counters, not through `Err`.
    fn value(&self, event: &EventBuffer) -> Result<f64>;
}

/// Full capability interface of a density model over named variables.
pub trait DensityModel: Density {
    /// Every named node the density transitively reads from: fundamental
    /// leaves carry their domain bounds, derived nodes are marked
    /// [`VariableKind::Derived`](crate::VariableKind::Derived).
    fn dependency_closure(&self) -> VariableSet;

    /// Names of the nodes the density reads directly (its immediate inputs).
    fn direct_servers(&self) -> Vec<String>;

    /// Whether the density reads `name` itself, not only through a derived
    /// expression of it.
    fn is_direct_server(&self, name: &str) -> bool;

    /// Whether the subtree rooted at direct server `server` depends
    /// (transitively) on the variable `variable`. Used for the exclusivity
    /// test.
    fn server_depends_on(&self, server: &str, variable: &str) -> bool;

    /// Deep, fully independent copy of the model and everything it reads
    /// from. Mutating either side never affects the other.
    fn snapshot(&self) -> Box<dyn DensityModel>;

    /// Which subset of `vars` the model can generate analytically, and the
    /// method code to use. Returns `None` when no analytic method applies.
    fn analytic_generator(&self, vars: &VariableSet) -> Option<(GeneratorCode, VariableSet)>;

    /// Marginalize the density over the variables in `over`.
    ///
    /// `normalization` names the caller's intended generation domain; when it
    /// carries finite bounds for a marginalized variable those bounds win over
    /// the model's own. Fails with
    /// [`Error::Integration`](crate::Error::Integration) when the integral is
    /// not well-defined (unbounded or invalid region).
    fn integrate(&self, over: &VariableSet, normalization: &VariableSet)
        -> Result<Box<dyn Density>>;

    /// Bind the model's inputs to the layout of `event` for the duration of a
    /// generation session. Must be called before [`Self::generate_into`].
    /// Idempotent.
    fn bind_event(&mut self, event: &EventBuffer) -> Result<()>;

    /// Reset internal evaluation-anomaly counters.
    fn reset_error_counters(&mut self);

    /// Run the analytic generator identified by `code`, writing the generated
    /// values straight into `event`.
    fn generate_into(
        &mut self,
        code: GeneratorCode,
        event: &mut EventBuffer,
        rng: &mut dyn RngCore,
    ) -> Result<()>;
}

/// One-event-at-a-time sampler boundary (the residual sampler collaborator).
pub trait EventSampler {
    /// The variables this sampler draws per event.
    fn sampled_set(&self) -> &VariableSet;

    /// Produce one event respecting the sampler's density, or `None` on a
    /// recoverable failure (e.g. the internal retry budget was exhausted).
    ///
    /// `remaining` is a hint of how many more events the caller still wants;
    /// it never changes the statistical contract.
    fn generate_event(&mut self, remaining: usize, rng: &mut dyn RngCore) -> Option<&EventBuffer>;
}
