//! # tg-gen
//!
//! Random-variate generation planning and per-event driving.
//!
//! Given a density model and a target set of variables, this crate decides
//! once per session how each variable will be generated — analytically by the
//! model (*direct*), numerically by accept-reject against a marginalized
//! density (*residual*), or independently of the density (*uniform*, for
//! variables outside the model's dependency graph) — and then drives
//! event-by-event generation from that plan.
//!
//! Entry points:
//! - [`classify`] builds a [`GenerationPlan`] for a request.
//! - [`GenContext`] owns a model snapshot, the plan, the reduced density and
//!   the residual sampler, and generates events into a caller-owned buffer.
//! - [`AcceptReject`] is the shipped residual sampler collaborator.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accept_reject;
pub mod context;
pub mod plan;

pub use accept_reject::AcceptReject;
pub use context::GenContext;
pub use plan::{classify, GenerationPlan, PlanSummary};
