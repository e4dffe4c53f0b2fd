//! The generation context: session setup and the per-event driver.

use rand::RngCore;
use std::sync::Arc;

use tg_core::{
    DensityModel, Error, EventBuffer, EventSampler, EventTable, Result, VariableSet,
};

use crate::accept_reject::AcceptReject;
use crate::plan::{classify, GenerationPlan};

/// Consecutive sampler failures tolerated by the bulk driver before aborting.
const MAX_CONSECUTIVE_FAILURES: usize = 100;

/// A single-use generation session for one model and one target variable set.
///
/// Construction snapshots the model (so later mutation of the caller's
/// instance cannot bias the session), classifies the requested variables into
/// a [`GenerationPlan`], and — when numerical sampling is needed — builds the
/// reduced density and the accept-reject sampler. A request that cannot be
/// honored fails here; an unusable context is never constructed.
#[derive(Debug)]
pub struct GenContext {
    name: String,
    model: Box<dyn DensityModel>,
    plan: GenerationPlan,
    sampler: Option<AcceptReject>,
    prototype: Option<Arc<EventTable>>,
    next_proto_row: usize,
    initialized: bool,
}

impl GenContext {
    /// Create a context generating `requested` from `model`.
    ///
    /// `force_direct` names variables exempted from the exclusivity test.
    pub fn new(
        model: &dyn DensityModel,
        requested: &VariableSet,
        force_direct: Option<&VariableSet>,
    ) -> Result<Self> {
        let snapshot = model.snapshot();
        let name = format!("{}_gen", snapshot.name());

        let plan = classify(snapshot.as_ref(), requested, force_direct)?;

        let sampler = if plan.needs_residual_sampler() {
            // Marginalize over everything the model depends on except the
            // residual variables; the uniform group is outside the model and
            // needs no subtraction.
            let fundamentals = VariableSet::from_vars(
                snapshot.dependency_closure().iter().filter(|v| !v.is_derived()).cloned(),
            );
            let nuisance = fundamentals.difference(plan.residual());
            let reduced = snapshot.integrate(&nuisance, requested)?;
            let sample_set = plan.residual().union(plan.uniform());
            Some(AcceptReject::new(reduced, sample_set)?)
        } else {
            None
        };

        tracing::info!(
            context = %name,
            plan = ?plan.summary(),
            "generation plan ready"
        );

        Ok(Self {
            name,
            model: snapshot,
            plan,
            sampler,
            prototype: None,
            next_proto_row: 0,
            initialized: false,
        })
    }

    /// Attach a read-only prototype table; its columns are copied into the
    /// event buffer (cycling through rows) before each generated event.
    pub fn with_prototype(mut self, prototype: Arc<EventTable>) -> Self {
        self.prototype = Some(prototype);
        self
    }

    /// Context name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The generation plan decided at construction.
    pub fn plan(&self) -> &GenerationPlan {
        &self.plan
    }

    /// Bind the model snapshot to the caller's event buffer and reset the
    /// model's anomaly counters. Must be called once per session before
    /// [`Self::generate_event`]; calling it again has no further effect.
    pub fn initialize(&mut self, event: &EventBuffer) -> Result<()> {
        self.model.bind_event(event)?;
        self.model.reset_error_counters();
        self.initialized = true;
        Ok(())
    }

    /// Generate one event into `event`.
    ///
    /// Residual and uniform variables are drawn first by the accept-reject
    /// sampler; direct variables are then written by the model's analytic
    /// generator. The ordering matters: the reduced density's conditioning
    /// assumes the residual fields are fixed before any direct quantity is
    /// drawn.
    ///
    /// Returns `Ok(false)` when the sampler fails to produce an event; the
    /// buffer is left untouched and the direct step is skipped, so a failed
    /// call never yields a partially generated event. `remaining` is a hint
    /// of how many more events the caller wants.
    pub fn generate_event(
        &mut self,
        event: &mut EventBuffer,
        remaining: usize,
        rng: &mut dyn RngCore,
    ) -> Result<bool> {
        if !self.initialized {
            return Err(Error::Validation(format!(
                "{}: initialize must be called before generate_event",
                self.name
            )));
        }

        if let Some(sampler) = self.sampler.as_mut() {
            match sampler.generate_event(remaining, rng) {
                Some(sub_event) => event.copy_common_from(sub_event),
                None => {
                    tracing::warn!(
                        context = %self.name,
                        "accept-reject sampler produced no event; skipping this event"
                    );
                    return Ok(false);
                }
            }
        }

        if let Some(code) = self.plan.generator_code() {
            self.model.generate_into(code, event, rng)?;
        }

        Ok(true)
    }

    /// Generate `n` events and collect them into a table.
    ///
    /// Allocates the event buffer from the requested set (plus prototype
    /// columns, if any), initializes the session and loops
    /// [`Self::generate_event`]. Individual sampler failures reduce the yield
    /// and are retried; the driver aborts only after too many failures in a
    /// row.
    pub fn generate(&mut self, n: usize, rng: &mut dyn RngCore) -> Result<EventTable> {
        let mut event = EventBuffer::for_variables(self.plan.requested());
        let prototype = self.prototype.clone();
        if let Some(proto) = &prototype {
            for column in proto.column_names() {
                if !event.has(column) {
                    event.set_or_insert(column, 0.0);
                }
            }
            if proto.n_rows() == 0 {
                return Err(Error::Validation(format!(
                    "{}: prototype table has no rows",
                    self.name
                )));
            }
        }

        self.initialize(&event)?;

        let mut table = EventTable::new(event.names().to_vec())?;
        let mut produced = 0usize;
        let mut consecutive_failures = 0usize;
        while produced < n {
            if let Some(proto) = &prototype {
                proto.copy_row_into(self.next_proto_row % proto.n_rows(), &mut event)?;
                self.next_proto_row += 1;
            }
            if self.generate_event(&mut event, n - produced, rng)? {
                table.push_row_from(&event)?;
                produced += 1;
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    return Err(Error::Computation(format!(
                        "{}: sampler failed {consecutive_failures} times in a row after \
                         {produced} events",
                        self.name
                    )));
                }
            }
        }
        Ok(table)
    }
}
