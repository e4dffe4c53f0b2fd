//! Accept-reject sampling against a (possibly marginalized) density.

use rand::RngCore;
use tg_core::{Density, Error, EventBuffer, EventSampler, Result, VariableSet};

/// Attempts per `generate_event` call before giving up on the event.
const MAX_TRIES_PER_EVENT: usize = 10_000;

/// Headroom applied on top of the scanned density maximum.
const ENVELOPE_SAFETY: f64 = 1.1;

/// Total grid points for the envelope calibration scan.
const CALIBRATION_BUDGET: usize = 4096;

/// Envelope rejection sampler over a box of bounded variables.
///
/// The envelope is calibrated lazily on first use by scanning the density on
/// a grid over the sampling box. If a later evaluation exceeds the envelope
/// it is raised and a warning is emitted; the bias from already-accepted
/// events is bounded by the safety margin.
///
/// Variables the density does not read (the uniform group) are extra box
/// dimensions that rejection leaves uniformly distributed, which is exactly
/// the contract for variables outside the model.
#[derive(Debug)]
pub struct AcceptReject {
    name: String,
    density: Box<dyn Density>,
    vars: VariableSet,
    scratch: EventBuffer,
    envelope: f64,
    calibrated: bool,
    n_accepted: u64,
    n_tried: u64,
}

/// Uniform(0,1) from `RngCore` (open interval).
#[inline]
fn u01(rng: &mut dyn RngCore) -> f64 {
    (rng.next_u64() as f64 + 0.5) * (1.0 / 18446744073709551616.0_f64)
}

impl AcceptReject {
    /// Create a sampler drawing `vars` from `density`.
    ///
    /// Every variable must be fundamental with finite bounds; the density is
    /// typically a reduced density produced by
    /// [`DensityModel::integrate`](tg_core::DensityModel::integrate).
    pub fn new(density: Box<dyn Density>, vars: VariableSet) -> Result<Self> {
        if vars.is_empty() {
            return Err(Error::Validation(
                "accept-reject sampler needs at least one variable".into(),
            ));
        }
        for v in vars.iter() {
            if v.is_derived() {
                return Err(Error::Validation(format!(
                    "cannot sample derived variable '{}'",
                    v.name
                )));
            }
            if !v.has_finite_bounds() {
                return Err(Error::Validation(format!(
                    "accept-reject sampling requires finite bounds for '{}', got ({}, {})",
                    v.name, v.bounds.0, v.bounds.1
                )));
            }
        }
        let name = format!("{}_accept_reject", density.name());
        let scratch = EventBuffer::for_variables(&vars);
        Ok(Self {
            name,
            density,
            vars,
            scratch,
            envelope: 0.0,
            calibrated: false,
            n_accepted: 0,
            n_tried: 0,
        })
    }

    /// Acceptance statistics `(accepted, tried)` since construction.
    pub fn stats(&self) -> (u64, u64) {
        (self.n_accepted, self.n_tried)
    }

    fn calibrate(&mut self) -> Result<()> {
        let d = self.vars.len();
        let per_dim = ((CALIBRATION_BUDGET as f64).powf(1.0 / d as f64).round() as usize)
            .clamp(2, 1024);

        let mut grid = EventBuffer::for_variables(&self.vars);
        let mut idx = vec![0usize; d];
        let mut max = 0.0f64;
        loop {
            for (k, v) in self.vars.iter().enumerate() {
                let (lo, hi) = v.bounds;
                let t = idx[k] as f64 / (per_dim - 1) as f64;
                grid.set(&v.name, lo + (hi - lo) * t);
            }
            max = max.max(self.density.value(&grid)?);

            let mut k = 0;
            loop {
                idx[k] += 1;
                if idx[k] < per_dim {
                    break;
                }
                idx[k] = 0;
                k += 1;
                if k == d {
                    self.envelope = max * ENVELOPE_SAFETY;
                    if self.envelope <= 0.0 {
                        tracing::warn!(
                            sampler = %self.name,
                            "density vanishes everywhere on the sampling box"
                        );
                    }
                    return Ok(());
                }
            }
        }
    }
}

impl EventSampler for AcceptReject {
    fn sampled_set(&self) -> &VariableSet {
        &self.vars
    }

    fn generate_event(&mut self, remaining: usize, rng: &mut dyn RngCore) -> Option<&EventBuffer> {
        if !self.calibrated {
            self.calibrated = true;
            if let Err(e) = self.calibrate() {
                tracing::warn!(sampler = %self.name, error = %e, "envelope calibration failed");
                self.envelope = 0.0;
            }
        }
        if self.envelope <= 0.0 {
            return None;
        }

        for _ in 0..MAX_TRIES_PER_EVENT {
            self.n_tried += 1;
            for v in self.vars.iter() {
                let (lo, hi) = v.bounds;
                self.scratch.set(&v.name, lo + (hi - lo) * u01(rng));
            }
            let f = match self.density.value(&self.scratch) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(sampler = %self.name, error = %e, "density evaluation failed");
                    return None;
                }
            };
            if f > self.envelope {
                tracing::warn!(
                    sampler = %self.name,
                    value = f,
                    envelope = self.envelope,
                    "density exceeds envelope; raising it (earlier events carry bounded bias)"
                );
                self.envelope = f * ENVELOPE_SAFETY;
            }
            if self.envelope * u01(rng) < f {
                self.n_accepted += 1;
                return Some(&self.scratch);
            }
        }

        tracing::warn!(
            sampler = %self.name,
            remaining,
            tries = MAX_TRIES_PER_EVENT,
            "no event accepted within the retry budget"
        );
        None
    }
}
