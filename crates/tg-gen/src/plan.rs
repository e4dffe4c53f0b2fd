//! Variable classification and the generation plan.

use serde::Serialize;
use tg_core::{DensityModel, Error, GeneratorCode, Result, VariableSet};

/// How each requested variable will be generated. Immutable once built.
///
/// Invariants: `uniform`, `direct` and `residual` are pairwise disjoint and
/// their union equals the requested set; `generator_code` is `Some` iff
/// `direct` is non-empty.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    requested: VariableSet,
    uniform: VariableSet,
    direct: VariableSet,
    residual: VariableSet,
    generator_code: Option<GeneratorCode>,
}

impl GenerationPlan {
    /// The originally requested variable set.
    pub fn requested(&self) -> &VariableSet {
        &self.requested
    }

    /// Variables outside the model's dependency graph, drawn independently
    /// from their declared bounds.
    pub fn uniform(&self) -> &VariableSet {
        &self.uniform
    }

    /// Variables the model generates analytically.
    pub fn direct(&self) -> &VariableSet {
        &self.direct
    }

    /// Variables requiring numerical (accept-reject) sampling.
    pub fn residual(&self) -> &VariableSet {
        &self.residual
    }

    /// The model-issued method code for the direct group, if any.
    pub fn generator_code(&self) -> Option<GeneratorCode> {
        self.generator_code
    }

    /// Whether a residual sampler is needed at all.
    pub fn needs_residual_sampler(&self) -> bool {
        !(self.residual.is_empty() && self.uniform.is_empty())
    }

    /// Serializable summary for diagnostics.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            uniform: self.uniform.sorted_names(),
            direct: self.direct.sorted_names(),
            residual: self.residual.sorted_names(),
            generator_code: self.generator_code,
        }
    }
}

/// Diagnostic view of a [`GenerationPlan`].
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    /// Names of the uniform group.
    pub uniform: Vec<String>,
    /// Names of the direct group.
    pub direct: Vec<String>,
    /// Names of the residual group.
    pub residual: Vec<String>,
    /// Method code for the direct group.
    pub generator_code: Option<GeneratorCode>,
}

/// Classify each requested variable against the model's dependency graph.
///
/// Pure with respect to the model: all derived-target errors are accumulated
/// before the request is rejected as a whole, so the caller sees every
/// offending variable at once. Variables named in `force_direct` skip the
/// exclusivity test.
///
/// Classification, per requested variable:
/// 1. Derived request entries, and names resolving to derived nodes of the
///    model, are hard errors.
/// 2. Names absent from the dependency closure are classified uniform, with a
///    warning.
/// 3. Names the density reads only through an intermediate expression are
///    residual.
/// 4. Direct servers that another server also depends on fail the exclusivity
///    test and fall back to residual; correctness beats the faster analytic
///    path.
/// 5. The surviving candidates are offered to the model; exactly the subset
///    it reports as generable is finalized direct, the rest moves to
///    residual.
pub fn classify(
    model: &dyn DensityModel,
    requested: &VariableSet,
    force_direct: Option<&VariableSet>,
) -> Result<GenerationPlan> {
    let closure = model.dependency_closure();
    let servers = model.direct_servers();

    let mut derived = Vec::new();
    let mut uniform = VariableSet::new();
    let mut residual = VariableSet::new();
    let mut tentative = VariableSet::new();

    for var in requested.iter() {
        if var.is_derived() {
            derived.push(var.name.clone());
            continue;
        }
        let Some(node) = closure.get(&var.name) else {
            tracing::warn!(
                model = %model.name(),
                variable = %var.name,
                "model does not depend on requested variable; it will have a uniform distribution"
            );
            uniform.insert(var.clone());
            continue;
        };
        if node.is_derived() {
            derived.push(var.name.clone());
            continue;
        }

        if !model.is_direct_server(&var.name) {
            // Reached only through an intermediate chain.
            residual.insert(node.clone());
            continue;
        }

        let forced = force_direct.is_some_and(|f| f.contains(&var.name));
        let exclusive = forced
            || servers
                .iter()
                .filter(|s| s.as_str() != var.name)
                .all(|s| !model.server_depends_on(s, &var.name));
        if exclusive {
            tentative.insert(node.clone());
        } else {
            residual.insert(node.clone());
        }
    }

    if !derived.is_empty() {
        return Err(Error::DerivedTargets(derived));
    }

    // Ask the model which of the candidates it can actually generate; the
    // direct group is finalized to exactly what the model reports.
    let (generator_code, direct) = match model.analytic_generator(&tentative) {
        Some((code, generated)) => {
            let direct = VariableSet::from_vars(
                tentative.iter().filter(|v| generated.contains(&v.name)).cloned(),
            );
            if direct.is_empty() {
                (None, direct)
            } else {
                (Some(code), direct)
            }
        }
        None => (None, VariableSet::new()),
    };
    for var in tentative.iter() {
        if !direct.contains(&var.name) {
            residual.insert(var.clone());
        }
    }

    debug_assert!(direct.is_disjoint_from(&residual));
    debug_assert!(direct.is_disjoint_from(&uniform));
    debug_assert!(residual.is_disjoint_from(&uniform));
    debug_assert_eq!(
        direct.union(&residual).union(&uniform).sorted_names(),
        requested.sorted_names()
    );

    Ok(GenerationPlan {
        requested: requested.clone(),
        uniform,
        direct,
        residual,
        generator_code,
    })
}
