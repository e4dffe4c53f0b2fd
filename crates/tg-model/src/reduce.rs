//! Numerical marginalization of a graph density.

use tg_core::{Density, Error, EventBuffer, Result, Variable};

use crate::graph::GraphDensity;
use crate::quad::gauss_legendre;

/// Refuse to build tensor grids beyond this dimensionality.
const MAX_DIMS: usize = 6;

/// A graph density marginalized over a set of bounded dimensions.
///
/// Evaluates `∫ f dx_1 .. dx_k` at the point given by the remaining event
/// slots, using a Gauss-Legendre tensor rule. The result is unnormalized,
/// which is all the accept-reject driver needs. Lives only for the duration
/// of a generation session.
#[derive(Debug)]
pub struct ReducedDensity {
    name: String,
    model: GraphDensity,
    dims: Vec<Variable>,
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl ReducedDensity {
    pub(crate) fn new(model: GraphDensity, dims: Vec<Variable>) -> Result<Self> {
        if dims.len() > MAX_DIMS {
            return Err(Error::Integration(format!(
                "refusing to marginalize '{}' over {} dimensions (max {MAX_DIMS})",
                model.name(),
                dims.len()
            )));
        }
        // Fewer points per dimension as the grid dimensionality grows.
        let per_dim = match dims.len() {
            1 => 64,
            2 => 32,
            3 => 12,
            _ => 8,
        };
        let (nodes, weights) = gauss_legendre(per_dim);
        let name = format!("{}_reduced", model.name());
        Ok(Self { name, model, dims, nodes, weights })
    }
}

impl Density for ReducedDensity {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self, event: &EventBuffer) -> Result<f64> {
        let mut scratch = event.clone();
        for dim in &self.dims {
            scratch.set_or_insert(&dim.name, 0.0);
        }

        let n = self.nodes.len();
        let d = self.dims.len();
        let mut idx = vec![0usize; d];
        let mut sum = 0.0;
        loop {
            let mut weight = 1.0;
            for (k, dim) in self.dims.iter().enumerate() {
                let (lo, hi) = dim.bounds;
                let half = 0.5 * (hi - lo);
                let mid = 0.5 * (lo + hi);
                scratch.set(&dim.name, mid + half * self.nodes[idx[k]]);
                weight *= self.weights[idx[k]] * half;
            }
            sum += weight * self.model.value(&scratch)?;

            // Odometer over the tensor grid.
            let mut k = 0;
            loop {
                idx[k] += 1;
                if idx[k] < n {
                    break;
                }
                idx[k] = 0;
                k += 1;
                if k == d {
                    return Ok(sum.max(0.0));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tg_core::{DensityModel, VariableSet};

    fn gauss(x: f64, mu: f64, sigma: f64) -> f64 {
        (-0.5 * ((x - mu) / sigma).powi(2)).exp()
    }

    fn factorized_model() -> GraphDensity {
        GraphDensity::builder("fxy")
            .variable(Variable::fundamental("x", (0.0, 10.0)))
            .variable(Variable::fundamental("y", (0.0, 10.0)))
            .density(&["x", "y"], |v| gauss(v[0], 5.0, 1.0) * gauss(v[1], 3.0, 0.5))
            .build()
            .unwrap()
    }

    #[test]
    fn test_integrate_over_empty_set_is_identity() {
        let model = factorized_model();
        let reduced = model.integrate(&VariableSet::new(), &VariableSet::new()).unwrap();

        let mut event = EventBuffer::for_variables(&VariableSet::from_vars([
            Variable::fundamental("x", (0.0, 10.0)),
            Variable::fundamental("y", (0.0, 10.0)),
        ]));
        event.set("x", 4.2);
        event.set("y", 2.8);
        assert_relative_eq!(
            reduced.value(&event).unwrap(),
            model.value(&event).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_marginal_of_factorized_density_is_proportional_to_kept_factor() {
        let model = factorized_model();
        let over = VariableSet::from_vars([Variable::fundamental("y", (0.0, 10.0))]);
        let reduced = model.integrate(&over, &VariableSet::new()).unwrap();

        let mut event = EventBuffer::for_variables(&VariableSet::from_vars([
            Variable::fundamental("x", (0.0, 10.0)),
        ]));

        event.set("x", 5.0);
        let at_peak = reduced.value(&event).unwrap();
        event.set("x", 6.0);
        let off_peak = reduced.value(&event).unwrap();

        // Ratio must match the x factor alone; the y integral cancels.
        assert_relative_eq!(
            off_peak / at_peak,
            gauss(6.0, 5.0, 1.0) / gauss(5.0, 5.0, 1.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_unbounded_dimension_is_an_integration_error() {
        let model = GraphDensity::builder("f")
            .variable(Variable::fundamental("x", (0.0, 1.0)))
            .variable(Variable::fundamental("y", (0.0, f64::INFINITY)))
            .density(&["x", "y"], |v| v[0] * (-v[1]).exp())
            .build()
            .unwrap();

        let over = VariableSet::from_vars([Variable::fundamental("y", (0.0, f64::INFINITY))]);
        let err = model.integrate(&over, &VariableSet::new()).unwrap_err();
        assert!(matches!(err, Error::Integration(_)));
    }

    #[test]
    fn test_normalization_bounds_override_model_bounds() {
        let model = GraphDensity::builder("f")
            .variable(Variable::fundamental("x", (0.0, 1.0)))
            .variable(Variable::fundamental("y", (0.0, f64::INFINITY)))
            .density(&["x", "y"], |_| 1.0)
            .build()
            .unwrap();

        // The caller's generation domain supplies the finite y range.
        let over = VariableSet::from_vars([Variable::fundamental("y", (0.0, f64::INFINITY))]);
        let norm = VariableSet::from_vars([Variable::fundamental("y", (0.0, 2.0))]);
        let reduced = model.integrate(&over, &norm).unwrap();

        let mut event = EventBuffer::for_variables(&VariableSet::from_vars([
            Variable::fundamental("x", (0.0, 1.0)),
        ]));
        event.set("x", 0.5);
        // ∫_0^2 1 dy = 2.
        assert_relative_eq!(reduced.value(&event).unwrap(), 2.0, epsilon = 1e-10);
    }
}
