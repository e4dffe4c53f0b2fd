//! Density over an explicit dependency graph.
//!
//! Nodes are either fundamental leaves (settable variables with domain
//! bounds) or derived formula nodes computed from other nodes. The density
//! itself reads an ordered list of direct servers, each a leaf or a formula.
//! This makes questions like "is `x` a direct server?" and "does server `g`
//! depend on `x`?" cheap graph queries instead of object-tree traversals.

use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tg_core::{
    Density, DensityModel, Error, EventBuffer, GeneratorCode, Result, Variable, VariableKind,
    VariableSet,
};

use crate::reduce::ReducedDensity;

/// Value function over the ordered input values of a node.
pub type ValueFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Analytic generation procedure writing into the bound event buffer.
pub type GenerateFn = Arc<dyn Fn(&mut EventBuffer, &mut dyn RngCore) -> Result<()> + Send + Sync>;

#[derive(Clone)]
struct Formula {
    name: String,
    inputs: Vec<String>,
    func: ValueFn,
}

#[derive(Clone)]
struct AnalyticGenerator {
    code: GeneratorCode,
    covers: Vec<String>,
    func: GenerateFn,
}

/// A density model over an explicit directed dependency graph.
///
/// Built through [`GraphDensity::builder`]; immutable afterwards except for
/// the event attachment flag and the anomaly counter. Snapshots share the
/// (immutable) node functions but nothing mutable, so a snapshot is fully
/// independent of its source.
pub struct GraphDensity {
    name: String,
    servers: Vec<String>,
    density_fn: ValueFn,
    leaves: VariableSet,
    formulas: Vec<Formula>,
    formula_index: HashMap<String, usize>,
    generators: Vec<AnalyticGenerator>,
    attached: bool,
    eval_anomalies: AtomicU64,
}

impl fmt::Debug for GraphDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphDensity")
            .field("name", &self.name)
            .field("servers", &self.servers)
            .field("n_leaves", &self.leaves.len())
            .field("n_formulas", &self.formulas.len())
            .field("n_generators", &self.generators.len())
            .finish()
    }
}

impl Clone for GraphDensity {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            servers: self.servers.clone(),
            density_fn: self.density_fn.clone(),
            leaves: self.leaves.clone(),
            formulas: self.formulas.clone(),
            formula_index: self.formula_index.clone(),
            generators: self.generators.clone(),
            // A copy starts detached with fresh counters.
            attached: false,
            eval_anomalies: AtomicU64::new(0),
        }
    }
}

impl GraphDensity {
    /// Start building a density graph with the given model name.
    pub fn builder(name: impl Into<String>) -> GraphDensityBuilder {
        GraphDensityBuilder::new(name)
    }

    /// Number of anomalous evaluations (negative or non-finite density
    /// values, clamped to zero) since the last counter reset.
    pub fn eval_anomalies(&self) -> u64 {
        self.eval_anomalies.load(Ordering::Relaxed)
    }

    fn node_value(&self, name: &str, event: &EventBuffer) -> Result<f64> {
        if let Some(&i) = self.formula_index.get(name) {
            let formula = &self.formulas[i];
            let inputs = formula
                .inputs
                .iter()
                .map(|n| self.node_value(n, event))
                .collect::<Result<Vec<f64>>>()?;
            return Ok((formula.func)(&inputs));
        }
        event.get(name).ok_or_else(|| {
            Error::Validation(format!("event buffer has no slot for variable '{name}'"))
        })
    }

    fn contains_node(&self, name: &str) -> bool {
        self.leaves.contains(name) || self.formula_index.contains_key(name)
    }

    /// Does the subtree rooted at `node` reach a node called `target`?
    fn subtree_depends_on(&self, node: &str, target: &str) -> bool {
        if node == target {
            return true;
        }
        if let Some(&i) = self.formula_index.get(node) {
            return self.formulas[i].inputs.iter().any(|n| self.subtree_depends_on(n, target));
        }
        false
    }

    fn collect_closure(&self, node: &str, out: &mut VariableSet) {
        if out.contains(node) {
            return;
        }
        if let Some(&i) = self.formula_index.get(node) {
            out.insert(Variable::derived(node));
            for input in &self.formulas[i].inputs {
                self.collect_closure(input, out);
            }
        } else if let Some(leaf) = self.leaves.get(node) {
            out.insert(leaf.clone());
        }
    }
}

impl Density for GraphDensity {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self, event: &EventBuffer) -> Result<f64> {
        let inputs = self
            .servers
            .iter()
            .map(|n| self.node_value(n, event))
            .collect::<Result<Vec<f64>>>()?;
        let v = (self.density_fn)(&inputs);
        if !v.is_finite() || v < 0.0 {
            self.eval_anomalies.fetch_add(1, Ordering::Relaxed);
            return Ok(0.0);
        }
        Ok(v)
    }
}

impl DensityModel for GraphDensity {
    fn dependency_closure(&self) -> VariableSet {
        let mut out = VariableSet::new();
        for server in &self.servers {
            self.collect_closure(server, &mut out);
        }
        out
    }

    fn direct_servers(&self) -> Vec<String> {
        self.servers.clone()
    }

    fn is_direct_server(&self, name: &str) -> bool {
        self.servers.iter().any(|s| s == name)
    }

    fn server_depends_on(&self, server: &str, variable: &str) -> bool {
        if !self.contains_node(server) {
            return false;
        }
        self.subtree_depends_on(server, variable)
    }

    fn snapshot(&self) -> Box<dyn DensityModel> {
        Box::new(self.clone())
    }

    fn analytic_generator(&self, vars: &VariableSet) -> Option<(GeneratorCode, VariableSet)> {
        let best = self
            .generators
            .iter()
            .filter(|g| g.covers.iter().all(|n| vars.contains(n)))
            .max_by_key(|g| g.covers.len())?;
        let covered = VariableSet::from_vars(
            best.covers.iter().filter_map(|n| self.leaves.get(n)).cloned(),
        );
        Some((best.code, covered))
    }

    fn integrate(
        &self,
        over: &VariableSet,
        normalization: &VariableSet,
    ) -> Result<Box<dyn Density>> {
        if over.is_empty() {
            // Nothing to marginalize; the reduced density is the density itself.
            return Ok(Box::new(self.clone()));
        }
        let mut dims = Vec::with_capacity(over.len());
        for v in over.iter() {
            let leaf = self.leaves.get(&v.name).ok_or_else(|| {
                Error::Integration(format!(
                    "cannot integrate over '{}': not a fundamental dependency of '{}'",
                    v.name, self.name
                ))
            })?;
            let mut dim = leaf.clone();
            if let Some(norm) = normalization.get(&dim.name) {
                if norm.has_finite_bounds() {
                    dim.bounds = norm.bounds;
                }
            }
            if !dim.has_finite_bounds() {
                return Err(Error::Integration(format!(
                    "cannot integrate '{}' over unbounded domain ({}, {})",
                    dim.name, dim.bounds.0, dim.bounds.1
                )));
            }
            dims.push(dim);
        }
        Ok(Box::new(ReducedDensity::new(self.clone(), dims)?))
    }

    fn bind_event(&mut self, event: &EventBuffer) -> Result<()> {
        for name in event.names() {
            if self.formula_index.contains_key(name) {
                return Err(Error::Validation(format!(
                    "event buffer slot '{name}' collides with a derived node of '{}'",
                    self.name
                )));
            }
        }
        self.attached = true;
        Ok(())
    }

    fn reset_error_counters(&mut self) {
        self.eval_anomalies.store(0, Ordering::Relaxed);
    }

    fn generate_into(
        &mut self,
        code: GeneratorCode,
        event: &mut EventBuffer,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        if !self.attached {
            return Err(Error::Validation(format!(
                "'{}': generate_into called before bind_event",
                self.name
            )));
        }
        let generator = self
            .generators
            .iter()
            .find(|g| g.code == code)
            .ok_or_else(|| {
                Error::Validation(format!("'{}': unknown generator code {}", self.name, code.0))
            })?;
        (generator.func)(event, rng)
    }
}

/// Builder for [`GraphDensity`] with build-time graph validation.
pub struct GraphDensityBuilder {
    name: String,
    leaves: VariableSet,
    formulas: Vec<Formula>,
    servers: Vec<String>,
    density_fn: Option<ValueFn>,
    generators: Vec<AnalyticGenerator>,
}

impl GraphDensityBuilder {
    /// Start an empty builder for a model called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            leaves: VariableSet::new(),
            formulas: Vec::new(),
            servers: Vec::new(),
            density_fn: None,
            generators: Vec::new(),
        }
    }

    /// Add a fundamental leaf variable.
    pub fn variable(mut self, var: Variable) -> Self {
        self.leaves.insert(var);
        self
    }

    /// Add a derived formula node computing a value from `inputs` (leaves or
    /// other formulas, resolved at build time).
    pub fn formula(
        mut self,
        name: impl Into<String>,
        inputs: &[&str],
        func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.formulas.push(Formula {
            name: name.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            func: Arc::new(func),
        });
        self
    }

    /// Define the density: its ordered direct servers and the value function
    /// over their values.
    pub fn density(
        mut self,
        servers: &[&str],
        func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.servers = servers.iter().map(|s| s.to_string()).collect();
        self.density_fn = Some(Arc::new(func));
        self
    }

    /// Register an analytic generator for the given fundamental variables,
    /// identified by an opaque method code.
    pub fn generator(
        mut self,
        code: u32,
        covers: &[&str],
        func: impl Fn(&mut EventBuffer, &mut dyn RngCore) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.generators.push(AnalyticGenerator {
            code: GeneratorCode(code),
            covers: covers.iter().map(|s| s.to_string()).collect(),
            func: Arc::new(func),
        });
        self
    }

    /// Validate the graph and produce the model.
    pub fn build(self) -> Result<GraphDensity> {
        let name = self.name;
        let density_fn = self
            .density_fn
            .ok_or_else(|| Error::Validation(format!("model '{name}': no density defined")))?;
        if self.servers.is_empty() {
            return Err(Error::Validation(format!("model '{name}': density has no servers")));
        }

        for leaf in self.leaves.iter() {
            if leaf.kind != VariableKind::Fundamental {
                return Err(Error::Validation(format!(
                    "model '{name}': leaf '{}' must be fundamental",
                    leaf.name
                )));
            }
        }

        let mut formula_index = HashMap::with_capacity(self.formulas.len());
        for (i, formula) in self.formulas.iter().enumerate() {
            if self.leaves.contains(&formula.name)
                || formula_index.insert(formula.name.clone(), i).is_some()
            {
                return Err(Error::Validation(format!(
                    "model '{name}': duplicate node name '{}'",
                    formula.name
                )));
            }
        }

        let resolves =
            |n: &str| self.leaves.contains(n) || formula_index.contains_key(n);
        for (i, server) in self.servers.iter().enumerate() {
            if !resolves(server) {
                return Err(Error::Validation(format!(
                    "model '{name}': unknown server '{server}'"
                )));
            }
            if self.servers[..i].contains(server) {
                return Err(Error::Validation(format!(
                    "model '{name}': duplicate server '{server}'"
                )));
            }
        }
        for formula in &self.formulas {
            for input in &formula.inputs {
                if !resolves(input) {
                    return Err(Error::Validation(format!(
                        "model '{name}': formula '{}' reads unknown node '{input}'",
                        formula.name
                    )));
                }
            }
        }

        // Cycle check over the formula subgraph (leaves cannot cycle).
        fn acyclic(
            node: &str,
            formulas: &[Formula],
            index: &HashMap<String, usize>,
            state: &mut HashMap<String, u8>,
        ) -> bool {
            let Some(&i) = index.get(node) else { return true };
            match state.get(node) {
                Some(2) => return true,
                Some(1) => return false,
                _ => {}
            }
            state.insert(node.to_string(), 1);
            for input in &formulas[i].inputs {
                if !acyclic(input, formulas, index, state) {
                    return false;
                }
            }
            state.insert(node.to_string(), 2);
            true
        }
        let mut state = HashMap::new();
        for formula in &self.formulas {
            if !acyclic(&formula.name, &self.formulas, &formula_index, &mut state) {
                return Err(Error::Validation(format!(
                    "model '{name}': dependency cycle through '{}'",
                    formula.name
                )));
            }
        }

        let mut seen_codes = Vec::new();
        for generator in &self.generators {
            if seen_codes.contains(&generator.code) {
                return Err(Error::Validation(format!(
                    "model '{name}': duplicate generator code {}",
                    generator.code.0
                )));
            }
            seen_codes.push(generator.code);
            if generator.covers.is_empty() {
                return Err(Error::Validation(format!(
                    "model '{name}': generator {} covers no variables",
                    generator.code.0
                )));
            }
            for covered in &generator.covers {
                if self.leaves.get(covered).is_none() {
                    return Err(Error::Validation(format!(
                        "model '{name}': generator {} covers '{covered}', which is not a \
                         fundamental leaf",
                        generator.code.0
                    )));
                }
            }
        }

        Ok(GraphDensity {
            name,
            servers: self.servers,
            density_fn,
            leaves: self.leaves,
            formulas: self.formulas,
            formula_index,
            generators: self.generators,
            attached: false,
            eval_anomalies: AtomicU64::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gauss(x: f64, mu: f64, sigma: f64) -> f64 {
        (-0.5 * ((x - mu) / sigma).powi(2)).exp()
    }

    /// f(x, g(x, y)) with g = x + y.
    fn chained_model() -> GraphDensity {
        GraphDensity::builder("chained")
            .variable(Variable::fundamental("x", (0.0, 10.0)))
            .variable(Variable::fundamental("y", (0.0, 10.0)))
            .formula("g", &["x", "y"], |v| v[0] + v[1])
            .density(&["x", "g"], |v| gauss(v[0], 5.0, 1.0) * gauss(v[1], 8.0, 2.0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_closure_marks_derived_nodes() {
        let model = chained_model();
        let closure = model.dependency_closure();
        assert_eq!(closure.sorted_names(), vec!["g", "x", "y"]);
        assert!(closure.get("g").unwrap().is_derived());
        assert!(!closure.get("x").unwrap().is_derived());
    }

    #[test]
    fn test_direct_servers_and_dependence() {
        let model = chained_model();
        assert!(model.is_direct_server("x"));
        assert!(model.is_direct_server("g"));
        assert!(!model.is_direct_server("y"));
        assert!(model.server_depends_on("g", "x"));
        assert!(model.server_depends_on("g", "y"));
        assert!(!model.server_depends_on("x", "y"));
        assert!(!model.server_depends_on("nope", "x"));
    }

    #[test]
    fn test_value_evaluates_formula_chain() {
        let model = chained_model();
        let mut event = EventBuffer::for_variables(&VariableSet::from_vars([
            Variable::fundamental("x", (0.0, 10.0)),
            Variable::fundamental("y", (0.0, 10.0)),
        ]));
        event.set("x", 5.0);
        event.set("y", 3.0);
        let expected = gauss(5.0, 5.0, 1.0) * gauss(8.0, 8.0, 2.0);
        assert_relative_eq!(model.value(&event).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_anomalous_values_clamped_and_counted() {
        let model = GraphDensity::builder("bad")
            .variable(Variable::fundamental("x", (0.0, 1.0)))
            .density(&["x"], |v| if v[0] < 0.5 { -1.0 } else { f64::NAN })
            .build()
            .unwrap();
        let mut event = EventBuffer::for_variables(&VariableSet::from_vars([
            Variable::fundamental("x", (0.0, 1.0)),
        ]));
        event.set("x", 0.1);
        assert_eq!(model.value(&event).unwrap(), 0.0);
        event.set("x", 0.9);
        assert_eq!(model.value(&event).unwrap(), 0.0);
        assert_eq!(model.eval_anomalies(), 2);
    }

    #[test]
    fn test_analytic_generator_prefers_largest_subset() {
        let model = GraphDensity::builder("multi")
            .variable(Variable::fundamental("x", (0.0, 1.0)))
            .variable(Variable::fundamental("y", (0.0, 1.0)))
            .density(&["x", "y"], |v| v[0] * v[1])
            .generator(1, &["x"], |_, _| Ok(()))
            .generator(2, &["x", "y"], |_, _| Ok(()))
            .build()
            .unwrap();

        let request = VariableSet::from_vars([
            Variable::fundamental("x", (0.0, 1.0)),
            Variable::fundamental("y", (0.0, 1.0)),
        ]);
        let (code, covered) = model.analytic_generator(&request).unwrap();
        assert_eq!(code, GeneratorCode(2));
        assert_eq!(covered.sorted_names(), vec!["x", "y"]);

        let only_x = VariableSet::from_vars([Variable::fundamental("x", (0.0, 1.0))]);
        let (code, covered) = model.analytic_generator(&only_x).unwrap();
        assert_eq!(code, GeneratorCode(1));
        assert_eq!(covered.sorted_names(), vec!["x"]);

        let only_z = VariableSet::from_vars([Variable::fundamental("z", (0.0, 1.0))]);
        assert!(model.analytic_generator(&only_z).is_none());
    }

    #[test]
    fn test_builder_rejects_unknown_nodes_and_cycles() {
        let err = GraphDensity::builder("m")
            .variable(Variable::fundamental("x", (0.0, 1.0)))
            .density(&["x", "ghost"], |v| v[0])
            .build();
        assert!(err.is_err());

        let err = GraphDensity::builder("m")
            .variable(Variable::fundamental("x", (0.0, 1.0)))
            .formula("a", &["b"], |v| v[0])
            .formula("b", &["a"], |v| v[0])
            .density(&["a"], |v| v[0])
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_builder_rejects_duplicate_servers() {
        // A doubled server would slip past the name-based exclusivity test.
        let err = GraphDensity::builder("m")
            .variable(Variable::fundamental("x", (0.0, 1.0)))
            .density(&["x", "x"], |v| v[0] * v[1])
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_generate_into_requires_attachment() {
        let mut model = GraphDensity::builder("m")
            .variable(Variable::fundamental("x", (0.0, 1.0)))
            .density(&["x"], |v| v[0])
            .generator(3, &["x"], |event, _| {
                event.set("x", 0.25);
                Ok(())
            })
            .build()
            .unwrap();

        let vars = VariableSet::from_vars([Variable::fundamental("x", (0.0, 1.0))]);
        let mut event = EventBuffer::for_variables(&vars);
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);

        assert!(model.generate_into(GeneratorCode(3), &mut event, &mut rng).is_err());
        model.bind_event(&event).unwrap();
        model.generate_into(GeneratorCode(3), &mut event, &mut rng).unwrap();
        assert_eq!(event.get("x"), Some(0.25));
        assert!(model.generate_into(GeneratorCode(99), &mut event, &mut rng).is_err());
    }

    #[test]
    fn test_snapshot_is_detached_with_fresh_counters() {
        let model = GraphDensity::builder("m")
            .variable(Variable::fundamental("x", (0.0, 1.0)))
            .density(&["x"], |_| -1.0)
            .build()
            .unwrap();
        let event = EventBuffer::for_variables(&VariableSet::from_vars([
            Variable::fundamental("x", (0.0, 1.0)),
        ]));
        model.value(&event).unwrap();
        assert_eq!(model.eval_anomalies(), 1);

        let copy = model.clone();
        assert_eq!(copy.eval_anomalies(), 0);
        model.value(&event).unwrap();
        assert_eq!(model.eval_anomalies(), 2);
        assert_eq!(copy.eval_anomalies(), 0);
    }
}
