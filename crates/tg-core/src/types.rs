//! Common data types for ToyGen

use serde::Serialize;
use std::collections::HashMap;

use crate::{Error, Result};

/// Whether a variable is directly settable or computed from other quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VariableKind {
    /// A leaf quantity that can be assigned a value directly.
    Fundamental,
    /// A quantity computed from other variables. Never a valid generation target.
    Derived,
}

/// An addressable named quantity with a domain.
#[derive(Debug, Clone, Serialize)]
pub struct Variable {
    /// Stable variable name.
    pub name: String,
    /// Domain bounds `(low, high)`. Finite bounds are required wherever the
    /// variable is sampled numerically or integrated over.
    pub bounds: (f64, f64),
    /// Fundamental (settable) or derived (computed).
    pub kind: VariableKind,
}

impl Variable {
    /// A fundamental (settable) variable with the given domain bounds.
    pub fn fundamental(name: impl Into<String>, bounds: (f64, f64)) -> Self {
        Self { name: name.into(), bounds, kind: VariableKind::Fundamental }
    }

    /// A derived (computed) quantity. Derived quantities carry no usable domain.
    pub fn derived(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bounds: (f64::NEG_INFINITY, f64::INFINITY),
            kind: VariableKind::Derived,
        }
    }

    /// Whether this variable is derived.
    pub fn is_derived(&self) -> bool {
        self.kind == VariableKind::Derived
    }

    /// Whether both domain bounds are finite with `low < high`.
    pub fn has_finite_bounds(&self) -> bool {
        let (lo, hi) = self.bounds;
        lo.is_finite() && hi.is_finite() && lo < hi
    }
}

/// An unordered collection of [`Variable`]s, unique by name.
///
/// Insertion order is preserved so that event layouts derived from a set are
/// stable, but equality and the set operations are name-based.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariableSet {
    vars: Vec<Variable>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl VariableSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set from an iterator of variables. Duplicate names keep the
    /// first occurrence.
    pub fn from_vars(vars: impl IntoIterator<Item = Variable>) -> Self {
        let mut set = Self::new();
        for v in vars {
            set.insert(v);
        }
        set
    }

    /// Insert a variable. Returns `false` (and keeps the existing entry) if a
    /// variable with the same name is already present.
    pub fn insert(&mut self, var: Variable) -> bool {
        if self.index.contains_key(&var.name) {
            return false;
        }
        self.index.insert(var.name.clone(), self.vars.len());
        self.vars.push(var);
        true
    }

    /// Membership test by name.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Look up a variable by name.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.index.get(name).map(|&i| &self.vars[i])
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over the variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    /// Variable names, sorted (for stable diagnostics and comparisons).
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.iter().map(|v| v.name.clone()).collect();
        names.sort();
        names
    }

    /// Union of two sets. Entries from `self` win on name collisions.
    pub fn union(&self, other: &VariableSet) -> VariableSet {
        let mut out = self.clone();
        for v in other.iter() {
            out.insert(v.clone());
        }
        out
    }

    /// Set difference: all variables of `self` whose names are not in `other`.
    pub fn difference(&self, other: &VariableSet) -> VariableSet {
        VariableSet::from_vars(self.iter().filter(|v| !other.contains(&v.name)).cloned())
    }

    /// Whether every name of `self` appears in `other`.
    pub fn is_subset_of(&self, other: &VariableSet) -> bool {
        self.iter().all(|v| other.contains(&v.name))
    }

    /// Whether `self` and `other` share no names.
    pub fn is_disjoint_from(&self, other: &VariableSet) -> bool {
        self.iter().all(|v| !other.contains(&v.name))
    }
}

/// A mutable, caller-owned buffer of named event slots.
///
/// The generation context never owns the buffer; it only reads and writes
/// values through it. One buffer is reused across many generated events.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    names: Vec<String>,
    values: Vec<f64>,
    index: HashMap<String, usize>,
}

impl EventBuffer {
    /// Create a buffer with one slot per variable in `vars`.
    ///
    /// Slots start at the midpoint of finite bounds, otherwise at `0.0`.
    pub fn for_variables(vars: &VariableSet) -> Self {
        let mut buf = Self { names: Vec::new(), values: Vec::new(), index: HashMap::new() };
        for v in vars.iter() {
            let init = if v.has_finite_bounds() { 0.5 * (v.bounds.0 + v.bounds.1) } else { 0.0 };
            buf.set_or_insert(&v.name, init);
        }
        buf
    }

    /// Slot names in layout order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether a slot exists for `name`.
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Read a slot value.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.index.get(name).map(|&i| self.values[i])
    }

    /// Write a slot value. Returns `false` if no such slot exists.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match self.index.get(name) {
            Some(&i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    /// Write a slot value, creating the slot if it does not exist yet.
    pub fn set_or_insert(&mut self, name: &str, value: f64) {
        match self.index.get(name) {
            Some(&i) => self.values[i] = value,
            None => {
                self.index.insert(name.to_string(), self.names.len());
                self.names.push(name.to_string());
                self.values.push(value);
            }
        }
    }

    /// Copy every field present in both buffers from `other` into `self`.
    ///
    /// Fields of `self` that `other` does not carry are left untouched.
    pub fn copy_common_from(&mut self, other: &EventBuffer) {
        for (i, name) in other.names.iter().enumerate() {
            if let Some(&j) = self.index.get(name) {
                self.values[j] = other.values[i];
            }
        }
    }
}

/// A read-only columnar table of events.
///
/// Used both as the optional prototype input (columns copied alongside
/// generated values, never mutated) and as the output of the bulk generation
/// driver. This is not a persistence layer.
#[derive(Debug, Clone)]
pub struct EventTable {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    index: HashMap<String, usize>,
    n_rows: usize,
}

impl EventTable {
    /// Create an empty table with the given column layout.
    pub fn new(names: Vec<String>) -> Result<Self> {
        let mut index = HashMap::with_capacity(names.len());
        for (i, n) in names.iter().enumerate() {
            if index.insert(n.clone(), i).is_some() {
                return Err(Error::Validation(format!("duplicate column name '{n}'")));
            }
        }
        let columns = vec![Vec::new(); names.len()];
        Ok(Self { names, columns, index, n_rows: 0 })
    }

    /// Create a table from fully materialized columns of equal length.
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let mut table = Self::new(columns.iter().map(|(n, _)| n.clone()).collect())?;
        let mut n_rows: Option<usize> = None;
        for (name, col) in columns {
            match n_rows {
                Some(n) if n != col.len() => {
                    return Err(Error::Validation(format!(
                        "column length mismatch for '{}': expected {}, got {}",
                        name,
                        n,
                        col.len()
                    )));
                }
                None => n_rows = Some(col.len()),
                _ => {}
            }
            let i = table.index[&name];
            table.columns[i] = col;
        }
        table.n_rows = n_rows.unwrap_or(0);
        Ok(table)
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Column names in layout order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.index.get(name).map(|&i| self.columns[i].as_slice())
    }

    /// Append one row, reading each column's value from `event`.
    pub fn push_row_from(&mut self, event: &EventBuffer) -> Result<()> {
        for (i, name) in self.names.iter().enumerate() {
            let v = event
                .get(name)
                .ok_or_else(|| Error::Validation(format!("event buffer has no slot '{name}'")))?;
            self.columns[i].push(v);
        }
        self.n_rows += 1;
        Ok(())
    }

    /// Copy row `row` into `event`, creating slots as needed.
    pub fn copy_row_into(&self, row: usize, event: &mut EventBuffer) -> Result<()> {
        if row >= self.n_rows {
            return Err(Error::Validation(format!(
                "row index out of range: {row} >= {}",
                self.n_rows
            )));
        }
        for (i, name) in self.names.iter().enumerate() {
            event.set_or_insert(name, self.columns[i][row]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_set_dedup_and_lookup() {
        let mut set = VariableSet::new();
        assert!(set.insert(Variable::fundamental("x", (0.0, 1.0))));
        assert!(!set.insert(Variable::fundamental("x", (5.0, 6.0))));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("x").unwrap().bounds, (0.0, 1.0));
    }

    #[test]
    fn test_variable_set_operations() {
        let a = VariableSet::from_vars([
            Variable::fundamental("x", (0.0, 1.0)),
            Variable::fundamental("y", (0.0, 1.0)),
        ]);
        let b = VariableSet::from_vars([Variable::fundamental("y", (0.0, 1.0))]);

        let u = a.union(&b);
        assert_eq!(u.len(), 2);

        let d = a.difference(&b);
        assert_eq!(d.sorted_names(), vec!["x".to_string()]);

        assert!(b.is_subset_of(&a));
        assert!(!a.is_subset_of(&b));
        assert!(d.is_disjoint_from(&b));
    }

    #[test]
    fn test_event_buffer_roundtrip_and_common_copy() {
        let vars = VariableSet::from_vars([
            Variable::fundamental("x", (0.0, 10.0)),
            Variable::fundamental("y", (-1.0, 1.0)),
        ]);
        let mut buf = EventBuffer::for_variables(&vars);
        assert_eq!(buf.get("x"), Some(5.0));
        assert!(buf.set("x", 3.25));
        assert!(!buf.set("missing", 0.0));

        let mut other = EventBuffer::for_variables(&VariableSet::from_vars([
            Variable::fundamental("y", (-1.0, 1.0)),
        ]));
        other.set("y", 0.75);

        buf.copy_common_from(&other);
        assert_eq!(buf.get("y"), Some(0.75));
        assert_eq!(buf.get("x"), Some(3.25));
    }

    #[test]
    fn test_event_table_push_and_row_copy() {
        let vars = VariableSet::from_vars([Variable::fundamental("x", (0.0, 10.0))]);
        let mut buf = EventBuffer::for_variables(&vars);
        let mut table = EventTable::new(vec!["x".to_string()]).unwrap();

        buf.set("x", 1.0);
        table.push_row_from(&buf).unwrap();
        buf.set("x", 2.0);
        table.push_row_from(&buf).unwrap();

        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.column("x").unwrap(), &[1.0, 2.0]);

        let mut target = EventBuffer::for_variables(&vars);
        table.copy_row_into(1, &mut target).unwrap();
        assert_eq!(target.get("x"), Some(2.0));
        assert!(table.copy_row_into(2, &mut target).is_err());
    }

    #[test]
    fn test_event_table_rejects_duplicates_and_ragged_columns() {
        assert!(EventTable::new(vec!["x".into(), "x".into()]).is_err());
        assert!(EventTable::from_columns(vec![
            ("x".into(), vec![1.0, 2.0]),
            ("y".into(), vec![1.0]),
        ])
        .is_err());
    }
}
