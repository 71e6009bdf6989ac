//! Intermediate representation for the lowering pipeline.
//!
//! A `Module` is the unit of compilation: a set of `Function`s plus
//! module-level attributes and global buffers. Each function is a dataflow
//! graph where:
//! - **Ops** (`OpNode`) are operations (e.g., `hl.matmul`, `lin.add`,
//!   `buf.dealloc`)
//! - **Values** (`ValueDef`) are the edges between them
//!
//! Op kinds carry a dialect prefix that records how far the function has
//! been lowered: `hl.*` (high-level), `lin.*` (linear-algebra intermediate
//! dialect), `buf.*` (explicit buffer operations). Every pass mutates the
//! module in place; the module is never copied between stages.

use crate::types::{AttributeValue, ConstValue, Shape, ValueType};
use crate::{Error, Result};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::Topo;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

/// Type alias for op identifiers (backed by petgraph NodeIndex).
pub type OpId = NodeIndex;

/// Unique identifier for a value (dataflow edge) in a function.
///
/// This is an index into `Function::values`. Unlike op IDs (which use
/// petgraph's stable NodeIndex), value IDs are simple usize indices that
/// remain valid across graph mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl ValueId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Identifier of a module-level global buffer.
pub type GlobalId = usize;

// ──────────────────────────────── Module ─────────────────────────────────

/// The unit of compilation: functions plus module-level state.
///
/// Owned exclusively by the pass manager for the duration of one
/// compilation; passes receive it by mutable reference, one at a time.
pub struct Module {
    /// Module name (informational).
    pub name: String,

    /// Module-level attributes (e.g., the producer version written by the
    /// bootstrap stage).
    attrs: HashMap<String, AttributeValue>,

    /// Functions, in declaration order.
    pub functions: Vec<Function>,

    /// Global buffers created by constant-to-global conversion.
    pub globals: Vec<GlobalBuffer>,
}

impl Module {
    /// Create a new empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: HashMap::new(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Set a module-level attribute, overwriting any previous value.
    pub fn set_attr(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.attrs.insert(key.into(), value);
    }

    /// Get a module-level attribute.
    pub fn attr(&self, key: &str) -> Option<&AttributeValue> {
        self.attrs.get(key)
    }

    /// Check if a module-level attribute exists.
    pub fn has_attr(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    /// Add a function and return its index.
    pub fn add_function(&mut self, function: Function) -> usize {
        self.functions.push(function);
        self.functions.len() - 1
    }

    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Look up a function by name, mutably.
    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    /// Add a global buffer and return its ID.
    pub fn add_global(&mut self, global: GlobalBuffer) -> GlobalId {
        self.globals.push(global);
        self.globals.len() - 1
    }

    /// Render the module to a deterministic textual form.
    ///
    /// Ops print in topological order and attributes in sorted key order,
    /// so two structurally identical modules render identically. Used for
    /// debugging and for output comparison in tests.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "module @{} {{", self.name);

        let attrs: BTreeMap<_, _> = self.attrs.iter().collect();
        for (key, value) in attrs {
            let _ = writeln!(out, "  #{} = {}", key, value);
        }

        for global in &self.globals {
            let _ = writeln!(
                out,
                "  global @{} : {} ({} bytes)",
                global.name,
                ValueType::buffer(global.value.dtype, Shape::Static(global.value.shape.clone())),
                global.value.data.len()
            );
        }

        for function in &self.functions {
            function.render_into(&mut out);
        }

        out.push_str("}\n");
        out
    }
}

/// A module-level constant buffer.
#[derive(Debug, Clone)]
pub struct GlobalBuffer {
    /// Unique name within the module.
    pub name: String,

    /// The constant contents.
    pub value: ConstValue,
}

// ─────────────────────────────── Function ────────────────────────────────

/// A function-like unit: an ordered dataflow graph of ops.
///
/// Ops live on a `petgraph::StableGraph` (stable indices across removal);
/// values live in a side table with producer/consumer lookup maps.
/// petgraph edges exist solely for topological ordering.
pub struct Function {
    /// Function name (must be unique within the module).
    pub name: String,

    /// The op graph (op data on nodes; edges only order).
    graph: StableGraph<OpNode, ()>,

    /// Value side-table.
    values: Vec<ValueDef>,

    /// Lookup table: value name -> value ID.
    value_by_name: HashMap<String, ValueId>,

    /// Lookup table: value ID -> producing op.
    producer: HashMap<ValueId, OpId>,

    /// Lookup table: value ID -> consuming ops.
    consumers: HashMap<ValueId, Vec<OpId>>,

    /// Function input values. Part of the external contract: passes must
    /// not change this list.
    pub inputs: Vec<ValueId>,

    /// Function output values. Part of the external contract.
    pub outputs: Vec<ValueId>,
}

impl Function {
    /// Create a new empty function.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: StableGraph::new(),
            values: Vec::new(),
            value_by_name: HashMap::new(),
            producer: HashMap::new(),
            consumers: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    // ── Op access ──

    /// Get an immutable reference to an op.
    pub fn op(&self, id: OpId) -> Result<&OpNode> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("op {:?} not found", id)))
    }

    /// Get a mutable reference to an op.
    pub fn op_mut(&mut self, id: OpId) -> Result<&mut OpNode> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::InvalidGraph(format!("op {:?} not found", id)))
    }

    /// Iterate over all ops.
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &OpNode)> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id).map(|op| (id, op)))
    }

    /// Number of ops.
    pub fn op_count(&self) -> usize {
        self.graph.node_count()
    }

    // ── Value access ──

    /// Get an immutable reference to a value.
    pub fn value(&self, id: ValueId) -> Result<&ValueDef> {
        self.values
            .get(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("value {:?} not found", id)))
    }

    /// Get a mutable reference to a value.
    pub fn value_mut(&mut self, id: ValueId) -> Result<&mut ValueDef> {
        self.values
            .get_mut(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("value {:?} not found", id)))
    }

    /// Look up a value by name.
    pub fn value_by_name(&self, name: &str) -> Option<ValueId> {
        self.value_by_name.get(name).copied()
    }

    /// Number of values.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Iterate over all value IDs.
    pub fn value_ids(&self) -> impl Iterator<Item = ValueId> {
        (0..self.values.len()).map(ValueId::new)
    }

    /// Get the op that produces a value, if any.
    pub fn producer(&self, id: ValueId) -> Option<OpId> {
        self.producer.get(&id).copied()
    }

    /// Get the ops that consume a value.
    pub fn value_consumers(&self, id: ValueId) -> Vec<OpId> {
        self.consumers.get(&id).cloned().unwrap_or_default()
    }

    /// Generate a value name not yet present in the function.
    pub fn fresh_value_name(&self, base: &str) -> String {
        if !self.value_by_name.contains_key(base) {
            return base.to_string();
        }
        let mut i = 0usize;
        loop {
            let candidate = format!("{}_{}", base, i);
            if !self.value_by_name.contains_key(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }

    // ── Graph mutation ──

    /// Add a value and return its ID.
    pub fn add_value(&mut self, value: ValueDef) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.value_by_name.insert(value.name.clone(), id);
        self.values.push(value);
        id
    }

    /// Add an op to the graph and return its ID.
    ///
    /// Updates the producer/consumer lookup tables and adds petgraph edges
    /// for topological ordering: from each input's producer to this op, and
    /// from this op to each pre-existing consumer of its outputs.
    pub fn add_op(&mut self, mut op: OpNode) -> OpId {
        let placeholder = OpNode::new("");
        let op_id = self.graph.add_node(placeholder);
        op.index = op_id;

        for &output in &op.outputs {
            self.producer.insert(output, op_id);

            // An op may be inserted above existing consumers of its output
            // (e.g., a transpose feeding an already-present op).
            if let Some(existing) = self.consumers.get(&output) {
                for &consumer in existing.clone().iter() {
                    self.graph.update_edge(op_id, consumer, ());
                }
            }
        }

        for &input in &op.inputs {
            self.consumers.entry(input).or_default().push(op_id);

            if let Some(&producer_id) = self.producer.get(&input) {
                self.graph.update_edge(producer_id, op_id, ());
            }
        }

        *self.graph.node_weight_mut(op_id).unwrap() = op;

        op_id
    }

    /// Remove an op from the graph.
    ///
    /// Cleans up the producer/consumer tables. With `StableGraph`, other op
    /// indices remain valid.
    pub fn remove_op(&mut self, id: OpId) -> Result<()> {
        let op = self.op(id)?.clone();

        for &output in &op.outputs {
            self.producer.remove(&output);
        }

        for &input in &op.inputs {
            if let Some(consumers) = self.consumers.get_mut(&input) {
                consumers.retain(|&c| c != id);
            }
        }

        self.graph.remove_node(id);

        Ok(())
    }

    /// Replace every use of `old` as an op input with `new`.
    ///
    /// The function's own input/output lists are left untouched: they are
    /// part of the external contract and must not be rewritten by passes.
    pub fn replace_uses(&mut self, old: ValueId, new: ValueId) -> Result<()> {
        let users = self.value_consumers(old);
        let old_producer = self.producer(old);
        let new_producer = self.producer(new);

        for user in users {
            let op = self.op_mut(user)?;
            for input in op.inputs.iter_mut() {
                if *input == old {
                    *input = new;
                }
            }

            self.consumers.entry(new).or_default().push(user);

            if let Some(p) = old_producer {
                if let Some(edge) = self.graph.find_edge(p, user) {
                    self.graph.remove_edge(edge);
                }
            }
            if let Some(p) = new_producer {
                self.graph.update_edge(p, user, ());
            }
        }

        self.consumers.insert(old, Vec::new());
        Ok(())
    }

    /// Replace every occurrence of `old` among one op's inputs with `new`.
    ///
    /// Unlike `replace_uses`, other consumers of `old` are left alone. Used
    /// when inserting an op (e.g. a transpose) above a single consumer.
    pub fn replace_input(&mut self, op_id: OpId, old: ValueId, new: ValueId) -> Result<()> {
        let op = self.op_mut(op_id)?;
        let mut replaced = false;
        for input in op.inputs.iter_mut() {
            if *input == old {
                *input = new;
                replaced = true;
            }
        }
        if !replaced {
            return Err(Error::InvalidGraph(format!(
                "op {:?} does not consume value {:?}",
                op_id, old
            )));
        }

        if let Some(consumers) = self.consumers.get_mut(&old) {
            consumers.retain(|&c| c != op_id);
        }
        self.consumers.entry(new).or_default().push(op_id);

        if let Some(p) = self.producer(old) {
            if let Some(edge) = self.graph.find_edge(p, op_id) {
                self.graph.remove_edge(edge);
            }
        }
        if let Some(p) = self.producer(new) {
            self.graph.update_edge(p, op_id, ());
        }

        Ok(())
    }

    /// Redirect one output of an op from `old` to `new`.
    ///
    /// Used by buffer forwarding: the producer writes directly into the
    /// copy's destination. `new` must currently have no producer.
    pub fn replace_output(&mut self, op_id: OpId, old: ValueId, new: ValueId) -> Result<()> {
        if self.producer(new).is_some() {
            return Err(Error::InvalidGraph(format!(
                "value {:?} already has a producer",
                new
            )));
        }

        let op = self.op_mut(op_id)?;
        let mut replaced = false;
        for output in op.outputs.iter_mut() {
            if *output == old {
                *output = new;
                replaced = true;
            }
        }
        if !replaced {
            return Err(Error::InvalidGraph(format!(
                "op {:?} does not produce value {:?}",
                op_id, old
            )));
        }

        self.producer.remove(&old);
        self.producer.insert(new, op_id);

        for consumer in self.value_consumers(new) {
            self.graph.update_edge(op_id, consumer, ());
        }

        Ok(())
    }

    /// Add an explicit ordering edge between two ops.
    ///
    /// Needed for anti-dependences that dataflow alone does not express,
    /// e.g. a `buf.dealloc` must be ordered after every reader of the
    /// buffer it frees.
    pub fn add_ordering_edge(&mut self, from: OpId, to: OpId) {
        self.graph.update_edge(from, to, ());
    }

    // ── Graph queries ──

    /// Topological order of ops: all inputs of an op are produced before
    /// the op itself, and ordering edges are honored.
    pub fn topological_order(&self) -> Vec<OpId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::new();

        while let Some(id) = topo.next(&self.graph) {
            if self.graph.node_weight(id).is_some() {
                order.push(id);
            }
        }

        order
    }

    // ── Rendering ──

    pub(crate) fn render_into(&self, out: &mut String) {
        let _ = write!(out, "  func @{}(", self.name);
        for (i, &input) in self.inputs.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            if let Ok(v) = self.value(input) {
                let _ = write!(out, "%{}: {}", v.name, v.ty);
            }
        }
        out.push_str(") -> (");
        for (i, &output) in self.outputs.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            if let Ok(v) = self.value(output) {
                let _ = write!(out, "{}", v.ty);
            }
        }
        out.push_str(") {\n");

        for op_id in self.topological_order() {
            let Ok(op) = self.op(op_id) else { continue };
            out.push_str("    ");
            for (i, &output) in op.outputs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if let Ok(v) = self.value(output) {
                    let _ = write!(out, "%{}", v.name);
                }
            }
            if !op.outputs.is_empty() {
                out.push_str(" = ");
            }
            let _ = write!(out, "{}(", op.kind);
            for (i, &input) in op.inputs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if let Ok(v) = self.value(input) {
                    let _ = write!(out, "%{}", v.name);
                }
            }
            out.push(')');

            let attrs: BTreeMap<_, _> = op.attrs.iter().collect();
            if !attrs.is_empty() {
                out.push_str(" {");
                for (i, (key, value)) in attrs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{} = {}", key, value);
                }
                out.push('}');
            }

            for &output in &op.outputs {
                if let Ok(v) = self.value(output) {
                    let _ = write!(out, " : {}", v.ty);
                    if v.allocated {
                        out.push_str(" (alloc)");
                    }
                }
            }
            out.push('\n');
        }

        out.push_str("  }\n");
    }
}

// ──────────────────────────────── OpNode ─────────────────────────────────

/// An op in a function graph.
#[derive(Debug, Clone)]
pub struct OpNode {
    /// Op name (may be empty).
    pub name: String,

    /// Dialect-prefixed op kind (e.g., `hl.matmul`, `lin.add`, `buf.copy`).
    pub kind: String,

    /// Op attributes.
    pub attrs: HashMap<String, AttributeValue>,

    /// Input value IDs.
    pub inputs: Vec<ValueId>,

    /// Output value IDs.
    pub outputs: Vec<ValueId>,

    /// The graph node index (for efficient traversal).
    pub index: OpId,
}

impl OpNode {
    /// Create a new op of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            kind: kind.into(),
            attrs: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            index: NodeIndex::default(),
        }
    }

    /// Dialect prefix of the op kind (the part before the first `.`).
    pub fn dialect(&self) -> &str {
        self.kind.split('.').next().unwrap_or("")
    }

    /// Add an input value.
    pub fn add_input(&mut self, id: ValueId) -> &mut Self {
        self.inputs.push(id);
        self
    }

    /// Add an output value.
    pub fn add_output(&mut self, id: ValueId) -> &mut Self {
        self.outputs.push(id);
        self
    }

    /// Set an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: AttributeValue) -> &mut Self {
        self.attrs.insert(key.into(), value);
        self
    }

    /// Get an attribute.
    pub fn attr(&self, key: &str) -> Option<&AttributeValue> {
        self.attrs.get(key)
    }
}

// ─────────────────────────────── ValueData ───────────────────────────────

/// What compile-time data a value carries.
#[derive(Debug, Clone)]
pub enum ValueData {
    /// No compile-time data; the value is computed at run time.
    Runtime,

    /// Compile-time constant, pre global-conversion.
    Constant(ConstValue),

    /// Reference to a module-level global buffer.
    Global(GlobalId),
}

// ─────────────────────────────── ValueDef ────────────────────────────────

/// A value (dataflow edge) in a function graph.
#[derive(Debug, Clone)]
pub struct ValueDef {
    /// Value name (unique within the function).
    pub name: String,

    /// Tensor or buffer type.
    pub ty: ValueType,

    /// Compile-time data carried by this value.
    pub data: ValueData,

    /// Set by bufferization for values that require an allocation (and
    /// therefore, eventually, a deallocation).
    pub allocated: bool,
}

impl ValueDef {
    /// Create a new runtime value.
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            data: ValueData::Runtime,
            allocated: false,
        }
    }

    /// Create a new constant value.
    pub fn with_constant(name: impl Into<String>, ty: ValueType, value: ConstValue) -> Self {
        Self {
            name: name.into(),
            ty,
            data: ValueData::Constant(value),
            allocated: false,
        }
    }

    /// Check if this value holds a compile-time constant.
    pub fn is_constant(&self) -> bool {
        matches!(self.data, ValueData::Constant(_))
    }

    /// Check if this value references a module global.
    pub fn is_global(&self) -> bool {
        matches!(self.data, ValueData::Global(_))
    }
}
