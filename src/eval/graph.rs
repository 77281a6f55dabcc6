// eval/graph.rs — { nodes, edges } description → instruction list
//
// Graph editors and config files describe noise graphs as a flat node list
// plus edges, the same shape React Flow produces. Loading:
//
//   1. Index nodes by id and attach each edge to a parameter slot of its
//      target (`targetHandle` is the slot number; "Input" or no handle is
//      slot 0).
//   2. Order nodes topologically (Kahn, ties broken by node id so the
//      resulting instruction ids are stable).
//   3. Push one instruction per node, or a whole fractal for the macro node
//      types `Fbm`, `Ridged` and `Billow`.
//   4. Pick the root: explicit id, else the `_outputNode` flag, else the
//      last terminal node in topological order.
//
// String seeds are hashed the way the editor hashes them (Java
// `String.hashCode`), so a graph saved with seed "mountains" renders the
// same terrain everywhere.

use crate::eval::builders::{simple_billow, simple_fbm, simple_ridged, Basis, Fractal};
use crate::eval::error::GraphError;
use crate::eval::instruction::{InstrId, InstructionParam};
use crate::eval::list::InstructionList;
use crate::eval::noise::seed_to_int;
use crate::eval::opcode::Opcode;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

/// A node of the description.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub data: NodeData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeData {
    /// Opcode name (`"GradientBasis"`, `"Add"`, …) or macro type.
    #[serde(rename = "type")]
    pub op: String,

    /// Literal parameters by slot. `null` marks a slot fed by an edge.
    #[serde(default)]
    pub params: Vec<Value>,

    /// Named settings for macro nodes.
    #[serde(default)]
    pub fields: HashMap<String, Value>,

    #[serde(rename = "_outputNode", default)]
    pub is_output: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "targetHandle", default)]
    pub target_handle: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawGraph {
    nodes: Vec<GraphNode>,
    #[serde(default)]
    edges: Vec<GraphEdge>,
}

/// Loaded graph: the instruction list and where each node landed in it.
#[derive(Debug)]
pub struct LoadedGraph {
    pub list: InstructionList,
    pub root: InstrId,
    /// Node id → instruction producing that node's output.
    pub outputs: HashMap<String, InstrId>,
}

impl LoadedGraph {
    pub fn from_json(json: &str, root_id: Option<&str>) -> Result<Self, GraphError> {
        let raw: RawGraph = serde_json::from_str(json)?;
        Self::from_raw(raw.nodes, raw.edges, root_id)
    }

    pub fn from_raw(
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
        root_id: Option<&str>,
    ) -> Result<Self, GraphError> {
        if nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        // ── 1. Index nodes and wire edges into slots ──

        let mut by_id: BTreeMap<&str, &GraphNode> = BTreeMap::new();
        for node in &nodes {
            if by_id.insert(node.id.as_str(), node).is_some() {
                return Err(invalid_node(node, "duplicate node id"));
            }
        }
        let mut inputs: HashMap<&str, BTreeMap<usize, &str>> = HashMap::new();
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &edges {
            for end in [&edge.source, &edge.target] {
                if !by_id.contains_key(end.as_str()) {
                    return Err(invalid_edge(edge, format!("unknown node '{end}'")));
                }
            }
            let slot = match edge.target_handle.as_deref() {
                None | Some("Input") => 0,
                Some(h) => h
                    .parse::<usize>()
                    .map_err(|_| invalid_edge(edge, format!("handle '{h}' is not a slot number")))?,
            };
            let previous = inputs.entry(edge.target.as_str()).or_default().insert(slot, edge.source.as_str());
            if previous.is_some() {
                return Err(invalid_edge(edge, format!("slot {slot} is fed twice")));
            }
            outgoing.entry(edge.source.as_str()).or_default().push(edge.target.as_str());
        }

        // ── 2. Topological order ──

        let mut indegree: BTreeMap<&str, usize> = by_id.keys().map(|&id| (id, 0)).collect();
        for targets in outgoing.values() {
            for t in targets {
                if let Some(d) = indegree.get_mut(t) {
                    *d += 1;
                }
            }
        }
        let mut ready: BinaryHeap<Reverse<&str>> =
            indegree.iter().filter(|&(_, &d)| d == 0).map(|(&id, _)| Reverse(id)).collect();
        let mut order: Vec<&str> = Vec::with_capacity(by_id.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for &t in outgoing.get(id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(t) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(Reverse(t));
                    }
                }
            }
        }
        if order.len() != by_id.len() {
            let stuck = indegree.iter().find(|&(_, &d)| d > 0).map(|(&id, _)| id).unwrap_or_default();
            return Err(GraphError::Cycle(stuck.to_string()));
        }

        // ── 3. Emit instructions ──

        let mut list = InstructionList::new();
        let mut outputs: HashMap<String, InstrId> = HashMap::with_capacity(order.len());
        for &id in &order {
            let node = by_id[id];
            let wired = inputs.get(id);
            let out = emit(&mut list, node, wired, &outputs)?;
            outputs.insert(id.to_string(), out);
        }

        // ── 4. Root ──

        let root_node = match root_id {
            Some(r) if by_id.contains_key(r) => r,
            Some(r) => {
                return Err(GraphError::InvalidNode { node: r.to_string(), reason: "requested root does not exist".into() })
            }
            None => nodes
                .iter()
                .find(|n| n.data.is_output)
                .map(|n| n.id.as_str())
                .or_else(|| order.iter().rev().copied().find(|id| !outgoing.contains_key(id)))
                .ok_or(GraphError::Empty)?,
        };
        let root = outputs[root_node];

        tracing::info!(
            nodes = nodes.len(),
            edges = edges.len(),
            instructions = list.len(),
            root = root_node,
            "loaded graph"
        );
        Ok(Self { list, root, outputs })
    }
}

fn invalid_edge(edge: &GraphEdge, reason: String) -> GraphError {
    GraphError::InvalidEdge { from: edge.source.clone(), to: edge.target.clone(), reason }
}

fn invalid_node(node: &GraphNode, reason: impl Into<String>) -> GraphError {
    GraphError::InvalidNode { node: node.id.clone(), reason: reason.into() }
}

fn emit(
    list: &mut InstructionList,
    node: &GraphNode,
    wired: Option<&BTreeMap<usize, &str>>,
    outputs: &HashMap<String, InstrId>,
) -> Result<InstrId, GraphError> {
    let op = node.data.op.as_str();
    if let Some(built) = emit_macro(list, node)? {
        return Ok(built);
    }
    let opcode = Opcode::from_name(op)
        .ok_or_else(|| GraphError::UnknownOperation { node: node.id.clone(), op: op.to_string() })?;

    let arity = opcode.arity();
    let mut params = Vec::with_capacity(arity);
    for slot in 0..arity {
        let edge = wired.and_then(|w| w.get(&slot));
        let literal = node.data.params.get(slot).filter(|v| !v.is_null());
        let param = match (edge, literal) {
            (Some(src), None) => InstructionParam::source(outputs[*src]),
            (None, Some(v)) => literal_param(node, slot, v)?,
            (Some(_), Some(_)) => {
                return Err(invalid_node(node, format!("slot {slot} has both a literal and an edge")))
            }
            (None, None) => return Err(invalid_node(node, format!("slot {slot} has no value"))),
        };
        params.push(param);
    }
    if let Some(w) = wired {
        if let Some((&slot, _)) = w.range(arity..).next() {
            return Err(invalid_node(node, format!("{opcode} has no slot {slot}")));
        }
    }
    list.try_push(opcode, params)
}

fn literal_param(node: &GraphNode, slot: usize, v: &Value) -> Result<InstructionParam, GraphError> {
    Ok(match v {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                InstructionParam::uint(u)
            } else if let Some(i) = n.as_i64() {
                InstructionParam::int(i)
            } else {
                InstructionParam::float(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(_) => InstructionParam::int(seed_to_int(v) as i64),
        Value::Bool(b) => InstructionParam::int(*b as i64),
        _ => return Err(invalid_node(node, format!("slot {slot}: unsupported literal {v}"))),
    })
}

fn emit_macro(list: &mut InstructionList, node: &GraphNode) -> Result<Option<InstrId>, GraphError> {
    let build = match node.data.op.as_str() {
        "Fbm" => simple_fbm,
        "Ridged" => simple_ridged,
        "Billow" => simple_billow,
        _ => return Ok(None),
    };
    let fields = &node.data.fields;
    let mut f = Fractal::default();
    if let Some(b) = fields.get("basis") {
        f.basis = b
            .as_str()
            .and_then(Basis::from_name)
            .ok_or_else(|| invalid_node(node, format!("unknown basis {b}")))?;
    }
    if let Some(v) = fields.get("interp").and_then(Value::as_i64) {
        f.interp = v;
    }
    if let Some(v) = fields.get("octaves").and_then(Value::as_u64) {
        f.octaves = v as u32;
    }
    if let Some(v) = fields.get("frequency").and_then(Value::as_f64) {
        f.frequency = v;
    }
    if let Some(v) = fields.get("seed") {
        f.seed = seed_to_int(v) as u32;
    }
    build(list, &f).map(Some).ok_or_else(|| invalid_node(node, "fractal needs at least one octave"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::coordinate::Coordinate;
    use crate::eval::evaluator::Evaluator;

    fn eval(graph: &mut LoadedGraph, x: f64, y: f64) -> f64 {
        let tree = graph.list.get_tree(graph.root).unwrap();
        Evaluator::new(&graph.list, tree).evaluate(Coordinate::new2(x, y))
    }

    #[test]
    fn loads_and_evaluates_edges() {
        let json = r#"{
            "nodes": [
                {"id": "x", "data": {"type": "X"}},
                {"id": "k", "data": {"type": "Constant", "params": [3.0]}},
                {"id": "sum", "data": {"type": "Add", "params": [null, null]}}
            ],
            "edges": [
                {"source": "x", "target": "sum", "targetHandle": "0"},
                {"source": "k", "target": "sum", "targetHandle": "1"}
            ]
        }"#;
        let mut g = LoadedGraph::from_json(json, None).unwrap();
        assert_eq!(g.root, g.outputs["sum"]);
        assert_eq!(eval(&mut g, 2.0, 0.0), 5.0);
    }

    #[test]
    fn output_flag_wins_over_terminal() {
        let json = r#"{
            "nodes": [
                {"id": "a", "data": {"type": "Constant", "params": [1.0], "_outputNode": true}},
                {"id": "b", "data": {"type": "Constant", "params": [2.0]}}
            ]
        }"#;
        let g = LoadedGraph::from_json(json, None).unwrap();
        assert_eq!(g.root, g.outputs["a"]);
        let g = LoadedGraph::from_json(json, Some("b")).unwrap();
        assert_eq!(g.root, g.outputs["b"]);
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let json = r#"{
            "nodes": [
                {"id": "a", "data": {"type": "X"}},
                {"id": "a", "data": {"type": "Y"}}
            ]
        }"#;
        let err = LoadedGraph::from_json(json, None).unwrap_err();
        assert!(matches!(err, GraphError::InvalidNode { ref node, .. } if node == "a"));
    }

    #[test]
    fn instruction_ids_follow_dependencies() {
        let json = r#"{
            "nodes": [
                {"id": "z", "data": {"type": "Abs", "params": [null]}},
                {"id": "a", "data": {"type": "Y"}}
            ],
            "edges": [{"source": "a", "target": "z"}]
        }"#;
        let g = LoadedGraph::from_json(json, None).unwrap();
        assert!(g.outputs["a"] < g.outputs["z"]);
    }

    #[test]
    fn string_seed_is_hashed() {
        let json = r#"{"nodes": [{"id": "n", "data": {"type": "SimplexBasis", "params": ["hills"]}}]}"#;
        let g = LoadedGraph::from_json(json, None).unwrap();
        let seed = seed_to_int(&Value::String("hills".into())) as i64;
        assert_eq!(g.list[g.root].params[0].as_i64(), seed);
    }

    #[test]
    fn macro_node_expands() {
        let json = r#"{"nodes": [{"id": "f", "data": {"type": "Fbm", "fields": {"octaves": 2, "basis": "value", "seed": 3}}}]}"#;
        let g = LoadedGraph::from_json(json, None).unwrap();
        assert_eq!(g.list.len(), 2 * 4 + 1);
        assert_eq!(g.list[g.root].opcode, Opcode::Add);
    }

    #[test]
    fn rejects_cycles_and_bad_wiring() {
        let cycle = r#"{
            "nodes": [
                {"id": "a", "data": {"type": "Abs", "params": [null]}},
                {"id": "b", "data": {"type": "Abs", "params": [null]}}
            ],
            "edges": [{"source": "a", "target": "b"}, {"source": "b", "target": "a"}]
        }"#;
        assert!(matches!(LoadedGraph::from_json(cycle, None), Err(GraphError::Cycle(_))));

        let unknown = r#"{"nodes": [{"id": "a", "data": {"type": "Nope"}}]}"#;
        assert!(matches!(LoadedGraph::from_json(unknown, None), Err(GraphError::UnknownOperation { .. })));

        let missing = r#"{"nodes": [{"id": "a", "data": {"type": "Add", "params": [1.0]}}]}"#;
        assert!(matches!(LoadedGraph::from_json(missing, None), Err(GraphError::InvalidNode { .. })));

        let dangling = r#"{"nodes": [{"id": "a", "data": {"type": "X"}}], "edges": [{"source": "q", "target": "a"}]}"#;
        assert!(matches!(LoadedGraph::from_json(dangling, None), Err(GraphError::InvalidEdge { .. })));

        assert!(matches!(LoadedGraph::from_json("{\"nodes\": []}", None), Err(GraphError::Empty)));
        assert!(matches!(LoadedGraph::from_json("not json", None), Err(GraphError::Json(_))));
    }
}
