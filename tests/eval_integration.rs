//! Integration tests for the compile-and-evaluate pipeline.
//!
//! These tests verify:
//!   1. Every compiled tree respects the phase ordering rules
//!   2. Trees are built once per root
//!   3. Cache boundaries shared by several consumers compile to one sequence
//!   4. Evaluation is deterministic, across evaluators and across raster fills
//!   5. The sample cache never changes results, and skips recomputation once
//!      a boundary is readable
//!   6. Nested transforms compose in the expected order
//!   7. JSON graphs load, evaluate and serialize

use noisetree::config::RasterConfig;
use noisetree::eval::builders::{simple_fbm, simple_ridged, Basis, Fractal};
use noisetree::eval::cache::{CacheMap, RasterCache};
use noisetree::eval::compiled::{InstructionTree, Phase, Rid};
use noisetree::eval::coordinate::Coordinate;
use noisetree::eval::evaluator::Evaluator;
use noisetree::eval::functions::{phase_fns, FunctionTable};
use noisetree::eval::graph::LoadedGraph;
use noisetree::eval::grid::{evaluate_grid, RasterSession};
use noisetree::eval::instruction::{InstrId, Instruction, InstructionParam as P};
use noisetree::eval::list::InstructionList;
use noisetree::eval::noise::{value_noise, Interp};
use noisetree::eval::opcode::Opcode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── Helpers ────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn raster(width: usize, height: usize, accessors: usize) -> RasterConfig {
    RasterConfig {
        width,
        height,
        x_min: -2.0,
        x_max: 2.0,
        y_min: -1.0,
        y_max: 3.0,
        accessors,
        ..Default::default()
    }
}

/// Check the ordering rules directly against command positions.
fn assert_phase_order(list: &InstructionList, tree: &InstructionTree) {
    tree.verify_order(list).unwrap();
    for seq in &tree.sequences {
        let coord = tree.coord_position(seq.id).expect("every sequence has a COORD phase");
        let value = tree.value_position(seq.id).expect("every sequence has a VALUE phase");
        assert!(coord <= value, "sequence {}: VALUE before COORD", seq.id);
        if let Some((_, parent)) = seq.frame_parent() {
            assert!(tree.coord_position(parent).unwrap() < coord, "sequence {}: COORD before parent", seq.id);
        }
        for link in &seq.links {
            assert!(
                tree.value_position(link.sequence).unwrap() < value,
                "sequence {}: VALUE before child {}",
                seq.id,
                link.sequence
            );
        }
    }
}

/// Scale of a noise by a computed factor, plus a cache boundary read both
/// raw and through a translation.
fn mixed_graph() -> (InstructionList, InstrId, InstrId) {
    let mut list = InstructionList::new();
    let n = list.push(Opcode::GradientBasis, [P::int(3), P::uint(4)]);
    let y = list.push(Opcode::Y, []);
    let factor = list.push(Opcode::Add, [P::source(y), P::float(2.0)]);
    let scaled = list.push(Opcode::ScaleDomain, [P::source(n), P::source(factor)]);
    let c = list.push(Opcode::CacheArray, [P::source(scaled)]);
    let moved = list.push(Opcode::TranslateX, [P::source(c), P::float(0.25)]);
    let root = list.push(Opcode::Add, [P::source(c), P::source(moved)]);
    (list, root, c)
}

// ── Compilation ────────────────────────────────────────────────────

#[test]
fn phase_ordering_holds_for_representative_graphs() {
    init_tracing();

    let (mut list, root, _) = mixed_graph();
    let tree = list.get_tree(root).unwrap();
    assert_phase_order(&list, &tree);

    let mut list = InstructionList::new();
    let root = simple_ridged(&mut list, &Fractal { octaves: 4, basis: Basis::Value, ..Default::default() }).unwrap();
    let tree = list.get_tree(root).unwrap();
    assert_phase_order(&list, &tree);

    let mut list = InstructionList::new();
    let x = list.push(Opcode::X, []);
    let amount = list.push(Opcode::Sin, [P::source(x)]);
    let inner = list.push(Opcode::TranslateY, [P::source(x), P::source(amount)]);
    let outer = list.push(Opcode::ScaleDomain, [P::source(inner), P::source(amount)]);
    let root = list.push(Opcode::DX, [P::source(outer), P::float(0.01)]);
    let tree = list.get_tree(root).unwrap();
    assert_phase_order(&list, &tree);
}

#[test]
fn computed_factor_is_valued_before_the_frame_it_shapes() {
    let (mut list, root, _) = mixed_graph();
    let tree = list.get_tree(root).unwrap();

    // ScaleDomain (id 3) reads `factor` untransformed and hands its frame
    // to `n`; factor's VALUE must come first.
    let top_of_scale = tree
        .sequences
        .iter()
        .find(|s| s.contains(3))
        .expect("scale is a member somewhere");
    let factor_seq = top_of_scale.child_for(3, 2, false).unwrap();
    let noise_seq = top_of_scale.child_for(3, 0, true).unwrap();
    assert!(tree.value_position(factor_seq).unwrap() < tree.coord_position(noise_seq).unwrap());
    assert_eq!(tree.coord_positions(&list, 3), vec![tree.coord_position(noise_seq).unwrap()]);
}

#[test]
fn trees_are_memoized_per_root() {
    let (mut list, root, c) = mixed_graph();
    let a = list.get_tree(root).unwrap();
    let b = list.get_tree(root).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    list.get_tree(c).unwrap();
    assert_eq!(list.tree_builds(), 2);
    assert_eq!(list.main_tree(), Some(root));
}

#[test]
fn shared_cache_boundary_compiles_once() {
    let (mut list, root, c) = mixed_graph();
    let tree = list.get_tree(root).unwrap();
    let boundary = tree.sequences.iter().filter(|s| s.rid == Rid::Boundary(c)).count();
    assert_eq!(boundary, 1);
    // Both the root and the translation link to that one sequence.
    let consumers: usize = tree
        .sequences
        .iter()
        .flat_map(|s| &s.links)
        .filter(|l| l.rid == Rid::Boundary(c))
        .count();
    assert_eq!(consumers, 2);
}

#[test]
fn boundary_feeding_its_own_warp_compiles_and_stays_transparent() {
    init_tracing();
    let mut list = InstructionList::new();
    let n = list.push(Opcode::GradientBasis, [P::int(3), P::uint(4)]);
    let b = list.push(Opcode::CacheArray, [P::source(n)]);
    let amount = list.push(Opcode::Multiply, [P::source(b), P::float(0.1)]);
    let warped = list.push(Opcode::TranslateX, [P::source(b), P::source(amount)]);
    let squared = list.push(Opcode::ScaleDomain, [P::source(b), P::source(b)]);

    for root in [warped, squared] {
        let tree = list.get_tree(root).unwrap();
        assert_phase_order(&list, &tree);
        assert_eq!(tree.sequences.iter().filter(|s| s.rid == Rid::Boundary(b)).count(), 1);

        let cached = evaluate_grid(&mut list, root, &raster(8, 6, 3)).unwrap();
        let plain = evaluate_grid(&mut list, root, &RasterConfig { use_cache: false, ..raster(8, 6, 3) }).unwrap();
        assert_eq!(cached.values, plain.values);
    }
}

#[test]
fn leaf_only_tree_is_one_merged_command() {
    let mut list = InstructionList::new();
    let x = list.push(Opcode::X, []);
    let root = list.push(Opcode::Multiply, [P::source(x), P::source(x)]);
    let tree = list.get_tree(root).unwrap();
    assert_eq!(tree.sequences.len(), 1);
    assert_eq!(tree.commands.len(), 1);
    assert_eq!(tree.commands[0].phase, Phase::CoordAndValue);
}

// ── Evaluation ─────────────────────────────────────────────────────

#[test]
fn nested_transforms_apply_outermost_first() {
    let mut list = InstructionList::new();
    let n = list.push(Opcode::ValueBasis, [P::int(3), P::uint(1)]);
    let scaled = list.push(Opcode::ScaleDomain, [P::source(n), P::float(2.0)]);
    let root = list.push(Opcode::TranslateDomain, [P::source(scaled), P::float(0.5)]);
    let tree = list.get_tree(root).unwrap();
    let mut ev = Evaluator::new(&list, tree);

    let got = ev.evaluate(Coordinate::new2(0.0, 0.0));
    let expected = value_noise(&Coordinate::new2(1.0, 1.0), 1, Interp::Quintic);
    assert_eq!(got, expected);
}

#[test]
fn axis_translate_after_scale_lands_on_x_only() {
    let mut list = InstructionList::new();
    let n = list.push(Opcode::ValueBasis, [P::int(3), P::uint(1)]);
    let scaled = list.push(Opcode::ScaleDomain, [P::source(n), P::float(2.0)]);
    let root = list.push(Opcode::TranslateX, [P::source(scaled), P::float(0.5)]);
    let tree = list.get_tree(root).unwrap();
    let mut ev = Evaluator::new(&list, tree);

    let expected = value_noise(&Coordinate::new2(1.0, 0.0), 1, Interp::Quintic);
    assert_eq!(ev.evaluate(Coordinate::new2(0.0, 0.0)), expected);
}

#[test]
fn evaluation_is_deterministic() {
    let mut list = InstructionList::new();
    let root = simple_fbm(&mut list, &Fractal { octaves: 5, seed: 12, ..Default::default() }).unwrap();
    let tree = list.get_tree(root).unwrap();
    let mut a = Evaluator::new(&list, Arc::clone(&tree));
    let mut b = Evaluator::new(&list, tree);
    for i in 0..32 {
        let c = Coordinate::new3(i as f64 * 0.17, -0.4 * i as f64, 0.9);
        let va = a.evaluate(c);
        assert!(va.is_finite());
        assert_eq!(va, b.evaluate(c));
    }

    let first = evaluate_grid(&mut list, root, &raster(16, 16, 4)).unwrap();
    let second = evaluate_grid(&mut list, root, &raster(16, 16, 1)).unwrap();
    assert_eq!(first.values, second.values);
}

#[test]
fn grid_matches_point_evaluation() {
    let (mut list, root, _) = mixed_graph();
    let config = RasterConfig { use_cache: false, ..raster(6, 5, 2) };
    let grid = evaluate_grid(&mut list, root, &config).unwrap();

    let tree = list.get_tree(root).unwrap();
    let mut ev = Evaluator::new(&list, tree);
    for row in 0..5 {
        for col in 0..6 {
            let (x, y) = config.sample_position(col, row);
            let v = ev.evaluate(Coordinate::new2(x, y)) as f32;
            assert_eq!(grid.get(col, row), Some(v), "pixel ({col}, {row})");
        }
    }
}

#[test]
fn cache_is_transparent() {
    init_tracing();
    let (mut list, root, _) = mixed_graph();
    let cached = evaluate_grid(&mut list, root, &raster(12, 9, 3)).unwrap();
    let plain = evaluate_grid(&mut list, root, &RasterConfig { use_cache: false, ..raster(12, 9, 3) }).unwrap();
    assert_eq!(cached.values, plain.values);
    assert_eq!(cached.min_value, plain.min_value);
    assert_eq!(cached.max_value, plain.max_value);
}

static BASIS_CALLS: AtomicUsize = AtomicUsize::new(0);

fn counting_value_basis(ev: &mut Evaluator<'_>, id: InstrId, ins: &Instruction) {
    BASIS_CALLS.fetch_add(1, Ordering::SeqCst);
    (phase_fns(Opcode::ValueBasis).value)(ev, id, ins);
}

#[test]
fn cached_subgraph_runs_once_per_sample() {
    let mut list = InstructionList::new();
    let n = list.push(Opcode::ValueBasis, [P::int(1), P::uint(8)]);
    let c = list.push(Opcode::CacheArray, [P::source(n)]);
    let b = list.push(Opcode::Abs, [P::source(c)]);
    let d = list.push(Opcode::Multiply, [P::source(c), P::float(2.0)]);
    let root = list.push(Opcode::Add, [P::source(b), P::source(d)]);
    let tree = list.get_tree(root).unwrap();

    let mut table = FunctionTable::standard();
    table.set_value(Opcode::ValueBasis, counting_value_basis);

    let mut map = CacheMap::new();
    map.resize(4, 1, 1, list.len(), list.cache_boundaries());
    map.set_cache_accessor(0, 0, 4).unwrap();

    let samples: Vec<Coordinate> = (0..4).map(|i| Coordinate::new2(i as f64 * 0.3, 0.7)).collect();
    let mut first = Vec::new();
    {
        let mut ev = Evaluator::with_functions(&list, Arc::clone(&tree), table.clone());
        ev.bind_cache(&map, 0).unwrap();
        for &s in &samples {
            first.push(ev.evaluate(s));
        }
    }
    assert_eq!(BASIS_CALLS.load(Ordering::SeqCst), samples.len());

    map.set_cache_available(0, c);
    let mut ev = Evaluator::with_functions(&list, tree, table);
    ev.bind_cache(&map, 0).unwrap();
    for (i, &s) in samples.iter().enumerate() {
        assert_eq!(ev.evaluate(s), first[i]);
    }
    assert_eq!(BASIS_CALLS.load(Ordering::SeqCst), samples.len());
}

#[test]
fn restarting_rewinds_the_cache_cursor() {
    let (mut list, root, c) = mixed_graph();
    let tree = list.get_tree(root).unwrap();
    let mut map = CacheMap::new();
    map.resize(3, 1, 1, list.len(), list.cache_boundaries());
    map.set_cache_accessor(0, 0, 3).unwrap();

    let samples = [Coordinate::new2(0.1, 0.2), Coordinate::new2(0.5, 0.9), Coordinate::new2(1.3, -0.4)];
    let mut ev = Evaluator::new(&list, Arc::clone(&tree));
    ev.bind_cache(&map, 0).unwrap();
    let first: Vec<f64> = samples.iter().map(|&s| ev.evaluate(s)).collect();
    ev.start_evaluation(tree);
    let again: Vec<f64> = samples.iter().map(|&s| ev.evaluate(s)).collect();
    assert_eq!(first, again);
    assert_eq!(ev.plan_builds(), 1);
    assert!(map.read(c, 2).is_some_and(f64::is_finite));
}

#[test]
fn session_reuses_boundaries_across_roots() {
    let (mut list, root, c) = mixed_graph();
    let doubled = list.push(Opcode::Multiply, [P::source(c), P::float(2.0)]);

    let mut session = RasterSession::new(raster(8, 8, 2)).unwrap();
    session.fill(&mut list, root).unwrap();
    assert!(session.cache().is_available(1, c));

    let from_cache = session.fill(&mut list, doubled).unwrap();
    let fresh = evaluate_grid(&mut list, doubled, &RasterConfig { use_cache: false, ..raster(8, 8, 2) }).unwrap();
    assert_eq!(from_cache.values, fresh.values);
}

#[test]
fn boundary_filled_under_a_transform_reads_back_unchanged() {
    // The first pass reaches the boundary only through a translation; the
    // second reads it directly. Both must match uncached fills.
    let mut list = InstructionList::new();
    let x = list.push(Opcode::X, []);
    let c = list.push(Opcode::CacheArray, [P::source(x)]);
    let moved = list.push(Opcode::TranslateX, [P::source(c), P::float(5.0)]);
    let doubled = list.push(Opcode::Multiply, [P::source(c), P::float(2.0)]);
    let config = raster(8, 4, 2);
    let uncached = RasterConfig { use_cache: false, ..config.clone() };

    let mut session = RasterSession::new(config).unwrap();
    let first = session.fill(&mut list, moved).unwrap();
    assert!(session.cache().is_available(0, c));
    assert_eq!(first.values, evaluate_grid(&mut list, moved, &uncached).unwrap().values);

    let second = session.fill(&mut list, doubled).unwrap();
    assert_eq!(second.values, evaluate_grid(&mut list, doubled, &uncached).unwrap().values);
    for (a, b) in first.values.iter().zip(&second.values) {
        assert_eq!(*b, a * 2.0);
    }
}

#[test]
fn result_cache_returns_finished_rasters() {
    let mut list = InstructionList::new();
    let root = simple_fbm(&mut list, &Fractal { octaves: 2, ..Default::default() }).unwrap();
    let results = Arc::new(RasterCache::new(2));
    let mut session = RasterSession::new(raster(4, 4, 2)).unwrap().with_result_cache(Arc::clone(&results));
    let a = session.fill(&mut list, root).unwrap();
    let b = session.fill(&mut list, root).unwrap();
    assert_eq!(a, b);
    assert_eq!(session.passes(), 1);
}

// ── JSON ───────────────────────────────────────────────────────────

#[test]
fn json_graph_round_trip() {
    init_tracing();
    let json = r#"{
        "nodes": [
            {"id": "terrain", "data": {"type": "Fbm", "fields": {"octaves": 3, "seed": "valley", "frequency": 2.0}}},
            {"id": "cache", "data": {"type": "CacheArray", "params": [null]}},
            {"id": "shaped", "data": {"type": "SmoothStep", "params": [-0.5, 0.5, null]}},
            {"id": "out", "data": {"type": "Select", "params": [0.0, 1.0, null, 0.5, 0.1], "_outputNode": true}}
        ],
        "edges": [
            {"source": "terrain", "target": "cache"},
            {"source": "cache", "target": "shaped", "targetHandle": "2"},
            {"source": "shaped", "target": "out", "targetHandle": "2"}
        ]
    }"#;
    let mut graph = LoadedGraph::from_json(json, None).unwrap();
    assert_eq!(graph.root, graph.outputs["out"]);

    let config = RasterConfig::from_json(r#"{"width": 8, "height": 8, "accessors": 2}"#).unwrap();
    let result = evaluate_grid(&mut graph.list, graph.root, &config).unwrap();
    assert!(result.values.iter().all(|v| (0.0..=1.0).contains(v)));

    let body = serde_json::to_value(&result).unwrap();
    assert_eq!(body["width"], 8);
    assert_eq!(body["values"].as_array().map(Vec::len), Some(64));
}
