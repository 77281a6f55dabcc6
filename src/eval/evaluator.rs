// eval/evaluator.rs — single-threaded execution of a compiled tree
//
// An evaluator owns every piece of mutable per-sample state, so each thread
// of a raster fill gets its own and shares only the frozen instruction list
// and the (atomic) sample cache.
//
// Storage is a flat arena of coordinate slots and value slots. When a tree
// is bound, every member of every sequence gets a plan that resolves, once,
// which slots it reads and writes:
//
//   coord_in   frame the member is evaluated at; the base reads it from the
//              parent member (coord_out for Trans links, coord_in otherwise),
//              or the sample coordinate for the top and cache boundaries
//   coord_out  frame handed to Trans sources; a fresh slot for coordinate
//              modifiers, an alias of coord_in for everything else
//   value      a fresh slot for value modifiers and literal-headed members,
//              otherwise an alias of the slot-0 source's value
//
// Evaluation then walks the command list: COORD runs coordinate functions
// leaves-last (highest id first), VALUE runs value functions leaves-first.
// Each slot holds one entry per layer; derivative transforms add layers and
// cache boundaries collapse back to one.

use crate::eval::cache::CacheMap;
use crate::eval::compiled::{defers_coord, InstructionTree, Sequence};
use crate::eval::coordinate::Coordinate;
use crate::eval::error::CacheError;
use crate::eval::functions::{rotation_matrix, FunctionTable};
use crate::eval::instruction::{InstrId, InstructionParam};
use crate::eval::list::InstructionList;
use crate::eval::noise::build_perm_table;
use crate::eval::opcode::{Caps, ParamTag};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::ops::Range;
use std::sync::Arc;

/// Per-layer values of one slot.
pub type Layers = SmallVec<[f64; 2]>;
type Frames = SmallVec<[Coordinate; 2]>;

const NO_SLOT: u32 = u32::MAX;

/// Where a member reads one of its parameters from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamSlot {
    Literal(InstructionParam),
    Value(u32),
}

#[derive(Debug, Clone)]
struct MemberPlan {
    id: InstrId,
    coord_in: u32,
    coord_out: u32,
    value: u32,
    owns_value: bool,
    /// False when the coordinate function waits for NoTrans values and runs
    /// as the prologue of the Trans child's COORD instead.
    run_coord: bool,
    params: SmallVec<[ParamSlot; 4]>,
}

#[derive(Debug, Clone, Default)]
struct SequencePlan {
    members: Vec<MemberPlan>,
    /// Deferred coordinate function to run before this sequence's own:
    /// (parent sequence, member index in the parent).
    prologue: Option<(usize, usize)>,
}

struct CacheBinding<'a> {
    map: &'a CacheMap,
    accessor: usize,
    range: Range<usize>,
    cursor: usize,
}

pub struct Evaluator<'a> {
    list: &'a InstructionList,
    functions: FunctionTable,
    tree: Arc<InstructionTree>,

    plans: Vec<SequencePlan>,
    coords: Vec<Frames>,
    values: Vec<Layers>,
    seed_slot: usize,
    root_slot: u32,
    plan_builds: usize,

    coord_enabled: Vec<bool>,
    value_enabled: Vec<bool>,
    /// Value phase runs the base only: an available cache boundary.
    boundary_only: Vec<bool>,
    flags_use_cache: bool,

    rotations: Vec<Option<[f64; 9]>>,
    perms: FxHashMap<u32, Box<[u8; 512]>>,
    cache: Option<CacheBinding<'a>>,
    warned_range: bool,

    /// (sequence, member index) of the function being called.
    current: (usize, usize),
}

impl<'a> Evaluator<'a> {
    pub fn new(list: &'a InstructionList, tree: Arc<InstructionTree>) -> Self {
        Self::with_functions(list, tree, FunctionTable::standard())
    }

    pub fn with_functions(
        list: &'a InstructionList,
        tree: Arc<InstructionTree>,
        functions: FunctionTable,
    ) -> Self {
        let mut ev = Self {
            list,
            functions,
            tree,
            plans: Vec::new(),
            coords: Vec::new(),
            values: Vec::new(),
            seed_slot: 0,
            root_slot: NO_SLOT,
            plan_builds: 0,
            coord_enabled: Vec::new(),
            value_enabled: Vec::new(),
            boundary_only: Vec::new(),
            flags_use_cache: false,
            rotations: Vec::new(),
            perms: FxHashMap::default(),
            cache: None,
            warned_range: false,
            current: (0, 0),
        };
        ev.rebuild_plans();
        ev.compute_enabled(false);
        ev
    }

    pub fn tree(&self) -> &Arc<InstructionTree> {
        &self.tree
    }

    /// How many times slot plans have been built for a new tree.
    pub fn plan_builds(&self) -> usize {
        self.plan_builds
    }

    /// Attach the shared sample cache. Cache-boundary values are read and
    /// written at a cursor that starts at the accessor's range minimum and
    /// advances once per [`evaluate`](Self::evaluate).
    pub fn bind_cache(&mut self, map: &'a CacheMap, accessor: usize) -> Result<(), CacheError> {
        if accessor >= map.num_accessors() {
            return Err(CacheError::UnknownAccessor { accessor, count: map.num_accessors() });
        }
        let range = map.accessor_range(accessor).ok_or(CacheError::Unassigned { accessor })?;
        self.cache = Some(CacheBinding { map, accessor, cursor: range.start, range });
        self.compute_enabled(true);
        Ok(())
    }

    pub fn unbind_cache(&mut self) {
        self.cache = None;
        self.compute_enabled(false);
    }

    /// Prepare a pass over `tree`: rebuild slot plans if the tree changed,
    /// refresh which sequences run given cache availability, and rewind the
    /// cache cursor.
    pub fn start_evaluation(&mut self, tree: Arc<InstructionTree>) {
        if !Arc::ptr_eq(&self.tree, &tree) {
            self.tree = tree;
            self.rebuild_plans();
        }
        if let Some(b) = &mut self.cache {
            b.cursor = b.range.start;
        }
        self.warned_range = false;
        self.compute_enabled(true);
    }

    /// Move the cache cursor to linear index `index`.
    pub fn seek(&mut self, index: usize) {
        if let Some(b) = &mut self.cache {
            b.cursor = index;
        }
    }

    /// Value of the tree's root at `coord`.
    pub fn evaluate(&mut self, coord: Coordinate) -> f64 {
        let in_range = self.cursor_in_range();
        if self.flags_use_cache && !in_range {
            if !self.warned_range {
                if let Some(b) = &self.cache {
                    tracing::warn!(
                        accessor = b.accessor,
                        cursor = b.cursor,
                        min = b.range.start,
                        max = b.range.end,
                        "cache cursor left its range, evaluating uncached"
                    );
                }
                self.warned_range = true;
            }
            self.compute_enabled(false);
        } else if in_range && !self.flags_use_cache {
            self.compute_enabled(true);
        }

        for c in &mut self.coords {
            c.clear();
        }
        for v in &mut self.values {
            v.clear();
        }
        self.coords[self.seed_slot].push(coord);

        let tree = Arc::clone(&self.tree);
        for cmd in &tree.commands {
            let s = cmd.sequence as usize;
            if cmd.phase.runs_coord() && self.coord_enabled[s] {
                self.run_coord(s);
            }
            if cmd.phase.runs_value() && self.value_enabled[s] {
                self.run_value(s);
            }
        }

        let result = self.slot_value(self.root_slot, 0);
        if let Some(b) = &mut self.cache {
            b.cursor += 1;
        }
        result
    }

    // ── Execution ──────────────────────────────────────────────────

    fn run_coord(&mut self, s: usize) {
        if let Some((ps, pm)) = self.plans[s].prologue {
            self.call_coord(ps, pm);
        }
        for m in (0..self.plans[s].members.len()).rev() {
            if self.plans[s].members[m].run_coord {
                self.call_coord(s, m);
            }
        }
    }

    fn run_value(&mut self, s: usize) {
        if self.boundary_only[s] {
            let base = self.tree.sequences[s].base;
            if let Some(m) = self.plans[s].members.iter().position(|p| p.id == base) {
                self.call_value(s, m);
            }
            return;
        }
        for m in 0..self.plans[s].members.len() {
            if self.plans[s].members[m].owns_value {
                self.call_value(s, m);
            }
        }
    }

    #[inline]
    fn call_coord(&mut self, s: usize, m: usize) {
        let list = self.list;
        let id = self.plans[s].members[m].id;
        let ins = &list[id];
        if !ins.has(Caps::COORD_MODIFIER) {
            return;
        }
        self.current = (s, m);
        (self.functions.get(ins.opcode).coord)(self, id, ins);
    }

    #[inline]
    fn call_value(&mut self, s: usize, m: usize) {
        let list = self.list;
        let id = self.plans[s].members[m].id;
        let ins = &list[id];
        self.current = (s, m);
        (self.functions.get(ins.opcode).value)(self, id, ins);
    }

    // ── Function-facing accessors ──────────────────────────────────

    #[inline(always)]
    fn member(&self) -> &MemberPlan {
        &self.plans[self.current.0].members[self.current.1]
    }

    /// Number of layers the current member is evaluated at. Never zero.
    #[inline]
    pub fn layers(&self) -> usize {
        self.frames(self.member().coord_in).len().max(1)
    }

    /// Input coordinate of the current member at `layer`.
    #[inline]
    pub fn coord(&self, layer: usize) -> Coordinate {
        let frames = self.frames(self.member().coord_in);
        frames.get(layer).or_else(|| frames.first()).copied().unwrap_or_default()
    }

    pub fn input_coords(&self) -> Frames {
        self.frames(self.member().coord_in).iter().copied().collect()
    }

    /// Parameter `slot` of the current member at `layer`. Layers beyond a
    /// source's count read its layer 0; missing parameters read 0.
    #[inline]
    pub fn param(&self, slot: usize, layer: usize) -> f64 {
        match self.member().params.get(slot) {
            Some(ParamSlot::Literal(p)) => p.as_f64(),
            Some(&ParamSlot::Value(v)) => self.slot_value(v, layer),
            None => 0.0,
        }
    }

    #[inline]
    pub fn param_i64(&self, slot: usize, layer: usize) -> i64 {
        match self.member().params.get(slot) {
            Some(ParamSlot::Literal(p)) => p.as_i64(),
            Some(&ParamSlot::Value(v)) => self.slot_value(v, layer) as i64,
            None => 0,
        }
    }

    #[inline]
    pub fn param_seed(&self, slot: usize, layer: usize) -> u32 {
        self.param_i64(slot, layer) as u32
    }

    pub fn param_is_literal(&self, slot: usize) -> bool {
        matches!(self.member().params.get(slot), Some(ParamSlot::Literal(_)))
    }

    /// Store the current member's per-layer result.
    pub fn write_values(&mut self, out: Layers) {
        let slot = self.member().value;
        if let Some(v) = self.values.get_mut(slot as usize) {
            *v = out;
        }
    }

    /// Store the frame the current member hands to its Trans sources.
    pub fn write_coords(&mut self, out: Frames) {
        let slot = self.member().coord_out;
        if let Some(c) = self.coords.get_mut(slot as usize) {
            *c = out;
        }
    }

    /// Permutation table for simplex noise, built once per seed. Only
    /// literal seeds come through here; computed seeds build their own.
    pub(crate) fn perm_table(&mut self, seed: u32) -> &[u8; 512] {
        &**self.perms.entry(seed).or_insert_with(|| Box::new(build_perm_table(seed as i32)))
    }

    /// Rotation matrix for `id` at `layer`. Kept for the lifetime of the
    /// bound tree when the angle and axis are literals.
    pub(crate) fn rotation(&mut self, id: InstrId, layer: usize) -> [f64; 9] {
        if let Some(Some(m)) = self.rotations.get(id as usize) {
            return *m;
        }
        let m = rotation_matrix(
            self.param(1, layer),
            self.param(2, layer),
            self.param(3, layer),
            self.param(4, layer),
        );
        if self.list[id].static_notrans_params() {
            if let Some(r) = self.rotations.get_mut(id as usize) {
                *r = Some(m);
            }
        }
        m
    }

    /// Stored value of cache boundary `id` at the cursor, if this accessor
    /// may read it.
    pub(crate) fn cached_value(&self, id: InstrId) -> Option<f64> {
        let b = self.cache.as_ref()?;
        if !b.range.contains(&b.cursor) || !b.map.is_available(b.accessor, id) {
            return None;
        }
        b.map.read(id, b.cursor)
    }

    pub(crate) fn store_cached(&self, id: InstrId, value: f64) {
        if let Some(b) = &self.cache {
            if b.range.contains(&b.cursor) {
                b.map.write(id, b.cursor, value);
            }
        }
    }

    #[inline]
    fn frames(&self, slot: u32) -> &[Coordinate] {
        self.coords.get(slot as usize).map(|c| c.as_slice()).unwrap_or(&[])
    }

    #[inline]
    fn slot_value(&self, slot: u32, layer: usize) -> f64 {
        let Some(v) = self.values.get(slot as usize) else { return 0.0 };
        v.get(layer).or_else(|| v.first()).copied().unwrap_or(0.0)
    }

    fn cursor_in_range(&self) -> bool {
        self.cache.as_ref().is_some_and(|b| b.range.contains(&b.cursor))
    }

    // ── Planning ───────────────────────────────────────────────────

    fn rebuild_plans(&mut self) {
        let tree = Arc::clone(&self.tree);
        let plans = SlotPlanner::new(self.list, &tree).plan();
        self.coords = vec![Frames::new(); plans.coord_slots];
        self.values = vec![Layers::new(); plans.value_slots];
        self.seed_slot = plans.seed_slot;
        self.root_slot = plans.root_slot;
        self.plans = plans.sequences;
        self.rotations = vec![None; self.list.len()];
        self.plan_builds += 1;
        tracing::debug!(
            root = tree.root_instruction_id,
            sequences = self.plans.len(),
            coord_slots = self.coords.len(),
            value_slots = self.values.len(),
            "planned evaluator slots"
        );
    }

    /// Decide which COORD and VALUE commands run. A cache boundary this
    /// accessor may read runs only its own read and its sub-graph is
    /// skipped.
    fn compute_enabled(&mut self, use_cache: bool) {
        let tree = Arc::clone(&self.tree);
        let n = tree.sequences.len();
        let use_cache = use_cache && self.cursor_in_range();
        self.coord_enabled = vec![false; n];
        self.value_enabled = vec![false; n];
        self.boundary_only = vec![false; n];
        self.flags_use_cache = use_cache;
        if n == 0 {
            return;
        }

        let mut want_value = vec![0usize];
        let mut want_coord = Vec::new();
        loop {
            if let Some(s) = want_value.pop() {
                if self.value_enabled[s] {
                    continue;
                }
                self.value_enabled[s] = true;
                let seq = &tree.sequences[s];
                if use_cache && self.list[seq.base].is_cache_boundary() && self.boundary_readable(seq.base) {
                    self.boundary_only[s] = true;
                    continue;
                }
                want_coord.push(s);
                want_value.extend(seq.links.iter().map(|l| l.sequence as usize));
            } else if let Some(s) = want_coord.pop() {
                if self.coord_enabled[s] {
                    continue;
                }
                self.coord_enabled[s] = true;
                let seq = &tree.sequences[s];
                let Some((root, parent)) = seq.frame_parent() else { continue };
                want_coord.push(parent as usize);
                if seq.runs_deferred_transform(self.list) {
                    want_value.extend(
                        tree.sequences[parent as usize]
                            .links
                            .iter()
                            .filter(|l| l.root == root && !l.trans)
                            .map(|l| l.sequence as usize),
                    );
                }
            } else {
                break;
            }
        }
    }

    fn boundary_readable(&self, id: InstrId) -> bool {
        self.cache.as_ref().is_some_and(|b| b.map.is_available(b.accessor, id))
    }
}

// ── Slot planning ──────────────────────────────────────────────────

struct PlannedSlots {
    sequences: Vec<SequencePlan>,
    coord_slots: usize,
    value_slots: usize,
    seed_slot: usize,
    root_slot: u32,
}

struct SlotPlanner<'t> {
    list: &'t InstructionList,
    tree: &'t InstructionTree,
    plans: Vec<SequencePlan>,
    next_coord: u32,
    next_value: u32,
    seed_slot: u32,
}

impl<'t> SlotPlanner<'t> {
    fn new(list: &'t InstructionList, tree: &'t InstructionTree) -> Self {
        let plans = tree
            .sequences
            .iter()
            .map(|seq| SequencePlan {
                members: seq
                    .members
                    .iter()
                    .map(|&id| MemberPlan {
                        id,
                        coord_in: NO_SLOT,
                        coord_out: NO_SLOT,
                        value: NO_SLOT,
                        owns_value: false,
                        run_coord: true,
                        params: SmallVec::new(),
                    })
                    .collect(),
                prologue: None,
            })
            .collect();
        // Slot 0 holds the sample coordinate.
        Self { list, tree, plans, next_coord: 1, next_value: 0, seed_slot: 0 }
    }

    fn plan(mut self) -> PlannedSlots {
        // Command order guarantees a parent's frames and a child's values
        // are planned before anything aliases them.
        for cmd in &self.tree.commands {
            let s = cmd.sequence as usize;
            if cmd.phase.runs_coord() {
                self.plan_coords(s);
            }
            if cmd.phase.runs_value() {
                self.plan_values(s);
            }
        }
        for s in 0..self.plans.len() {
            self.plan_params(s);
        }

        let root_slot = self.base_value(0).unwrap_or(NO_SLOT);
        PlannedSlots {
            sequences: self.plans,
            coord_slots: self.next_coord as usize,
            value_slots: self.next_value as usize,
            seed_slot: self.seed_slot as usize,
            root_slot,
        }
    }

    fn fresh_coord(&mut self) -> u32 {
        self.next_coord += 1;
        self.next_coord - 1
    }

    fn fresh_value(&mut self) -> u32 {
        self.next_value += 1;
        self.next_value - 1
    }

    fn index_of(&self, s: usize, id: InstrId) -> Option<usize> {
        self.tree.sequences[s].members.binary_search(&id).ok()
    }

    fn base_value(&self, s: usize) -> Option<u32> {
        let seq = self.tree.sequences.get(s)?;
        let m = self.index_of(s, seq.base)?;
        Some(self.plans[s].members[m].value)
    }

    fn plan_coords(&mut self, s: usize) {
        let (list, tree) = (self.list, self.tree);
        let seq: &Sequence = &tree.sequences[s];
        let base_in = match seq.frame_parent() {
            Some((root, parent)) => {
                let parent = parent as usize;
                match self.index_of(parent, root) {
                    Some(m) => {
                        let pm = &self.plans[parent].members[m];
                        let (coord_in, coord_out) = (pm.coord_in, pm.coord_out);
                        if seq.runs_deferred_transform(list) {
                            self.plans[s].prologue = Some((parent, m));
                        }
                        if seq.is_trans { coord_out } else { coord_in }
                    }
                    None => {
                        tracing::error!(sequence = s, root, "parent member missing while planning frames");
                        NO_SLOT
                    }
                }
            }
            None => self.seed_slot,
        };

        // Each non-base member has exactly one consumer inside the sequence.
        let mut consumer: FxHashMap<InstrId, InstrId> = FxHashMap::default();
        for &c in &seq.members {
            if !seq.is_parent_instruction(c) {
                for &src in &list[c].sources {
                    consumer.entry(src).or_insert(c);
                }
            }
        }

        for m in (0..seq.members.len()).rev() {
            let id = seq.members[m];
            let coord_in = if id == seq.base {
                base_in
            } else {
                consumer
                    .get(&id)
                    .and_then(|&c| self.index_of(s, c))
                    .map(|cm| self.plans[s].members[cm].coord_out)
                    .unwrap_or(base_in)
            };
            let ins = &list[id];
            let coord_out = if ins.has(Caps::COORD_MODIFIER) { self.fresh_coord() } else { coord_in };
            let plan = &mut self.plans[s].members[m];
            plan.coord_in = coord_in;
            plan.coord_out = coord_out;
            plan.run_coord = !defers_coord(ins);
        }
    }

    fn plan_values(&mut self, s: usize) {
        let (list, tree) = (self.list, self.tree);
        let seq: &Sequence = &tree.sequences[s];
        for m in 0..seq.members.len() {
            let id = seq.members[m];
            let ins = &list[id];
            let (owns, slot) = match ins.value_source() {
                Some(src) if !ins.has(Caps::VALUE_MODIFIER) => {
                    let trans = ins.properties().tag(0) == ParamTag::Trans;
                    (false, self.source_value(s, id, src, trans))
                }
                _ => (true, self.fresh_value()),
            };
            let plan = &mut self.plans[s].members[m];
            plan.owns_value = owns;
            plan.value = slot;
        }
    }

    fn plan_params(&mut self, s: usize) {
        let list = self.list;
        for m in 0..self.plans[s].members.len() {
            let id = self.plans[s].members[m].id;
            let ins = &list[id];
            let props = ins.properties();
            let params: SmallVec<[ParamSlot; 4]> = ins
                .params
                .iter()
                .enumerate()
                .map(|(k, p)| match p.reference() {
                    None => ParamSlot::Literal(*p),
                    Some(src) => {
                        let trans = props.tag(k) == ParamTag::Trans;
                        ParamSlot::Value(self.source_value(s, id, src, trans))
                    }
                })
                .collect();
            self.plans[s].members[m].params = params;
        }
    }

    /// Value slot `id` (a member of sequence `s`) reads `src` from.
    fn source_value(&self, s: usize, id: InstrId, src: InstrId, trans: bool) -> u32 {
        let seq = &self.tree.sequences[s];
        let slot = if seq.is_parent_instruction(id) {
            seq.child_for(id, src, trans).and_then(|c| self.base_value(c as usize))
        } else {
            self.index_of(s, src).map(|m| self.plans[s].members[m].value)
        };
        match slot {
            Some(v) if v != NO_SLOT => v,
            _ => {
                tracing::error!(sequence = s, id, src, "unplanned source value");
                NO_SLOT
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::instruction::InstructionParam as P;
    use crate::eval::noise;
    use crate::eval::noise::{value_noise, Interp};
    use crate::eval::opcode::Opcode;

    fn eval_at(list: &mut InstructionList, root: InstrId, x: f64, y: f64) -> f64 {
        let tree = list.get_tree(root).unwrap();
        let mut ev = Evaluator::new(list, tree);
        ev.evaluate(Coordinate::new2(x, y))
    }

    #[test]
    fn constant_root() {
        let mut list = InstructionList::new();
        let c = list.push(Opcode::Constant, [P::float(4.5)]);
        assert_eq!(eval_at(&mut list, c, 0.3, 0.1), 4.5);
    }

    #[test]
    fn arithmetic_on_axes() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let y = list.push(Opcode::Y, []);
        let sum = list.push(Opcode::Add, [P::source(x), P::source(y)]);
        let root = list.push(Opcode::Multiply, [P::source(sum), P::float(2.0)]);
        assert_eq!(eval_at(&mut list, root, 0.25, 1.0), 2.5);
    }

    #[test]
    fn literal_scale_transforms_source_frame() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let root = list.push(Opcode::ScaleDomain, [P::source(x), P::float(3.0)]);
        assert_eq!(eval_at(&mut list, root, 2.0, 0.0), 6.0);
    }

    #[test]
    fn computed_scale_factor_is_read_in_the_outer_frame() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let factor = list.push(Opcode::Y, []);
        let root = list.push(Opcode::ScaleDomain, [P::source(x), P::source(factor)]);
        // x * y at (2, 5)
        assert_eq!(eval_at(&mut list, root, 2.0, 5.0), 10.0);
    }

    #[test]
    fn nested_transforms_compose() {
        let mut list = InstructionList::new();
        let n = list.push(Opcode::ValueBasis, [P::int(3), P::uint(1)]);
        let s = list.push(Opcode::ScaleDomain, [P::source(n), P::float(2.0)]);
        let root = list.push(Opcode::TranslateDomain, [P::source(s), P::float(0.5)]);
        let expected = value_noise(&Coordinate::new2(1.0, 1.0), 1, Interp::Quintic);
        assert_eq!(eval_at(&mut list, root, 0.0, 0.0), expected);
    }

    #[test]
    fn derivative_of_scaled_axis() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let sq = list.push(Opcode::Multiply, [P::source(x), P::source(x)]);
        let root = list.push(Opcode::DX, [P::source(sq), P::float(1e-4)]);
        let d = eval_at(&mut list, root, 3.0, 0.0);
        assert!((d - 6.0).abs() < 1e-3, "d/dx x^2 at 3 = {d}");
    }

    #[test]
    fn shared_source_keeps_separate_frames() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let scaled = list.push(Opcode::ScaleX, [P::source(x), P::float(10.0)]);
        let root = list.push(Opcode::Add, [P::source(x), P::source(scaled)]);
        assert_eq!(eval_at(&mut list, root, 1.0, 0.0), 11.0);
    }

    #[test]
    fn each_frame_of_a_shared_transform_gets_its_own_children() {
        // scale(n, 2) + n with n = translateX(x, f): at x = 1 the scaled
        // branch sees 2 + 0.5 and the plain branch 1 + 0.5.
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let f = list.push(Opcode::Constant, [P::float(0.5)]);
        let n = list.push(Opcode::TranslateX, [P::source(x), P::source(f)]);
        let scaled = list.push(Opcode::ScaleDomain, [P::source(n), P::float(2.0)]);
        let root = list.push(Opcode::Add, [P::source(scaled), P::source(n)]);
        assert_eq!(eval_at(&mut list, root, 1.0, 0.0), 4.0);
    }

    #[test]
    fn cache_boundary_reads_the_sample_frame() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let b = list.push(Opcode::CacheArray, [P::source(x)]);
        let f = list.push(Opcode::Multiply, [P::source(b), P::float(0.1)]);
        let warped = list.push(Opcode::TranslateX, [P::source(b), P::source(f)]);
        let squared = list.push(Opcode::ScaleDomain, [P::source(b), P::source(b)]);
        let moved = list.push(Opcode::TranslateX, [P::source(b), P::float(5.0)]);
        assert_eq!(eval_at(&mut list, warped, 2.0, 0.0), 2.0);
        assert_eq!(eval_at(&mut list, squared, 3.0, 0.0), 3.0);
        assert_eq!(eval_at(&mut list, moved, 1.0, 0.0), 1.0);
    }

    #[test]
    fn rotation_with_literal_axis_is_memoized() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let root = list.push(
            Opcode::RotateDomain,
            [P::source(x), P::float(std::f64::consts::FRAC_PI_2), P::float(0.0), P::float(0.0), P::float(1.0)],
        );
        let tree = list.get_tree(root).unwrap();
        let mut ev = Evaluator::new(&list, tree);
        // (0, 1) rotated by +90 degrees about z lands on (-1, 0)
        let v = ev.evaluate(Coordinate::new2(0.0, 1.0));
        assert!((v + 1.0).abs() < 1e-12);
        assert!(ev.rotations[root as usize].is_some());
    }

    #[test]
    fn computed_simplex_seeds_are_not_memoized() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let root = list.push(Opcode::SimplexBasis, [P::source(x)]);
        let tree = list.get_tree(root).unwrap();
        let mut ev = Evaluator::new(&list, tree);
        for i in 0..32 {
            let c = Coordinate::new2(i as f64, 0.5);
            let expected = noise::simplex_noise(&build_perm_table(i), &c, i as u32);
            assert_eq!(ev.evaluate(c), expected);
        }
        assert!(ev.perms.is_empty());
    }

    #[test]
    fn literal_simplex_seed_builds_one_table() {
        let mut list = InstructionList::new();
        let root = list.push(Opcode::SimplexBasis, [P::uint(7)]);
        let tree = list.get_tree(root).unwrap();
        let mut ev = Evaluator::new(&list, tree);
        for i in 0..8 {
            ev.evaluate(Coordinate::new2(i as f64 * 0.3, 1.5));
        }
        assert_eq!(ev.perms.len(), 1);
    }

    #[test]
    fn start_evaluation_replans_only_for_new_tree() {
        let mut list = InstructionList::new();
        let a = list.push(Opcode::Constant, [P::float(1.0)]);
        let b = list.push(Opcode::Abs, [P::float(-2.0)]);
        let ta = list.get_tree(a).unwrap();
        let tb = list.get_tree(b).unwrap();
        let mut ev = Evaluator::new(&list, Arc::clone(&ta));
        ev.start_evaluation(Arc::clone(&ta));
        assert_eq!(ev.plan_builds(), 1);
        ev.start_evaluation(tb);
        assert_eq!(ev.plan_builds(), 2);
        assert_eq!(ev.evaluate(Coordinate::new2(0.0, 0.0)), 2.0);
    }

    #[test]
    fn cache_boundary_reads_back_stored_value() {
        let mut list = InstructionList::new();
        let x = list.push(Opcode::X, []);
        let c = list.push(Opcode::CacheArray, [P::source(x)]);
        let root = list.push(Opcode::Abs, [P::source(c)]);
        let tree = list.get_tree(root).unwrap();

        let mut map = CacheMap::new();
        map.resize(2, 1, 1, list.len(), list.cache_boundaries());
        map.set_cache_accessor(0, 0, 2).unwrap();
        {
            let mut ev = Evaluator::new(&list, Arc::clone(&tree));
            ev.bind_cache(&map, 0).unwrap();
            assert_eq!(ev.evaluate(Coordinate::new2(-3.0, 0.0)), 3.0);
            assert_eq!(ev.evaluate(Coordinate::new2(-4.0, 0.0)), 4.0);
        }
        assert_eq!(map.read(c, 1), Some(-4.0));

        map.set_cache_available(0, c);
        let mut ev = Evaluator::new(&list, tree);
        ev.bind_cache(&map, 0).unwrap();
        // Coordinates are ignored once the boundary is readable.
        assert_eq!(ev.evaluate(Coordinate::new2(100.0, 0.0)), 3.0);
        assert_eq!(ev.evaluate(Coordinate::new2(100.0, 0.0)), 4.0);
        // Past the range: computed again.
        assert_eq!(ev.evaluate(Coordinate::new2(-7.0, 0.0)), 7.0);
    }

    #[test]
    fn bind_rejects_unassigned_accessor() {
        let mut list = InstructionList::new();
        let c = list.push(Opcode::Constant, [P::float(1.0)]);
        let tree = list.get_tree(c).unwrap();
        let mut map = CacheMap::new();
        map.resize(1, 1, 2, list.len(), &[]);
        let mut ev = Evaluator::new(&list, tree);
        assert_eq!(ev.bind_cache(&map, 1), Err(CacheError::Unassigned { accessor: 1 }));
        assert!(matches!(ev.bind_cache(&map, 5), Err(CacheError::UnknownAccessor { .. })));
    }
}
