// eval/compiled.rs — instruction graph → sequences + ordered phase commands
//
// The compiler partitions the sub-graph reachable from one root instruction
// into sequences: maximal groups of instructions that share a coordinate
// frame. A sequence stops growing at any instruction that has a source it
// cannot absorb (a `NoTrans` slot, a cache boundary, or an instruction
// already claimed by another consumer in the same sequence). All sources of
// such an instruction become the bases of child sequences.
//
// A child sequence belongs to the one parent sequence that requested it, so
// it always inherits exactly one frame. Cache boundaries are the exception:
// their arrays are addressed by sample index, so a boundary's sub-graph is
// valued in the sample frame and shared by every consumer.
//
// Every sequence is then scheduled as a COORD command (frames flow from
// root to leaves) and a VALUE command (values flow back from leaves to the
// root), ordered by an explicit dependency graph:
//
//   COORD(child)  after COORD(parent sequence), unless the child is a
//                 cache boundary
//   COORD(child)  after VALUE of the NoTrans siblings, when the child is fed
//                 through a transform that reads them
//   VALUE(seq)    after COORD(seq) and VALUE of every child
//
// A top-level sequence with no children compiles to one COORD_AND_VALUE
// command.

use crate::eval::error::ScheduleError;
use crate::eval::instruction::{InstrId, Instruction};
use crate::eval::list::InstructionList;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::time::Instant;

/// Position of a sequence in its tree.
pub type SeqId = u32;

// ── Sequence keys ──────────────────────────────────────────────────

/// Dedup key for a sequence: one per (parent sequence, root instruction,
/// base) triple, shared by every consumer when the base is a cache boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rid {
    /// The tree's own root; no parent.
    Top(InstrId),
    /// A cache-boundary base, shared by all consumers.
    Boundary(InstrId),
    /// `base` reached from instruction `root` of sequence `parent` through a
    /// `Trans` (or `NoTrans`) slot.
    Child {
        parent: SeqId,
        root: InstrId,
        base: InstrId,
        trans: bool,
    },
}

impl Rid {
    /// Key for the sequence based at `base` and consumed by `root`, a member
    /// of sequence `parent`.
    pub fn for_link(list: &InstructionList, parent: SeqId, root: InstrId, base: InstrId, trans: bool) -> Rid {
        if list[base].is_cache_boundary() {
            Rid::Boundary(base)
        } else {
            Rid::Child { parent, root, base, trans }
        }
    }

    #[inline]
    pub fn base(&self) -> InstrId {
        match *self {
            Rid::Top(base) | Rid::Boundary(base) => base,
            Rid::Child { base, .. } => base,
        }
    }

    /// Numeric form used in logs: `1000*base` for the top sequence, `base`
    /// for a cache boundary and `root + 1000*base` otherwise.
    pub fn key(&self) -> u64 {
        match *self {
            Rid::Top(base) => 1000 * base as u64,
            Rid::Boundary(base) => base as u64,
            Rid::Child { root, base, .. } => root as u64 + 1000 * base as u64,
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Rid::Child { parent, trans, .. } => {
                write!(f, "{}@{}{}", self.key(), parent, if trans { "" } else { "~" })
            }
            _ => write!(f, "{}", self.key()),
        }
    }
}

// ── Sequences ──────────────────────────────────────────────────────

/// Resolved edge from a parent sequence to one of its child sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLink {
    /// Member of the parent sequence that consumes the child.
    pub root: InstrId,
    /// Base instruction of the child sequence.
    pub base: InstrId,
    /// The consuming slot is tagged `Trans`.
    pub trans: bool,
    pub rid: Rid,
    pub sequence: SeqId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub id: SeqId,
    pub rid: Rid,
    /// Instruction of the parent sequence that first requested this one.
    pub root: Option<InstrId>,
    /// Sequence owning `root`. Its frame feeds this sequence's base unless
    /// the base is a cache boundary.
    pub root_sequence: Option<SeqId>,
    pub base: InstrId,
    /// Sorted, deduplicated.
    pub members: Vec<InstrId>,
    /// Reached from `root` through a `Trans` slot.
    pub is_trans: bool,
    /// Has child sequences.
    pub is_parent: bool,
    /// Base instruction of each child, one entry per consuming slot.
    pub children: Vec<InstrId>,
    /// Parallel to `children`.
    pub child_rids: Vec<Rid>,
    /// Parallel to `children`, with the child sequence resolved.
    pub links: Vec<ChildLink>,
}

impl Sequence {
    #[inline]
    pub fn contains(&self, id: InstrId) -> bool {
        self.members.binary_search(&id).is_ok()
    }

    /// Consumer and sequence whose frame this sequence is evaluated in.
    /// `None` for the top sequence and for cache boundaries, which both read
    /// the sample coordinate.
    #[inline]
    pub fn frame_parent(&self) -> Option<(InstrId, SeqId)> {
        match self.rid {
            Rid::Child { .. } => self.root.zip(self.root_sequence),
            Rid::Top(_) | Rid::Boundary(_) => None,
        }
    }

    /// The base reads its frame through a transform that must wait for
    /// `NoTrans` values; that transform runs at the start of this COORD.
    #[inline]
    pub fn runs_deferred_transform(&self, list: &InstructionList) -> bool {
        self.is_trans && self.frame_parent().is_some_and(|(root, _)| defers_coord(&list[root]))
    }

    /// True when `id` is a member whose sources all live in child sequences.
    #[inline]
    pub fn is_parent_instruction(&self, id: InstrId) -> bool {
        self.links.iter().any(|l| l.root == id)
    }

    /// Child sequence that `root` reads `base` from through a slot with the
    /// given tag.
    pub fn child_for(&self, root: InstrId, base: InstrId, trans: bool) -> Option<SeqId> {
        self.links
            .iter()
            .find(|l| l.root == root && l.base == base && l.trans == trans)
            .map(|l| l.sequence)
    }
}

/// Whether an instruction's coordinate function must wait for the values of
/// its `NoTrans` sources. Such an instruction is always a parent; its
/// transform runs at the start of its transformable child's COORD command.
#[inline]
pub fn defers_coord(ins: &Instruction) -> bool {
    !ins.sources_no_trans.is_empty()
}

// ── Commands ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Coord,
    Value,
    CoordAndValue,
}

impl Phase {
    #[inline(always)]
    pub fn runs_coord(self) -> bool {
        matches!(self, Phase::Coord | Phase::CoordAndValue)
    }

    #[inline(always)]
    pub fn runs_value(self) -> bool {
        matches!(self, Phase::Value | Phase::CoordAndValue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCmd {
    pub phase: Phase,
    pub sequence: SeqId,
}

/// Compiled plan for one root instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionTree {
    pub root_instruction_id: InstrId,
    pub sequences: Vec<Sequence>,
    pub commands: Vec<SequenceCmd>,
    rid_index: FxHashMap<Rid, SeqId>,
}

impl InstructionTree {
    #[inline]
    pub fn sequence(&self, id: SeqId) -> &Sequence {
        &self.sequences[id as usize]
    }

    pub fn sequence_by_rid(&self, rid: Rid) -> Option<&Sequence> {
        self.rid_index.get(&rid).map(|&id| self.sequence(id))
    }

    /// The sequence based at the root instruction.
    pub fn top(&self) -> &Sequence {
        &self.sequences[0]
    }

    /// Index of the command that runs the COORD phase of `seq`.
    pub fn coord_position(&self, seq: SeqId) -> Option<usize> {
        self.commands
            .iter()
            .position(|c| c.sequence == seq && c.phase.runs_coord())
    }

    /// Index of the command that runs the VALUE phase of `seq`.
    pub fn value_position(&self, seq: SeqId) -> Option<usize> {
        self.commands
            .iter()
            .position(|c| c.sequence == seq && c.phase.runs_value())
    }

    /// Command indices at which the coordinate function of `id` executes.
    /// Deferred transforms run inside the COORD command of the
    /// transformable child they feed.
    pub fn coord_positions(&self, list: &InstructionList, id: InstrId) -> Vec<usize> {
        let deferred = defers_coord(&list[id]);
        let mut out = Vec::new();
        for seq in self.sequences.iter().filter(|s| s.contains(id)) {
            if !deferred {
                out.extend(self.coord_position(seq.id));
                continue;
            }
            for link in seq.links.iter().filter(|l| l.root == id && l.trans) {
                let child = self.sequence(link.sequence);
                if child.frame_parent() == Some((id, seq.id)) {
                    out.extend(self.coord_position(child.id));
                }
            }
        }
        out
    }

    /// Check that, for every instruction in the tree, each `NoTrans` source
    /// is fully evaluated before the instruction's coordinate function runs
    /// and each value source is evaluated before its own VALUE command.
    pub fn verify_order(&self, list: &InstructionList) -> Result<(), String> {
        for seq in &self.sequences {
            let own_value = self
                .value_position(seq.id)
                .ok_or_else(|| format!("sequence {} has no VALUE command", seq.id))?;
            if let Some(coord) = self.coord_position(seq.id) {
                if coord > own_value {
                    return Err(format!("sequence {}: VALUE before COORD", seq.id));
                }
            }

            for &id in &seq.members {
                let ins = &list[id];
                let coord_at = self.coord_positions(list, id);

                for &src in &ins.sources_no_trans {
                    let child = seq.child_for(id, src, false).ok_or_else(|| {
                        format!("instruction {id}: no child sequence for NoTrans source {src}")
                    })?;
                    let child_coord = self.coord_position(child).unwrap_or(usize::MAX);
                    let child_value = self.value_position(child).unwrap_or(usize::MAX);
                    for &at in &coord_at {
                        if child_coord >= at || child_value >= at {
                            return Err(format!(
                                "instruction {id}: NoTrans source {src} (sequence {child}) not ready before command {at}"
                            ));
                        }
                    }
                }

                if !seq.is_parent_instruction(id) {
                    continue;
                }
                for (&src, &trans) in ins.sources.iter().zip(&ins.source_is_transformable) {
                    let child = seq.child_for(id, src, trans).ok_or_else(|| {
                        format!("instruction {id}: no child sequence for source {src}")
                    })?;
                    let child_value = self.value_position(child).unwrap_or(usize::MAX);
                    if child_value >= own_value {
                        return Err(format!(
                            "instruction {id}: value of source {src} (sequence {child}) computed after command {own_value}"
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Tree building ──────────────────────────────────────────────────

struct Request {
    link: Option<(InstrId, SeqId)>,
    base: InstrId,
    trans: bool,
    rid: Rid,
}

struct PendingLink {
    root: InstrId,
    base: InstrId,
    trans: bool,
    rid: Rid,
}

/// Partition the graph under `root` and order its phase commands.
pub fn build_tree(list: &InstructionList, root: InstrId) -> Result<InstructionTree, ScheduleError> {
    let started = Instant::now();

    // ── 1. Partition into sequences (breadth-first work-list) ──

    let mut sequences: Vec<Sequence> = Vec::new();
    let mut pending: Vec<Vec<PendingLink>> = Vec::new();
    let mut rid_index: FxHashMap<Rid, SeqId> = FxHashMap::default();
    let mut queued: FxHashSet<Rid> = FxHashSet::default();
    let mut queue: VecDeque<Request> = VecDeque::new();

    queued.insert(Rid::Top(root));
    queue.push_back(Request { link: None, base: root, trans: false, rid: Rid::Top(root) });

    while let Some(req) = queue.pop_front() {
        let id = sequences.len() as SeqId;
        let mut members = vec![req.base];
        let mut claimed: FxHashSet<InstrId> = FxHashSet::default();
        claimed.insert(req.base);
        let mut walk = vec![req.base];
        let mut links: Vec<PendingLink> = Vec::new();

        while let Some(cur) = walk.pop() {
            let ins = &list[cur];
            if ins.sources.is_empty() {
                continue;
            }

            let breaks = ins
                .sources
                .iter()
                .zip(&ins.source_is_transformable)
                .any(|(&s, &trans)| !trans || list[s].is_cache_boundary() || claimed.contains(&s));

            if !breaks {
                for &s in &ins.sources {
                    if claimed.insert(s) {
                        members.push(s);
                        walk.push(s);
                    }
                }
                continue;
            }

            for (&s, &trans) in ins.sources.iter().zip(&ins.source_is_transformable) {
                if links.iter().any(|l| l.root == cur && l.base == s && l.trans == trans) {
                    continue;
                }
                let rid = Rid::for_link(list, id, cur, s, trans);
                if queued.insert(rid) {
                    tracing::trace!(tree = root, sequence = id, %rid, "queue child sequence");
                    queue.push_back(Request { link: Some((cur, id)), base: s, trans, rid });
                }
                links.push(PendingLink { root: cur, base: s, trans, rid });
            }
        }

        members.sort_unstable();
        members.dedup();
        rid_index.insert(req.rid, id);
        sequences.push(Sequence {
            id,
            rid: req.rid,
            root: req.link.map(|(r, _)| r),
            root_sequence: req.link.map(|(_, s)| s),
            base: req.base,
            members,
            is_trans: req.trans,
            is_parent: !links.is_empty(),
            children: links.iter().map(|l| l.base).collect(),
            child_rids: links.iter().map(|l| l.rid).collect(),
            links: Vec::new(),
        });
        pending.push(links);
    }

    // ── 2. Resolve child links ──

    for (seq, links) in sequences.iter_mut().zip(pending) {
        for l in links {
            let Some(&child) = rid_index.get(&l.rid) else {
                tracing::error!(
                    tree = root,
                    sequence = seq.id,
                    base = seq.base,
                    child_base = l.base,
                    rid = %l.rid,
                    "child sequence missing during linking"
                );
                return Err(ScheduleError::MissingSequence {
                    root,
                    sequence: seq.id,
                    base: seq.base,
                    rid: l.rid,
                });
            };
            seq.links.push(ChildLink {
                root: l.root,
                base: l.base,
                trans: l.trans,
                rid: l.rid,
                sequence: child,
            });
        }
    }

    // ── 3. Order commands ──

    let commands = order_commands(list, root, &sequences)?;

    let tree = InstructionTree {
        root_instruction_id: root,
        sequences,
        commands,
        rid_index,
    };

    tracing::info!(
        tree = root,
        sequences = tree.sequences.len(),
        commands = tree.commands.len(),
        elapsed_us = started.elapsed().as_micros() as u64,
        "built instruction tree"
    );
    log_tree(&tree);
    debug_assert!(
        tree.verify_order(list).is_ok(),
        "{:?}",
        tree.verify_order(list)
    );

    Ok(tree)
}

/// Topologically order the phase commands of `sequences`. Ready COORD
/// commands are emitted before ready VALUE commands; ties break on the
/// lower sequence id.
fn order_commands(
    list: &InstructionList,
    root: InstrId,
    sequences: &[Sequence],
) -> Result<Vec<SequenceCmd>, ScheduleError> {
    // Node layout: coord node = 2*seq, value node = 2*seq + 1. A merged
    // COORD_AND_VALUE command only uses the coord node.
    let merged: Vec<bool> = sequences
        .iter()
        .map(|s| s.root.is_none() && !s.is_parent)
        .collect();
    let node_count = sequences.len() * 2;
    let coord_node = |seq: SeqId| seq as usize * 2;
    let value_node = |seq: SeqId| {
        if merged[seq as usize] {
            seq as usize * 2
        } else {
            seq as usize * 2 + 1
        }
    };

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    let mut indegree: Vec<usize> = vec![0; node_count];
    let mut edge = |from: usize, to: usize| {
        if from != to {
            successors[from].push(to);
            indegree[to] += 1;
        }
    };

    for seq in sequences {
        if let Some((r, parent)) = seq.frame_parent() {
            edge(coord_node(parent), coord_node(seq.id));
            if seq.runs_deferred_transform(list) {
                let parent = &sequences[parent as usize];
                for l in parent.links.iter().filter(|l| l.root == r && !l.trans) {
                    edge(value_node(l.sequence), coord_node(seq.id));
                }
            }
        }
        edge(coord_node(seq.id), value_node(seq.id));
        for l in &seq.links {
            edge(value_node(l.sequence), value_node(seq.id));
        }
    }

    let mut ready: BinaryHeap<Reverse<(u8, SeqId)>> = BinaryHeap::new();
    let live = |node: usize| node % 2 == 0 || !merged[node / 2];
    for node in (0..node_count).filter(|&n| live(n)) {
        if indegree[node] == 0 {
            ready.push(Reverse(((node % 2) as u8, (node / 2) as SeqId)));
        }
    }

    let mut commands = Vec::with_capacity(node_count);
    while let Some(Reverse((rank, seq))) = ready.pop() {
        let node = seq as usize * 2 + rank as usize;
        let phase = match (rank, merged[seq as usize]) {
            (0, true) => Phase::CoordAndValue,
            (0, false) => Phase::Coord,
            _ => Phase::Value,
        };
        commands.push(SequenceCmd { phase, sequence: seq });
        for &next in &successors[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse(((next % 2) as u8, (next / 2) as SeqId)));
            }
        }
    }

    let expected = (0..node_count).filter(|&n| live(n)).count();
    if commands.len() != expected {
        let blocked = (0..node_count)
            .filter(|&n| live(n) && indegree[n] > 0)
            .map(|n| &sequences[n / 2])
            .next();
        let (sequence, base) = blocked.map(|s| (s.id, s.base)).unwrap_or((0, root));
        tracing::error!(
            tree = root,
            scheduled = commands.len(),
            expected,
            sequence,
            base,
            "sequence dependencies form a cycle"
        );
        return Err(ScheduleError::Unordered {
            root,
            unscheduled: expected - commands.len(),
            sequence,
            base,
        });
    }

    Ok(commands)
}

fn log_tree(tree: &InstructionTree) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    for s in &tree.sequences {
        tracing::debug!(
            tree = tree.root_instruction_id,
            "seq(id={} rid={} root={:?} rootseq={:?} base={} children={:?} trans={} parent={}) => {:?}",
            s.id,
            s.rid,
            s.root,
            s.root_sequence,
            s.base,
            s.children,
            s.is_trans,
            s.is_parent,
            s.members
        );
    }
    for c in &tree.commands {
        tracing::debug!(tree = tree.root_instruction_id, "cmd({:?}, seq={})", c.phase, c.sequence);
    }
}

// ── Tests ──────────────────────────────────────────────────────────
