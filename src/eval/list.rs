// eval/list.rs — append-only instruction registry
//
// Owns every instruction of a graph and the compiled tree for each root
// that has been requested. Construction is single-threaded; once the list
// is frozen (shared behind `&`), any number of evaluators may read it.

use crate::eval::compiled::{build_tree, InstructionTree};
use crate::eval::error::GraphError;
use crate::eval::instruction::{InstrId, Instruction, InstructionParam, Params};
use crate::eval::opcode::Opcode;
use rustc_hash::FxHashMap;
use std::ops::Index;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct InstructionList {
    instructions: Vec<Instruction>,
    cache_boundaries: Vec<InstrId>,
    trees: FxHashMap<InstrId, Arc<InstructionTree>>,
    main_tree: Option<InstrId>,
    tree_builds: usize,
}

impl InstructionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction and return its id.
    ///
    /// Panics on a forward reference or an arity mismatch. Graphs are
    /// assembled by trusted code; use [`try_push`](Self::try_push) when the
    /// parameters come from outside.
    pub fn push(
        &mut self,
        opcode: Opcode,
        params: impl IntoIterator<Item = InstructionParam>,
    ) -> InstrId {
        match self.try_push(opcode, params) {
            Ok(id) => id,
            Err(e) => panic!("malformed instruction graph: {e}"),
        }
    }

    pub fn try_push(
        &mut self,
        opcode: Opcode,
        params: impl IntoIterator<Item = InstructionParam>,
    ) -> Result<InstrId, GraphError> {
        let id = self.instructions.len() as InstrId;
        let params: Params = params.into_iter().collect();
        let ins = Instruction::new(id, opcode, params, self.instructions.len())?;
        if ins.is_cache_boundary() {
            self.cache_boundaries.push(id);
        }
        tracing::trace!(id, %opcode, sources = ?ins.sources, "push instruction");
        self.instructions.push(ins);
        Ok(id)
    }

    /// Compiled tree for `root`, built on first request and memoized for
    /// the life of the list.
    pub fn get_tree(&mut self, root: InstrId) -> Result<Arc<InstructionTree>, GraphError> {
        if let Some(tree) = self.trees.get(&root) {
            return Ok(Arc::clone(tree));
        }
        if root as usize >= self.instructions.len() {
            return Err(GraphError::UnknownInstruction(root));
        }
        let tree = Arc::new(build_tree(self, root)?);
        self.tree_builds += 1;
        self.trees.insert(root, Arc::clone(&tree));
        if self.main_tree.is_none() {
            self.main_tree = Some(root);
        }
        Ok(tree)
    }

    /// Already-built tree for `root`, without building.
    pub fn tree(&self, root: InstrId) -> Option<Arc<InstructionTree>> {
        self.trees.get(&root).cloned()
    }

    /// Root of the first tree that was built.
    pub fn main_tree(&self) -> Option<InstrId> {
        self.main_tree
    }

    /// Number of times the partition algorithm has run.
    pub fn tree_builds(&self) -> usize {
        self.tree_builds
    }

    #[inline]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.get(id as usize)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Ids of every cache-boundary instruction, ascending.
    pub fn cache_boundaries(&self) -> &[InstrId] {
        &self.cache_boundaries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }
}

impl Index<InstrId> for InstructionList {
    type Output = Instruction;

    #[inline(always)]
    fn index(&self, id: InstrId) -> &Instruction {
        &self.instructions[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::instruction::InstructionParam as P;

    #[test]
    fn ids_are_sequential() {
        let mut list = InstructionList::new();
        assert_eq!(list.push(Opcode::Constant, [P::float(1.0)]), 0);
        assert_eq!(list.push(Opcode::Constant, [P::float(2.0)]), 1);
        assert_eq!(list.push(Opcode::Add, [P::source(0), P::source(1)]), 2);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn try_push_reports_forward_reference() {
        let mut list = InstructionList::new();
        let err = list.try_push(Opcode::Abs, [P::source(0)]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownReference { .. }));
        assert!(list.is_empty());
    }

    #[test]
    #[should_panic(expected = "malformed instruction graph")]
    fn push_panics_on_bad_arity() {
        let mut list = InstructionList::new();
        list.push(Opcode::Add, [P::float(1.0)]);
    }

    #[test]
    fn tracks_cache_boundaries() {
        let mut list = InstructionList::new();
        let n = list.push(Opcode::SimplexBasis, [P::uint(1)]);
        let c = list.push(Opcode::CacheArray, [P::source(n)]);
        list.push(Opcode::Abs, [P::source(c)]);
        assert_eq!(list.cache_boundaries(), &[c]);
    }

    #[test]
    fn get_tree_is_memoized() {
        let mut list = InstructionList::new();
        let c = list.push(Opcode::Constant, [P::float(1.0)]);
        let a = list.get_tree(c).unwrap();
        let b = list.get_tree(c).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(list.tree_builds(), 1);
        assert_eq!(list.main_tree(), Some(c));
    }

    #[test]
    fn get_tree_rejects_unknown_root() {
        let mut list = InstructionList::new();
        assert!(matches!(list.get_tree(4), Err(GraphError::UnknownInstruction(4))));
    }
}
