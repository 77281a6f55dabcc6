//! noisetree — compile a graph of noise instructions once, evaluate it many
//! times.
//!
//! The graph is assembled through [`eval::list::InstructionList`], compiled
//! per requested output into an [`eval::compiled::InstructionTree`], and
//! walked for one coordinate at a time by an [`eval::evaluator::Evaluator`].
//! [`eval::grid`] drives many evaluators in parallel over a raster, sharing
//! memoized sub-results through [`eval::cache::CacheMap`].

pub mod config;
pub mod eval;
