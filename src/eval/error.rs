// eval/error.rs — error types for graph assembly, scheduling, caching and config
//
// Construction mistakes (bad references, wrong arity) are reported through
// `GraphError` by the fallible entry points and turned into panics by the
// infallible `push`. Scheduling errors never occur for a well-formed
// property table; they carry enough ids to diagnose the partition.

use crate::eval::compiled::Rid;
use crate::eval::instruction::InstrId;
use crate::eval::opcode::Opcode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("instruction {id} ({opcode}): parameter {slot} references instruction {target}, but only {len} exist")]
    UnknownReference {
        id: InstrId,
        opcode: Opcode,
        slot: usize,
        target: InstrId,
        len: usize,
    },

    #[error("instruction {id} ({opcode}): expected {expected} parameters, got {got}")]
    Arity {
        id: InstrId,
        opcode: Opcode,
        expected: usize,
        got: usize,
    },

    #[error("instruction {0} does not exist")]
    UnknownInstruction(InstrId),

    #[error("node '{node}': unknown operation '{op}'")]
    UnknownOperation { node: String, op: String },

    #[error("node '{node}': {reason}")]
    InvalidNode { node: String, reason: String },

    #[error("edge '{from}' -> '{to}': {reason}")]
    InvalidEdge {
        from: String,
        to: String,
        reason: String,
    },

    #[error("graph has a cycle through node '{0}'")]
    Cycle(String),

    #[error("graph has no nodes")]
    Empty,

    #[error("invalid graph description: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("invalid raster config: {0}")]
    Config(#[from] ConfigError),
}

/// Internal inconsistency found while linking or ordering a tree.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("tree {root}: sequence {sequence} (base {base}) links to missing rid {rid}")]
    MissingSequence {
        root: InstrId,
        sequence: u32,
        base: InstrId,
        rid: Rid,
    },

    #[error("tree {root}: {unscheduled} commands could not be ordered (first blocked: sequence {sequence}, base {base})")]
    Unordered {
        root: InstrId,
        unscheduled: usize,
        sequence: u32,
        base: InstrId,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("accessor {accessor} out of range (cache sized for {count})")]
    UnknownAccessor { accessor: usize, count: usize },

    #[error("accessor {accessor} has no reserved range")]
    Unassigned { accessor: usize },

    #[error("accessor {accessor}: range [{min}, {max}) exceeds cache size {size}")]
    RangeOutOfBounds {
        accessor: usize,
        min: usize,
        max: usize,
        size: usize,
    },

    #[error("accessor {accessor}: range [{min}, {max}) overlaps accessor {other}")]
    Overlap {
        accessor: usize,
        other: usize,
        min: usize,
        max: usize,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("raster must be non-empty, got {width}x{height}")]
    EmptyRaster { width: usize, height: usize },

    #[error("at least one accessor is required")]
    NoAccessors,

    #[error("raster window must be finite")]
    NonFiniteWindow,
}
