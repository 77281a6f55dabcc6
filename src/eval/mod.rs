pub mod builders;
pub mod cache;
pub mod compiled;
pub mod coordinate;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod graph;
pub mod grid;
pub mod instruction;
pub mod list;
pub mod noise;
pub mod opcode;
