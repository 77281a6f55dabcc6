// eval/instruction.rs — one node of the instruction DAG
//
// An instruction is an opcode plus an ordered parameter list. Each
// parameter is a literal or a reference to an earlier instruction. The
// reference lists consumed by the tree builder are derived once, when the
// instruction is created, and never change afterwards.

use crate::eval::error::GraphError;
use crate::eval::opcode::{Caps, Opcode, OpcodeProperties, ParamTag};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Stable instruction id, assigned at append time.
pub type InstrId = u32;

/// Literal payload of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    UInt(u64),
}

/// A literal, or (when `is_reference` is set) the id of another instruction
/// stored in the `UInt` payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstructionParam {
    pub value: ParamValue,
    pub is_reference: bool,
}

impl InstructionParam {
    pub fn float(v: f64) -> Self {
        Self { value: ParamValue::Float(v), is_reference: false }
    }

    pub fn int(v: i64) -> Self {
        Self { value: ParamValue::Int(v), is_reference: false }
    }

    pub fn uint(v: u64) -> Self {
        Self { value: ParamValue::UInt(v), is_reference: false }
    }

    /// Reference to the output of instruction `id`.
    pub fn source(id: InstrId) -> Self {
        Self { value: ParamValue::UInt(id as u64), is_reference: true }
    }

    /// Referenced instruction id, if this parameter is a reference.
    #[inline]
    pub fn reference(&self) -> Option<InstrId> {
        if !self.is_reference {
            return None;
        }
        Some(match self.value {
            ParamValue::UInt(v) => v as InstrId,
            ParamValue::Int(v) => v as InstrId,
            ParamValue::Float(v) => v as InstrId,
        })
    }

    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self.value {
            ParamValue::Float(v) => v,
            ParamValue::Int(v) => v as f64,
            ParamValue::UInt(v) => v as f64,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> i64 {
        match self.value {
            ParamValue::Float(v) => v as i64,
            ParamValue::Int(v) => v,
            ParamValue::UInt(v) => v as i64,
        }
    }
}

impl From<f64> for InstructionParam {
    fn from(v: f64) -> Self {
        InstructionParam::float(v)
    }
}

pub type Params = SmallVec<[InstructionParam; 4]>;

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub id: InstrId,
    pub opcode: Opcode,
    pub params: Params,

    // ── Derived at construction ──
    /// Referenced ids in parameter order, self-references excluded.
    pub sources: SmallVec<[InstrId; 4]>,
    /// Parameter slot of each entry in `sources`.
    pub source_slots: SmallVec<[u8; 4]>,
    /// Parallel to `sources`: true when the slot is tagged `Trans`.
    pub source_is_transformable: SmallVec<[bool; 4]>,
    /// Subset of `sources` referenced through `NoTrans` slots.
    pub sources_no_trans: SmallVec<[InstrId; 2]>,
    pub num_trans_sources: usize,
}

impl Instruction {
    /// Validate `params` against the property row of `opcode` and derive the
    /// source lists. `len` is the number of instructions that already exist;
    /// every reference must point below both `len` and `id`.
    pub fn new(id: InstrId, opcode: Opcode, params: Params, len: usize) -> Result<Self, GraphError> {
        let props = opcode.properties();
        if params.len() != props.params.len() {
            return Err(GraphError::Arity {
                id,
                opcode,
                expected: props.params.len(),
                got: params.len(),
            });
        }

        let mut sources = SmallVec::new();
        let mut source_slots = SmallVec::new();
        let mut source_is_transformable = SmallVec::new();
        let mut sources_no_trans = SmallVec::new();
        let mut num_trans_sources = 0;
        let limit = len.min(id as usize);

        for (slot, param) in params.iter().enumerate() {
            let Some(target) = param.reference() else { continue };
            if target as usize >= limit {
                return Err(GraphError::UnknownReference { id, opcode, slot, target, len: limit });
            }
            let trans = props.tag(slot) == ParamTag::Trans;
            sources.push(target);
            source_slots.push(slot as u8);
            source_is_transformable.push(trans);
            if trans {
                num_trans_sources += 1;
            } else {
                sources_no_trans.push(target);
            }
        }

        Ok(Self {
            id,
            opcode,
            params,
            sources,
            source_slots,
            source_is_transformable,
            sources_no_trans,
            num_trans_sources,
        })
    }

    #[inline(always)]
    pub fn properties(&self) -> OpcodeProperties {
        self.opcode.properties()
    }

    #[inline(always)]
    pub fn has(&self, caps: Caps) -> bool {
        self.opcode.has(caps)
    }

    #[inline(always)]
    pub fn is_cache_boundary(&self) -> bool {
        self.has(Caps::CACHE_BOUNDARY)
    }

    /// Instruction whose value this one forwards when it is not a
    /// `VALUE_MODIFIER`: the reference in slot 0, if any.
    #[inline]
    pub fn value_source(&self) -> Option<InstrId> {
        self.params.first().and_then(InstructionParam::reference)
    }

    /// True when every parameter tagged `NoTrans` is a literal.
    pub fn static_notrans_params(&self) -> bool {
        self.sources_no_trans.is_empty()
    }
}
