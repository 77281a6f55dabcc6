// eval/opcode.rs — opcodes and their static property rows
//
// Each opcode declares a capability set and, per parameter slot, whether a
// reference in that slot continues the caller's coordinate frame (`Trans`)
// or must be evaluated in the untransformed frame (`NoTrans`). The tree
// builder uses nothing else about an opcode.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Capability bits ────────────────────────────────────────────────

/// Opcode capability bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Caps(u8);

impl Caps {
    pub const NONE: Caps = Caps(0);
    /// Produces a new coordinate frame for its sources.
    pub const COORD_MODIFIER: Caps = Caps(1 << 0);
    /// Produces its own value rather than forwarding its first source.
    pub const VALUE_MODIFIER: Caps = Caps(1 << 1);
    /// Carries a rotation matrix worth caching when its params are static.
    pub const ROTATION: Caps = Caps(1 << 2);
    /// Memoized per linear sample index in the cache layer.
    pub const CACHE_BOUNDARY: Caps = Caps(1 << 3);

    #[inline(always)]
    pub const fn union(self, other: Caps) -> Caps {
        Caps(self.0 | other.0)
    }

    #[inline(always)]
    pub const fn contains(self, other: Caps) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Caps {
    type Output = Caps;

    fn bitor(self, rhs: Caps) -> Caps {
        self.union(rhs)
    }
}

/// Per-slot frame tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamTag {
    Trans,
    NoTrans,
}

/// One static row of the property table.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeProperties {
    pub caps: Caps,
    pub params: &'static [ParamTag],
}

impl OpcodeProperties {
    #[inline(always)]
    pub fn has(&self, caps: Caps) -> bool {
        self.caps.contains(caps)
    }

    #[inline]
    pub fn tag(&self, slot: usize) -> ParamTag {
        self.params.get(slot).copied().unwrap_or(ParamTag::Trans)
    }
}

use ParamTag::{NoTrans as N, Trans as T};

const P0: &[ParamTag] = &[];
const P1: &[ParamTag] = &[T];
const P2: &[ParamTag] = &[T, T];
const P3: &[ParamTag] = &[T, T, T];
const P5: &[ParamTag] = &[T, T, T, T, T];
const P6: &[ParamTag] = &[T, T, T, T, T, T];
const P10: &[ParamTag] = &[T, T, T, T, T, T, T, T, T, T];
const DOMAIN: &[ParamTag] = &[T, N];
const ROTATE: &[ParamTag] = &[T, N, N, N, N];

// ── Opcodes ────────────────────────────────────────────────────────

/// Every operation an instruction can perform.
///
/// Parameter layouts:
/// - `Constant`/`Seed`: value
/// - `CacheArray`: source
/// - `ValueBasis`/`GradientBasis`: interpolation, seed
/// - `SimplexBasis`: seed
/// - `CellularBasis`: distance, f1..f4, d1..d4, seed
/// - `Scale*`/`Translate*`/`D*`: source, amount
/// - `RotateDomain`: source, angle, ax, ay, az
/// - `Bias`/`Gain`: amount, source
/// - `Sigmoid`: source, center, ramp
/// - `Randomize`: seed, low, high
/// - `CurveSection`: low value, t0, t1, v0, v1, control
/// - `HexTile`: seed
/// - `Clamp`: low, high, source (result = max(low, min(high, source)))
/// - `Blend`: a, b, control
/// - `Select`: low, high, control, threshold, falloff
/// - `SmoothStep`/`SmootherStep`/`LinearStep`: low, high, control
/// - `Step`: threshold, control
/// - `Tiers`/`SmoothTiers`: source, steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Opcode {
    Constant,
    Seed,
    CacheArray,

    ValueBasis,
    GradientBasis,
    SimplexBasis,
    CellularBasis,

    X,
    Y,
    Z,
    W,
    U,
    V,
    Radial,

    ScaleDomain,
    ScaleX,
    ScaleY,
    ScaleZ,
    ScaleW,
    ScaleU,
    ScaleV,
    TranslateDomain,
    TranslateX,
    TranslateY,
    TranslateZ,
    TranslateW,
    TranslateU,
    TranslateV,
    RotateDomain,
    DX,
    DY,
    DZ,
    DW,
    DU,
    DV,

    Abs,
    Sin,
    Cos,
    Tan,
    ASin,
    ACos,
    ATan,

    Add,
    Subtract,
    Multiply,
    Divide,
    Pow,
    Min,
    Max,
    Bias,
    Gain,

    Sigmoid,
    Randomize,
    CurveSection,
    HexTile,
    HexBump,
    Clamp,
    Blend,
    Select,
    SmoothStep,
    SmootherStep,
    LinearStep,
    Step,
    Tiers,
    SmoothTiers,
}

impl Opcode {
    pub const ALL: &'static [Opcode] = &[
        Opcode::Constant,
        Opcode::Seed,
        Opcode::CacheArray,
        Opcode::ValueBasis,
        Opcode::GradientBasis,
        Opcode::SimplexBasis,
        Opcode::CellularBasis,
        Opcode::X,
        Opcode::Y,
        Opcode::Z,
        Opcode::W,
        Opcode::U,
        Opcode::V,
        Opcode::Radial,
        Opcode::ScaleDomain,
        Opcode::ScaleX,
        Opcode::ScaleY,
        Opcode::ScaleZ,
        Opcode::ScaleW,
        Opcode::ScaleU,
        Opcode::ScaleV,
        Opcode::TranslateDomain,
        Opcode::TranslateX,
        Opcode::TranslateY,
        Opcode::TranslateZ,
        Opcode::TranslateW,
        Opcode::TranslateU,
        Opcode::TranslateV,
        Opcode::RotateDomain,
        Opcode::DX,
        Opcode::DY,
        Opcode::DZ,
        Opcode::DW,
        Opcode::DU,
        Opcode::DV,
        Opcode::Abs,
        Opcode::Sin,
        Opcode::Cos,
        Opcode::Tan,
        Opcode::ASin,
        Opcode::ACos,
        Opcode::ATan,
        Opcode::Add,
        Opcode::Subtract,
        Opcode::Multiply,
        Opcode::Divide,
        Opcode::Pow,
        Opcode::Min,
        Opcode::Max,
        Opcode::Bias,
        Opcode::Gain,
        Opcode::Sigmoid,
        Opcode::Randomize,
        Opcode::CurveSection,
        Opcode::HexTile,
        Opcode::HexBump,
        Opcode::Clamp,
        Opcode::Blend,
        Opcode::Select,
        Opcode::SmoothStep,
        Opcode::SmootherStep,
        Opcode::LinearStep,
        Opcode::Step,
        Opcode::Tiers,
        Opcode::SmoothTiers,
    ];

    /// Dense index, stable for the life of the process.
    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The static property row for this opcode.
    pub fn properties(self) -> OpcodeProperties {
        use Opcode::*;
        let v = Caps::VALUE_MODIFIER;
        let c = Caps::COORD_MODIFIER;
        let (caps, params) = match self {
            Constant | Seed => (Caps::NONE, P1),
            CacheArray => (v | Caps::CACHE_BOUNDARY, P1),

            ValueBasis | GradientBasis => (v, P2),
            SimplexBasis => (v, P1),
            CellularBasis => (v, P10),

            X | Y | Z | W | U | V | Radial => (v, P0),

            ScaleDomain | ScaleX | ScaleY | ScaleZ | ScaleW | ScaleU | ScaleV => (c, DOMAIN),
            TranslateDomain | TranslateX | TranslateY | TranslateZ | TranslateW | TranslateU
            | TranslateV => (c, DOMAIN),
            RotateDomain => (c | Caps::ROTATION, ROTATE),
            // Derivatives widen the frame and fold the extra layers back
            // into one value, so they own both phases.
            DX | DY | DZ | DW | DU | DV => (c | v, DOMAIN),

            Abs | Sin | Cos | Tan | ASin | ACos | ATan => (v, P1),

            Add | Subtract | Multiply | Divide | Pow | Min | Max | Bias | Gain => (v, P2),

            Sigmoid | Randomize | Clamp | Blend | SmoothStep | SmootherStep | LinearStep => (v, P3),
            CurveSection => (v, P6),
            HexTile => (v, P1),
            HexBump => (v, P0),
            Select => (v, P5),
            Step | Tiers | SmoothTiers => (v, P2),
        };
        OpcodeProperties { caps, params }
    }

    #[inline]
    pub fn has(self, caps: Caps) -> bool {
        self.properties().has(caps)
    }

    /// Number of parameters an instruction of this opcode takes.
    #[inline]
    pub fn arity(self) -> usize {
        self.properties().params.len()
    }

    /// Look an opcode up by its variant name, as used in graph descriptions.
    pub fn from_name(name: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.name() == name)
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Constant => "Constant",
            Seed => "Seed",
            CacheArray => "CacheArray",
            ValueBasis => "ValueBasis",
            GradientBasis => "GradientBasis",
            SimplexBasis => "SimplexBasis",
            CellularBasis => "CellularBasis",
            X => "X",
            Y => "Y",
            Z => "Z",
            W => "W",
            U => "U",
            V => "V",
            Radial => "Radial",
            ScaleDomain => "ScaleDomain",
            ScaleX => "ScaleX",
            ScaleY => "ScaleY",
            ScaleZ => "ScaleZ",
            ScaleW => "ScaleW",
            ScaleU => "ScaleU",
            ScaleV => "ScaleV",
            TranslateDomain => "TranslateDomain",
            TranslateX => "TranslateX",
            TranslateY => "TranslateY",
            TranslateZ => "TranslateZ",
            TranslateW => "TranslateW",
            TranslateU => "TranslateU",
            TranslateV => "TranslateV",
            RotateDomain => "RotateDomain",
            DX => "DX",
            DY => "DY",
            DZ => "DZ",
            DW => "DW",
            DU => "DU",
            DV => "DV",
            Abs => "Abs",
            Sin => "Sin",
            Cos => "Cos",
            Tan => "Tan",
            ASin => "ASin",
            ACos => "ACos",
            ATan => "ATan",
            Add => "Add",
            Subtract => "Subtract",
            Multiply => "Multiply",
            Divide => "Divide",
            Pow => "Pow",
            Min => "Min",
            Max => "Max",
            Bias => "Bias",
            Gain => "Gain",
            Sigmoid => "Sigmoid",
            Randomize => "Randomize",
            CurveSection => "CurveSection",
            HexTile => "HexTile",
            HexBump => "HexBump",
            Clamp => "Clamp",
            Blend => "Blend",
            Select => "Select",
            SmoothStep => "SmoothStep",
            SmootherStep => "SmootherStep",
            LinearStep => "LinearStep",
            Step => "Step",
            Tiers => "Tiers",
            SmoothTiers => "SmoothTiers",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
