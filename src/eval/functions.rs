// eval/functions.rs — per-opcode (coordinate, value) phase functions
//
// Every opcode maps to exactly one `PhaseFns` pair through an exhaustive
// match, so adding an opcode without deciding both phases does not compile.
// A phase with nothing to do points at `noop`.
//
// Functions run inside the evaluator's current member context: `layers`,
// `coord` and `param` read the member's resolved inputs, `write_values` and
// `write_coords` store its outputs. Value functions emit one value per input
// layer. Coordinate functions only exist for COORD_MODIFIER opcodes.

use crate::eval::coordinate::{Axis, Coordinate};
use crate::eval::evaluator::{Evaluator, Layers};
use crate::eval::instruction::{InstrId, Instruction};
use crate::eval::noise::{self, Distance, Interp, Mulberry32};
use crate::eval::opcode::Opcode;
use smallvec::SmallVec;

pub type PhaseFn = fn(&mut Evaluator<'_>, InstrId, &Instruction);

/// Coordinate-phase and value-phase entry points of one opcode.
#[derive(Clone, Copy)]
pub struct PhaseFns {
    pub coord: PhaseFn,
    pub value: PhaseFn,
}

impl std::fmt::Debug for PhaseFns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseFns")
            .field("coord", &(self.coord as usize))
            .field("value", &(self.value as usize))
            .finish()
    }
}

/// Dispatch table indexed by [`Opcode::index`].
#[derive(Debug, Clone)]
pub struct FunctionTable {
    entries: Vec<PhaseFns>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl FunctionTable {
    pub fn standard() -> Self {
        Self { entries: Opcode::ALL.iter().map(|&op| phase_fns(op)).collect() }
    }

    #[inline(always)]
    pub fn get(&self, op: Opcode) -> PhaseFns {
        self.entries[op.index()]
    }

    /// Replace both phases of `op`.
    pub fn set(&mut self, op: Opcode, fns: PhaseFns) {
        self.entries[op.index()] = fns;
    }

    pub fn set_value(&mut self, op: Opcode, value: PhaseFn) {
        self.entries[op.index()].value = value;
    }

    pub fn set_coord(&mut self, op: Opcode, coord: PhaseFn) {
        self.entries[op.index()].coord = coord;
    }
}

/// Built-in phase pair for `op`.
pub fn phase_fns(op: Opcode) -> PhaseFns {
    use Opcode::*;
    let v = |value: PhaseFn| PhaseFns { coord: noop, value };
    match op {
        Constant | Seed => v(forward),
        CacheArray => v(cache_array),

        ValueBasis => v(value_basis),
        GradientBasis => v(gradient_basis),
        SimplexBasis => v(simplex_basis),
        CellularBasis => v(cellular_basis),

        X => v(axis_x),
        Y => v(axis_y),
        Z => v(axis_z),
        W => v(axis_w),
        U => v(axis_u),
        V => v(axis_v),
        Radial => v(radial),

        ScaleDomain => PhaseFns { coord: scale_domain, value: forward },
        ScaleX => PhaseFns { coord: scale_x, value: forward },
        ScaleY => PhaseFns { coord: scale_y, value: forward },
        ScaleZ => PhaseFns { coord: scale_z, value: forward },
        ScaleW => PhaseFns { coord: scale_w, value: forward },
        ScaleU => PhaseFns { coord: scale_u, value: forward },
        ScaleV => PhaseFns { coord: scale_v, value: forward },
        TranslateDomain => PhaseFns { coord: translate_domain, value: forward },
        TranslateX => PhaseFns { coord: translate_x, value: forward },
        TranslateY => PhaseFns { coord: translate_y, value: forward },
        TranslateZ => PhaseFns { coord: translate_z, value: forward },
        TranslateW => PhaseFns { coord: translate_w, value: forward },
        TranslateU => PhaseFns { coord: translate_u, value: forward },
        TranslateV => PhaseFns { coord: translate_v, value: forward },
        RotateDomain => PhaseFns { coord: rotate_domain, value: forward },
        DX => PhaseFns { coord: offset_x, value: derivative },
        DY => PhaseFns { coord: offset_y, value: derivative },
        DZ => PhaseFns { coord: offset_z, value: derivative },
        DW => PhaseFns { coord: offset_w, value: derivative },
        DU => PhaseFns { coord: offset_u, value: derivative },
        DV => PhaseFns { coord: offset_v, value: derivative },

        Abs => v(abs),
        Sin => v(sin),
        Cos => v(cos),
        Tan => v(tan),
        ASin => v(asin),
        ACos => v(acos),
        ATan => v(atan),

        Add => v(add),
        Subtract => v(subtract),
        Multiply => v(multiply),
        Divide => v(divide),
        Pow => v(pow),
        Min => v(min),
        Max => v(max),
        Bias => v(bias),
        Gain => v(gain),

        Sigmoid => v(sigmoid),
        Randomize => v(randomize),
        CurveSection => v(curve_section),
        HexTile => v(hex_tile),
        HexBump => v(hex_bump),
        Clamp => v(clamp),
        Blend => v(blend),
        Select => v(select),
        SmoothStep => v(smooth_step),
        SmootherStep => v(smoother_step),
        LinearStep => v(linear_step),
        Step => v(step),
        Tiers => v(tiers),
        SmoothTiers => v(smooth_tiers),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

pub fn noop(_: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {}

#[inline]
fn per_layer(ev: &mut Evaluator<'_>, f: impl Fn(&Evaluator<'_>, usize) -> f64) {
    let n = ev.layers();
    let out: Layers = {
        let ev: &Evaluator<'_> = ev;
        (0..n).map(|l| f(ev, l)).collect()
    };
    ev.write_values(out);
}

#[inline]
fn unary(ev: &mut Evaluator<'_>, f: fn(f64) -> f64) {
    per_layer(ev, |ev, l| f(ev.param(0, l)));
}

#[inline]
fn binary(ev: &mut Evaluator<'_>, f: fn(f64, f64) -> f64) {
    per_layer(ev, |ev, l| f(ev.param(0, l), ev.param(1, l)));
}

#[inline]
fn map_coords(ev: &mut Evaluator<'_>, f: impl Fn(&Evaluator<'_>, Coordinate, usize) -> Coordinate) {
    let out: SmallVec<[Coordinate; 2]> = {
        let ev: &Evaluator<'_> = ev;
        ev.input_coords().into_iter().enumerate().map(|(l, c)| f(ev, c, l)).collect()
    };
    ev.write_coords(out);
}

/// Value of parameter 0, for instructions that own their slot without
/// computing anything (literal constants and seeds).
fn forward(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| ev.param(0, l));
}

// ── Cache boundary ─────────────────────────────────────────────────

/// Memoized per linear sample index. Always a single layer, so cached and
/// computed results have the same shape.
fn cache_array(ev: &mut Evaluator<'_>, id: InstrId, _: &Instruction) {
    let value = match ev.cached_value(id) {
        Some(v) => v,
        None => {
            let v = ev.param(0, 0);
            ev.store_cached(id, v);
            v
        }
    };
    ev.write_values(SmallVec::from_slice(&[value]));
}

// ── Basis ──────────────────────────────────────────────────────────

fn value_basis(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let interp = Interp::from_param(ev.param_i64(0, l));
        noise::value_noise(&ev.coord(l), ev.param_seed(1, l), interp)
    });
}

fn gradient_basis(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let interp = Interp::from_param(ev.param_i64(0, l));
        noise::gradient_noise(&ev.coord(l), ev.param_seed(1, l), interp)
    });
}

fn simplex_basis(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    let literal = ev.param_is_literal(0);
    let coords = ev.input_coords();
    let out: Layers = coords
        .iter()
        .enumerate()
        .map(|(l, c)| {
            let seed = ev.param_seed(0, l);
            if literal {
                noise::simplex_noise(ev.perm_table(seed), c, seed)
            } else {
                noise::simplex_noise(&noise::build_perm_table(seed as i32), c, seed)
            }
        })
        .collect();
    ev.write_values(out);
}

fn cellular_basis(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let distance = Distance::from_param(ev.param_i64(0, l));
        let sample = noise::cellular(&ev.coord(l), ev.param_seed(9, l), distance);
        (0..4)
            .map(|j| ev.param(1 + j, l) * sample.f[j] + ev.param(5 + j, l) * sample.d[j])
            .sum()
    });
}

fn component(ev: &mut Evaluator<'_>, axis: Axis) {
    per_layer(ev, |ev, l| ev.coord(l).get(axis));
}

fn axis_x(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    component(ev, Axis::X);
}

fn axis_y(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    component(ev, Axis::Y);
}

fn axis_z(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    component(ev, Axis::Z);
}

fn axis_w(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    component(ev, Axis::W);
}

fn axis_u(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    component(ev, Axis::U);
}

fn axis_v(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    component(ev, Axis::V);
}

fn radial(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| ev.coord(l).length());
}

// ── Domain transforms ──────────────────────────────────────────────

/// Multiply one axis (or every active axis for `None`) by parameter 1.
fn scale(ev: &mut Evaluator<'_>, axis: Option<Axis>) {
    map_coords(ev, |ev, mut c, l| {
        let f = ev.param(1, l);
        match axis {
            Some(a) => c.set(a, c.get(a) * f),
            None => c = c.scaled(f),
        }
        c
    });
}

/// Add parameter 1 to one axis (or every active axis for `None`).
fn translate(ev: &mut Evaluator<'_>, axis: Option<Axis>) {
    map_coords(ev, |ev, mut c, l| {
        let t = ev.param(1, l);
        match axis {
            Some(a) => c.set(a, c.get(a) + t),
            None => c = c.translated(t),
        }
        c
    });
}

fn scale_domain(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    scale(ev, None);
}

fn scale_x(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    scale(ev, Some(Axis::X));
}

fn scale_y(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    scale(ev, Some(Axis::Y));
}

fn scale_z(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    scale(ev, Some(Axis::Z));
}

fn scale_w(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    scale(ev, Some(Axis::W));
}

fn scale_u(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    scale(ev, Some(Axis::U));
}

fn scale_v(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    scale(ev, Some(Axis::V));
}

fn translate_domain(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    translate(ev, None);
}

fn translate_x(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    translate(ev, Some(Axis::X));
}

fn translate_y(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    translate(ev, Some(Axis::Y));
}

fn translate_z(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    translate(ev, Some(Axis::Z));
}

fn translate_w(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    translate(ev, Some(Axis::W));
}

fn translate_u(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    translate(ev, Some(Axis::U));
}

fn translate_v(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    translate(ev, Some(Axis::V));
}

/// Rotate x/y (2D) or x/y/z (3D and up) by the axis-angle in params 1..5.
fn rotate_domain(ev: &mut Evaluator<'_>, id: InstrId, _: &Instruction) {
    let coords = ev.input_coords();
    let mut out: SmallVec<[Coordinate; 2]> = SmallVec::with_capacity(coords.len());
    for (l, mut c) in coords.into_iter().enumerate() {
        let m = ev.rotation(id, l);
        let (x, y, z) = (c.x, c.y, c.z);
        if c.active() <= 2 {
            c.x = m[0] * x + m[3] * y;
            c.y = m[1] * x + m[4] * y;
        } else {
            c.x = m[0] * x + m[3] * y + m[6] * z;
            c.y = m[1] * x + m[4] * y + m[7] * z;
            c.z = m[2] * x + m[5] * y + m[8] * z;
        }
        out.push(c);
    }
    ev.write_coords(out);
}

/// Axis-angle rotation matrix, column-major. A zero-length axis rotates
/// about z.
pub fn rotation_matrix(angle: f64, ax: f64, ay: f64, az: f64) -> [f64; 9] {
    let len = (ax * ax + ay * ay + az * az).sqrt();
    let (ax, ay, az) = if len > 0.0 { (ax / len, ay / len, az / len) } else { (0.0, 0.0, 1.0) };
    let (s, c) = angle.sin_cos();
    let k = 1.0 - c;
    [
        1.0 + k * (ax * ax - 1.0),
        az * s + k * ax * ay,
        -ay * s + k * ax * az,
        -az * s + k * ax * ay,
        1.0 + k * (ay * ay - 1.0),
        ax * s + k * ay * az,
        ay * s + k * ax * az,
        -ax * s + k * ay * az,
        1.0 + k * (az * az - 1.0),
    ]
}

// ── Derivatives ────────────────────────────────────────────────────

/// Duplicate every layer with `axis` shifted by parameter 1. The source is
/// then valued at `[c0..cn, c0+d..cn+d]`.
fn offset(ev: &mut Evaluator<'_>, axis: Axis) {
    let coords = ev.input_coords();
    let mut out: SmallVec<[Coordinate; 2]> = coords.clone();
    for (l, mut c) in coords.into_iter().enumerate() {
        c.set(axis, c.get(axis) + ev.param(1, l));
        out.push(c);
    }
    ev.write_coords(out);
}

/// Forward difference between the shifted and unshifted halves.
fn derivative(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    let n = ev.layers();
    per_layer(ev, |ev, l| {
        let d = ev.param(1, l);
        if d == 0.0 {
            return 0.0;
        }
        (ev.param(0, l + n) - ev.param(0, l)) / d
    });
}

fn offset_x(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    offset(ev, Axis::X);
}

fn offset_y(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    offset(ev, Axis::Y);
}

fn offset_z(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    offset(ev, Axis::Z);
}

fn offset_w(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    offset(ev, Axis::W);
}

fn offset_u(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    offset(ev, Axis::U);
}

fn offset_v(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    offset(ev, Axis::V);
}

// ── Arithmetic ─────────────────────────────────────────────────────

fn abs(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    unary(ev, f64::abs);
}

fn sin(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    unary(ev, f64::sin);
}

fn cos(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    unary(ev, f64::cos);
}

fn tan(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    unary(ev, f64::tan);
}

fn asin(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    unary(ev, f64::asin);
}

fn acos(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    unary(ev, f64::acos);
}

fn atan(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    unary(ev, f64::atan);
}

fn add(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    binary(ev, |a, b| a + b);
}

fn subtract(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    binary(ev, |a, b| a - b);
}

fn multiply(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    binary(ev, |a, b| a * b);
}

fn divide(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    binary(ev, |a, b| a / b);
}

fn pow(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    binary(ev, f64::powf);
}

fn min(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    binary(ev, f64::min);
}

fn max(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    binary(ev, f64::max);
}

fn bias(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    binary(ev, |b, t| noise::bias(b.clamp(0.0, 1.0), t.clamp(0.0, 1.0)));
}

fn gain(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    binary(ev, |g, t| noise::gain(g.clamp(0.0, 1.0), t.clamp(0.0, 1.0)));
}

// ── Shaping and selection ──────────────────────────────────────────

fn sigmoid(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let (s, center, ramp) = (ev.param(0, l), ev.param(1, l), ev.param(2, l));
        1.0 / (1.0 + (-ramp * (s - center)).exp())
    });
}

fn randomize(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let mut rng = Mulberry32::new(ev.param_seed(0, l) as i32);
        let (low, high) = (ev.param(1, l), ev.param(2, l));
        low + rng.next_f64() * (high - low)
    });
}

/// Constant `param 0` below `t0`, then a quintic ramp from `v0` to `v1`
/// over `[t0, t1]`, driven by the control in param 5.
fn curve_section(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let control = ev.param(5, l);
        let t0 = ev.param(1, l);
        if control < t0 {
            return ev.param(0, l);
        }
        let span = ev.param(2, l) - t0;
        let t = if span == 0.0 { 1.0 } else { noise::quintic((control - t0) / span).clamp(0.0, 1.0) };
        noise::lerp(t, ev.param(3, l), ev.param(4, l))
    });
}

fn hex_tile(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let c = ev.coord(l);
        let (q, r) = noise::hex_tile(c.x, c.y);
        (noise::hash_cell(&[q, r], ev.param_seed(0, l)) & 255) as f64 / 255.0
    });
}

fn hex_bump(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let c = ev.coord(l);
        noise::hex_bump(c.x, c.y)
    });
}

fn clamp(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| ev.param(0, l).max(ev.param(1, l).min(ev.param(2, l))));
}

fn blend(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| noise::lerp(ev.param(2, l), ev.param(0, l), ev.param(1, l)));
}

fn select(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let control = ev.param(2, l);
        let threshold = ev.param(3, l);
        let falloff = ev.param(4, l);
        if falloff > 0.0 {
            if control < threshold - falloff {
                ev.param(0, l)
            } else if control > threshold + falloff {
                ev.param(1, l)
            } else {
                let t = noise::quintic((control - threshold + falloff) / (2.0 * falloff));
                noise::lerp(t, ev.param(0, l), ev.param(1, l))
            }
        } else if control < threshold {
            ev.param(0, l)
        } else {
            ev.param(1, l)
        }
    });
}

/// Normalized position of `control` between `low` and `high`, clamped.
fn step_t(ev: &Evaluator<'_>, l: usize) -> f64 {
    let (low, high, control) = (ev.param(0, l), ev.param(1, l), ev.param(2, l));
    if high == low {
        return if control < low { 0.0 } else { 1.0 };
    }
    ((control - low) / (high - low)).clamp(0.0, 1.0)
}

fn smooth_step(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| noise::hermite(step_t(ev, l)));
}

fn smoother_step(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| noise::quintic(step_t(ev, l)));
}

fn linear_step(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, step_t);
}

fn step(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| if ev.param(1, l) < ev.param(0, l) { 0.0 } else { 1.0 });
}

fn tiers(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let steps = ev.param_i64(1, l).max(1) as f64;
        (ev.param(0, l) * steps).floor() / steps
    });
}

fn smooth_tiers(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
    per_layer(ev, |ev, l| {
        let steps = (ev.param_i64(1, l) - 1).max(1) as f64;
        let v = ev.param(0, l) * steps;
        let low = v.floor();
        let t = noise::quintic(v - low);
        (low + t) / steps
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_opcode() {
        assert_eq!(FunctionTable::standard().entries.len(), Opcode::ALL.len());
    }

    fn seven(ev: &mut Evaluator<'_>, _: InstrId, _: &Instruction) {
        ev.write_values(SmallVec::from_slice(&[7.0]));
    }

    #[test]
    fn override_replaces_value_phase() {
        use crate::eval::instruction::InstructionParam as P;
        use crate::eval::list::InstructionList;

        let mut list = InstructionList::new();
        let c = list.push(Opcode::Constant, [P::float(1.0)]);
        let tree = list.get_tree(c).unwrap();
        let mut table = FunctionTable::standard();
        table.set_value(Opcode::Constant, seven);
        let mut ev = Evaluator::with_functions(&list, tree, table);
        assert_eq!(ev.evaluate(Coordinate::new2(0.0, 0.0)), 7.0);
    }

    #[test]
    fn rotation_about_z_by_quarter_turn() {
        let m = rotation_matrix(std::f64::consts::FRAC_PI_2, 0.0, 0.0, 1.0);
        // (1, 0) -> (0, 1)
        let x = m[0] * 1.0 + m[3] * 0.0;
        let y = m[1] * 1.0 + m[4] * 0.0;
        assert!(x.abs() < 1e-12);
        assert!((y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_axis_falls_back_to_z() {
        let a = rotation_matrix(0.7, 0.0, 0.0, 0.0);
        let b = rotation_matrix(0.7, 0.0, 0.0, 5.0);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
    }
}
