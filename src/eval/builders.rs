// eval/builders.rs — multi-instruction fractal macros
//
// Each macro appends one layer per octave and sums them. A layer is
// basis → amplitude → frequency → random rotation; the rotation angle and
// axis come from a Mulberry32 stream seeded with the fractal seed, so the
// same parameters always build the same graph.
//
// Octave k (0-based) runs at `frequency * 2^k`, amplitude `1 / 2^k` and
// basis seed `seed + 10 + k * 1000`.

use crate::eval::instruction::{InstrId, InstructionParam as P};
use crate::eval::list::InstructionList;
use crate::eval::noise::Mulberry32;
use crate::eval::opcode::Opcode;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Basis {
    Value,
    Gradient,
    Simplex,
}

impl Basis {
    pub fn from_name(name: &str) -> Option<Basis> {
        match name.to_ascii_lowercase().as_str() {
            "value" => Some(Basis::Value),
            "gradient" => Some(Basis::Gradient),
            "simplex" => Some(Basis::Simplex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fractal {
    pub basis: Basis,
    /// Interpolation code for value and gradient bases.
    pub interp: i64,
    pub octaves: u32,
    pub frequency: f64,
    pub seed: u32,
}

impl Default for Fractal {
    fn default() -> Self {
        Self { basis: Basis::Gradient, interp: 3, octaves: 6, frequency: 1.0, seed: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Fbm,
    Ridged,
    Billow,
}

/// Sum of plain basis layers. `None` when `octaves` is zero.
pub fn simple_fbm(list: &mut InstructionList, f: &Fractal) -> Option<InstrId> {
    build(list, f, Shape::Fbm)
}

/// Sum of `1 - |basis|` layers.
pub fn simple_ridged(list: &mut InstructionList, f: &Fractal) -> Option<InstrId> {
    build(list, f, Shape::Ridged)
}

/// Sum of `2|basis| - 1` layers.
pub fn simple_billow(list: &mut InstructionList, f: &Fractal) -> Option<InstrId> {
    build(list, f, Shape::Billow)
}

fn build(list: &mut InstructionList, f: &Fractal, shape: Shape) -> Option<InstrId> {
    if f.octaves == 0 {
        return None;
    }
    let mut rng = Mulberry32::new(f.seed as i32);
    let mut sum: Option<InstrId> = None;
    for k in 0..f.octaves {
        let fo = 2f64.powi(k as i32);
        let seed = f.seed.wrapping_add(10).wrapping_add(k.wrapping_mul(1000));
        let rotation = [rng.next_f64() * PI, rng.next_f64(), rng.next_f64(), rng.next_f64()];
        let layer = layer(list, f, shape, 1.0 / fo, fo * f.frequency, seed, rotation);
        sum = Some(match sum {
            None => layer,
            Some(acc) => list.push(Opcode::Add, [P::source(acc), P::source(layer)]),
        });
    }
    tracing::debug!(?shape, octaves = f.octaves, seed = f.seed, instructions = list.len(), "built fractal");
    sum
}

fn layer(
    list: &mut InstructionList,
    f: &Fractal,
    shape: Shape,
    amplitude: f64,
    frequency: f64,
    seed: u32,
    rotation: [f64; 4],
) -> InstrId {
    let basis = match f.basis {
        Basis::Value => list.push(Opcode::ValueBasis, [P::int(f.interp), P::uint(seed as u64)]),
        Basis::Gradient => list.push(Opcode::GradientBasis, [P::int(f.interp), P::uint(seed as u64)]),
        Basis::Simplex => list.push(Opcode::SimplexBasis, [P::uint(seed as u64)]),
    };
    let shaped = match shape {
        Shape::Fbm => basis,
        Shape::Ridged => {
            let abs = list.push(Opcode::Abs, [P::source(basis)]);
            list.push(Opcode::Subtract, [P::float(1.0), P::source(abs)])
        }
        Shape::Billow => {
            let abs = list.push(Opcode::Abs, [P::source(basis)]);
            let twice = list.push(Opcode::Multiply, [P::source(abs), P::float(2.0)]);
            list.push(Opcode::Subtract, [P::source(twice), P::float(1.0)])
        }
    };
    let scaled = list.push(Opcode::Multiply, [P::source(shaped), P::float(amplitude)]);
    let freq = list.push(Opcode::ScaleDomain, [P::source(scaled), P::float(frequency)]);
    let [angle, ax, ay, az] = rotation;
    list.push(
        Opcode::RotateDomain,
        [P::source(freq), P::float(angle), P::float(ax), P::float(ay), P::float(az)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds(list: &InstructionList) -> Vec<i64> {
        list.iter()
            .filter(|i| i.opcode == Opcode::GradientBasis)
            .map(|i| i.params[1].as_i64())
            .collect()
    }

    #[test]
    fn fbm_layer_count() {
        let mut list = InstructionList::new();
        let root = simple_fbm(&mut list, &Fractal { octaves: 3, ..Default::default() }).unwrap();
        // 4 instructions per layer plus one Add per extra octave
        assert_eq!(list.len(), 3 * 4 + 2);
        assert_eq!(list[root].opcode, Opcode::Add);
    }

    #[test]
    fn octaves_use_distinct_seeds_and_frequencies() {
        let mut list = InstructionList::new();
        simple_fbm(&mut list, &Fractal { octaves: 3, frequency: 2.0, seed: 5, ..Default::default() });
        assert_eq!(seeds(&list), vec![15, 1015, 2015]);
        let freqs: Vec<f64> = list
            .iter()
            .filter(|i| i.opcode == Opcode::ScaleDomain)
            .map(|i| i.params[1].as_f64())
            .collect();
        assert_eq!(freqs, vec![2.0, 4.0, 8.0]);
    }

    #[test]
    fn ridged_and_billow_shapes() {
        let mut list = InstructionList::new();
        let r = simple_ridged(&mut list, &Fractal { octaves: 1, ..Default::default() }).unwrap();
        assert_eq!(list[r].opcode, Opcode::RotateDomain);
        assert_eq!(list.len(), 6);

        let mut list = InstructionList::new();
        simple_billow(&mut list, &Fractal { octaves: 2, basis: Basis::Simplex, ..Default::default() });
        assert_eq!(list.len(), 2 * 7 + 1);
    }

    #[test]
    fn zero_octaves_builds_nothing() {
        let mut list = InstructionList::new();
        assert_eq!(simple_fbm(&mut list, &Fractal { octaves: 0, ..Default::default() }), None);
        assert!(list.is_empty());
    }

    #[test]
    fn same_parameters_same_graph() {
        let f = Fractal { octaves: 4, seed: 77, ..Default::default() };
        let mut a = InstructionList::new();
        let mut b = InstructionList::new();
        simple_billow(&mut a, &f);
        simple_billow(&mut b, &f);
        assert!(a.iter().zip(b.iter()).all(|(x, y)| x == y));
    }
}
