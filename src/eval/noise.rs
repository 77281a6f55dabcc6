// eval/noise.rs — numeric kernels behind the basis opcodes
//
// Lattice noise (value, gradient), simplex noise, cellular noise and the
// hexagonal tiling helpers. Every kernel is a pure function of its inputs:
// no global tables, so any number of evaluators can call them concurrently.
// Lattice hashing goes through `hash_cell`; per-cell random streams come
// from Mulberry32 seeded with that hash.

use crate::eval::coordinate::Coordinate;
use serde_json::Value;

// ── Seeds ───────────────────────────────────────────────────────────

/// Java's `String.hashCode()`, used to turn textual seeds into integers.
pub fn java_string_hash_code(s: &str) -> i32 {
    let mut hash: i32 = 0;
    for ch in s.chars() {
        hash = hash.wrapping_mul(31).wrapping_add(ch as u32 as i32);
    }
    hash
}

/// Seed given in a graph description: a number, or a string hashed with
/// [`java_string_hash_code`]. Anything else seeds with 0.
pub fn seed_to_int(seed: &Value) -> i32 {
    match seed {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0) as i32,
        Value::String(s) => java_string_hash_code(s),
        _ => 0,
    }
}

// ── Mulberry32 PRNG ─────────────────────────────────────────────────

pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    pub fn new(seed: i32) -> Self {
        Self { state: seed as u32 }
    }

    /// Next value in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6d2b79f5);
        let mut t: u32 = (self.state ^ (self.state >> 15)).wrapping_mul(1 | self.state);
        t = t.wrapping_add((t ^ (t >> 7)).wrapping_mul(61 | t)) ^ t;
        ((t ^ (t >> 14)) as f64) / 4294967296.0
    }

    /// Next value in [-1, 1).
    #[inline]
    pub fn next_signed(&mut self) -> f64 {
        self.next_f64() * 2.0 - 1.0
    }
}

// ── Lattice hashing ─────────────────────────────────────────────────

const HASH_PRIMES: [u32; 6] = [374761393, 668265263, 1103515245, 2246822519, 3266489917, 2654435761];

/// Hash an integer lattice cell together with a seed.
#[inline]
pub fn hash_cell(cell: &[i64], seed: u32) -> u32 {
    let mut h = seed.wrapping_mul(0x9e3779b9) ^ 0x85ebca6b;
    for (i, &c) in cell.iter().enumerate() {
        h = h.wrapping_add((c as u32).wrapping_mul(HASH_PRIMES[i % HASH_PRIMES.len()]));
        h = (h ^ (h >> 13)).wrapping_mul(0xc2b2ae35);
    }
    h ^ (h >> 16)
}

/// Uniform value in [-1, 1] for a lattice cell.
#[inline]
fn cell_value(cell: &[i64], seed: u32) -> f64 {
    hash_cell(cell, seed) as f64 / u32::MAX as f64 * 2.0 - 1.0
}

// ── Interpolation ───────────────────────────────────────────────────

/// Fade curve applied to the fractional lattice offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interp {
    None,
    Linear,
    Hermite,
    Quintic,
}

impl Interp {
    /// Interpolation selected by an integer parameter. Out-of-range values
    /// select quintic.
    pub fn from_param(v: i64) -> Self {
        match v {
            0 => Interp::None,
            1 => Interp::Linear,
            2 => Interp::Hermite,
            _ => Interp::Quintic,
        }
    }

    #[inline]
    pub fn apply(self, t: f64) -> f64 {
        match self {
            Interp::None => 0.0,
            Interp::Linear => t,
            Interp::Hermite => hermite(t),
            Interp::Quintic => quintic(t),
        }
    }
}

#[inline]
pub fn hermite(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

#[inline]
pub fn quintic(t: f64) -> f64 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
pub fn lerp(t: f64, a: f64, b: f64) -> f64 {
    a + t * (b - a)
}

/// Power curve pulling `t` towards 0 (`b < 0.5`) or 1 (`b > 0.5`).
pub fn bias(b: f64, t: f64) -> f64 {
    t.powf(b.ln() / 0.5f64.ln())
}

/// S-curve built from two mirrored [`bias`] halves.
pub fn gain(g: f64, t: f64) -> f64 {
    if t < 0.5 {
        bias(1.0 - g, 2.0 * t) / 2.0
    } else {
        1.0 - bias(1.0 - g, 2.0 - 2.0 * t) / 2.0
    }
}

// ── Lattice noise (N-D) ─────────────────────────────────────────────

/// Blend the 2^n corners of the lattice cell around `coord`.
fn lattice<F>(coord: &Coordinate, interp: Interp, corner: F) -> f64
where
    F: Fn(&[i64], &[f64]) -> f64,
{
    let n = coord.active();
    let p = coord.to_array();
    let mut base = [0i64; 6];
    let mut frac = [0f64; 6];
    let mut fade = [0f64; 6];
    for i in 0..n {
        let f = p[i].floor();
        base[i] = f as i64;
        frac[i] = p[i] - f;
        fade[i] = interp.apply(frac[i]);
    }

    let mut total = 0.0;
    let mut cell = [0i64; 6];
    let mut offset = [0f64; 6];
    for mask in 0..(1usize << n) {
        let mut weight = 1.0;
        for i in 0..n {
            let upper = mask >> i & 1 == 1;
            cell[i] = base[i] + upper as i64;
            offset[i] = frac[i] - upper as u8 as f64;
            weight *= if upper { fade[i] } else { 1.0 - fade[i] };
        }
        if weight != 0.0 {
            total += weight * corner(&cell[..n], &offset[..n]);
        }
    }
    total
}

/// Value noise in [-1, 1] over the active components of `coord`.
pub fn value_noise(coord: &Coordinate, seed: u32, interp: Interp) -> f64 {
    lattice(coord, interp, |cell, _| cell_value(cell, seed))
}

/// Gradient noise, roughly in [-1, 1], over the active components of
/// `coord`.
pub fn gradient_noise(coord: &Coordinate, seed: u32, interp: Interp) -> f64 {
    let n = coord.active();
    let scale = 2.0 / (n as f64).sqrt();
    lattice(coord, interp, |cell, offset| {
        let mut rng = Mulberry32::new(hash_cell(cell, seed) as i32);
        let mut grad = [0f64; 6];
        let mut len = 0.0;
        for g in grad.iter_mut().take(n) {
            *g = rng.next_signed();
            len += *g * *g;
        }
        let len = len.sqrt().max(1e-9);
        offset
            .iter()
            .zip(&grad)
            .map(|(o, g)| o * g / len)
            .sum::<f64>()
            * scale
    })
}

// ── Permutation table ───────────────────────────────────────────────

/// 512-entry permutation table: a Fisher-Yates shuffle of 0..=255 driven
/// by Mulberry32, repeated twice to avoid wrapping.
pub fn build_perm_table(seed: i32) -> [u8; 512] {
    let mut rng = Mulberry32::new(seed);
    let mut perm = [0u8; 512];
    for i in 0..256u16 {
        perm[i as usize] = i as u8;
    }
    for i in (1..=255usize).rev() {
        let j = (rng.next_f64() * (i as f64 + 1.0)).floor() as usize;
        perm.swap(i, j);
    }
    for i in 0..256 {
        perm[i + 256] = perm[i];
    }
    perm
}

// ── Simplex noise ───────────────────────────────────────────────────

const GRAD2: [[f64; 2]; 8] = [
    [1.0, 0.0],
    [-1.0, 0.0],
    [0.0, 1.0],
    [0.0, -1.0],
    [1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [-1.0, -1.0],
];

const GRAD3: [[f64; 3]; 12] = [
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
    [1.0, -1.0, 0.0],
    [-1.0, -1.0, 0.0],
    [1.0, 0.0, 1.0],
    [-1.0, 0.0, 1.0],
    [1.0, 0.0, -1.0],
    [-1.0, 0.0, -1.0],
    [0.0, 1.0, 1.0],
    [0.0, -1.0, 1.0],
    [0.0, 1.0, -1.0],
    [0.0, -1.0, -1.0],
];

const F2: f64 = 0.36602540378443864676;
const G2: f64 = 0.21132486540518711775;
const F3: f64 = 1.0 / 3.0;
const G3: f64 = 1.0 / 6.0;

/// 2D simplex noise, approximately in [-1, 1].
pub fn simplex_2d(perm: &[u8; 512], x: f64, y: f64) -> f64 {
    let s = (x + y) * F2;
    let i = (x + s).floor() as i64;
    let j = (y + s).floor() as i64;

    let t = (i + j) as f64 * G2;
    let x0 = x - (i as f64 - t);
    let y0 = y - (j as f64 - t);

    let (i1, j1) = if x0 > y0 { (1usize, 0usize) } else { (0, 1) };

    let x1 = x0 - i1 as f64 + G2;
    let y1 = y0 - j1 as f64 + G2;
    let x2 = x0 - 1.0 + 2.0 * G2;
    let y2 = y0 - 1.0 + 2.0 * G2;

    let ii = (i & 255) as usize;
    let jj = (j & 255) as usize;
    let gi0 = (perm[ii + perm[jj] as usize] % 8) as usize;
    let gi1 = (perm[ii + i1 + perm[jj + j1] as usize] % 8) as usize;
    let gi2 = (perm[ii + 1 + perm[jj + 1] as usize] % 8) as usize;

    let corner = |g: usize, cx: f64, cy: f64| {
        let t = 0.5 - cx * cx - cy * cy;
        if t < 0.0 {
            0.0
        } else {
            let t2 = t * t;
            t2 * t2 * (GRAD2[g][0] * cx + GRAD2[g][1] * cy)
        }
    };

    70.0 * (corner(gi0, x0, y0) + corner(gi1, x1, y1) + corner(gi2, x2, y2))
}

/// 3D simplex noise, approximately in [-1, 1].
pub fn simplex_3d(perm: &[u8; 512], x: f64, y: f64, z: f64) -> f64 {
    let s = (x + y + z) * F3;
    let i = (x + s).floor() as i64;
    let j = (y + s).floor() as i64;
    let k = (z + s).floor() as i64;

    let t = (i + j + k) as f64 * G3;
    let x0 = x - (i as f64 - t);
    let y0 = y - (j as f64 - t);
    let z0 = z - (k as f64 - t);

    let (i1, j1, k1, i2, j2, k2) = if x0 >= y0 {
        if y0 >= z0 {
            (1, 0, 0, 1, 1, 0)
        } else if x0 >= z0 {
            (1, 0, 0, 1, 0, 1)
        } else {
            (0, 0, 1, 1, 0, 1)
        }
    } else if y0 < z0 {
        (0, 0, 1, 0, 1, 1)
    } else if x0 < z0 {
        (0, 1, 0, 0, 1, 1)
    } else {
        (0, 1, 0, 1, 1, 0)
    };

    let x1 = x0 - i1 as f64 + G3;
    let y1 = y0 - j1 as f64 + G3;
    let z1 = z0 - k1 as f64 + G3;
    let x2 = x0 - i2 as f64 + 2.0 * G3;
    let y2 = y0 - j2 as f64 + 2.0 * G3;
    let z2 = z0 - k2 as f64 + 2.0 * G3;
    let x3 = x0 - 1.0 + 3.0 * G3;
    let y3 = y0 - 1.0 + 3.0 * G3;
    let z3 = z0 - 1.0 + 3.0 * G3;

    let ii = (i & 255) as usize;
    let jj = (j & 255) as usize;
    let kk = (k & 255) as usize;
    let gi0 = (perm[ii + perm[jj + perm[kk] as usize] as usize] % 12) as usize;
    let gi1 = (perm[ii + i1 + perm[jj + j1 + perm[kk + k1] as usize] as usize] % 12) as usize;
    let gi2 = (perm[ii + i2 + perm[jj + j2 + perm[kk + k2] as usize] as usize] % 12) as usize;
    let gi3 = (perm[ii + 1 + perm[jj + 1 + perm[kk + 1] as usize] as usize] % 12) as usize;

    let corner = |g: usize, cx: f64, cy: f64, cz: f64| {
        let t = 0.6 - cx * cx - cy * cy - cz * cz;
        if t < 0.0 {
            0.0
        } else {
            let t2 = t * t;
            t2 * t2 * (GRAD3[g][0] * cx + GRAD3[g][1] * cy + GRAD3[g][2] * cz)
        }
    };

    32.0 * (corner(gi0, x0, y0, z0)
        + corner(gi1, x1, y1, z1)
        + corner(gi2, x2, y2, z2)
        + corner(gi3, x3, y3, z3))
}

/// Simplex noise at `coord`. 4D and 6D fall back to quintic gradient noise.
pub fn simplex_noise(perm: &[u8; 512], coord: &Coordinate, seed: u32) -> f64 {
    match coord.active() {
        2 => simplex_2d(perm, coord.x, coord.y),
        3 => simplex_3d(perm, coord.x, coord.y, coord.z),
        _ => gradient_noise(coord, seed, Interp::Quintic),
    }
}

// ── Cellular noise ──────────────────────────────────────────────────

/// Metric used to measure distance to feature points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Euclidean,
    Manhattan,
    LeastAxis,
    GreatestAxis,
}

impl Distance {
    pub fn from_param(v: i64) -> Self {
        match v {
            1 => Distance::Manhattan,
            2 => Distance::LeastAxis,
            3 => Distance::GreatestAxis,
            _ => Distance::Euclidean,
        }
    }

    fn measure(self, delta: &[f64]) -> f64 {
        match self {
            Distance::Euclidean => delta.iter().map(|d| d * d).sum::<f64>().sqrt(),
            Distance::Manhattan => delta.iter().map(|d| d.abs()).sum(),
            Distance::LeastAxis => delta.iter().map(|d| d.abs()).fold(f64::INFINITY, f64::min),
            Distance::GreatestAxis => delta.iter().map(|d| d.abs()).fold(0.0, f64::max),
        }
    }
}

/// Four nearest feature distances and the random value of each of those
/// feature cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellularSample {
    pub f: [f64; 4],
    pub d: [f64; 4],
}

/// Cellular noise with one jittered feature point per lattice cell,
/// searching the 3^n neighbourhood of the cell containing `coord`.
pub fn cellular(coord: &Coordinate, seed: u32, distance: Distance) -> CellularSample {
    let n = coord.active();
    let p = coord.to_array();
    let mut base = [0i64; 6];
    for i in 0..n {
        base[i] = p[i].floor() as i64;
    }

    let mut out = CellularSample { f: [f64::INFINITY; 4], d: [0.0; 4] };
    let mut cell = [0i64; 6];
    let mut delta = [0f64; 6];
    let neighbours = 3usize.pow(n as u32);
    for idx in 0..neighbours {
        let mut rest = idx;
        for i in 0..n {
            cell[i] = base[i] + (rest % 3) as i64 - 1;
            rest /= 3;
        }
        let h = hash_cell(&cell[..n], seed);
        let mut rng = Mulberry32::new(h as i32);
        for i in 0..n {
            delta[i] = cell[i] as f64 + rng.next_f64() - p[i];
        }
        let dist = distance.measure(&delta[..n]);
        let value = rng.next_signed();

        // Insert into the sorted top four.
        if let Some(slot) = out.f.iter().position(|&f| dist < f) {
            for j in (slot + 1..4).rev() {
                out.f[j] = out.f[j - 1];
                out.d[j] = out.d[j - 1];
            }
            out.f[slot] = dist;
            out.d[slot] = value;
        }
    }
    out
}

// ── Hexagonal tiling ────────────────────────────────────────────────

const SQRT3: f64 = 1.7320508075688772;

/// Axial coordinates of the unit hexagon (pointy top) containing (x, y).
pub fn hex_tile(x: f64, y: f64) -> (i64, i64) {
    let q = SQRT3 / 3.0 * x - y / 3.0;
    let r = 2.0 / 3.0 * y;
    let s = -q - r;

    let (mut rq, mut rr, rs) = (q.round(), r.round(), s.round());
    let (dq, dr, ds) = ((rq - q).abs(), (rr - r).abs(), (rs - s).abs());
    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }
    (rq as i64, rr as i64)
}

/// Cartesian centre of the hexagon with axial coordinates (q, r).
pub fn hex_center(q: i64, r: i64) -> (f64, f64) {
    (SQRT3 * (q as f64 + r as f64 / 2.0), 1.5 * r as f64)
}

/// 1 at the centre of a hexagon falling linearly to 0 at its edges.
pub fn hex_bump(x: f64, y: f64) -> f64 {
    let (q, r) = hex_tile(x, y);
    let (cx, cy) = hex_center(q, r);
    let (dx, dy) = (x - cx, y - cy);
    // Apothem of a unit hexagon is sqrt(3)/2; the hex norm is the largest
    // projection onto the three edge normals.
    let apothem = SQRT3 / 2.0;
    let n1 = dx.abs();
    let n2 = (0.5 * dx + SQRT3 / 2.0 * dy).abs();
    let n3 = (0.5 * dx - SQRT3 / 2.0 * dy).abs();
    (1.0 - n1.max(n2).max(n3) / apothem).clamp(0.0, 1.0)
}

// ── Tests ───────────────────────────────────────────────────────────
