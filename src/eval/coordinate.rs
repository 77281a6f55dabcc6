// eval/coordinate.rs — N-dimensional sample point
//
// A coordinate always carries six components but only the first
// `dimension` of them are active. Every arithmetic operation leaves the
// inactive tail untouched so a 2D sample never picks up stray z/w values.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, MulAssign};

/// Number of active components of a [`Coordinate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dimension {
    #[default]
    D2,
    D3,
    D4,
    D6,
}

impl Dimension {
    #[inline(always)]
    pub fn count(self) -> usize {
        match self {
            Dimension::D2 => 2,
            Dimension::D3 => 3,
            Dimension::D4 => 4,
            Dimension::D6 => 6,
        }
    }

    /// Map a component count to a dimension. Only 2, 3, 4 and 6 exist.
    pub fn from_count(n: usize) -> Option<Self> {
        match n {
            2 => Some(Dimension::D2),
            3 => Some(Dimension::D3),
            4 => Some(Dimension::D4),
            6 => Some(Dimension::D6),
            _ => None,
        }
    }
}

/// Component selector used by the per-axis scale/translate/derivative ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
    U = 4,
    V = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub w: f64,
    #[serde(default)]
    pub u: f64,
    #[serde(default)]
    pub v: f64,
    #[serde(default)]
    pub dimension: Dimension,
}

impl Coordinate {
    pub fn new2(x: f64, y: f64) -> Self {
        Self { x, y, ..Default::default() }
    }

    pub fn new3(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, dimension: Dimension::D3, ..Default::default() }
    }

    pub fn new4(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w, dimension: Dimension::D4, ..Default::default() }
    }

    pub fn new6(x: f64, y: f64, z: f64, w: f64, u: f64, v: f64) -> Self {
        Self { x, y, z, w, u, v, dimension: Dimension::D6 }
    }

    /// All active components set to `value`, inactive ones zero.
    pub fn splat(dimension: Dimension, value: f64) -> Self {
        let mut c = Self { dimension, ..Default::default() };
        for i in 0..dimension.count() {
            c.set_index(i, value);
        }
        c
    }

    #[inline(always)]
    pub fn active(&self) -> usize {
        self.dimension.count()
    }

    #[inline]
    pub fn get(&self, axis: Axis) -> f64 {
        self.index(axis as usize)
    }

    /// Set one component. Writing an axis beyond `dimension` is a no-op.
    #[inline]
    pub fn set(&mut self, axis: Axis, value: f64) {
        if (axis as usize) < self.active() {
            self.set_index(axis as usize, value);
        }
    }

    #[inline]
    pub fn index(&self, i: usize) -> f64 {
        match i {
            0 => self.x,
            1 => self.y,
            2 => self.z,
            3 => self.w,
            4 => self.u,
            _ => self.v,
        }
    }

    #[inline]
    fn set_index(&mut self, i: usize, value: f64) {
        match i {
            0 => self.x = value,
            1 => self.y = value,
            2 => self.z = value,
            3 => self.w = value,
            4 => self.u = value,
            _ => self.v = value,
        }
    }

    /// Active components copied into a fixed array (inactive entries zero).
    pub fn to_array(&self) -> [f64; 6] {
        let mut out = [0.0; 6];
        for (i, slot) in out.iter_mut().enumerate().take(self.active()) {
            *slot = self.index(i);
        }
        out
    }

    /// Multiply every active component by `factor`.
    pub fn scaled(mut self, factor: f64) -> Self {
        self *= Coordinate::splat(self.dimension, factor);
        self
    }

    /// Add `offset` to every active component.
    pub fn translated(mut self, offset: f64) -> Self {
        self += Coordinate::splat(self.dimension, offset);
        self
    }

    /// Euclidean length over the active components.
    pub fn length(&self) -> f64 {
        (0..self.active())
            .map(|i| self.index(i) * self.index(i))
            .sum::<f64>()
            .sqrt()
    }
}

impl AddAssign for Coordinate {
    fn add_assign(&mut self, rhs: Self) {
        for i in 0..self.active() {
            self.set_index(i, self.index(i) + rhs.index(i));
        }
    }
}

impl Add for Coordinate {
    type Output = Coordinate;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl MulAssign for Coordinate {
    fn mul_assign(&mut self, rhs: Self) {
        for i in 0..self.active() {
            self.set_index(i, self.index(i) * rhs.index(i));
        }
    }
}

impl Mul for Coordinate {
    type Output = Coordinate;

    fn mul(mut self, rhs: Self) -> Self {
        self *= rhs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_ignores_inactive_components() {
        let mut a = Coordinate::new2(1.0, 2.0);
        a.z = 7.0;
        let b = a.translated(1.0).scaled(3.0);
        assert_eq!(b.x, 6.0);
        assert_eq!(b.y, 9.0);
        assert_eq!(b.z, 7.0, "z is inactive in 2D and must not change");
    }

    #[test]
    fn splat_respects_dimension() {
        let c = Coordinate::splat(Dimension::D3, 2.0);
        assert_eq!(c.to_array(), [2.0, 2.0, 2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn set_beyond_dimension_is_noop() {
        let mut c = Coordinate::new2(0.0, 0.0);
        c.set(Axis::W, 5.0);
        assert_eq!(c.w, 0.0);
        c.set(Axis::Y, 5.0);
        assert_eq!(c.y, 5.0);
    }

    #[test]
    fn length_over_active_components() {
        let c = Coordinate::new4(1.0, 1.0, 1.0, 1.0);
        assert!((c.length() - 2.0).abs() < 1e-12);
        let mut d = Coordinate::new2(3.0, 4.0);
        d.z = 100.0;
        assert!((d.length() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn dimension_from_count() {
        assert_eq!(Dimension::from_count(6), Some(Dimension::D6));
        assert_eq!(Dimension::from_count(5), None);
    }
}
