//! Discrete grid cells and the continuous-to-discrete mapping
//!
//! A `Zone` is a (column, row) pair. `GridGeometry` owns the cell size and
//! grid dimensions and performs every conversion between world positions and
//! zones, always clamping into the grid.

use std::ops::{Add, Mul, Neg, Sub};

use crate::game::constants::grid::NO_ZONE_INDEX;
use crate::util::vec2::{Axis, Vec2};

/// Grid cell identified by integer column (`x`) and row (`y`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Zone {
    pub x: i32,
    pub y: i32,
}

/// Sentinel meaning "no target / no zone"
pub const NO_ZONE: Zone = Zone::new(NO_ZONE_INDEX, NO_ZONE_INDEX);

impl Zone {
    pub const ZERO: Zone = Zone { x: 0, y: 0 };

    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// True for the `NO_ZONE` sentinel
    #[inline]
    pub fn is_none(&self) -> bool {
        *self == NO_ZONE
    }

    /// Component-wise abs
    #[inline]
    pub fn abs(&self) -> Self {
        Self::new(self.x.abs(), self.y.abs())
    }

    /// Manhattan distance to another zone
    #[inline]
    pub fn manhattan(&self, other: Zone) -> i32 {
        let d = (*self - other).abs();
        d.x + d.y
    }

    #[inline]
    pub fn axis(&self, axis: Axis) -> i32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    /// Zone with the given axis component replaced
    #[inline]
    pub fn with_axis(&self, axis: Axis, value: i32) -> Self {
        match axis {
            Axis::X => Self::new(value, self.y),
            Axis::Y => Self::new(self.x, value),
        }
    }

    /// Shares a row or a column with `other`
    #[inline]
    pub fn is_aligned_with(&self, other: Zone) -> bool {
        self.x == other.x || self.y == other.y
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl Add for Zone {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Zone {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Zone {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl Mul<i32> for Zone {
    type Output = Self;
    fn mul(self, rhs: i32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Cardinal facing / movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// One-cell step in this direction
    #[inline]
    pub fn step(self) -> Zone {
        match self {
            Direction::Up => Zone::new(0, -1),
            Direction::Down => Zone::new(0, 1),
            Direction::Left => Zone::new(-1, 0),
            Direction::Right => Zone::new(1, 0),
        }
    }

    /// Unit vector in world space
    #[inline]
    pub fn vector(self) -> Vec2 {
        let step = self.step();
        Vec2::new(step.x as f32, step.y as f32)
    }

    /// Axis this direction moves along
    #[inline]
    pub fn axis(self) -> Axis {
        match self {
            Direction::Up | Direction::Down => Axis::Y,
            Direction::Left | Direction::Right => Axis::X,
        }
    }

    /// Positive or negative direction along an axis
    pub fn along(axis: Axis, sign: i32) -> Option<Self> {
        match (axis, sign.signum()) {
            (Axis::X, 1) => Some(Direction::Right),
            (Axis::X, -1) => Some(Direction::Left),
            (Axis::Y, 1) => Some(Direction::Down),
            (Axis::Y, -1) => Some(Direction::Up),
            _ => None,
        }
    }

    /// Dominant direction of a zone delta; ties go to the X axis
    pub fn from_delta(delta: Zone) -> Option<Self> {
        if delta == Zone::ZERO {
            None
        } else if delta.x.abs() >= delta.y.abs() {
            Self::along(Axis::X, delta.x)
        } else {
            Self::along(Axis::Y, delta.y)
        }
    }

    /// Dominant direction of a continuous delta; ties go to the X axis
    pub fn from_vector(delta: Vec2) -> Option<Self> {
        if delta.x == 0.0 && delta.y == 0.0 {
            None
        } else if delta.x.abs() >= delta.y.abs() {
            Some(if delta.x > 0.0 { Direction::Right } else { Direction::Left })
        } else {
            Some(if delta.y > 0.0 { Direction::Down } else { Direction::Up })
        }
    }
}

/// Grid dimensions plus cell size; all position/zone conversions live here
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    cols: u32,
    rows: u32,
    cell_size: Vec2,
}

impl GridGeometry {
    /// Cell size components must be positive and both dimensions non-zero
    pub fn new(cols: u32, rows: u32, cell_size: Vec2) -> Self {
        debug_assert!(cols > 0 && rows > 0, "grid must not be empty");
        debug_assert!(cell_size.x > 0.0 && cell_size.y > 0.0, "cell size must be positive");
        Self {
            cols,
            rows,
            cell_size,
        }
    }

    #[inline]
    pub fn cols(&self) -> u32 {
        self.cols
    }

    #[inline]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    #[inline]
    pub fn cell_size(&self) -> Vec2 {
        self.cell_size
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// World-space extent of the whole grid
    pub fn world_size(&self) -> Vec2 {
        Vec2::new(
            self.cols as f32 * self.cell_size.x,
            self.rows as f32 * self.cell_size.y,
        )
    }

    /// Clamp a zone into `[0, cols) x [0, rows)`
    #[inline]
    pub fn clamp(&self, zone: Zone) -> Zone {
        Zone::new(
            zone.x.clamp(0, self.cols as i32 - 1),
            zone.y.clamp(0, self.rows as i32 - 1),
        )
    }

    #[inline]
    pub fn contains(&self, zone: Zone) -> bool {
        zone.x >= 0 && zone.y >= 0 && (zone.x as u32) < self.cols && (zone.y as u32) < self.rows
    }

    /// Zone containing a point, clamped into the grid
    pub fn to_zone(&self, point: Vec2) -> Zone {
        let cell = point.div_elem(self.cell_size).floor();
        self.clamp(Zone::new(saturate(cell.x), saturate(cell.y)))
    }

    /// Zone whose anchor is nearest to a point, clamped into the grid
    pub fn nearest_zone(&self, point: Vec2) -> Zone {
        let cell = point.div_elem(self.cell_size).round();
        self.clamp(Zone::new(saturate(cell.x), saturate(cell.y)))
    }

    /// Position an entity occupies when it sits exactly in `zone`
    #[inline]
    pub fn anchor(&self, zone: Zone) -> Vec2 {
        Vec2::new(zone.x as f32, zone.y as f32).mul_elem(self.cell_size)
    }

    /// Row-major cell index, `None` outside the grid
    #[inline]
    pub fn index(&self, zone: Zone) -> Option<usize> {
        if self.contains(zone) {
            Some(zone.y as usize * self.cols as usize + zone.x as usize)
        } else {
            None
        }
    }

    #[inline]
    pub fn zone_at(&self, index: usize) -> Zone {
        let cols = self.cols as usize;
        Zone::new((index % cols) as i32, (index / cols) as i32)
    }
}

/// Float-to-int that maps NaN to 0 and saturates at the i32 range
#[inline]
fn saturate(v: f32) -> i32 {
    if v.is_nan() {
        0
    } else {
        v as i32
    }
}
