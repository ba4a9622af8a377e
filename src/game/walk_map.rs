//! Static walkability map
//!
//! One bit per cell, row-major. Shared read-only between the planner's
//! workers behind an `Arc`.

use bitvec::prelude::*;

use crate::game::zone::Zone;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalkMapError {
    #[error("Walk map has no rows")]
    Empty,
    #[error("Row {row} has width {found}, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Unexpected character '{ch}' at row {row}, column {col}")]
    BadCell { row: usize, col: usize, ch: char },
}

/// Walkable/blocked grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkMap {
    cols: u32,
    rows: u32,
    /// Set bit = walkable
    walkable: BitVec,
}

impl WalkMap {
    /// Fully walkable map
    pub fn open(cols: u32, rows: u32) -> Self {
        Self {
            cols,
            rows,
            walkable: bitvec![1; cols as usize * rows as usize],
        }
    }

    /// Map with a one-cell blocked border
    pub fn walled(cols: u32, rows: u32) -> Self {
        let mut map = Self::open(cols, rows);
        for x in 0..cols as i32 {
            map.set(Zone::new(x, 0), false);
            map.set(Zone::new(x, rows as i32 - 1), false);
        }
        for y in 0..rows as i32 {
            map.set(Zone::new(0, y), false);
            map.set(Zone::new(cols as i32 - 1, y), false);
        }
        map
    }

    /// Parse text rows: `.` is walkable, `#` is blocked. Surrounding
    /// whitespace on each row is ignored, blank rows are skipped.
    pub fn parse<S: AsRef<str>>(rows: &[S]) -> Result<Self, WalkMapError> {
        let lines: Vec<&str> = rows
            .iter()
            .map(|r| r.as_ref().trim())
            .filter(|r| !r.is_empty())
            .collect();

        let width = lines.first().ok_or(WalkMapError::Empty)?.chars().count();
        let mut walkable = BitVec::with_capacity(width * lines.len());

        for (row, line) in lines.iter().enumerate() {
            let found = line.chars().count();
            if found != width {
                return Err(WalkMapError::RaggedRow {
                    row,
                    expected: width,
                    found,
                });
            }
            for (col, ch) in line.chars().enumerate() {
                match ch {
                    '.' => walkable.push(true),
                    '#' => walkable.push(false),
                    _ => return Err(WalkMapError::BadCell { row, col, ch }),
                }
            }
        }

        Ok(Self {
            cols: width as u32,
            rows: lines.len() as u32,
            walkable,
        })
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
    fn index(&self, zone: Zone) -> Option<usize> {
        if zone.x >= 0 && zone.y >= 0 && (zone.x as u32) < self.cols && (zone.y as u32) < self.rows {
            Some(zone.y as usize * self.cols as usize + zone.x as usize)
        } else {
            None
        }
    }

    /// Cells outside the map are never walkable
    #[inline]
    pub fn is_walkable(&self, zone: Zone) -> bool {
        self.index(zone).map_or(false, |i| self.walkable[i])
    }

    /// Set a cell; out-of-range zones are ignored
    pub fn set(&mut self, zone: Zone, walkable: bool) {
        if let Some(i) = self.index(zone) {
            self.walkable.set(i, walkable);
        }
    }

    pub fn walkable_count(&self) -> usize {
        self.walkable.count_ones()
    }
}
