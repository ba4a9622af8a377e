//! 4-connected A* over the walk map
//!
//! Coordinates are (column, row) = (x, y) end to end; search nodes are
//! row-major indices into the walk map and convert straight back to `Zone`s.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use bitvec::prelude::*;
use smallvec::SmallVec;

use crate::game::walk_map::WalkMap;
use crate::game::zone::{Direction, Zone};

const UNVISITED: u32 = u32::MAX;

/// Cost field for one search: walkable cells minus dynamic obstacles
struct SearchGrid<'a> {
    map: &'a WalkMap,
    blocked: BitVec,
    cols: usize,
    start: Option<usize>,
    goal: Option<usize>,
}

impl<'a> SearchGrid<'a> {
    fn new(map: &'a WalkMap, occupied: &[Zone], start: Zone, goal: Zone) -> Self {
        let cols = map.cols() as usize;
        let mut blocked = bitvec![0; cols * map.rows() as usize];
        for &zone in occupied {
            if zone != start && zone != goal {
                if let Some(i) = Self::index_in(map, zone) {
                    blocked.set(i, true);
                }
            }
        }
        Self {
            map,
            blocked,
            cols,
            start: Self::index_in(map, start),
            goal: Self::index_in(map, goal),
        }
    }

    fn index_in(map: &WalkMap, zone: Zone) -> Option<usize> {
        if zone.x >= 0 && zone.y >= 0 && (zone.x as u32) < map.cols() && (zone.y as u32) < map.rows() {
            Some(zone.y as usize * map.cols() as usize + zone.x as usize)
        } else {
            None
        }
    }

    #[inline]
    fn index(&self, zone: Zone) -> Option<usize> {
        Self::index_in(self.map, zone)
    }

    #[inline]
    fn zone(&self, index: usize) -> Zone {
        Zone::new((index % self.cols) as i32, (index / self.cols) as i32)
    }

    fn is_passable(&self, index: usize) -> bool {
        if Some(index) == self.start || Some(index) == self.goal {
            return true;
        }
        !self.blocked[index] && self.map.is_walkable(self.zone(index))
    }

    fn neighbors(&self, index: usize) -> SmallVec<[usize; 4]> {
        let zone = self.zone(index);
        Direction::ALL
            .iter()
            .filter_map(|d| self.index(zone + d.step()))
            .filter(|&i| self.is_passable(i))
            .collect()
    }
}

/// Shortest 4-connected route from `start` to `goal`, both included.
///
/// `occupied` cells are impassable except when they are the start or the
/// goal; start and goal themselves are always treated as passable. Returns an
/// empty vector when no route exists or either end lies outside the map.
pub fn find_path(map: &WalkMap, occupied: &[Zone], start: Zone, goal: Zone) -> Vec<Zone> {
    let grid = SearchGrid::new(map, occupied, start, goal);
    let (start_idx, goal_idx) = match (grid.start, grid.goal) {
        (Some(s), Some(g)) => (s, g),
        _ => return Vec::new(),
    };

    if start_idx == goal_idx {
        return vec![start];
    }

    let n = map.cols() as usize * map.rows() as usize;
    let mut g_score: Vec<u32> = vec![u32::MAX; n];
    let mut came_from: Vec<u32> = vec![UNVISITED; n];
    let mut closed = bitvec![0; n];

    g_score[start_idx] = 0;
    // (f, h, index): ties on f prefer the node closer to the goal
    let mut open: BinaryHeap<Reverse<(u32, u32, u32)>> = BinaryHeap::new();
    let h0 = start.manhattan(goal) as u32;
    open.push(Reverse((h0, h0, start_idx as u32)));

    let mut found = false;
    while let Some(Reverse((_, _, current))) = open.pop() {
        let current = current as usize;
        if closed[current] {
            continue;
        }
        closed.set(current, true);

        if current == goal_idx {
            found = true;
            break;
        }

        let next_g = g_score[current] + 1;
        for neighbor in grid.neighbors(current) {
            if !closed[neighbor] && next_g < g_score[neighbor] {
                g_score[neighbor] = next_g;
                came_from[neighbor] = current as u32;
                let h = grid.zone(neighbor).manhattan(goal) as u32;
                open.push(Reverse((next_g + h, h, neighbor as u32)));
            }
        }
    }

    if !found {
        return Vec::new();
    }

    let mut path = Vec::with_capacity(g_score[goal_idx] as usize + 1);
    let mut current = goal_idx;
    path.push(goal);
    while current != start_idx {
        current = came_from[current] as usize;
        path.push(grid.zone(current));
    }
    path.reverse();
    path
}
