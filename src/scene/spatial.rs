//! Spatial hash grid for rectangle overlap queries
//!
//! Divides the world into square cells and files each actor's world bounds
//! under every cell they touch. Queries only visit the cells the query
//! rectangle touches, then confirm overlap against the stored bounds.

use hashbrown::HashMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::scene::actor::ActorId;
use crate::util::rect::Rect;

// ============================================================================
// Grid Constants
// ============================================================================

/// Default cell size (world units)
/// Should be a few times the typical actor extent
pub const DEFAULT_CELL_SIZE: f32 = 64.0;

/// Initial capacity for grid cells (number of expected non-empty cells)
const GRID_INITIAL_CAPACITY: usize = 256;

/// Initial capacity for id vectors within cells
const CELL_INITIAL_CAPACITY: usize = 8;

/// Grid cell key - (x, y) cell coordinates
pub type CellKey = (i32, i32);

/// Inclusive span of cells covered by a rectangle
type CellSpan = SmallVec<[CellKey; 4]>;

/// Narrow interface the registry uses for broad-phase queries
pub trait SpatialIndex: Send {
    /// Track a new actor with its world bounds
    fn insert(&mut self, id: ActorId, bounds: Rect);

    /// Refresh an actor's bounds; inserts it if unknown
    fn update(&mut self, id: ActorId, bounds: Rect);

    /// Stop tracking an actor; returns false if it was not tracked
    fn remove(&mut self, id: ActorId) -> bool;

    /// Append the ids of all actors overlapping `rect` to `out`.
    /// Output is sorted and free of duplicates.
    fn overlapping(&self, rect: &Rect, out: &mut Vec<ActorId>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Uniform hash grid
pub struct SpatialGrid {
    /// Inverse cell size for fast position-to-cell conversion
    inv_cell_size: f32,
    /// Map from cell key to the actors filed under that cell
    cells: HashMap<CellKey, Vec<ActorId>>,
    /// Current bounds of every tracked actor
    bounds: FxHashMap<ActorId, Rect>,
}

impl SpatialGrid {
    /// Create a new spatial grid with the given cell size
    pub fn new(cell_size: f32) -> Self {
        Self {
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
            bounds: FxHashMap::default(),
        }
    }

    #[inline]
    fn cell_coord(&self, value: f32) -> i32 {
        (value * self.inv_cell_size).floor() as i32
    }

    /// All cells touched by a rectangle
    fn span(&self, rect: &Rect) -> CellSpan {
        let (x0, y0) = (self.cell_coord(rect.min.x), self.cell_coord(rect.min.y));
        let (x1, y1) = (self.cell_coord(rect.max.x), self.cell_coord(rect.max.y));
        let mut span = CellSpan::new();
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                span.push((cx, cy));
            }
        }
        span
    }

    fn file(&mut self, id: ActorId, bounds: &Rect) {
        for key in self.span(bounds) {
            self.cells
                .entry(key)
                .or_insert_with(|| Vec::with_capacity(CELL_INITIAL_CAPACITY))
                .push(id);
        }
    }

    fn unfile(&mut self, id: ActorId, bounds: &Rect) {
        for key in self.span(bounds) {
            if let Some(cell) = self.cells.get_mut(&key) {
                cell.retain(|&other| other != id);
                if cell.is_empty() {
                    self.cells.remove(&key);
                }
            }
        }
    }

    /// Number of non-empty cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl SpatialIndex for SpatialGrid {
    fn insert(&mut self, id: ActorId, bounds: Rect) {
        if let Some(old) = self.bounds.insert(id, bounds) {
            self.unfile(id, &old);
        }
        self.file(id, &bounds);
    }

    fn update(&mut self, id: ActorId, bounds: Rect) {
        match self.bounds.get(&id).copied() {
            Some(old) => {
                let moved_cells = self.span(&old) != self.span(&bounds);
                if moved_cells {
                    self.unfile(id, &old);
                    self.file(id, &bounds);
                }
                self.bounds.insert(id, bounds);
            }
            None => self.insert(id, bounds),
        }
    }

    fn remove(&mut self, id: ActorId) -> bool {
        match self.bounds.remove(&id) {
            Some(old) => {
                self.unfile(id, &old);
                true
            }
            None => false,
        }
    }

    fn overlapping(&self, rect: &Rect, out: &mut Vec<ActorId>) {
        let start = out.len();
        for key in self.span(rect) {
            if let Some(cell) = self.cells.get(&key) {
                for &id in cell {
                    let hit = self
                        .bounds
                        .get(&id)
                        .is_some_and(|bounds| bounds.intersects(rect));
                    if hit {
                        out.push(id);
                    }
                }
            }
        }
        // Actors spanning several cells are found once per cell
        out[start..].sort_unstable();
        let mut unique = start;
        for i in start..out.len() {
            if unique == start || out[unique - 1] != out[i] {
                out[unique] = out[i];
                unique += 1;
            }
        }
        out.truncate(unique);
    }

    fn len(&self) -> usize {
        self.bounds.len()
    }
}
