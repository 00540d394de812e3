//! Integer grid tracking which parts of the arena were mowed.

use mower_sim_core::DVec2;

use crate::arena::Arena;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cell {
    Blocked,
    Unmowed,
    Mowed,
}

/// Grid with one cell per map unit spanning the border bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct CoverageGrid {
    origin_x: i64,
    origin_y: i64,
    width: usize,
    height: usize,
    cells: Vec<Cell>,
    mowable: u64,
    mowed: u64,
}

impl CoverageGrid {
    /// Builds an empty grid. A cell is mowable when its grid point lies inside
    /// the arena.
    #[must_use]
    pub fn build(arena: &Arena) -> Self {
        let Some((min, max)) = arena.border().bounds() else {
            return Self::empty();
        };
        let origin_x = min.x.floor() as i64;
        let origin_y = min.y.floor() as i64;
        let width = usize::try_from(max.x.ceil() as i64 - origin_x + 1).unwrap_or(0);
        let height = usize::try_from(max.y.ceil() as i64 - origin_y + 1).unwrap_or(0);

        let mut cells = Vec::with_capacity(width.saturating_mul(height));
        let mut mowable = 0;
        for row in 0..height {
            for column in 0..width {
                let point = DVec2::new(
                    (origin_x + column as i64) as f64,
                    (origin_y + row as i64) as f64,
                );
                if arena.contains(point, 0.0) {
                    mowable += 1;
                    cells.push(Cell::Unmowed);
                } else {
                    cells.push(Cell::Blocked);
                }
            }
        }

        Self {
            origin_x,
            origin_y,
            width,
            height,
            cells,
            mowable,
            mowed: 0,
        }
    }

    fn empty() -> Self {
        Self {
            origin_x: 0,
            origin_y: 0,
            width: 0,
            height: 0,
            cells: Vec::new(),
            mowable: 0,
            mowed: 0,
        }
    }

    /// Marks every mowable cell within `radius` map units of `center`.
    pub fn mark(&mut self, center: DVec2, radius: f64) {
        if self.cells.is_empty() || !radius.is_finite() || radius < 0.0 {
            return;
        }
        let center_x = center.x.floor() as i64 - self.origin_x;
        let center_y = center.y.floor() as i64 - self.origin_y;
        let reach = radius.ceil() as i64;
        let radius_squared = radius * radius;

        for dy in -reach..=reach {
            for dx in -reach..=reach {
                if ((dx * dx + dy * dy) as f64) > radius_squared {
                    continue;
                }
                let Some(index) = self.index(center_x + dx, center_y + dy) else {
                    continue;
                };
                if self.cells[index] == Cell::Unmowed {
                    self.cells[index] = Cell::Mowed;
                    self.mowed += 1;
                }
            }
        }
    }

    /// Fraction of mowable cells that were mowed.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.mowable == 0 {
            return 0.0;
        }
        self.mowed as f64 / self.mowable as f64
    }

    /// Number of mowable cells.
    #[must_use]
    pub const fn mowable_cells(&self) -> u64 {
        self.mowable
    }

    /// Number of mowed cells.
    #[must_use]
    pub const fn mowed_cells(&self) -> u64 {
        self.mowed
    }

    /// Reports whether the cell containing `point` was mowed.
    #[must_use]
    pub fn is_mowed(&self, point: DVec2) -> bool {
        self.index(
            point.x.floor() as i64 - self.origin_x,
            point.y.floor() as i64 - self.origin_y,
        )
        .map_or(false, |index| self.cells[index] == Cell::Mowed)
    }

    fn index(&self, column: i64, row: i64) -> Option<usize> {
        let column = usize::try_from(column).ok()?;
        let row = usize::try_from(row).ok()?;
        if column >= self.width || row >= self.height {
            return None;
        }
        Some(row * self.width + column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mower_sim_core::Polyline;

    fn square() -> Arena {
        Arena::new(
            Polyline::rectangle(DVec2::ZERO, DVec2::new(100.0, 100.0)),
            1.0,
        )
        .expect("arena")
    }

    #[test]
    fn single_mark_covers_a_small_disc() {
        let mut grid = CoverageGrid::build(&square());
        assert_eq!(grid.mowable_cells(), 101 * 101);

        grid.mark(DVec2::new(50.0, 50.0), 10.0);
        let ratio = grid.ratio();
        assert!(ratio > 0.02 && ratio < 0.04, "coverage {ratio}");
        assert!(grid.is_mowed(DVec2::new(55.0, 50.0)));
        assert!(!grid.is_mowed(DVec2::new(70.0, 50.0)));
    }

    #[test]
    fn marking_is_idempotent() {
        let mut grid = CoverageGrid::build(&square());
        grid.mark(DVec2::new(50.0, 50.0), 10.0);
        let mowed = grid.mowed_cells();
        grid.mark(DVec2::new(50.0, 50.0), 10.0);
        assert_eq!(grid.mowed_cells(), mowed);
    }

    #[test]
    fn obstacles_are_never_mowable() {
        let arena = square()
            .with_obstacle(Polyline::rectangle(
                DVec2::new(20.0, 20.0),
                DVec2::new(80.0, 80.0),
            ))
            .expect("obstacle");
        let mut grid = CoverageGrid::build(&arena);
        assert!(grid.mowable_cells() < 101 * 101);

        grid.mark(DVec2::new(50.0, 50.0), 5.0);
        assert_eq!(grid.mowed_cells(), 0);
    }

    #[test]
    fn marks_outside_the_grid_are_ignored() {
        let mut grid = CoverageGrid::build(&square());
        grid.mark(DVec2::new(-500.0, -500.0), 3.0);
        assert_eq!(grid.mowed_cells(), 0);
        assert_eq!(grid.ratio(), 0.0);
    }
}
