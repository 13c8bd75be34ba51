//! Uniform-grid spatial hash used for proximity queries

use shared::Vec3;
use std::collections::HashMap;

type Cell = (i32, i32, i32);

/// Buckets items by the grid cell their position falls in. Rebuilt every
/// tick; queries return every item in cells touched by the query sphere's
/// bounding box, so callers still run the exact overlap test.
#[derive(Debug)]
pub struct SpatialHash<T> {
    cell_size: f32,
    cells: HashMap<Cell, Vec<(Vec3, T)>>,
}

impl<T: Copy> SpatialHash<T> {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    fn cell_of(&self, p: Vec3) -> Cell {
        (
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
            (p.z / self.cell_size).floor() as i32,
        )
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    pub fn insert(&mut self, position: Vec3, item: T) {
        let cell = self.cell_of(position);
        self.cells.entry(cell).or_default().push((position, item));
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Items whose cell intersects the box around `center` ± `radius`.
    pub fn query(&self, center: Vec3, radius: f32) -> Vec<(Vec3, T)> {
        let min = self.cell_of(center - Vec3::splat(radius));
        let max = self.cell_of(center + Vec3::splat(radius));

        let mut found = Vec::new();
        for x in min.0..=max.0 {
            for y in min.1..=max.1 {
                for z in min.2..=max.2 {
                    if let Some(items) = self.cells.get(&(x, y, z)) {
                        found.extend_from_slice(items);
                    }
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_finds_neighbours_across_cells() {
        let mut hash = SpatialHash::new(0.25);
        hash.insert(Vec3::new(0.24, 0.0, 0.0), 1);
        hash.insert(Vec3::new(0.26, 0.0, 0.0), 2);
        hash.insert(Vec3::new(5.0, 0.0, 0.0), 3);

        let mut ids: Vec<i32> = hash
            .query(Vec3::new(0.25, 0.0, 0.0), 0.1)
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(hash.len(), 3);
    }

    #[test]
    fn test_negative_coordinates() {
        let mut hash = SpatialHash::new(1.0);
        hash.insert(Vec3::new(-0.5, -0.5, -0.5), 'a');
        assert_eq!(hash.query(Vec3::new(-0.4, -0.4, -0.4), 0.05).len(), 1);
        assert!(hash.query(Vec3::new(0.5, 0.5, 0.5), 0.05).is_empty());

        hash.clear();
        assert!(hash.is_empty());
    }
}
