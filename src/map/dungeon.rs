//! Tile grid, field of view and explored memory for a single level

use serde::{Deserialize, Serialize};

use crate::core::types::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tile {
    Wall,
    Floor,
    Door,
    StairsDown,
    StairsUp,
}

impl Tile {
    pub fn is_walkable(&self) -> bool {
        !matches!(self, Tile::Wall)
    }

    pub fn is_transparent(&self) -> bool {
        matches!(self, Tile::Floor | Tile::StairsDown | Tile::StairsUp)
    }

    pub fn glyph(&self) -> char {
        match self {
            Tile::Wall => '#',
            Tile::Floor => '.',
            Tile::Door => '+',
            Tile::StairsDown => '>',
            Tile::StairsUp => '<',
        }
    }
}

/// Axis-aligned room rectangle (inclusive of its walls' interior)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Room {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Position {
        Position::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// True if the rooms overlap or touch (one tile margin)
    pub fn intersects(&self, other: &Room) -> bool {
        self.x - 1 <= other.x + other.width
            && self.x + self.width + 1 >= other.x
            && self.y - 1 <= other.y + other.height
            && self.y + self.height + 1 >= other.y
    }

    pub fn contains(&self, p: Position) -> bool {
        p.x >= self.x && p.x < self.x + self.width && p.y >= self.y && p.y < self.y + self.height
    }

    pub fn tiles(&self) -> impl Iterator<Item = Position> + '_ {
        (self.y..self.y + self.height)
            .flat_map(move |y| (self.x..self.x + self.width).map(move |x| Position::new(x, y)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DungeonMap {
    pub width: i32,
    pub height: i32,
    tiles: Vec<Tile>,
    explored: Vec<bool>,
    #[serde(skip)]
    visible: Vec<bool>,
    pub rooms: Vec<Room>,
}

impl DungeonMap {
    /// A map filled entirely with walls
    pub fn new(width: i32, height: i32) -> Self {
        let size = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            tiles: vec![Tile::Wall; size],
            explored: vec![false; size],
            visible: vec![false; size],
            rooms: Vec::new(),
        }
    }

    fn index(&self, p: Position) -> Option<usize> {
        if self.in_bounds(p) {
            Some((p.y * self.width + p.x) as usize)
        } else {
            None
        }
    }

    pub fn in_bounds(&self, p: Position) -> bool {
        p.x >= 0 && p.x < self.width && p.y >= 0 && p.y < self.height
    }

    pub fn tile(&self, p: Position) -> Tile {
        self.index(p).map(|i| self.tiles[i]).unwrap_or(Tile::Wall)
    }

    pub fn set_tile(&mut self, p: Position, tile: Tile) {
        if let Some(i) = self.index(p) {
            self.tiles[i] = tile;
        }
    }

    pub fn is_walkable(&self, p: Position) -> bool {
        self.tile(p).is_walkable()
    }

    pub fn is_transparent(&self, p: Position) -> bool {
        self.tile(p).is_transparent()
    }

    pub fn fill(&mut self, tile: Tile) {
        self.tiles.iter_mut().for_each(|t| *t = tile);
    }

    pub fn create_perimeter_walls(&mut self) {
        for x in 0..self.width {
            self.set_tile(Position::new(x, 0), Tile::Wall);
            self.set_tile(Position::new(x, self.height - 1), Tile::Wall);
        }
        for y in 0..self.height {
            self.set_tile(Position::new(0, y), Tile::Wall);
            self.set_tile(Position::new(self.width - 1, y), Tile::Wall);
        }
    }

    pub fn walkable_neighbors(&self, p: Position) -> impl Iterator<Item = Position> + '_ {
        p.neighbors()
            .collect::<Vec<_>>()
            .into_iter()
            .filter(move |n| self.is_walkable(*n))
    }

    pub fn floor_tiles(&self) -> impl Iterator<Item = Position> + '_ {
        (0..self.height)
            .flat_map(move |y| (0..self.width).map(move |x| Position::new(x, y)))
            .filter(move |p| self.tile(*p) == Tile::Floor)
    }

    pub fn find_tile(&self, tile: Tile) -> Option<Position> {
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| Position::new(x, y)))
            .find(|p| self.tile(*p) == tile)
    }

    // === FIELD OF VIEW ===

    pub fn is_visible(&self, p: Position) -> bool {
        self.index(p)
            .and_then(|i| self.visible.get(i).copied())
            .unwrap_or(false)
    }

    pub fn is_explored(&self, p: Position) -> bool {
        self.index(p).map(|i| self.explored[i]).unwrap_or(false)
    }

    pub fn mark_explored(&mut self, p: Position) {
        if let Some(i) = self.index(p) {
            self.explored[i] = true;
        }
    }

    pub fn visible_positions(&self) -> Vec<Position> {
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| Position::new(x, y)))
            .filter(|p| self.is_visible(*p))
            .collect()
    }

    /// Recompute visibility from `origin` with recursive shadowcasting
    ///
    /// Every visible tile is also marked explored.
    pub fn compute_fov(&mut self, origin: Position, radius: i32) {
        let size = self.tiles.len();
        if self.visible.len() != size {
            self.visible = vec![false; size];
        }
        self.visible.iter_mut().for_each(|v| *v = false);
        self.reveal(origin);

        // (xx, xy, yx, yy) transforms for the eight octants
        const OCTANTS: [(i32, i32, i32, i32); 8] = [
            (1, 0, 0, 1),
            (0, 1, 1, 0),
            (0, -1, 1, 0),
            (-1, 0, 0, 1),
            (-1, 0, 0, -1),
            (0, -1, -1, 0),
            (0, 1, -1, 0),
            (1, 0, 0, -1),
        ];
        for (xx, xy, yx, yy) in OCTANTS {
            self.cast_light(origin, radius, 1, 1.0, 0.0, (xx, xy, yx, yy));
        }
    }

    fn reveal(&mut self, p: Position) {
        if let Some(i) = self.index(p) {
            self.visible[i] = true;
            self.explored[i] = true;
        }
    }

    fn cast_light(
        &mut self,
        origin: Position,
        radius: i32,
        row: i32,
        mut start: f32,
        end: f32,
        transform: (i32, i32, i32, i32),
    ) {
        if start < end {
            return;
        }
        let (xx, xy, yx, yy) = transform;
        let radius_sq = radius * radius;
        let mut new_start = 0.0;

        for distance in row..=radius {
            let mut blocked = false;
            let dy = -distance;
            for dx in -distance..=0 {
                let l_slope = (dx as f32 - 0.5) / (dy as f32 + 0.5);
                let r_slope = (dx as f32 + 0.5) / (dy as f32 - 0.5);
                if start < r_slope {
                    continue;
                }
                if end > l_slope {
                    break;
                }

                let p = Position::new(origin.x + dx * xx + dy * xy, origin.y + dx * yx + dy * yy);
                if dx * dx + dy * dy <= radius_sq {
                    self.reveal(p);
                }

                let opaque = !self.is_transparent(p);
                if blocked {
                    if opaque {
                        new_start = r_slope;
                    } else {
                        blocked = false;
                        start = new_start;
                    }
                } else if opaque && distance < radius {
                    blocked = true;
                    self.cast_light(origin, radius, distance + 1, start, l_slope, transform);
                    new_start = r_slope;
                }
            }
            if blocked {
                break;
            }
        }
    }

    /// Forget all explored tiles (used when a level is regenerated)
    pub fn reset_memory(&mut self) {
        self.explored.iter_mut().for_each(|e| *e = false);
        self.visible.iter_mut().for_each(|v| *v = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_room(width: i32, height: i32) -> DungeonMap {
        let mut map = DungeonMap::new(width, height);
        map.fill(Tile::Floor);
        map.create_perimeter_walls();
        map
    }

    #[test]
    fn test_out_of_bounds_is_wall() {
        let map = open_room(10, 10);
        assert_eq!(map.tile(Position::new(-1, 3)), Tile::Wall);
        assert!(!map.is_walkable(Position::new(10, 3)));
        assert!(map.is_walkable(Position::new(5, 5)));
    }

    #[test]
    fn test_fov_respects_radius() {
        let mut map = open_room(40, 40);
        let origin = Position::new(20, 20);
        map.compute_fov(origin, 8);
        assert!(map.is_visible(origin));
        assert!(map.is_visible(Position::new(25, 20)));
        assert!(!map.is_visible(Position::new(30, 20)));
        assert!(map.is_explored(Position::new(25, 20)));
    }

    #[test]
    fn test_fov_blocked_by_wall() {
        let mut map = open_room(30, 10);
        // Vertical wall between origin and the far side
        for y in 1..9 {
            map.set_tile(Position::new(10, y), Tile::Wall);
        }
        map.compute_fov(Position::new(5, 5), 8);
        assert!(map.is_visible(Position::new(10, 5)), "wall itself is seen");
        assert!(!map.is_visible(Position::new(12, 5)));
    }

    #[test]
    fn test_explored_persists_after_moving() {
        let mut map = open_room(40, 10);
        map.compute_fov(Position::new(3, 5), 4);
        map.compute_fov(Position::new(30, 5), 4);
        assert!(!map.is_visible(Position::new(4, 5)));
        assert!(map.is_explored(Position::new(4, 5)));
    }

    #[test]
    fn test_room_intersection() {
        let a = Room::new(1, 1, 5, 5);
        let b = Room::new(4, 4, 5, 5);
        let c = Room::new(20, 20, 4, 4);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.center(), Position::new(3, 3));
    }
}
