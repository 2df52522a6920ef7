//! Procedural level generation

use crate::core::dice::DiceRoller;
use crate::core::types::Position;
use crate::map::dungeon::{DungeonMap, Room, Tile};

/// Parameters for rooms-and-corridors generation
#[derive(Debug, Clone, Copy)]
pub struct RoomParams {
    pub max_rooms: usize,
    pub min_room_size: i32,
    pub max_room_size: i32,
}

impl Default for RoomParams {
    fn default() -> Self {
        Self {
            max_rooms: 30,
            min_room_size: 4,
            max_room_size: 10,
        }
    }
}

/// Parameters for cellular-automata caves
#[derive(Debug, Clone, Copy)]
pub struct CaveParams {
    pub fill_probability: f64,
    pub iterations: u32,
    /// A tile becomes wall with at least this many wall neighbours
    pub wall_threshold: usize,
}

impl Default for CaveParams {
    fn default() -> Self {
        Self {
            fill_probability: 0.45,
            iterations: 4,
            wall_threshold: 5,
        }
    }
}

pub struct MapGenerator {
    dice: DiceRoller,
}

impl MapGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            dice: DiceRoller::seeded(seed),
        }
    }

    /// Rooms joined by L-shaped corridors
    ///
    /// Each new room that does not overlap an existing one is carved and
    /// connected to the previously placed room.
    pub fn generate_rooms(&mut self, width: i32, height: i32, params: RoomParams) -> DungeonMap {
        let mut map = DungeonMap::new(width, height);

        for _ in 0..params.max_rooms {
            let room_w = self.dice.range(params.min_room_size, params.max_room_size);
            let room_h = self.dice.range(params.min_room_size, params.max_room_size);
            if room_w + 2 >= width || room_h + 2 >= height {
                continue;
            }
            let x = self.dice.range(1, width - room_w - 2);
            let y = self.dice.range(1, height - room_h - 2);
            let room = Room::new(x, y, room_w, room_h);

            if map.rooms.iter().any(|r| r.intersects(&room)) {
                continue;
            }

            for p in room.tiles() {
                map.set_tile(p, Tile::Floor);
            }
            if let Some(prev) = map.rooms.last().copied() {
                self.connect(&mut map, prev.center(), room.center());
            }
            map.rooms.push(room);
        }

        map.create_perimeter_walls();
        map
    }

    fn connect(&mut self, map: &mut DungeonMap, start: Position, end: Position) {
        let mut current = start;
        let horizontal_first = self.dice.chance(0.5);

        let carve_x = |map: &mut DungeonMap, current: &mut Position| {
            while current.x != end.x {
                map.set_tile(*current, Tile::Floor);
                current.x += (end.x - current.x).signum();
            }
        };
        let carve_y = |map: &mut DungeonMap, current: &mut Position| {
            while current.y != end.y {
                map.set_tile(*current, Tile::Floor);
                current.y += (end.y - current.y).signum();
            }
        };

        if horizontal_first {
            carve_x(map, &mut current);
            carve_y(map, &mut current);
        } else {
            carve_y(map, &mut current);
            carve_x(map, &mut current);
        }
        map.set_tile(end, Tile::Floor);
    }

    /// Organic caves from a smoothed noise field
    pub fn generate_cave(&mut self, width: i32, height: i32, params: CaveParams) -> DungeonMap {
        let mut map = DungeonMap::new(width, height);
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let tile = if self.dice.chance(params.fill_probability) {
                    Tile::Wall
                } else {
                    Tile::Floor
                };
                map.set_tile(Position::new(x, y), tile);
            }
        }

        for _ in 0..params.iterations {
            let snapshot = map.clone();
            for y in 1..height - 1 {
                for x in 1..width - 1 {
                    let p = Position::new(x, y);
                    let walls = p
                        .neighbors()
                        .filter(|n| snapshot.tile(*n) == Tile::Wall)
                        .count();
                    let tile = if walls >= params.wall_threshold {
                        Tile::Wall
                    } else {
                        Tile::Floor
                    };
                    map.set_tile(p, tile);
                }
            }
        }

        map.create_perimeter_walls();
        keep_largest_region(&mut map);
        map
    }

    /// Put stairs in the first and last rooms (or far-apart floor tiles in caves)
    pub fn place_stairs(&mut self, map: &mut DungeonMap, with_up_stairs: bool) {
        let (up, down) = match (map.rooms.first(), map.rooms.last()) {
            (Some(first), Some(last)) if map.rooms.len() > 1 => (first.center(), last.center()),
            _ => {
                let floors: Vec<Position> = map.floor_tiles().collect();
                let Some(&first) = floors.first() else {
                    return;
                };
                let far = floors
                    .iter()
                    .copied()
                    .max_by_key(|p| p.manhattan(&first))
                    .unwrap_or(first);
                (first, far)
            }
        };
        map.set_tile(down, Tile::StairsDown);
        if with_up_stairs && up != down {
            map.set_tile(up, Tile::StairsUp);
        }
    }

    pub fn dice(&mut self) -> &mut DiceRoller {
        &mut self.dice
    }
}

/// Wall off every floor region except the largest one
fn keep_largest_region(map: &mut DungeonMap) {
    let mut seen = std::collections::HashSet::new();
    let mut regions: Vec<Vec<Position>> = Vec::new();

    let floors: Vec<Position> = map.floor_tiles().collect();
    for start in floors {
        if !seen.insert(start) {
            continue;
        }
        let mut region = vec![start];
        let mut stack = vec![start];
        while let Some(p) = stack.pop() {
            for n in p.neighbors() {
                if map.tile(n) == Tile::Floor && seen.insert(n) {
                    region.push(n);
                    stack.push(n);
                }
            }
        }
        regions.push(region);
    }

    let Some(largest) = regions.iter().map(|r| r.len()).max() else {
        return;
    };
    let mut kept = false;
    for region in regions {
        if region.len() == largest && !kept {
            kept = true;
            continue;
        }
        for p in region {
            map.set_tile(p, Tile::Wall);
        }
    }
}
