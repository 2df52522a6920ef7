//! A* pathfinding over dungeon tiles
//!
//! Eight-way movement with a Chebyshev heuristic. Diagonal and orthogonal
//! steps cost the same, matching how actors move.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::core::types::Position;
use crate::map::dungeon::DungeonMap;

/// Node in the A* open set
#[derive(Debug, Clone)]
struct PathNode {
    pos: Position,
    f_cost: i32, // g_cost + heuristic
    h_cost: i32,
}

impl PartialEq for PathNode {
    fn eq(&self, other: &Self) -> bool {
        self.pos == other.pos
    }
}

impl Eq for PathNode {}

impl Ord for PathNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap, ties broken toward the goal
        other
            .f_cost
            .cmp(&self.f_cost)
            .then_with(|| other.h_cost.cmp(&self.h_cost))
    }
}

impl PartialOrd for PathNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Find a walkable path from `start` to `goal`
///
/// The returned steps exclude `start` and include `goal`. `is_blocked`
/// lets callers route around occupied tiles; the goal itself is always
/// allowed so that an actor can path to its target.
/// Returns None if no path exists.
pub fn find_path<F>(
    map: &DungeonMap,
    start: Position,
    goal: Position,
    is_blocked: F,
) -> Option<Vec<Position>>
where
    F: Fn(Position) -> bool,
{
    if start == goal {
        return Some(Vec::new());
    }
    if !map.is_walkable(goal) {
        return None;
    }

    let mut open_set = BinaryHeap::new();
    let mut came_from: HashMap<Position, Position> = HashMap::new();
    let mut g_scores: HashMap<Position, i32> = HashMap::new();

    g_scores.insert(start, 0);
    open_set.push(PathNode {
        pos: start,
        f_cost: start.chebyshev(&goal),
        h_cost: start.chebyshev(&goal),
    });

    while let Some(current) = open_set.pop() {
        if current.pos == goal {
            return Some(reconstruct_path(&came_from, current.pos));
        }

        let current_g = *g_scores.get(&current.pos).unwrap_or(&i32::MAX);
        if current_g == i32::MAX {
            continue;
        }

        for neighbor in current.pos.neighbors() {
            if !map.is_walkable(neighbor) {
                continue;
            }
            if neighbor != goal && is_blocked(neighbor) {
                continue;
            }

            let tentative_g = current_g + 1;
            let neighbor_g = *g_scores.get(&neighbor).unwrap_or(&i32::MAX);

            if tentative_g < neighbor_g {
                came_from.insert(neighbor, current.pos);
                g_scores.insert(neighbor, tentative_g);

                let h_cost = neighbor.chebyshev(&goal);
                open_set.push(PathNode {
                    pos: neighbor,
                    f_cost: tentative_g + h_cost,
                    h_cost,
                });
            }
        }
    }

    None // No path found
}

/// Reconstruct path from came_from map, dropping the start tile
fn reconstruct_path(came_from: &HashMap<Position, Position>, mut current: Position) -> Vec<Position> {
    let mut path = vec![current];
    while let Some(&prev) = came_from.get(&current) {
        path.push(prev);
        current = prev;
    }
    path.pop();
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::dungeon::Tile;

    fn open_map() -> DungeonMap {
        let mut map = DungeonMap::new(20, 20);
        map.fill(Tile::Floor);
        map.create_perimeter_walls();
        map
    }

    #[test]
    fn test_straight_path() {
        let map = open_map();
        let path = find_path(&map, Position::new(2, 2), Position::new(6, 2), |_| false).unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(*path.last().unwrap(), Position::new(6, 2));
    }

    #[test]
    fn test_diagonal_costs_one() {
        let map = open_map();
        let path = find_path(&map, Position::new(2, 2), Position::new(7, 7), |_| false).unwrap();
        assert_eq!(path.len(), 5);
    }

    #[test]
    fn test_path_around_wall() {
        let mut map = open_map();
        for y in 1..18 {
            map.set_tile(Position::new(10, y), Tile::Wall);
        }
        let path = find_path(&map, Position::new(5, 5), Position::new(15, 5), |_| false).unwrap();
        assert!(path.iter().all(|p| map.is_walkable(*p)));
        assert!(path.iter().any(|p| p.y == 18));
    }

    #[test]
    fn test_no_path_when_sealed() {
        let mut map = open_map();
        for y in 1..19 {
            map.set_tile(Position::new(10, y), Tile::Wall);
        }
        assert!(find_path(&map, Position::new(5, 5), Position::new(15, 5), |_| false).is_none());
    }

    #[test]
    fn test_blocked_tiles_avoided_but_goal_allowed() {
        let map = open_map();
        let goal = Position::new(5, 2);
        let path = find_path(&map, Position::new(2, 2), goal, |p| p == Position::new(3, 2) || p == goal)
            .unwrap();
        assert!(!path.contains(&Position::new(3, 2)));
        assert_eq!(*path.last().unwrap(), goal);
    }

    #[test]
    fn test_same_start_and_goal() {
        let map = open_map();
        let p = Position::new(4, 4);
        assert_eq!(find_path(&map, p, p, |_| false), Some(Vec::new()));
    }
}
