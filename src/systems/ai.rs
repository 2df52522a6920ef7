//! Enemy decision making

use hecs::{Entity, World};

use crate::components::{Actor, Ai, AiBehavior, Health, Player, Position};
use crate::core::config::GameConfig;
use crate::core::dice::DiceRoller;
use crate::core::types::Direction;
use crate::events::GameEvent;
use crate::map::dungeon::DungeonMap;
use crate::map::pathfinding::find_path;
use crate::systems::movement::{self, MoveResult};
use crate::systems::{actor, combat};

/// Enemies below this share of max HP run away
const FLEE_THRESHOLD: f32 = 0.25;

/// Run every AI-controlled entity that has enough energy to act
pub fn run_ai(
    world: &mut World,
    map: &DungeonMap,
    player: Entity,
    dice: &mut DiceRoller,
    level: u32,
    config: &GameConfig,
) -> Vec<GameEvent> {
    let mut events = Vec::new();
    let Some(player_pos) = world.get::<&Position>(player).ok().map(|p| *p) else {
        return events;
    };

    let mut acting: Vec<Entity> = world
        .query::<(&Ai, &Actor, &Position)>()
        .without::<&Player>()
        .iter()
        .filter(|(_, (_, a, _))| a.can_act())
        .map(|(e, _)| e)
        .collect();
    acting.sort_by_key(|e| std::cmp::Reverse(world.get::<&Actor>(*e).map(|a| a.energy).unwrap_or(0)));

    for entity in acting {
        if !alive(world, player) {
            break;
        }
        let Ok(pos) = world.get::<&Position>(entity).map(|p| *p) else {
            continue;
        };
        let behavior = choose_behavior(world, map, entity, pos, player_pos, config);
        if let Ok(mut ai) = world.get::<&mut Ai>(entity) {
            ai.behavior = behavior;
            ai.target = matches!(behavior, AiBehavior::Chase | AiBehavior::Flee).then_some(player);
        }

        match behavior {
            AiBehavior::Chase => {
                if pos.euclidean(&player_pos) <= config.melee_range {
                    events.extend(combat::attack(world, entity, player, dice, level));
                } else if !step_toward(world, map, entity, pos, player_pos) {
                    wander(world, map, entity, pos, dice);
                }
            }
            AiBehavior::Flee => {
                let dx = (pos.x - player_pos.x).signum();
                let dy = (pos.y - player_pos.y).signum();
                let away = pos.offset(dx, dy);
                if !matches!(movement::move_to(world, map, entity, pos, away), MoveResult::Moved(_)) {
                    wander(world, map, entity, pos, dice);
                }
            }
            AiBehavior::Wander | AiBehavior::Patrol => wander(world, map, entity, pos, dice),
            AiBehavior::Idle => {}
        }
        actor::consume_energy(world, entity);
    }
    events
}

fn alive(world: &World, entity: Entity) -> bool {
    world.get::<&Health>(entity).map(|h| h.is_alive()).unwrap_or(false)
}

fn choose_behavior(
    world: &World,
    map: &DungeonMap,
    entity: Entity,
    pos: Position,
    player_pos: Position,
    config: &GameConfig,
) -> AiBehavior {
    let current = world.get::<&Ai>(entity).map(|a| a.behavior).unwrap_or_default();
    if current == AiBehavior::Idle {
        return current;
    }
    let distance = pos.chebyshev(&player_pos);
    let hp = world.get::<&Health>(entity).map(|h| h.percentage()).unwrap_or(1.0);

    if distance <= config.chase_range && hp < FLEE_THRESHOLD {
        AiBehavior::Flee
    } else if distance <= config.chase_range && map.is_visible(pos) {
        AiBehavior::Chase
    } else if current == AiBehavior::Chase && distance <= config.chase_range {
        // keep pursuing briefly out of sight
        AiBehavior::Chase
    } else if current == AiBehavior::Patrol {
        AiBehavior::Patrol
    } else {
        AiBehavior::Wander
    }
}

/// Take the first step of an A* path; false if no path or the step is taken
fn step_toward(world: &mut World, map: &DungeonMap, entity: Entity, from: Position, goal: Position) -> bool {
    let blocked = |p: Position| p != goal && movement::blocker_at(world, p).is_some();
    let Some(path) = find_path(map, from, goal, blocked) else {
        return false;
    };
    match path.first() {
        Some(next) if *next != goal => {
            matches!(movement::move_to(world, map, entity, from, *next), MoveResult::Moved(_))
        }
        _ => false,
    }
}

fn wander(world: &mut World, map: &DungeonMap, entity: Entity, from: Position, dice: &mut DiceRoller) {
    let options: Vec<Position> = Direction::ALL
        .iter()
        .map(|d| from.step(*d))
        .filter(|p| !movement::is_blocked(world, map, *p))
        .collect();
    if let Some(to) = dice.choose(&options) {
        movement::move_to(world, map, entity, from, *to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BlocksMovement, Combat, Name};
    use crate::map::dungeon::Tile;

    fn setup() -> (World, DungeonMap, Entity) {
        let mut map = DungeonMap::new(20, 20);
        map.fill(Tile::Floor);
        map.create_perimeter_walls();
        let mut world = World::new();
        let player = world.spawn((
            Player,
            Name("Hero".into()),
            Position::new(5, 5),
            Health::new(100),
            Combat::new(10, 5),
            Actor::new(100),
            BlocksMovement,
        ));
        map.compute_fov(Position::new(5, 5), 8);
        (world, map, player)
    }

    fn enemy(world: &mut World, at: Position) -> Entity {
        let mut actor = Actor::new(100);
        actor.energy = 100;
        world.spawn((
            Name("Orc".into()),
            at,
            Health::new(30),
            Combat::new(8, 2),
            actor,
            Ai::default(),
            BlocksMovement,
        ))
    }

    #[test]
    fn test_visible_enemy_closes_distance() {
        let (mut world, map, player) = setup();
        let orc = enemy(&mut world, Position::new(9, 5));
        let mut dice = DiceRoller::seeded(2);
        run_ai(&mut world, &map, player, &mut dice, 1, &GameConfig::default());
        let pos = *world.get::<&Position>(orc).unwrap();
        assert_eq!(pos.chebyshev(&Position::new(5, 5)), 3);
        assert_eq!(world.get::<&Ai>(orc).unwrap().behavior, AiBehavior::Chase);
        assert_eq!(world.get::<&Actor>(orc).unwrap().energy, 0);
    }

    #[test]
    fn test_adjacent_enemy_attacks() {
        let (mut world, map, player) = setup();
        enemy(&mut world, Position::new(6, 6));
        let mut dice = DiceRoller::seeded(2);
        let events = run_ai(&mut world, &map, player, &mut dice, 1, &GameConfig::default());
        assert!(events.iter().any(|e| matches!(e, GameEvent::Combat(_))));
    }

    #[test]
    fn test_wounded_enemy_flees() {
        let (mut world, map, player) = setup();
        let orc = enemy(&mut world, Position::new(7, 5));
        world.get::<&mut Health>(orc).unwrap().current = 3;
        let mut dice = DiceRoller::seeded(2);
        run_ai(&mut world, &map, player, &mut dice, 1, &GameConfig::default());
        assert_eq!(*world.get::<&Position>(orc).unwrap(), Position::new(8, 5));
    }

    #[test]
    fn test_idle_enemy_stays_put() {
        let (mut world, map, player) = setup();
        let orc = enemy(&mut world, Position::new(12, 12));
        world.get::<&mut Ai>(orc).unwrap().behavior = AiBehavior::Idle;
        let mut dice = DiceRoller::seeded(2);
        run_ai(&mut world, &map, player, &mut dice, 1, &GameConfig::default());
        assert_eq!(*world.get::<&Position>(orc).unwrap(), Position::new(12, 12));
    }
}
