//! Energy-based turn order
//!
//! Every tick each actor gains energy equal to its effective speed. An
//! actor with at least [`Actor::ACTION_COST`] energy may act; acting
//! spends that cost. Faster actors therefore act more often.

use hecs::{Entity, World};

use crate::components::{Actor, Health, Player};
use crate::systems::status_effects;

/// Safety bound on ticks spent waiting for someone to be ready
const MAX_IDLE_TICKS: usize = 1000;

pub fn accumulate_energy(world: &mut World) {
    let actors: Vec<Entity> = world.query::<&Actor>().iter().map(|(e, _)| e).collect();
    for entity in actors {
        let speed = status_effects::effective_speed(world, entity).unwrap_or(1);
        if let Ok(mut actor) = world.get::<&mut Actor>(entity) {
            actor.accumulate(speed);
        }
    }
}

/// Living actors able to act, most energy first
pub fn ready_actors(world: &World) -> Vec<Entity> {
    let mut ready: Vec<(Entity, i32)> = world
        .query::<(&Actor, Option<&Health>)>()
        .iter()
        .filter(|(_, (a, h))| a.can_act() && h.map(|h| h.is_alive()).unwrap_or(true))
        .map(|(e, (a, _))| (e, a.energy))
        .collect();
    ready.sort_by(|a, b| b.1.cmp(&a.1));
    ready.into_iter().map(|(e, _)| e).collect()
}

pub fn can_act(world: &World, entity: Entity) -> bool {
    world.get::<&Actor>(entity).map(|a| a.can_act()).unwrap_or(false)
}

pub fn is_player_turn(world: &World, player: Entity) -> bool {
    world.get::<&Player>(player).is_ok() && can_act(world, player)
}

pub fn consume_energy(world: &mut World, entity: Entity) {
    if let Ok(mut actor) = world.get::<&mut Actor>(entity) {
        actor.consume();
    }
}

/// Advance time until at least one actor can act
///
/// Returns the number of ticks that elapsed.
pub fn process_tick(world: &mut World) -> usize {
    let mut ticks = 0;
    while ready_actors(world).is_empty() && ticks < MAX_IDLE_TICKS {
        if world.query::<&Actor>().iter().next().is_none() {
            break;
        }
        accumulate_energy(world);
        ticks += 1;
    }
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faster_actor_ready_first() {
        let mut world = World::new();
        let slow = world.spawn((Actor::new(50),));
        let fast = world.spawn((Actor::new(100),));
        let ticks = process_tick(&mut world);
        assert_eq!(ticks, 1);
        assert_eq!(ready_actors(&world), vec![fast]);
        consume_energy(&mut world, fast);
        process_tick(&mut world);
        let ready = ready_actors(&world);
        assert_eq!(ready.len(), 2);
        assert!(ready.contains(&slow));
    }

    #[test]
    fn test_player_turn() {
        let mut world = World::new();
        let player = world.spawn((Player, Actor::new(100)));
        assert!(!is_player_turn(&world, player));
        accumulate_energy(&mut world);
        assert!(is_player_turn(&world, player));
    }

    #[test]
    fn test_empty_world_does_not_spin() {
        let mut world = World::new();
        assert_eq!(process_tick(&mut world), 0);
    }
}
