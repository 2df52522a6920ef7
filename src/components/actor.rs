//! Components shared by every living thing in the dungeon

use serde::{Deserialize, Serialize};

use crate::core::types::GlyphColor;

/// Marks the hero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name(pub String);

/// How an entity is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renderable {
    pub glyph: char,
    pub fg: GlyphColor,
    pub bg: GlyphColor,
    /// Higher layers are drawn on top
    pub layer: u8,
}

impl Renderable {
    pub const LAYER_ITEM: u8 = 1;
    pub const LAYER_CORPSE: u8 = 0;
    pub const LAYER_ACTOR: u8 = 2;

    pub fn new(glyph: char, fg: GlyphColor, layer: u8) -> Self {
        Self {
            glyph,
            fg,
            bg: GlyphColor::Black,
            layer,
        }
    }
}

/// Entity is currently inside the player's field of view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visible;

/// Other entities may not share this tile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksMovement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub current: i32,
    pub maximum: i32,
}

impl Health {
    pub fn new(maximum: i32) -> Self {
        Self {
            current: maximum,
            maximum,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.current > 0
    }

    pub fn is_full(&self) -> bool {
        self.current >= self.maximum
    }

    pub fn percentage(&self) -> f32 {
        if self.maximum <= 0 {
            0.0
        } else {
            self.current as f32 / self.maximum as f32
        }
    }

    /// Heal up to maximum, returning the amount actually restored
    pub fn heal(&mut self, amount: i32) -> i32 {
        let before = self.current;
        self.current = (self.current + amount.max(0)).min(self.maximum);
        self.current - before
    }

    /// Apply damage down to zero, returning the amount actually taken
    pub fn damage(&mut self, amount: i32) -> i32 {
        let taken = amount.max(0).min(self.current);
        self.current -= taken;
        taken
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combat {
    pub attack: i32,
    pub defense: i32,
}

impl Combat {
    pub fn new(attack: i32, defense: i32) -> Self {
        Self { attack, defense }
    }
}

/// Unmodified stats before equipment and status effects
///
/// Level ups raise these; `Combat` and `Actor::speed` are recomputed
/// from them whenever equipment changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseStats {
    pub attack: i32,
    pub defense: i32,
    pub speed: i32,
}

impl BaseStats {
    pub fn new(attack: i32, defense: i32, speed: i32) -> Self {
        Self {
            attack,
            defense,
            speed,
        }
    }
}

impl Default for BaseStats {
    fn default() -> Self {
        Self::new(10, 5, 100)
    }
}

/// Energy-based turn scheduling
///
/// Each tick an actor gains `speed` energy; it may act once it holds
/// at least [`Actor::ACTION_COST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub speed: i32,
    pub energy: i32,
}

impl Actor {
    pub const ACTION_COST: i32 = 100;

    pub fn new(speed: i32) -> Self {
        Self { speed, energy: 0 }
    }

    pub fn can_act(&self) -> bool {
        self.energy >= Self::ACTION_COST
    }

    pub fn accumulate(&mut self, speed: i32) {
        self.energy += speed.max(1);
    }

    pub fn consume(&mut self) {
        self.energy -= Self::ACTION_COST;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnemyKind {
    Goblin,
    Orc,
    Troll,
    Skeleton,
}

impl EnemyKind {
    pub const ALL: [EnemyKind; 4] = [
        EnemyKind::Goblin,
        EnemyKind::Orc,
        EnemyKind::Troll,
        EnemyKind::Skeleton,
    ];

    pub fn glyph(&self) -> char {
        match self {
            EnemyKind::Goblin => 'g',
            EnemyKind::Orc => 'o',
            EnemyKind::Troll => 'T',
            EnemyKind::Skeleton => 's',
        }
    }

    pub fn color(&self) -> GlyphColor {
        match self {
            EnemyKind::Goblin => GlyphColor::Green,
            EnemyKind::Orc => GlyphColor::LightRed,
            EnemyKind::Troll => GlyphColor::Brown,
            EnemyKind::Skeleton => GlyphColor::Gray,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EnemyKind::Goblin => "Goblin",
            EnemyKind::Orc => "Orc",
            EnemyKind::Troll => "Troll",
            EnemyKind::Skeleton => "Skeleton",
        }
    }

    /// Experience granted for a kill before depth scaling
    pub fn base_xp(&self) -> i64 {
        match self {
            EnemyKind::Goblin => 10,
            EnemyKind::Skeleton => 15,
            EnemyKind::Orc => 20,
            EnemyKind::Troll => 35,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enemy {
    pub kind: EnemyKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiBehavior {
    #[default]
    Wander,
    Chase,
    Flee,
    Patrol,
    Idle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ai {
    pub behavior: AiBehavior,
    pub target: Option<hecs::Entity>,
}

impl Ai {
    pub fn new(behavior: AiBehavior) -> Self {
        Self {
            behavior,
            target: None,
        }
    }
}

/// Remains of a dead creature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Corpse;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_clamps() {
        let mut hp = Health::new(30);
        assert_eq!(hp.damage(50), 30);
        assert!(!hp.is_alive());
        assert_eq!(hp.heal(100), 30);
        assert!(hp.is_full());
        assert_eq!(hp.damage(-5), 0);
    }

    #[test]
    fn test_actor_energy() {
        let mut actor = Actor::new(80);
        actor.accumulate(80);
        assert!(!actor.can_act());
        actor.accumulate(80);
        assert!(actor.can_act());
        actor.consume();
        assert_eq!(actor.energy, 60);
    }
}
