//! Avatar actors attached to a live game: townsfolk get actors, answer
//! requests and report speech on the event bus.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lablab_bean::ai::{AvatarKind, AvatarSpoke, IntelligentAi, IntelligentAiSystem, RuleBasedAgent};
use lablab_bean::core::config::GameConfig;
use lablab_bean::game::{GameServices, GameStateManager};
use lablab_bean::plugins::EventBus;
use tokio::runtime::Handle;

fn started(seed: u64) -> GameStateManager {
    let mut game = GameStateManager::new(GameConfig::default(), GameServices::with_defaults().unwrap());
    game.new_game(seed).unwrap();
    game
}

#[tokio::test]
async fn test_townsfolk_get_actors() {
    let mut game = started(42);
    let events = Arc::new(EventBus::new());
    let mut avatars = IntelligentAiSystem::new(Handle::current(), Some(Arc::new(RuleBasedAgent)), events);

    avatars.update(game.world_mut(), 1.0);
    let expected = game.world().query::<&IntelligentAi>().iter().count();
    assert!(expected > 0);
    assert_eq!(avatars.actor_count(), expected);

    avatars.shutdown().await;
    assert_eq!(avatars.actor_count(), 0);
}

#[tokio::test]
async fn test_elder_answers_and_speech_is_published() {
    let mut game = started(8);
    let events = Arc::new(EventBus::new());
    let spoken = Arc::new(AtomicUsize::new(0));
    let counter = spoken.clone();
    events.subscribe::<AvatarSpoke, _>(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let mut avatars = IntelligentAiSystem::new(Handle::current(), Some(Arc::new(RuleBasedAgent)), events);
    avatars.update(game.world_mut(), 1.0);

    let elder = game.services().npcs.find_npc(game.world(), "elder").unwrap();
    let handle = avatars.handle(elder).unwrap();
    assert_eq!(handle.kind(), AvatarKind::Npc);

    let reply = handle.talk("hero", "the goblins").await.unwrap();
    assert!(!reply.text.is_empty());
    assert_eq!(spoken.load(Ordering::SeqCst), 1);

    let state = handle.state().await.unwrap();
    assert!(state.memory_count >= 1);

    avatars.shutdown().await;
}

#[tokio::test]
async fn test_despawned_npc_loses_its_actor() {
    let mut game = started(8);
    let mut avatars = IntelligentAiSystem::new(Handle::current(), None, Arc::new(EventBus::new()));
    avatars.update(game.world_mut(), 1.0);
    let before = avatars.actor_count();

    let elder = game.services().npcs.find_npc(game.world(), "elder").unwrap();
    game.world_mut().despawn(elder).unwrap();
    avatars.update(game.world_mut(), 1.0);
    assert_eq!(avatars.actor_count(), before - 1);

    avatars.shutdown().await;
}
