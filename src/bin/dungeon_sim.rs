//! Headless dungeon runs for balance checks
//!
//! Plays one or more seeds with the autopilot and prints a JSON summary
//! per run. Runs are independent and execute in parallel.
//!
//! ```bash
//! dungeon_sim --turns 2000 --seed 7 --runs 16
//! ```

use std::time::Instant;

use clap::Parser;
use rayon::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use lablab_bean::core::config::GameConfig;
use lablab_bean::core::error::Result;
use lablab_bean::game::{Autopilot, GameMode, GameServices, GameStateManager};

#[derive(Parser, Debug)]
#[command(name = "dungeon_sim", about = "Run scripted dungeon sessions and report outcomes")]
struct Args {
    /// Maximum player actions per run
    #[arg(long, default_value_t = 1000)]
    turns: u32,

    /// Seed of the first run; later runs use consecutive seeds
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 1)]
    runs: u32,

    /// TOML configuration file
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    seed: u64,
    outcome: &'static str,
    turns: u64,
    actions: u32,
    depth: u32,
    deepest: u32,
    kills: u32,
    level: u32,
    gold: i32,
    health: i32,
    elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
struct Report {
    runs: Vec<RunSummary>,
    victories: usize,
    deaths: usize,
    mean_depth: f64,
}

fn play(config: &GameConfig, seed: u64, max_actions: u32) -> Result<RunSummary> {
    let start = Instant::now();
    let mut game = GameStateManager::new(config.clone(), GameServices::with_defaults()?);
    game.new_game(seed)?;
    let mut pilot = Autopilot::new(seed);

    let mut actions = 0;
    while actions < max_actions && game.mode() == GameMode::Playing {
        let action = pilot.next_action(&game);
        game.handle_player_action(action)?;
        actions += 1;
    }

    let stats = game.player_snapshot();
    Ok(RunSummary {
        seed,
        outcome: game.mode().label(),
        turns: game.turn(),
        actions,
        depth: game.levels().current_level(),
        deepest: game.levels().personal_best(),
        kills: game.kills(),
        level: stats.as_ref().map_or(0, |s| s.level),
        gold: stats.as_ref().map_or(0, |s| s.gold),
        health: stats.as_ref().map_or(0, |s| s.health),
        elapsed_ms: start.elapsed().as_millis(),
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lablab_bean=warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };

    let seeds: Vec<u64> = (0..args.runs as u64).map(|i| args.seed.wrapping_add(i)).collect();
    let runs: Vec<RunSummary> = seeds
        .par_iter()
        .map(|&seed| play(&config, seed, args.turns))
        .collect::<Result<_>>()?;

    let victories = runs.iter().filter(|r| r.outcome == GameMode::Victory.label()).count();
    let deaths = runs.iter().filter(|r| r.outcome == GameMode::GameOver.label()).count();
    let mean_depth = if runs.is_empty() {
        0.0
    } else {
        runs.iter().map(|r| r.deepest as f64).sum::<f64>() / runs.len() as f64
    };
    let report = Report {
        runs,
        victories,
        deaths,
        mean_depth,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
