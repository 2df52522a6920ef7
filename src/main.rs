//! LablabBean - entry point
//!
//! Loads the configuration, brings up the plugin host, resolves gameplay
//! services from it and runs either the terminal UI or a headless session
//! driven by the autopilot.

use std::io::{self, stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_lot::Mutex;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use lablab_bean::ai::{AvatarSpoke, IntelligenceAgent, IntelligentAiSystem, LlmAgent, RuleBasedAgent};
use lablab_bean::core::config::{set_config, GameConfig};
use lablab_bean::core::error::{LablabError, Result};
use lablab_bean::game::{Autopilot, GameMode, GameServices, GameStateManager, LogSeverity};
use lablab_bean::llm::LlmClient;
use lablab_bean::plugins::builtin::{self, FrontEnd};
use lablab_bean::plugins::PluginHost;
use lablab_bean::ui::{render, App};

/// Seconds of avatar time that pass per game turn
const AI_SECONDS_PER_TURN: f32 = 1.0;

#[derive(Parser, Debug)]
#[command(name = "lablab-bean", about = "Terminal dungeon crawler")]
struct Args {
    /// Dungeon seed; random when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where saves, logs and localization files live
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Extra directory of plugin manifests
    #[arg(long)]
    plugins_dir: Option<PathBuf>,

    /// Plugin profile; defaults to "console", or "headless" with --headless
    #[arg(long)]
    profile: Option<String>,

    /// Run the autopilot without a terminal UI
    #[arg(long)]
    headless: bool,

    /// Turns to play in headless mode
    #[arg(long, default_value_t = 500)]
    turns: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    std::fs::create_dir_all(&config.data_dir)?;
    let profile = args
        .profile
        .clone()
        .unwrap_or_else(|| if args.headless { "headless" } else { "console" }.to_string());
    init_logging(&config, profile == "headless")?;
    if set_config(config.clone()).is_err() {
        tracing::warn!("Global config was already set");
    }

    tracing::info!("LablabBean starting...");

    // AI actors, the scheduler and diagnostics all need a runtime
    let rt = Runtime::new()?;
    let _guard = rt.enter();

    let mut host = PluginHost::new(&config, builtin::catalog()).with_profile(&profile);
    if let Some(dir) = &args.plugins_dir {
        let found = host.discover(dir)?;
        tracing::info!(count = found.len(), dir = %dir.display(), "Discovered plugin manifests");
    }
    let loaded = host.load_all()?;
    tracing::info!(loaded, profile = %profile, "Plugins loaded");
    let interactive = host
        .registry()
        .resolve::<FrontEnd>()
        .map(|f| f.interactive)
        .unwrap_or(!args.headless);

    let services = GameServices::from_registry(host.registry(), host.events().clone())?;
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut game = GameStateManager::new(config, services);
    game.new_game(seed)?;

    let agent: Arc<dyn IntelligenceAgent> = match LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(model = client.model(), "Avatars use the LLM agent");
            Arc::new(LlmAgent::new(client))
        }
        Err(_) => {
            tracing::warn!("LLM_API_KEY not set - avatars use rule-based decisions");
            Arc::new(RuleBasedAgent)
        }
    };
    let mut avatars = IntelligentAiSystem::new(rt.handle().clone(), Some(agent), host.events().clone());

    // Avatar speech arrives on actor tasks; collect it for the log
    let speech: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = speech.clone();
    host.events().subscribe::<AvatarSpoke, _>(move |spoke| {
        sink.lock().push(format!("{}: \"{}\"", spoke.name, spoke.text));
        Ok(())
    });

    let mut session = Session {
        app: App::new(game, seed),
        avatars: &mut avatars,
        speech,
    };
    let result = if args.headless || !interactive {
        session.run_headless(args.turns)
    } else {
        session.run_tui()
    };

    rt.block_on(avatars.shutdown());
    host.unload_all();
    tracing::info!("LablabBean stopped");
    result
}

/// Logs go to a file in the data directory so they never draw over the UI
fn init_logging(config: &GameConfig, headless: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lablab_bean=info"));
    if headless {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
    } else {
        let file = std::fs::File::create(config.data_dir.join("lablab-bean.log"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}

struct Session<'a> {
    app: App,
    avatars: &'a mut IntelligentAiSystem,
    speech: Arc<Mutex<Vec<String>>>,
}

impl Session<'_> {
    /// Tick the avatars and copy what they said into the activity log
    fn after_turn(&mut self) {
        let game = self.app.game_mut();
        self.avatars.update(game.world_mut(), AI_SECONDS_PER_TURN);
        let lines: Vec<String> = self.speech.lock().drain(..).collect();
        for line in lines {
            game.note(line, LogSeverity::Info);
        }
    }

    fn run_tui(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut out = stdout();
        execute!(out, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(out))?;

        let result = self.tui_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    fn tui_loop<B: ratatui::backend::Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        while !self.app.should_quit() {
            terminal.draw(|f| render(f, &self.app))?;
            if !event::poll(Duration::from_millis(100))? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                match self.app.handle_key(key) {
                    Ok(true) => self.after_turn(),
                    Ok(false) => {}
                    Err(LablabError::InvalidAction(msg)) => self.app.game_mut().note(msg, LogSeverity::Warning),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    fn run_headless(&mut self, turns: u32) -> Result<()> {
        let mut pilot = Autopilot::new(self.app.seed());
        let mut printed = self.app.game().log().sequence();
        for _ in 0..turns {
            if self.app.game().mode() != GameMode::Playing {
                break;
            }
            let action = pilot.next_action(self.app.game());
            if self.app.game_mut().handle_player_action(action)? {
                self.after_turn();
            }
            for entry in self.app.game().log().since(printed) {
                println!("[{:>4}] {}", entry.turn, entry.message);
            }
            printed = self.app.game().log().sequence();
        }
        let game = self.app.game();
        println!(
            "Finished: {} after {} turns, depth {}, {} kills",
            game.mode().label(),
            game.turn(),
            game.levels().personal_best(),
            game.kills()
        );
        Ok(())
    }
}
