use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use pulse_core::{
    ConfigManager, MetronomeModule, ModuleEvent, ModuleId, ModuleManager, ModuleMessage,
    SyncOutputModule, TrackerSettings,
};
use pulse_tracker::{BeatEngine, ClickTrackConfig, ClickTrackEngine, TapEngine, TrackerModule};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Simulated click track
    Click,
    /// One beat per line on stdin
    Tap,
}

/// Live tempo tracking with a phase-locked metronome.
#[derive(Parser, Debug)]
#[command(name = "pulse")]
#[command(about = "Beat tracking and metronome sync")]
struct Args {
    /// Settings file (default: pulse.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long, default_value = "false")]
    save_config: bool,

    /// Where beats come from
    #[arg(long, value_enum, default_value = "click")]
    source: SourceKind,

    /// Tempo of the simulated click track
    #[arg(long, default_value = "120")]
    click_bpm: f64,

    /// Random timing error applied to each click, in milliseconds
    #[arg(long, default_value = "0")]
    jitter_ms: f64,

    /// Probability that a click is missed by the detector
    #[arg(long, default_value = "0")]
    dropout: f64,

    /// Number of clicks before the simulated track ends
    #[arg(long)]
    beats: Option<u64>,

    /// Seed for the simulated detector
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Make the simulated detector fail after this many clicks
    #[arg(long)]
    fail_after: Option<u64>,

    #[arg(long)]
    min_bpm: Option<f64>,

    #[arg(long)]
    max_bpm: Option<f64>,

    /// Offset added to every metronome tick, in milliseconds
    #[arg(long)]
    skew_ms: Option<f64>,

    /// Length of the metronome step sequence
    #[arg(long)]
    max_steps: Option<usize>,

    /// Start the metronome at this tempo before any beat is detected
    #[arg(long)]
    initial_bpm: Option<f64>,

    /// Stop after this many seconds
    #[arg(long)]
    run_secs: Option<f64>,
}

impl Args {
    fn apply_overrides(&self, settings: &mut TrackerSettings) {
        if let Some(min_bpm) = self.min_bpm {
            settings.min_bpm = min_bpm;
        }
        if let Some(max_bpm) = self.max_bpm {
            settings.max_bpm = max_bpm;
        }
        if let Some(skew_ms) = self.skew_ms {
            settings.skew_ms = skew_ms;
        }
        if let Some(max_steps) = self.max_steps {
            settings.max_steps = max_steps;
        }
    }

    fn run_limit(&self) -> anyhow::Result<Option<Duration>> {
        self.run_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("invalid --run-secs {}", secs))
            })
            .transpose()
    }

    fn engine(&self) -> Box<dyn BeatEngine> {
        match self.source {
            SourceKind::Click => Box::new(ClickTrackEngine::new(ClickTrackConfig {
                bpm: self.click_bpm,
                jitter_ms: self.jitter_ms,
                dropout: self.dropout,
                beats: self.beats,
                seed: self.seed,
                fail_after: self.fail_after,
                ..Default::default()
            })),
            SourceKind::Tap => Box::new(TapEngine::stdin()),
        }
    }
}

/// Forward module events to the modules that consume them.
async fn route_event(manager: &ModuleManager, event: ModuleEvent) {
    let targets: &[ModuleId] = match event {
        ModuleEvent::Prediction(_) => &[ModuleId::Metronome, ModuleId::SyncOutput],
        ModuleEvent::Tick(_) => &[ModuleId::SyncOutput],
        _ => &[],
    };
    for &target in targets {
        if let Err(e) = manager.send_to_module(target, event.clone()).await {
            log::debug!("{}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ConfigManager::new(args.config.clone());
    let mut settings = config
        .load()
        .with_context(|| format!("loading {}", config.config_path().display()))?;
    args.apply_overrides(&mut settings);
    settings.validate()?;
    let run_limit = args.run_limit()?;
    if args.save_config {
        config.update_settings(settings.clone())?;
        log::info!("Saved settings to {}", config.config_path().display());
    }

    log::info!(
        "Tracking {:.0}-{:.0} BPM, {} steps, skew {:.1}ms",
        settings.min_bpm,
        settings.max_bpm,
        settings.max_steps,
        settings.skew_ms
    );

    let mut manager = ModuleManager::new();
    manager.register_module(Box::new(TrackerModule::new(&settings, args.engine())));
    let mut metronome = MetronomeModule::new(&settings);
    if let Some(bpm) = args.initial_bpm {
        metronome = metronome.with_initial_bpm(bpm);
    }
    manager.register_module(Box::new(metronome));
    manager.register_module(Box::new(SyncOutputModule::stdout()));

    manager
        .initialize()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    manager
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let mut messages = manager
        .take_message_receiver()
        .context("module message receiver already taken")?;

    let run_limit = async {
        match run_limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(run_limit);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut failure = None;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Interrupted, shutting down");
                break;
            }
            _ = &mut run_limit => {
                log::info!("Run time elapsed, shutting down");
                break;
            }
            message = messages.recv() => {
                match message {
                    Some(ModuleMessage::Event(event)) => route_event(&manager, event).await,
                    Some(ModuleMessage::Status(status)) => log::info!("Module status: {}", status),
                    Some(ModuleMessage::Error(error)) => {
                        log::error!("Module error: {}", error);
                        failure = Some(error);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    manager
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    for (id, status) in manager.get_status() {
        log::debug!("{:?} status: {:?}", id, status);
    }

    if let Some(error) = failure {
        anyhow::bail!(error);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("pulse").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_run_limit() {
        assert_eq!(parse(&[]).run_limit().unwrap(), None);
        assert_eq!(
            parse(&["--run-secs", "1.5"]).run_limit().unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert!(parse(&["--run-secs", "inf"]).run_limit().is_err());
        assert!(parse(&["--run-secs=-2"]).run_limit().is_err());
    }

    #[test]
    fn test_overrides_apply_to_settings() {
        let mut settings = TrackerSettings::default();
        parse(&["--min-bpm", "70", "--max-steps", "16"]).apply_overrides(&mut settings);
        assert_eq!(settings.min_bpm, 70.0);
        assert_eq!(settings.max_steps, 16);
        assert_eq!(settings.max_bpm, TrackerSettings::default().max_bpm);
    }
}
