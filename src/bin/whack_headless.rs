use clap::{Parser, ValueHint};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use whack_context::{
    FnObserver, ParticipantProfile, RecordSink, Session, SessionConfig, SessionEvent,
    SimulatedParticipant,
};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Run a whack-a-mole session against a simulated participant"
)]
struct Cli {
    /// JSON session configuration (defaults to the two-block demo)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Directory for the trial log
    #[arg(long, default_value = ".", value_hint = ValueHint::DirPath)]
    out_dir: PathBuf,

    /// Override the configured seed
    #[arg(long)]
    seed: Option<u64>,

    /// Run the unrecorded warm-up instead of the experiment
    #[arg(long)]
    warm_up: bool,

    /// Skip the countdown and rest waits
    #[arg(long)]
    fast: bool,

    /// Mean reaction time of the simulated participant
    #[arg(long, default_value_t = 550)]
    reaction_ms: u64,

    /// Probability the participant ignores a target
    #[arg(long, default_value_t = 0.1)]
    miss_rate: f64,

    /// Frame interval in milliseconds
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn main() {
    init_tracing();
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> whack_context::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::demo(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if cli.fast {
        config.countdown_ms = 0;
        config.rest_min_ms = 0;
    }

    let (sink, path) =
        RecordSink::create_for_subject(&cli.out_dir, &config.subject_id, config.compress)?;
    let participant_seed = config.seed.wrapping_add(1);
    let mut session = if cli.warm_up {
        Session::warm_up(config, sink)?
    } else {
        Session::new(config, sink)?
    };
    session.subscribe(Arc::new(FnObserver(|event: &SessionEvent| match event {
        SessionEvent::RestStarted { completed_block, score } => {
            info!(completed_block, score, "rest");
        }
        SessionEvent::Cancelled { completed_trials } => {
            info!(completed_trials, "cancelled");
        }
        _ => {}
    })));

    let profile = ParticipantProfile {
        step: Duration::from_millis(cli.frame_ms.max(1)),
        reaction_ms: cli.reaction_ms,
        miss_rate: cli.miss_rate.clamp(0.0, 1.0),
        ..ParticipantProfile::default()
    };
    let mut participant =
        SimulatedParticipant::new(profile, ChaCha8Rng::seed_from_u64(participant_seed));

    let phase = session.run(&mut participant)?;
    info!(
        ?phase,
        trials = session.completed_trials(),
        score = session.score(),
        output = %path.display(),
        "done"
    );
    Ok(())
}
