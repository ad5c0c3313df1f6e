use calltrace_stack::SessionConfig;
use facet::Facet;
use figue as args;
use std::path::PathBuf;
use std::time::Duration;

mod render;
mod replay;
mod watch;

use render::RenderOptions;

type AnyResult<T> = Result<T, String>;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// Event log with one JSON event per line. Reads stdin when omitted.
    #[facet(args::named, default)]
    input: Option<String>,
    /// Render and discard the collected trees every N milliseconds.
    #[facet(args::named, default)]
    watch_ms: Option<u64>,
    #[facet(args::named, default)]
    no_verify_leaves: bool,
    /// Also list each thread's exceptions.
    #[facet(args::named, default)]
    exceptions: bool,
}

pub(crate) struct Config {
    pub input: Option<PathBuf>,
    pub watch: Option<Duration>,
    pub session: SessionConfig,
    pub render: RenderOptions,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> AnyResult<()> {
    let cli = parse_cli()?;
    let cfg = config_from_cli(&cli)?;
    match cfg.watch {
        Some(window) => watch::run(&cfg, window),
        None => replay::run(&cfg),
    }
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("calltrace")
                .description("Rebuild per-thread call trees from a recorded event log")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

fn config_from_cli(cli: &Cli) -> AnyResult<Config> {
    let input = cli
        .input
        .clone()
        .or_else(|| std::env::var("CALLTRACE_INPUT").ok())
        .filter(|path| path != "-")
        .map(PathBuf::from);

    let watch_ms = match cli.watch_ms {
        Some(ms) => Some(ms),
        None => match std::env::var("CALLTRACE_WATCH_MS") {
            Ok(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|e| format!("invalid CALLTRACE_WATCH_MS {raw:?}: {e}"))?,
            ),
            Err(_) => None,
        },
    };
    if watch_ms == Some(0) {
        return Err("watch window must be at least 1ms".to_owned());
    }

    Ok(Config {
        input,
        watch: watch_ms.map(Duration::from_millis),
        session: SessionConfig {
            verify_leaves: !cli.no_verify_leaves,
            ..SessionConfig::default()
        },
        render: RenderOptions {
            exceptions: cli.exceptions,
        },
    })
}
