use color_eyre::eyre::{Result, eyre};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

/// Map `-v` occurrences to a max level. Quiet runs only surface warnings.
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber. Logs always go to stderr so that stdout
/// carries nothing but the report.
pub fn init_tracing(verbosity: u8, json: bool) -> Result<()> {
    let level = level_for(verbosity);
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder
            .with_ansi(false)
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| eyre!("failed to set tracing subscriber: {e}"))
}
