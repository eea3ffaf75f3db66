use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_DIRECTIVES: &str = "info";

fn env_filter() -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::try_from_env("RESULTD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES))?)
}

/// Stdout carries the IPC protocol, so logs go to stderr.
pub fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()?;
    Ok(())
}
