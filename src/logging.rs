use anyhow::{Result, anyhow};
use std::env;
use std::io;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

fn format_from(raw: Option<&str>) -> LogFormat {
    match raw.map(str::trim) {
        Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "warn" }
}

/// Installs the stderr subscriber. `FRAME_PATCH_LOG` takes an `EnvFilter`
/// directive and wins over `--verbose`.
pub fn init(verbose: bool) -> Result<()> {
    let filter = match env::var("FRAME_PATCH_LOG") {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::try_new(directive.trim())
            .map_err(|err| anyhow!("invalid FRAME_PATCH_LOG directive: {err}"))?,
        _ => EnvFilter::new(default_directive(verbose)),
    };
    let format = format_from(env::var("FRAME_PATCH_LOG_FORMAT").ok().as_deref());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_defaults_to_pretty() {
        assert_eq!(format_from(None), LogFormat::Pretty);
        assert_eq!(format_from(Some("plain")), LogFormat::Pretty);
        assert_eq!(format_from(Some(" JSON ")), LogFormat::Json);
    }

    #[test]
    fn verbose_lowers_default_level() {
        assert_eq!(default_directive(true), "debug");
        assert_eq!(default_directive(false), "warn");
    }
}
