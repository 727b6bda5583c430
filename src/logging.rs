//! Global tracing subscriber setup.

use crate::error::NodeError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parse a log level name. Besides the usual names this accepts `warning`
/// and the `dpanic`/`panic`/`fatal` levels, which all log at error.
pub fn parse_level(name: &str) -> Result<Level, NodeError> {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" | "dpanic" | "panic" | "fatal" => Ok(Level::ERROR),
        _ => Err(NodeError::InvalidLogLevel(name.to_string())),
    }
}

/// Install the process-wide subscriber. Fails if one is already set.
pub fn init_logging(level: Level) -> Result<(), NodeError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(!cfg!(windows))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| NodeError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_names() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("warning").unwrap(), Level::WARN);
        for name in ["dpanic", "panic", "fatal"] {
            assert_eq!(parse_level(name).unwrap(), Level::ERROR);
        }
        assert!(matches!(
            parse_level("verbose"),
            Err(NodeError::InvalidLogLevel(n)) if n == "verbose"
        ));
    }
}
