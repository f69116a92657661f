use clap::{builder::ValueParser, Arg, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Numeric levels run from 0 (error) to 4 (trace).
const MAX_VERBOSITY: u8 = 4;

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= MAX_VERBOSITY {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("FASTCAS_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(value: &str) -> Result<u8, clap::Error> {
        Command::new("fastcas")
            .arg(
                Arg::new(ARG_VERBOSITY)
                    .long("level")
                    .value_parser(validator_log_level()),
            )
            .try_get_matches_from(vec!["fastcas", "--level", value])
            .map(|matches| matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0))
    }

    #[test]
    fn numeric_levels_stop_at_trace() {
        assert_eq!(level("4").ok(), Some(4));
        assert_eq!(level("TRACE").ok(), Some(4));
        assert!(level("5").is_err());
        assert!(level("verbose").is_err());
    }
}
