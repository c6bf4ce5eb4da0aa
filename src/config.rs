//! CLI argument parsing and validation (§6b).
//!
//! Grounded on the teacher's own `config.rs`: a `Config` struct, a
//! `thiserror`-derived `ConfigError`, and a `validate()` pass run once before
//! the event loop starts — replacing its TOML-file load with a hand-rolled
//! `std::env::args()` parse, since this peer's entire configuration surface
//! is CLI flags (no config file, matching the grounding codebase's lack of a
//! CLI-parsing dependency).

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required flag -{0}")]
    MissingFlag(char),

    #[error("flag -{flag} expects a value")]
    MissingValue { flag: char },

    #[error("invalid value for -{flag}: {reason}")]
    Validation { flag: char, reason: String },

    #[error("unrecognized argument: {0}")]
    UnrecognizedArgument(String),

    #[error("identity {0} is not present in the peer roster")]
    UnknownIdentity(u32),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub roster_path: PathBuf,
    pub fragment_path: PathBuf,
    pub max_send: usize,
    pub identity: u32,
    pub fixed_timeout: Option<std::time::Duration>,
    pub verbosity: u8,
}

impl Config {
    /// Parses `args` (excluding argv[0]) per §6b.
    pub fn parse(args: &[String]) -> Result<Self, ConfigError> {
        let mut roster_path = None;
        let mut fragment_path = None;
        let mut max_send = None;
        let mut identity = None;
        let mut fixed_timeout = None;
        let mut verbosity = 0u8;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let flag = arg
                .strip_prefix('-')
                .and_then(|s| s.chars().next())
                .filter(|_| arg.len() == 2)
                .ok_or_else(|| ConfigError::UnrecognizedArgument(arg.clone()))?;

            let mut next_value = || {
                iter.next()
                    .cloned()
                    .ok_or(ConfigError::MissingValue { flag })
            };

            match flag {
                'p' => roster_path = Some(PathBuf::from(next_value()?)),
                'c' => fragment_path = Some(PathBuf::from(next_value()?)),
                'm' => {
                    let raw = next_value()?;
                    max_send = Some(raw.parse::<usize>().map_err(|_| ConfigError::Validation {
                        flag: 'm',
                        reason: format!("{raw} is not a valid positive integer"),
                    })?);
                }
                'i' => {
                    let raw = next_value()?;
                    identity = Some(raw.parse::<u32>().map_err(|_| ConfigError::Validation {
                        flag: 'i',
                        reason: format!("{raw} is not a valid peer id"),
                    })?);
                }
                't' => {
                    let raw = next_value()?;
                    let secs = raw.parse::<f64>().map_err(|_| ConfigError::Validation {
                        flag: 't',
                        reason: format!("{raw} is not a valid number of seconds"),
                    })?;
                    fixed_timeout = Some(std::time::Duration::from_secs_f64(secs));
                }
                'v' => {
                    let raw = next_value()?;
                    verbosity = raw.parse::<u8>().map_err(|_| ConfigError::Validation {
                        flag: 'v',
                        reason: format!("{raw} is not a valid verbosity level 0-3"),
                    })?;
                }
                other => return Err(ConfigError::UnrecognizedArgument(format!("-{other}"))),
            }
        }

        let config = Self {
            roster_path: roster_path.ok_or(ConfigError::MissingFlag('p'))?,
            fragment_path: fragment_path.ok_or(ConfigError::MissingFlag('c'))?,
            max_send: max_send.ok_or(ConfigError::MissingFlag('m'))?,
            identity: identity.ok_or(ConfigError::MissingFlag('i'))?,
            fixed_timeout,
            verbosity,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_send < 1 {
            return Err(ConfigError::Validation {
                flag: 'm',
                reason: "max-send must be >= 1".into(),
            });
        }
        if self.verbosity > 3 {
            return Err(ConfigError::Validation {
                flag: 'v',
                reason: "verbose level must be 0-3".into(),
            });
        }
        Ok(())
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Resolves the configured identity against a loaded roster's local address.
pub fn resolve_local_address(
    identity: u32,
    roster: &crate::files::Roster,
) -> Result<SocketAddr, ConfigError> {
    roster
        .get(identity)
        .ok_or(ConfigError::UnknownIdentity(identity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_all_flags() {
        let cfg = Config::parse(&args(&[
            "-p", "roster.txt", "-c", "frag.bin", "-m", "4", "-i", "1", "-t", "2.5", "-v", "2",
        ]))
        .unwrap();
        assert_eq!(cfg.max_send, 4);
        assert_eq!(cfg.identity, 1);
        assert_eq!(cfg.fixed_timeout, Some(std::time::Duration::from_secs_f64(2.5)));
        assert_eq!(cfg.verbosity, 2);
    }

    #[test]
    fn rejects_missing_required_flag() {
        let err = Config::parse(&args(&["-c", "frag.bin", "-m", "1", "-i", "1"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFlag('p')));
    }

    #[test]
    fn rejects_zero_max_send() {
        let err = Config::parse(&args(&[
            "-p", "roster.txt", "-c", "frag.bin", "-m", "0", "-i", "1",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { flag: 'm', .. }));
    }

    #[test]
    fn rejects_unrecognized_flag() {
        let err = Config::parse(&args(&["-z", "x"])).unwrap_err();
        assert!(matches!(err, ConfigError::UnrecognizedArgument(_)));
    }

    #[test]
    fn optional_flags_default_when_absent() {
        let cfg = Config::parse(&args(&[
            "-p", "roster.txt", "-c", "frag.bin", "-m", "1", "-i", "1",
        ]))
        .unwrap();
        assert_eq!(cfg.fixed_timeout, None);
        assert_eq!(cfg.verbosity, 0);
    }
}
