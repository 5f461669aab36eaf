use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// A `key=value` (or `key:value`) config override, with any `rc.` prefix
/// removed from the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcOverride {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for RcOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .or_else(|| s.split_once(':'))
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        let key = key.trim();
        let key = key.strip_prefix("rc.").unwrap_or(key);
        if key.is_empty() {
            return Err(anyhow!("override has no key: {s}"));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "qtm",
    version,
    about = "Quest log: tasks grouped under quests",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    /// More log output on stderr (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Less log output on stderr (repeatable)
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    /// Override a config key for this run
    #[arg(long = "rc", value_name = "KEY=VALUE", action = ArgAction::Append)]
    pub rc_overrides: Vec<RcOverride>,

    /// Read this rc file instead of ~/.questrc
    #[arg(long = "questrc", value_name = "PATH")]
    pub questrc: Option<PathBuf>,

    /// Directory holding the quest log snapshot
    #[arg(long = "data", value_name = "DIR")]
    pub data: Option<PathBuf>,

    /// `[targets...] command [args...]`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

/// Default log filter for the `-v`/`-q` counts; `-q` wins.
pub fn log_level(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (2.., _) => "error",
        (1, _) | (0, 0) => "warn",
        (0, 1) => "info",
        (0, 2) => "debug",
        (0, _) => "trace",
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level(verbose, quiet))
            .map_err(|e| anyhow!("invalid log filter: {e}"))?,
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
    if let Err(err) = installed {
        debug!(error = %err, "tracing subscriber already installed");
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<RcOverride>,
}

/// Pulls positional `rc.key=value` / `rc.key:value` words out of `argv`
/// before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned_args = Vec::with_capacity(raw.len());
    let mut rc_overrides = Vec::new();

    for (idx, arg) in raw.iter().enumerate() {
        let positional = (idx > 0)
            .then(|| arg.to_str())
            .flatten()
            .filter(|word| word.starts_with("rc."))
            .and_then(|word| word.parse::<RcOverride>().ok());
        match positional {
            Some(rc) => {
                debug!(key = %rc.key, value = %rc.value, "positional rc override");
                rc_overrides.push(rc);
            }
            None => cleaned_args.push(arg.clone()),
        }
    }

    Ok(PreprocessedArgs {
        cleaned_args,
        rc_overrides,
    })
}

#[derive(Debug, Clone)]
pub struct Invocation {
    /// Task or quest references written before the command.
    pub targets: Vec<String>,
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        let default_command = cfg
            .get("default.command")
            .unwrap_or_else(|| "list".to_string());

        if tokens.is_empty() {
            debug!(command = %default_command, "no explicit command, using default");
            return Ok(Self {
                targets: vec![],
                command: default_command,
                command_args: vec![],
            });
        }

        let Some((targets, command, command_args)) = split_targets_command(&tokens) else {
            warn!(tokens = ?tokens, "no command detected");
            return Err(anyhow!(
                "no command found in: {}; try `qtm help`",
                tokens.join(" ")
            ));
        };

        Ok(Self {
            targets,
            command,
            command_args,
        })
    }

    /// Targets before the command, or else the command arguments.
    pub fn references(&self) -> &[String] {
        if self.targets.is_empty() {
            &self.command_args
        } else {
            &self.targets
        }
    }
}

fn split_targets_command(tokens: &[String]) -> Option<(Vec<String>, String, Vec<String>)> {
    let known = crate::commands::known_command_names();

    for i in 0..tokens.len() {
        let token = tokens[i].as_str();
        if let Some(full) = crate::commands::expand_command_abbrev(token, &known) {
            debug!(
                token = %token,
                expanded = %full,
                split_index = i,
                "resolved command token"
            );
            return Some((
                tokens[..i].to_vec(),
                full.to_string(),
                tokens[i + 1..].to_vec(),
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::{Invocation, RcOverride, log_level, preprocess_args};
    use crate::config::Config;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn empty_invocation_uses_default_command() {
        let inv = Invocation::parse(&Config::default(), vec![]).expect("parse");
        assert_eq!(inv.command, "list");
        assert!(inv.targets.is_empty());
    }

    #[test]
    fn targets_may_precede_the_command() {
        let inv = Invocation::parse(&Config::default(), os(&["3", "don"])).expect("parse");
        assert_eq!(inv.command, "done");
        assert_eq!(inv.references(), ["3".to_string()]);

        let inv = Invocation::parse(&Config::default(), os(&["done", "3"])).expect("parse");
        assert_eq!(inv.references(), ["3".to_string()]);
    }

    #[test]
    fn ambiguous_or_unknown_command_is_an_error() {
        assert!(Invocation::parse(&Config::default(), os(&["d"])).is_err());
        assert!(Invocation::parse(&Config::default(), os(&["frobnicate"])).is_err());
    }

    #[test]
    fn positional_rc_overrides_are_captured() {
        let pre = preprocess_args(&os(&["qtm", "rc.autosave:off", "list"])).expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["qtm", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![RcOverride {
                key: "autosave".to_string(),
                value: "off".to_string(),
            }]
        );
    }

    #[test]
    fn rc_override_accepts_both_separators() {
        let rc: RcOverride = "rc.timezone=Europe/Paris".parse().expect("equals");
        assert_eq!(rc.key, "timezone");
        assert_eq!(rc.value, "Europe/Paris");

        let rc: RcOverride = "color:off".parse().expect("colon");
        assert_eq!((rc.key.as_str(), rc.value.as_str()), ("color", "off"));

        assert!("autosave".parse::<RcOverride>().is_err());
        assert!("rc.=on".parse::<RcOverride>().is_err());
    }

    #[test]
    fn quiet_wins_over_verbose() {
        assert_eq!(log_level(0, 0), "warn");
        assert_eq!(log_level(2, 0), "debug");
        assert_eq!(log_level(5, 0), "trace");
        assert_eq!(log_level(3, 1), "warn");
        assert_eq!(log_level(0, 2), "error");
    }
}
