use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

/// `NAME=DATE` pair for a card on the command line. The last `=` splits,
/// so names may contain one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardArg {
    pub name: String,
    pub due: String,
}

impl std::str::FromStr for CardArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, due) = s
            .rsplit_once('=')
            .ok_or_else(|| anyhow!("expected NAME=DATE, got: {s}"))?;
        let due = due.trim();
        if due.is_empty() {
            return Err(anyhow!("missing due date in: {s}"));
        }
        Ok(Self {
            name: name.trim().to_string(),
            due: due.to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ccwidget",
    version,
    about = "Credit card due-date widget: cards, countdowns, reminders",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "ccwidgetrc", global = true)]
    pub ccwidgetrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render a widget the way the home screen would.
    Show {
        widget: u32,

        /// Reported widget width; narrow widgets use the compact layout.
        #[arg(long)]
        width: Option<u32>,
    },

    /// Replace every card of a widget.
    Configure {
        widget: u32,

        #[arg(
            long = "card",
            required = true,
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<CardArg>()),
            action = ArgAction::Append
        )]
        cards: Vec<CardArg>,
    },

    /// Add one card to a widget.
    Add {
        widget: u32,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        due: Option<String>,
    },

    /// Remove the card at a position shown by `show`.
    Remove { widget: u32, index: usize },

    /// Forget a widget and its reminders.
    Delete { widget: u32 },

    /// Stored widgets and their card counts.
    List,

    /// Pending reminder and alarm triggers.
    Triggers,

    /// Fire every trigger whose time has come.
    Tick,

    /// Silence the urgent alarm.
    Stop,

    /// Register reminders again for every stored widget.
    Reschedule,

    /// Notifications currently shown.
    Notifications,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
