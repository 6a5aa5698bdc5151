//! Line commands understood by the coordinator CLI.

use roundplay_types::{bet::InvalidSelection, round::UnknownDuration, RoundDuration, Selection};
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `select <duration>`
    Select(RoundDuration),
    /// `bet <selection> <stake>`
    Bet { selection: Selection, stake: u64 },
    /// `status`
    Status,
    /// `history [duration] [page]`
    History {
        duration: Option<RoundDuration>,
        page: usize,
    },
    /// `resync [duration]`
    Resync(Option<RoundDuration>),
    /// `reload [duration]`
    Reload(Option<RoundDuration>),
    /// `wallet`
    Wallet,
    /// `quit`
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Duration(#[from] UnknownDuration),
    #[error(transparent)]
    Selection(#[from] InvalidSelection),
    #[error("not a number: {0}")]
    NotNumeric(String),
}

fn number<T: FromStr>(value: &str) -> Result<T, ParseError> {
    value
        .parse()
        .map_err(|_| ParseError::NotNumeric(value.to_string()))
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(ParseError::Empty);
        };
        let args: Vec<&str> = words.collect();
        let command = match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("select" | "s", [duration]) => Command::Select(duration.parse()?),
            ("select" | "s", _) => return Err(ParseError::Usage("select <duration>")),
            ("bet" | "b", [selection, stake]) => Command::Bet {
                selection: selection.parse()?,
                stake: number(stake)?,
            },
            ("bet" | "b", _) => return Err(ParseError::Usage("bet <selection> <stake>")),
            ("status" | "st", []) => Command::Status,
            ("history" | "h", []) => Command::History {
                duration: None,
                page: 1,
            },
            ("history" | "h", [duration]) => Command::History {
                duration: Some(duration.parse()?),
                page: 1,
            },
            ("history" | "h", [duration, page]) => Command::History {
                duration: Some(duration.parse()?),
                page: number(page)?,
            },
            ("history" | "h", _) => return Err(ParseError::Usage("history [duration] [page]")),
            ("resync" | "r", []) => Command::Resync(None),
            ("resync" | "r", [duration]) => Command::Resync(Some(duration.parse()?)),
            ("reload", []) => Command::Reload(None),
            ("reload", [duration]) => Command::Reload(Some(duration.parse()?)),
            ("wallet" | "w", []) => Command::Wallet,
            ("quit" | "q" | "exit", []) => Command::Quit,
            (other, _) => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}
