use crate::{
    round::{PeriodNumber, RoundDuration},
    BIG_THRESHOLD, MAX_NUMBER,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::SystemTime};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Green,
    Violet,
}

impl Color {
    /// Colours a drawn number pays out on. 0 and 5 also carry violet.
    pub fn for_number(number: u8) -> Vec<Color> {
        match number {
            0 => vec![Color::Red, Color::Violet],
            5 => vec![Color::Green, Color::Violet],
            n if n % 2 == 1 => vec![Color::Green],
            _ => vec![Color::Red],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Violet => "violet",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Size {
    Big,
    Small,
}

impl Size {
    pub fn for_number(number: u8) -> Size {
        if number >= BIG_THRESHOLD {
            Size::Big
        } else {
            Size::Small
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Size::Big => "big",
            Size::Small => "small",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    Number,
    Color,
    Size,
}

/// What a wager is placed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Selection {
    Number(u8),
    Color(Color),
    Size(Size),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidSelection {
    #[error("number out of range: {0} (max 9)")]
    NumberOutOfRange(u8),
    #[error("unknown selection: {0}")]
    Unknown(String),
}

impl Selection {
    pub fn number(value: u8) -> Result<Self, InvalidSelection> {
        if value > MAX_NUMBER {
            return Err(InvalidSelection::NumberOutOfRange(value));
        }
        Ok(Selection::Number(value))
    }

    pub fn kind(&self) -> SelectionKind {
        match self {
            Selection::Number(_) => SelectionKind::Number,
            Selection::Color(_) => SelectionKind::Color,
            Selection::Size(_) => SelectionKind::Size,
        }
    }

    /// Wire value sent as `betValue`.
    pub fn value(&self) -> String {
        match self {
            Selection::Number(n) => n.to_string(),
            Selection::Color(c) => c.as_str().to_string(),
            Selection::Size(s) => s.as_str().to_string(),
        }
    }

    /// Rebuilds a selection from its wire pair.
    pub fn from_wire(kind: SelectionKind, value: &str) -> Result<Self, InvalidSelection> {
        let unknown = || InvalidSelection::Unknown(value.to_string());
        match kind {
            SelectionKind::Number => {
                let n = value.trim().parse::<u8>().map_err(|_| unknown())?;
                Selection::number(n)
            }
            SelectionKind::Color => match value.trim() {
                "red" => Ok(Selection::Color(Color::Red)),
                "green" => Ok(Selection::Color(Color::Green)),
                "violet" => Ok(Selection::Color(Color::Violet)),
                _ => Err(unknown()),
            },
            SelectionKind::Size => match value.trim() {
                "big" => Ok(Selection::Size(Size::Big)),
                "small" => Ok(Selection::Size(Size::Small)),
                _ => Err(unknown()),
            },
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value())
    }
}

impl FromStr for Selection {
    type Err = InvalidSelection;

    /// Accepts `0`-`9`, a colour name or a size name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() {
            return Selection::from_wire(SelectionKind::Number, &s);
        }
        Selection::from_wire(SelectionKind::Color, &s)
            .or_else(|_| Selection::from_wire(SelectionKind::Size, &s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetOutcome {
    Pending,
    #[serde(alias = "win")]
    Won,
    #[serde(alias = "lose", alias = "loss")]
    Lost,
}

/// A wager placed by a user on one round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bet {
    pub user: String,
    pub duration: RoundDuration,
    pub period: PeriodNumber,
    pub selection: Selection,
    pub stake: u64,
    pub submitted_at: SystemTime,
    pub outcome: BetOutcome,
}

impl Bet {
    pub fn new(
        user: String,
        duration: RoundDuration,
        period: PeriodNumber,
        selection: Selection,
        stake: u64,
    ) -> Self {
        Self {
            user,
            duration,
            period,
            selection,
            stake,
            submitted_at: SystemTime::now(),
            outcome: BetOutcome::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome == BetOutcome::Pending
    }
}
