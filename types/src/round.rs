use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::SystemTime};
use thiserror::Error;

/// One of the independent game speeds, each with its own round cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoundDuration {
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "3min")]
    ThreeMinutes,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "10min")]
    TenMinutes,
}

impl RoundDuration {
    pub const ALL: [RoundDuration; 4] = [
        RoundDuration::OneMinute,
        RoundDuration::ThreeMinutes,
        RoundDuration::FiveMinutes,
        RoundDuration::TenMinutes,
    ];

    /// Length of a full round in seconds.
    pub const fn seconds(self) -> u64 {
        match self {
            RoundDuration::OneMinute => 60,
            RoundDuration::ThreeMinutes => 180,
            RoundDuration::FiveMinutes => 300,
            RoundDuration::TenMinutes => 600,
        }
    }

    /// Seed used when the round authority cannot be reached.
    pub const fn fallback_seconds(self) -> u64 {
        self.seconds()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RoundDuration::OneMinute => "1min",
            RoundDuration::ThreeMinutes => "3min",
            RoundDuration::FiveMinutes => "5min",
            RoundDuration::TenMinutes => "10min",
        }
    }
}

impl fmt::Display for RoundDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown duration: {0} (expected 1min, 3min, 5min or 10min)")]
pub struct UnknownDuration(pub String);

impl FromStr for RoundDuration {
    type Err = UnknownDuration;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" | "1m" | "1min" => Ok(RoundDuration::OneMinute),
            "3" | "3m" | "3min" => Ok(RoundDuration::ThreeMinutes),
            "5" | "5m" | "5min" => Ok(RoundDuration::FiveMinutes),
            "10" | "10m" | "10min" => Ok(RoundDuration::TenMinutes),
            other => Err(UnknownDuration(other.to_string())),
        }
    }
}

/// Identifier of a single round within a duration's sequence.
///
/// The round authority may send period numbers either as JSON numbers or as
/// numeric strings; both decode to the same value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod", into = "u64")]
pub struct PeriodNumber(pub u64);

impl PeriodNumber {
    pub fn next(self) -> Self {
        PeriodNumber(self.0 + 1)
    }
}

impl fmt::Display for PeriodNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PeriodNumber> for u64 {
    fn from(value: PeriodNumber) -> Self {
        value.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPeriod {
    Number(u64),
    Text(String),
}

impl TryFrom<RawPeriod> for PeriodNumber {
    type Error = String;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        match raw {
            RawPeriod::Number(n) => Ok(PeriodNumber(n)),
            RawPeriod::Text(s) => s
                .trim()
                .parse()
                .map(PeriodNumber)
                .map_err(|_| format!("period number is not numeric: {s}")),
        }
    }
}

/// Lifecycle of a round. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoundStatus {
    Pending,
    Active,
    Settling,
    Settled,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("round {period} ({duration}) cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub duration: RoundDuration,
    pub period: PeriodNumber,
    pub from: RoundStatus,
    pub to: RoundStatus,
}

/// A round of a single duration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Round {
    pub duration: RoundDuration,
    pub period: PeriodNumber,
    status: RoundStatus,
    pub server_synced_at: Option<SystemTime>,
}

impl Round {
    pub fn new(duration: RoundDuration, period: PeriodNumber) -> Self {
        Self {
            duration,
            period,
            status: RoundStatus::Pending,
            server_synced_at: None,
        }
    }

    pub fn status(&self) -> RoundStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == RoundStatus::Active
    }

    /// Whether settlement has begun (or finished) for this round.
    pub fn is_closed(&self) -> bool {
        self.status >= RoundStatus::Settling
    }

    /// Marks the round as synchronized with the authority, activating it if
    /// it was still pending.
    pub fn synced(&mut self, at: SystemTime) {
        self.server_synced_at = Some(at);
        if self.status == RoundStatus::Pending {
            self.status = RoundStatus::Active;
        }
    }

    /// Activates a pending round without an authoritative timer read, once
    /// something else (an accepted bet) has confirmed its period.
    pub fn activate(&mut self) -> Result<(), TransitionError> {
        self.advance(RoundStatus::Active)
    }

    /// Moves the round to `settling`. Fails if settlement already began,
    /// which is what makes settlement run at most once per round.
    pub fn begin_settlement(&mut self) -> Result<(), TransitionError> {
        self.advance(RoundStatus::Settling)
    }

    pub fn finish_settlement(&mut self) -> Result<(), TransitionError> {
        self.advance(RoundStatus::Settled)
    }

    fn advance(&mut self, to: RoundStatus) -> Result<(), TransitionError> {
        let allowed = matches!(
            (self.status, to),
            (RoundStatus::Pending, RoundStatus::Active)
                | (RoundStatus::Active, RoundStatus::Settling)
                | (RoundStatus::Settling, RoundStatus::Settled)
        );
        if !allowed {
            return Err(TransitionError {
                duration: self.duration,
                period: self.period,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
