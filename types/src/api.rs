//! Request and response payloads exchanged with the round authority.
//!
//! Every call is a JSON `POST`. Field names follow the authority's casing,
//! which is camelCase except for round outcomes (snake_case).

use crate::{
    bet::{BetOutcome, Color, Selection, SelectionKind, Size},
    round::{PeriodNumber, RoundDuration},
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

pub const TIMER_PATH: &str = "timer";
pub const RESULTS_PATH: &str = "results";
pub const LATEST_RESULT_PATH: &str = "latest-result";
pub const BET_HISTORY_PATH: &str = "bet-history";
pub const CHECK_VALID_BET_PATH: &str = "checkValidBet";
pub const PLACE_BET_PATH: &str = "place-bet";

/// A response the authority sent that cannot be interpreted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedResponse {
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("{field} is not numeric: {value}")]
    NotNumeric { field: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRequest {
    pub duration: RoundDuration,
}

/// Authoritative remaining time for a duration.
///
/// Short rounds report seconds only; longer rounds split the value into
/// minutes and seconds. Fields are kept raw so that non-numeric values can be
/// reported as malformed instead of failing the whole decode.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_time_minutes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_time_seconds: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_number: Option<PeriodNumber>,
}

impl TimerResponse {
    pub fn seconds(seconds: u64, period: Option<PeriodNumber>) -> Self {
        Self {
            remaining_time_minutes: None,
            remaining_time_seconds: Some(Value::from(seconds)),
            period_number: period,
        }
    }

    pub fn minutes_and_seconds(minutes: u64, seconds: u64, period: Option<PeriodNumber>) -> Self {
        Self {
            remaining_time_minutes: Some(Value::from(minutes)),
            remaining_time_seconds: Some(Value::from(seconds)),
            period_number: period,
        }
    }

    /// Collapses the reported time into a single number of seconds.
    pub fn remaining_seconds(&self) -> Result<u64, MalformedResponse> {
        let seconds = match &self.remaining_time_seconds {
            Some(value) => numeric("remainingTimeSeconds", value)?,
            None => return Err(MalformedResponse::Missing("remainingTimeSeconds")),
        };
        let minutes = match &self.remaining_time_minutes {
            Some(value) => numeric("remainingTimeMinutes", value)?,
            None => 0,
        };
        Ok(minutes.saturating_mul(60).saturating_add(seconds))
    }
}

fn numeric(field: &'static str, value: &Value) -> Result<u64, MalformedResponse> {
    let parsed = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| MalformedResponse::NotNumeric {
        field,
        value: value.to_string(),
    })
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    numeric("amount", &value).map_err(de::Error::custom)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsRequest {
    pub duration: RoundDuration,
}

/// The drawn result of a settled round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub period_number: PeriodNumber,
    pub result_number: u8,
    #[serde(with = "color_list")]
    pub result_color: Vec<Color>,
    pub result_size: Size,
}

impl RoundOutcome {
    /// Builds the outcome for a drawn number, deriving colour and size.
    pub fn from_number(period_number: PeriodNumber, result_number: u8) -> Self {
        Self {
            period_number,
            result_number,
            result_color: Color::for_number(result_number),
            result_size: Size::for_number(result_number),
        }
    }

    pub fn matches(&self, selection: &Selection) -> bool {
        match selection {
            Selection::Number(n) => *n == self.result_number,
            Selection::Color(c) => self.result_color.contains(c),
            Selection::Size(s) => *s == self.result_size,
        }
    }
}

/// Colours travel as a comma separated string (`"red,violet"`), but arrays
/// are accepted too.
mod color_list {
    use super::*;

    pub fn serialize<S: Serializer>(colors: &[Color], serializer: S) -> Result<S::Ok, S::Error> {
        let joined = colors
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",");
        serializer.serialize_str(&joined)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Color>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Joined(String),
            List(Vec<Color>),
        }
        match Raw::deserialize(deserializer)? {
            Raw::List(colors) => Ok(colors),
            Raw::Joined(joined) => joined
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| match part.to_ascii_lowercase().as_str() {
                    "red" => Ok(Color::Red),
                    "green" => Ok(Color::Green),
                    "violet" => Ok(Color::Violet),
                    other => Err(<D::Error as de::Error>::custom(format!(
                        "unknown colour: {other}"
                    ))),
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestResultRequest {
    pub period_number: PeriodNumber,
    pub duration: RoundDuration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetHistoryRequest {
    pub user_id: String,
}

/// The user's most recent bet as recorded by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRecord {
    pub period_number: PeriodNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<RoundDuration>,
    pub status: BetOutcome,
    #[serde(deserialize_with = "lenient_u64")]
    pub amount: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub amount_received: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckValidBetRequest {
    pub user_id: String,
    pub duration: RoundDuration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckValidBetResponse {
    #[serde(deserialize_with = "lenient_u64")]
    pub pending_bets: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetRequest {
    pub user_id: String,
    pub bet_type: SelectionKind,
    pub bet_value: String,
    pub amount: u64,
    pub period_number: PeriodNumber,
    pub duration: RoundDuration,
}

impl PlaceBetRequest {
    pub fn new(
        user_id: String,
        duration: RoundDuration,
        period_number: PeriodNumber,
        selection: &Selection,
        amount: u64,
    ) -> Self {
        Self {
            user_id,
            bet_type: selection.kind(),
            bet_value: selection.value(),
            amount,
            period_number,
            duration,
        }
    }

    pub fn selection(&self) -> Result<Selection, crate::bet::InvalidSelection> {
        Selection::from_wire(self.bet_type, &self.bet_value)
    }
}
