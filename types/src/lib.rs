pub mod api;
pub mod bet;
mod constants;
pub mod round;

pub use bet::{Bet, BetOutcome, Color, Selection, SelectionKind, Size};
pub use constants::*;
pub use round::{PeriodNumber, Round, RoundDuration, RoundStatus};
