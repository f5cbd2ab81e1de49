//! Seven-day insight rotation
//!
//! The cursor lives on [`UserProfile`] together with the calendar day it last
//! moved, so a restart or a second request on the same day cannot advance it
//! twice.

use crate::types::{InsightKind, UserProfile};
use chrono::NaiveDate;

pub const ROTATION_DAYS: u8 = 7;

/// Day-boundary aware access to a profile's rotation cursor
pub struct RotationCursor;

impl RotationCursor {
    /// Move the cursor for `today`. Returns whether the profile changed.
    ///
    /// A profile that never generated stays on its current day and only
    /// records the date. Later days advance by exactly one step, wrapping
    /// from 7 back to 1. Calls on the same day, or on a day before the
    /// recorded one, are no-ops.
    pub fn advance_for(profile: &mut UserProfile, today: NaiveDate) -> bool {
        match profile.rotation_date {
            None => {
                profile.rotation_day = profile.rotation_day.clamp(1, ROTATION_DAYS);
                profile.rotation_date = Some(today);
                true
            }
            Some(last) if today > last => {
                profile.rotation_day = profile.rotation_day % ROTATION_DAYS + 1;
                profile.rotation_date = Some(today);
                true
            }
            Some(_) => false,
        }
    }

    /// Insight kind scheduled for a rotation day. Pattern days fall back to
    /// a general insight when the user has no active pattern.
    pub fn kind_for_day(day: u8) -> InsightKind {
        match day {
            4 | 5 => InsightKind::Progress,
            6 => InsightKind::Cbt,
            7 => InsightKind::Risk,
            _ => InsightKind::Pattern,
        }
    }
}
