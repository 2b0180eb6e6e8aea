// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Board manufacture timestamps.
//!
//! The board area stores its manufacture date as a 3-byte count of minutes
//! since 00:00 1 Jan 1996 UTC, and the decoded form is the string `asctime`
//! would print (without the trailing newline).

use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;

const ASCTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

// 00:00 1 Jan 1996 UTC. Well within chrono's range; cannot fail.
fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1996, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

/// Render a minutes-since-epoch count the way `asctime` would, e.g.
/// `Mon Jan  1 00:16:00 1996`.
pub fn manufacture_date(minutes: u32) -> String {
    let when = epoch() + Duration::minutes(i64::from(minutes));
    when.format(ASCTIME_FORMAT).to_string()
}

/// Parse a string produced by [`manufacture_date`] back into minutes since
/// the epoch. Returns `None` for unparseable strings, dates before the
/// epoch, and counts that don't fit the 3-byte wire field.
pub fn manufacture_minutes(date: &str) -> Option<u32> {
    let when = NaiveDateTime::parse_from_str(date, ASCTIME_FORMAT).ok()?;
    let minutes = (when - epoch()).num_minutes();
    u32::try_from(minutes).ok().filter(|m| *m <= 0x00ff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_asctime() {
        assert_eq!(manufacture_date(0), "Mon Jan  1 00:00:00 1996");
        assert_eq!(manufacture_date(16), "Mon Jan  1 00:16:00 1996");
        // Two-digit day of month is not padded.
        assert_eq!(manufacture_date(60 * 24 * 30), "Wed Jan 31 00:00:00 1996");
    }

    #[test]
    fn round_trips() {
        for minutes in [0, 16, 1_440, 12_345_678, 0x00ff_ffff] {
            assert_eq!(
                manufacture_minutes(&manufacture_date(minutes)),
                Some(minutes),
            );
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(manufacture_minutes("Fri Dec 31 23:59:00 1995"), None);
        assert_eq!(manufacture_minutes("not a date"), None);
    }
}
