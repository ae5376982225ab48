//! CF calendar conversions.
//!
//! Converts between `(year, month, day, hour, minute, second)` dates and
//! floating point offsets in CF units strings such as
//! `"days since 2000-01-01 00:00:00"`. Supports the CF calendars the
//! reader and the executive need: `standard`/`gregorian` (Julian before
//! 1582-10-15, Gregorian after), `proleptic_gregorian`, `julian`,
//! `noleap`/`365_day`, and `360_day`.
//!
//! The engine treats this module as a service seam: the reader uses it
//! to convert per-file time axes to base units, the executive to resolve
//! date ranges to step indices.

use crate::error::{Error, Result};

/// A calendar date with fractional seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Date {
    /// Astronomical year (1 BCE is year 0).
    pub year: i64,
    /// Month, 1–12.
    pub month: u32,
    /// Day of month, 1-based.
    pub day: u32,
    /// Hour, 0–23.
    pub hour: u32,
    /// Minute, 0–59.
    pub minute: u32,
    /// Second with fraction, 0–60.
    pub second: f64,
}

impl Date {
    /// A date at midnight.
    pub fn ymd(year: i64, month: u32, day: u32) -> Self {
        Self {
            year,
            month,
            day,
            hour: 0,
            minute: 0,
            second: 0.0,
        }
    }
}

impl std::fmt::Display for Date {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second as u32
        )
    }
}

/// A CF calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Calendar {
    /// Mixed Julian/Gregorian, the CF default.
    #[default]
    Standard,
    /// Proleptic Gregorian.
    ProlepticGregorian,
    /// Julian calendar.
    Julian,
    /// 365-day calendar, no leap years.
    NoLeap,
    /// 360-day calendar, twelve 30-day months.
    Day360,
}

impl Calendar {
    /// Parse a CF calendar attribute value.
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name.to_ascii_lowercase().as_str() {
            "" | "standard" | "gregorian" => Self::Standard,
            "proleptic_gregorian" => Self::ProlepticGregorian,
            "julian" => Self::Julian,
            "noleap" | "no_leap" | "365_day" => Self::NoLeap,
            "360_day" => Self::Day360,
            other => return Err(Error::calendar(format!("unknown calendar \"{other}\""))),
        })
    }
}

const DAYS_PER_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

fn is_gregorian_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn is_julian_leap(year: i64) -> bool {
    year % 4 == 0
}

fn days_in_month(calendar: Calendar, year: i64, month: u32) -> u32 {
    let base = DAYS_PER_MONTH[(month - 1) as usize];
    match calendar {
        Calendar::Day360 => 30,
        Calendar::NoLeap => base,
        Calendar::Standard => {
            // the leap rule follows whichever calendar the year falls in
            if month == 2 && (if year < 1582 { is_julian_leap(year) } else { is_gregorian_leap(year) }) {
                29
            } else {
                base
            }
        }
        Calendar::ProlepticGregorian => {
            if month == 2 && is_gregorian_leap(year) {
                29
            } else {
                base
            }
        }
        Calendar::Julian => {
            if month == 2 && is_julian_leap(year) {
                29
            } else {
                base
            }
        }
    }
}

/// Check a date is representable in the calendar.
fn validate(calendar: Calendar, date: &Date) -> Result<()> {
    if date.month < 1 || date.month > 12 {
        return Err(Error::calendar(format!("date out of range: {date}")));
    }
    if date.day < 1 || date.day > days_in_month(calendar, date.year, date.month) {
        return Err(Error::calendar(format!("date out of range: {date}")));
    }
    if date.hour > 23 || date.minute > 59 || !(0.0..=60.0).contains(&date.second) {
        return Err(Error::calendar(format!("date out of range: {date}")));
    }
    if calendar == Calendar::Standard {
        // dates dropped by the Gregorian reform do not exist
        if date.year == 1582 && date.month == 10 && (5..=14).contains(&date.day) {
            return Err(Error::calendar(format!("date out of range: {date}")));
        }
    }
    Ok(())
}

// Julian day number of a proleptic Gregorian date.
fn jdn_gregorian(year: i64, month: i64, day: i64) -> i64 {
    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045
}

// Julian day number of a Julian-calendar date.
fn jdn_julian(year: i64, month: i64, day: i64) -> i64 {
    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    day + (153 * m + 2) / 5 + 365 * y + y / 4 - 32083
}

fn gregorian_from_jdn(jdn: i64) -> (i64, u32, u32) {
    let a = jdn + 32044;
    let b = (4 * a + 3) / 146097;
    let c = a - 146097 * b / 4;
    let d = (4 * c + 3) / 1461;
    let e = c - 1461 * d / 4;
    let m = (5 * e + 2) / 153;
    let day = e - (153 * m + 2) / 5 + 1;
    let month = m + 3 - 12 * (m / 10);
    let year = 100 * b + d - 4800 + m / 10;
    (year, month as u32, day as u32)
}

fn julian_from_jdn(jdn: i64) -> (i64, u32, u32) {
    let c = jdn + 32082;
    let d = (4 * c + 3) / 1461;
    let e = c - 1461 * d / 4;
    let m = (5 * e + 2) / 153;
    let day = e - (153 * m + 2) / 5 + 1;
    let month = m + 3 - 12 * (m / 10);
    let year = d - 4800 + m / 10;
    (year, month as u32, day as u32)
}

const GREGORIAN_REFORM_JDN: i64 = 2299161; // 1582-10-15

/// Absolute day number of a date in the given calendar.
fn day_number(calendar: Calendar, date: &Date) -> i64 {
    let (y, m, d) = (date.year, date.month as i64, date.day as i64);
    match calendar {
        Calendar::ProlepticGregorian => jdn_gregorian(y, m, d),
        Calendar::Julian => jdn_julian(y, m, d),
        Calendar::Standard => {
            let jdn = jdn_gregorian(y, m, d);
            if jdn >= GREGORIAN_REFORM_JDN {
                jdn
            } else {
                jdn_julian(y, m, d)
            }
        }
        Calendar::NoLeap => {
            let mut days: i64 = y * 365;
            for month in 1..date.month {
                days += DAYS_PER_MONTH[(month - 1) as usize] as i64;
            }
            days + d - 1
        }
        Calendar::Day360 => y * 360 + (m - 1) * 30 + d - 1,
    }
}

fn date_from_day_number(calendar: Calendar, days: i64) -> Date {
    match calendar {
        Calendar::ProlepticGregorian => {
            let (y, m, d) = gregorian_from_jdn(days);
            Date::ymd(y, m, d)
        }
        Calendar::Julian => {
            let (y, m, d) = julian_from_jdn(days);
            Date::ymd(y, m, d)
        }
        Calendar::Standard => {
            let (y, m, d) = if days >= GREGORIAN_REFORM_JDN {
                gregorian_from_jdn(days)
            } else {
                julian_from_jdn(days)
            };
            Date::ymd(y, m, d)
        }
        Calendar::NoLeap => {
            let year = days.div_euclid(365);
            let mut rem = days.rem_euclid(365) as u32;
            let mut month = 1u32;
            while rem >= DAYS_PER_MONTH[(month - 1) as usize] {
                rem -= DAYS_PER_MONTH[(month - 1) as usize];
                month += 1;
            }
            Date::ymd(year, month, rem + 1)
        }
        Calendar::Day360 => {
            let year = days.div_euclid(360);
            let rem = days.rem_euclid(360) as u32;
            Date::ymd(year, rem / 30 + 1, rem % 30 + 1)
        }
    }
}

/// Parsed CF units: a scale and an epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Units {
    /// Seconds per unit step.
    pub scale_seconds: f64,
    /// The epoch the offsets count from.
    pub epoch: Date,
}

impl Units {
    /// Parse a CF units string, e.g. `"hours since 1900-01-01 06:00:00"`.
    pub fn parse(units: &str) -> Result<Self> {
        let mut parts = units.split_whitespace();
        let unit = parts
            .next()
            .ok_or_else(|| Error::calendar(format!("empty units string \"{units}\"")))?;
        let scale_seconds = match unit.to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
            "days" | "day" | "d" => 86400.0,
            other => {
                return Err(Error::calendar(format!(
                    "unsupported time unit \"{other}\" in \"{units}\""
                )))
            }
        };
        match parts.next() {
            Some("since") => {}
            _ => {
                return Err(Error::calendar(format!(
                    "units \"{units}\" is missing \"since\""
                )))
            }
        }
        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            return Err(Error::calendar(format!(
                "units \"{units}\" is missing an epoch date"
            )));
        }
        let epoch = parse_date(&rest.join(" "))?;
        Ok(Self {
            scale_seconds,
            epoch,
        })
    }
}

/// Parse `"Y-M-D"` or `"Y-M-D h:m:s"` into a [`Date`].
pub fn parse_date(text: &str) -> Result<Date> {
    let mut fields = text.split_whitespace();
    let ymd = fields
        .next()
        .ok_or_else(|| Error::calendar(format!("empty date \"{text}\"")))?;
    let bad = || Error::calendar(format!("malformed date \"{text}\""));

    let mut it = ymd.splitn(3, '-');
    let year: i64 = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let month: u32 = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let day: u32 = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;

    let (mut hour, mut minute, mut second) = (0u32, 0u32, 0.0f64);
    if let Some(hms) = fields.next() {
        let mut it = hms.splitn(3, ':');
        hour = it.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        minute = it.next().unwrap_or("0").parse().map_err(|_| bad())?;
        second = it.next().unwrap_or("0").parse().map_err(|_| bad())?;
    }
    Ok(Date {
        year,
        month,
        day,
        hour,
        minute,
        second,
    })
}

/// Convert a date to an offset in the given units and calendar.
pub fn date_to_offset(date: &Date, units: &Units, calendar: Calendar) -> Result<f64> {
    validate(calendar, date)?;
    validate(calendar, &units.epoch)?;
    let day_seconds = |d: &Date| d.hour as f64 * 3600.0 + d.minute as f64 * 60.0 + d.second;
    let days = (day_number(calendar, date) - day_number(calendar, &units.epoch)) as f64;
    let seconds = days * 86400.0 + day_seconds(date) - day_seconds(&units.epoch);
    Ok(seconds / units.scale_seconds)
}

/// Convert an offset in the given units and calendar back to a date.
pub fn offset_to_date(offset: f64, units: &Units, calendar: Calendar) -> Result<Date> {
    validate(calendar, &units.epoch)?;
    let epoch_seconds = units.epoch.hour as f64 * 3600.0
        + units.epoch.minute as f64 * 60.0
        + units.epoch.second;
    let total = offset * units.scale_seconds + epoch_seconds;
    let mut days = (total / 86400.0).floor() as i64;
    let mut tod = total - days as f64 * 86400.0;
    if tod < 0.0 {
        days -= 1;
        tod += 86400.0;
    }
    let mut date = date_from_day_number(calendar, day_number(calendar, &units.epoch) + days);
    date.hour = (tod / 3600.0) as u32;
    tod -= date.hour as f64 * 3600.0;
    date.minute = (tod / 60.0) as u32;
    date.second = tod - date.minute as f64 * 60.0;
    Ok(date)
}

/// Re-express `offset`, given in `from` units, in `to` units.
///
/// Both unit strings are interpreted against the same calendar; this is
/// the per-file conversion the reader applies when files carry differing
/// units.
pub fn convert_offset(offset: f64, from: &Units, to: &Units, calendar: Calendar) -> Result<f64> {
    let date = offset_to_date(offset, from, calendar)?;
    date_to_offset(&date, to, calendar)
}
