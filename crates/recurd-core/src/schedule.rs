use thiserror::Error;
use time::{Date, Duration, Month};

use crate::models::Frequency;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid frequency: {0}")]
    InvalidFrequency(String),
    #[error("frequency multiplier must be positive")]
    ZeroInterval,
    #[error("date arithmetic out of range")]
    DateOverflow,
}

const MONTHS: [Month; 12] = [
    Month::January,
    Month::February,
    Month::March,
    Month::April,
    Month::May,
    Month::June,
    Month::July,
    Month::August,
    Month::September,
    Month::October,
    Month::November,
    Month::December,
];

/// Computes the next occurrence of a recurring schedule.
///
/// A start date after `reference` is returned unchanged (the first occurrence
/// has not happened yet). Otherwise the result is the first
/// `start + k * interval` strictly after `reference`, where the interval is
/// `every` units of `frequency`. Intervals are always measured from `start`,
/// so a month-end start does not drift toward shorter months.
pub fn next_run_date(
    start: Date,
    frequency: Frequency,
    every: u32,
    reference: Date,
) -> Result<Date, ScheduleError> {
    if every == 0 {
        return Err(ScheduleError::ZeroInterval);
    }
    if start > reference {
        return Ok(start);
    }

    let step = i64::from(every);
    let mut k = 1i64;
    loop {
        let candidate = advance(start, frequency, step * k)?;
        if candidate > reference {
            return Ok(candidate);
        }
        k += 1;
    }
}

fn advance(start: Date, frequency: Frequency, units: i64) -> Result<Date, ScheduleError> {
    match frequency {
        Frequency::Daily => start
            .checked_add(Duration::days(units))
            .ok_or(ScheduleError::DateOverflow),
        Frequency::Weekly => start
            .checked_add(Duration::weeks(units))
            .ok_or(ScheduleError::DateOverflow),
        Frequency::Monthly => add_months(start, units),
        Frequency::Quarterly => add_months(start, units * 3),
        Frequency::Yearly => add_months(start, units * 12),
    }
}

/// Adds whole calendar months, clamping the day to the length of the target
/// month (Jan 31 + 1 month = Feb 28/29, not Mar 3).
pub fn add_months(date: Date, months: i64) -> Result<Date, ScheduleError> {
    let zero_based =
        i64::from(date.year()) * 12 + i64::from(date.month() as u8) - 1 + months;
    let year =
        i32::try_from(zero_based.div_euclid(12)).map_err(|_| ScheduleError::DateOverflow)?;
    let month = MONTHS[zero_based.rem_euclid(12) as usize];
    let day = date.day().min(time::util::days_in_year_month(year, month));
    Date::from_calendar_date(year, month, day).map_err(|_| ScheduleError::DateOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn future_start_is_returned_unchanged() {
        let next = next_run_date(
            date!(2025 - 06 - 01),
            Frequency::Monthly,
            1,
            date!(2025 - 03 - 15),
        )
        .unwrap();
        assert_eq!(next, date!(2025 - 06 - 01));
    }

    #[test]
    fn daily_advances_past_reference() {
        let next = next_run_date(
            date!(2025 - 01 - 01),
            Frequency::Daily,
            3,
            date!(2025 - 01 - 05),
        )
        .unwrap();
        assert_eq!(next, date!(2025 - 01 - 07));
    }

    #[test]
    fn weekly_with_multiplier() {
        let next = next_run_date(
            date!(2025 - 01 - 01),
            Frequency::Weekly,
            2,
            date!(2025 - 01 - 20),
        )
        .unwrap();
        assert_eq!(next, date!(2025 - 01 - 29));
    }

    #[test]
    fn monthly_clamps_month_end() {
        let next = next_run_date(
            date!(2025 - 01 - 31),
            Frequency::Monthly,
            1,
            date!(2025 - 02 - 10),
        )
        .unwrap();
        assert_eq!(next, date!(2025 - 02 - 28));
    }

    #[test]
    fn monthly_clamps_to_leap_day() {
        let next = next_run_date(
            date!(2024 - 01 - 31),
            Frequency::Monthly,
            1,
            date!(2024 - 02 - 05),
        )
        .unwrap();
        assert_eq!(next, date!(2024 - 02 - 29));
    }

    #[test]
    fn monthly_measures_from_start_without_drift() {
        // Passing February must not shorten later months to the 28th.
        let next = next_run_date(
            date!(2025 - 01 - 31),
            Frequency::Monthly,
            1,
            date!(2025 - 03 - 01),
        )
        .unwrap();
        assert_eq!(next, date!(2025 - 03 - 31));
    }

    #[test]
    fn quarterly_is_three_months() {
        let next = next_run_date(
            date!(2025 - 01 - 15),
            Frequency::Quarterly,
            1,
            date!(2025 - 05 - 01),
        )
        .unwrap();
        assert_eq!(next, date!(2025 - 07 - 15));
    }

    #[test]
    fn yearly_clamps_leap_start() {
        let next = next_run_date(
            date!(2024 - 02 - 29),
            Frequency::Yearly,
            1,
            date!(2025 - 01 - 01),
        )
        .unwrap();
        assert_eq!(next, date!(2025 - 02 - 28));
    }

    #[test]
    fn zero_multiplier_is_rejected() {
        let err = next_run_date(
            date!(2025 - 01 - 01),
            Frequency::Daily,
            0,
            date!(2025 - 01 - 02),
        )
        .unwrap_err();
        assert_eq!(err, ScheduleError::ZeroInterval);
    }

    #[test]
    fn result_is_strictly_after_reference() {
        let reference = date!(2025 - 03 - 15);
        let start = date!(2024 - 07 - 09);
        for frequency in [
            Frequency::Daily,
            Frequency::Weekly,
            Frequency::Monthly,
            Frequency::Quarterly,
            Frequency::Yearly,
        ] {
            for every in [1u32, 2, 5] {
                let next = next_run_date(start, frequency, every, reference).unwrap();
                assert!(
                    next > reference,
                    "{frequency} x{every} produced {next}, not after {reference}"
                );
            }
        }
    }

    #[test]
    fn monthly_from_first_of_month() {
        let next = next_run_date(
            date!(2025 - 01 - 01),
            Frequency::Monthly,
            1,
            date!(2025 - 03 - 15),
        )
        .unwrap();
        assert_eq!(next, date!(2025 - 04 - 01));
    }

    #[test]
    fn unknown_frequency_fails_to_parse() {
        let err = "fortnightly".parse::<Frequency>().unwrap_err();
        assert_eq!(
            err,
            ScheduleError::InvalidFrequency("fortnightly".to_string())
        );
    }
}
