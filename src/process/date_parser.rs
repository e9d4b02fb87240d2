use chrono::NaiveDate;

/// Fast parse of `"YYYY-MM-DD"`, tolerating a trailing time part
/// (`"YYYY-MM-DDTHH:MM:SS"` or `"YYYY-MM-DD HH:MM:SS"`).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim().trim_matches('"');
    let b = s.as_bytes();
    if b.len() < 10 || b[4] != b'-' || b[7] != b'-' {
        return None;
    }
    if b.len() > 10 && !matches!(b[10], b'T' | b' ') {
        return None;
    }
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month: u32 = s.get(5..7)?.parse().ok()?;
    let day: u32 = s.get(8..10)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Days since the Unix epoch, as stored in Arrow `Date32` columns.
pub fn to_epoch_days(d: NaiveDate) -> i32 {
    (d - epoch()).num_days() as i32
}

pub fn from_epoch_days(days: i32) -> NaiveDate {
    epoch() + chrono::Duration::days(days as i64)
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_timestamped() {
        let d = NaiveDate::from_ymd_opt(2021, 7, 1).unwrap();
        assert_eq!(parse_date("2021-07-01"), Some(d));
        assert_eq!(parse_date(" \"2021-07-01\" "), Some(d));
        assert_eq!(parse_date("2021-07-01T00:00:00"), Some(d));
        assert_eq!(parse_date("2021-07-01 12:30:00"), Some(d));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("2021/07/01"), None);
        assert_eq!(parse_date("2021-13-01"), None);
        assert_eq!(parse_date("2021-02-30"), None);
        assert_eq!(parse_date("2021-07-01x"), None);
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn test_epoch_days_roundtrip() {
        let d = NaiveDate::from_ymd_opt(2021, 7, 1).unwrap();
        assert_eq!(to_epoch_days(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()), 1);
        assert_eq!(from_epoch_days(to_epoch_days(d)), d);
    }
}
