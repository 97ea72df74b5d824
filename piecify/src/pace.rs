//! Parsing and formatting of split times (seconds per 500 m) and durations.

/// Parse a pace token such as `1:45`, `1:45.5` or `105` into seconds.
pub fn parse_pace_token(token: &str) -> Option<f64> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return None;
    }
    let seconds = match trimmed.split_once(':') {
        Some((minutes, seconds)) => {
            let minutes: u32 = minutes.trim().parse().ok()?;
            let seconds: f64 = seconds.trim().parse().ok()?;
            if !(0.0..60.0).contains(&seconds) {
                return None;
            }
            minutes as f64 * 60.0 + seconds
        }
        None => trimmed.parse().ok()?,
    };
    (seconds.is_finite() && seconds > 0.0).then_some(seconds)
}

/// `m:ss.t`, e.g. `1:45.3`.
pub fn format_pace(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "-".to_string();
    }
    let tenths = (seconds * 10.0).round() as u64;
    let minutes = tenths / 600;
    let rem = tenths % 600;
    format!("{}:{:02}.{}", minutes, rem / 10, rem % 10)
}

/// `m:ss.t` below an hour, `h:mm:ss.t` above.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "-".to_string();
    }
    let tenths = (seconds * 10.0).round() as u64;
    let hours = tenths / 36_000;
    let minutes = (tenths % 36_000) / 600;
    let rem = tenths % 600;
    if hours > 0 {
        format!("{}:{:02}:{:02}.{}", hours, minutes, rem / 10, rem % 10)
    } else {
        format!("{}:{:02}.{}", minutes, rem / 10, rem % 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_split_forms() {
        assert_eq!(parse_pace_token("1:45"), Some(105.0));
        assert_eq!(parse_pace_token(" 1:45.5 "), Some(105.5));
        assert_eq!(parse_pace_token("98.2"), Some(98.2));
        assert_eq!(parse_pace_token("1:75"), None);
        assert_eq!(parse_pace_token("abc"), None);
        assert_eq!(parse_pace_token("0"), None);
        assert_eq!(parse_pace_token(""), None);
    }

    #[test]
    fn formats_paces_and_durations() {
        assert_eq!(format_pace(105.0), "1:45.0");
        assert_eq!(format_pace(89.96), "1:30.0");
        assert_eq!(format_pace(f64::INFINITY), "-");
        assert_eq!(format_duration(365.24), "6:05.2");
        assert_eq!(format_duration(3723.4), "1:02:03.4");
    }
}
