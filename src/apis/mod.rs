//! Structured fetchers: sources with machine-readable event data that
//! bypass scraping and extraction entirely.

pub mod ticketmaster;
pub mod ticketomaha;

/// Trim a description to roughly `max` characters with an ellipsis.
pub(crate) fn trim_desc(desc: &str, max: usize) -> String {
    if desc.chars().count() <= max {
        return desc.to_string();
    }
    let cut: String = desc.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

/// Format fractional dollar amounts without a trailing ".0".
pub(crate) fn format_dollars(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// 24h "HH:MM[:SS]" to "H:MM AM/PM".
pub(crate) fn format_time_12h(hour: u32, minute: u32) -> String {
    let ampm = if hour >= 12 { "PM" } else { "AM" };
    let h12 = match hour {
        0 => 12,
        h if h > 12 => h - 12,
        h => h,
    };
    format!("{h12}:{minute:02} {ampm}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_formatting_handles_edges() {
        assert_eq!(format_time_12h(0, 0), "12:00 AM");
        assert_eq!(format_time_12h(12, 5), "12:05 PM");
        assert_eq!(format_time_12h(19, 30), "7:30 PM");
    }

    #[test]
    fn dollars_drop_whole_number_fraction() {
        assert_eq!(format_dollars(25.0), "25");
        assert_eq!(format_dollars(25.5), "25.5");
    }

    #[test]
    fn descriptions_trim_with_ellipsis() {
        let long = "x".repeat(300);
        let trimmed = trim_desc(&long, 200);
        assert_eq!(trimmed.chars().count(), 200);
        assert!(trimmed.ends_with("..."));
        assert_eq!(trim_desc("short", 200), "short");
    }
}
