use std::time::Duration;

/// Parsea un timestamp estilo `mm:ss` o `hh:mm:ss` a milisegundos.
///
/// Acepta también un número suelto de segundos (`"90"`).
pub fn parse_timestamp(text: &str) -> Option<u64> {
    let mut millis: u64 = 0;
    let parts: Vec<&str> = text.trim().split(':').collect();

    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    for part in &parts {
        let value: u64 = part.trim().parse().ok()?;
        millis = millis * 60 + value;
    }

    Some(millis * 1000)
}

/// Formatea una duración de forma legible (`1m 30s`) para logs y avisos.
pub fn format_duration(duration: Duration) -> String {
    // humantime no trunca submúltiplos, así que redondeamos a segundos
    let secs = Duration::from_secs(duration.as_secs());
    humantime::format_duration(secs).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("0:00"), Some(0));
        assert_eq!(parse_timestamp("1:30"), Some(90_000));
        assert_eq!(parse_timestamp("01:02:03"), Some(3_723_000));
        assert_eq!(parse_timestamp("45"), Some(45_000));
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert_eq!(parse_timestamp("abc"), None);
        assert_eq!(parse_timestamp("1:2:3:4"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_millis(60_500)), "1m");
    }
}
