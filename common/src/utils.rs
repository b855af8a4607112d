use chrono::{DateTime, Utc};

pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        format!("{}m {}s", mins, secs)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

pub fn validate_url(url: &str) -> Result<(), String> {
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("rtsp://") {
        Ok(())
    } else {
        Err("URL must start with http://, https://, or rtsp://".to_string())
    }
}

/// Resolves a possibly relative asset path against the API base URL.
pub fn resolve_asset_url(base_url: &str, url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }

    let base = base_url.trim_end_matches('/');
    if url.starts_with('/') {
        format!("{}{}", base, url)
    } else {
        format!("{}/{}", base, url)
    }
}

/// Human readable form of an event timestamp; unparseable values are shown verbatim.
pub fn format_timestamp(value: Option<&str>) -> String {
    match value {
        None | Some("") => "No updates yet".to_string(),
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(parsed) => parsed.with_timezone(&Utc).format("%d %b %Y, %H:%M:%S").to_string(),
            Err(_) => raw.to_string(),
        },
    }
}
