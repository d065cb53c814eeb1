//! `format` keyword checks.
//!
//! Unknown formats are annotations only and always pass.

use chrono::{DateTime, NaiveDate, NaiveTime};
use std::net::Ipv4Addr;

/// Check a string against a named format. The error is a short reason.
pub fn check_string(format: &str, value: &str) -> Result<(), String> {
    let ok = match format {
        "date" => is_date(value),
        "date-time" => DateTime::parse_from_rfc3339(value).is_ok(),
        "time" => is_time(value),
        "email" => is_email(value),
        "uuid" => uuid::Uuid::parse_str(value).is_ok(),
        "ipv4" => is_ipv4(value),
        "ipv6" => is_ipv6(value),
        "hostname" => is_hostname(value),
        "uri" | "url" => url::Url::parse(value).is_ok(),
        "byte" => is_base64(value),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("value does not match format '{format}'"))
    }
}

/// Range checks for numeric formats.
pub fn check_number(format: &str, value: f64) -> Result<(), String> {
    let (min, max) = match format {
        "int32" => (i32::MIN as f64, i32::MAX as f64),
        "int64" => (i64::MIN as f64, i64::MAX as f64),
        "float" => (f32::MIN as f64, f32::MAX as f64),
        _ => return Ok(()),
    };
    if value < min || value > max {
        return Err(format!("value {value} is out of range for format '{format}'"));
    }
    Ok(())
}

/// `YYYY-MM-DD`, exactly.
fn is_date(value: &str) -> bool {
    value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// RFC 3339 full-time; the offset may be omitted.
fn is_time(value: &str) -> bool {
    DateTime::parse_from_rfc3339(&format!("1970-01-01T{value}")).is_ok()
        || NaiveTime::parse_from_str(value, "%H:%M:%S%.f").is_ok()
}

/// Mailbox per RFC 5322 in the common `local@domain` or `Name <local@domain>` forms.
fn is_email(value: &str) -> bool {
    let address = match (value.find('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end && end == value.len() - 1 => &value[start + 1..end],
        (None, None) => value,
        _ => return false,
    };
    let Some((local, domain)) = address.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || local.len() > 64 || domain.is_empty() {
        return false;
    }
    let local_ok = if local.starts_with('"') && local.ends_with('"') && local.len() >= 2 {
        true
    } else {
        !local.starts_with('.')
            && !local.ends_with('.')
            && !local.contains("..")
            && local
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c))
    };
    let domain_ok = if domain.starts_with('[') && domain.ends_with(']') {
        true
    } else {
        domain.split('.').all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
    };
    local_ok && domain_ok
}

fn is_ipv4(value: &str) -> bool {
    value.split('.').count() == 4 && value.parse::<Ipv4Addr>().is_ok()
}

/// Eight colon-separated groups of one to four hex digits; no `::` compression.
fn is_ipv6(value: &str) -> bool {
    let groups: Vec<&str> = value.split(':').collect();
    groups.len() == 8
        && groups
            .iter()
            .all(|g| !g.is_empty() && g.len() <= 4 && g.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_hostname(value: &str) -> bool {
    let value = value.strip_suffix('.').unwrap_or(value);
    !value.is_empty()
        && value.len() <= 253
        && value.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_base64(value: &str) -> bool {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(value).is_ok()
}
