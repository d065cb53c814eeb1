//! Realistic leaf values: `format` strings and property-name heuristics.
//!
//! Everything draws from the generator's seeded RNG so output is reproducible.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat};
use fake::faker::address::en::{CityName, CountryName, StateName, StreetName, ZipCode};
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::{DomainSuffix, Password, SafeEmail, Username};
use fake::faker::lorem::en::{Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use fake::Fake;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{Number, Value};

/// 2000-01-01T00:00:00Z .. 2030-12-31T23:59:59Z
const TIMESTAMP_RANGE: std::ops::RangeInclusive<i64> = 946_684_800..=1_924_991_999;

const PROPERTY_NAMES: &[&str] = &[
    "id",
    "name",
    "email",
    "status",
    "count",
    "price",
    "description",
    "url",
    "city",
    "enabled",
    "phone",
    "createdAt",
    "title",
    "country",
    "username",
    "quantity",
];

const STATUSES: &[&str] = &["active", "inactive", "pending", "archived"];

/// Lowercased name without separators, so `created_at`, `created-at` and
/// `createdAt` compare equal.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn timestamp(rng: &mut StdRng) -> DateTime<chrono::Utc> {
    let secs = rng.gen_range(TIMESTAMP_RANGE);
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn hostname(rng: &mut StdRng) -> String {
    let word: String = Word().fake_with_rng(rng);
    let suffix: String = DomainSuffix().fake_with_rng(rng);
    format!("{}.{}", word.to_lowercase(), suffix)
}

/// Value for a known string `format`; `None` for formats without a generator.
pub(crate) fn format(format: &str, rng: &mut StdRng) -> Option<String> {
    let value = match format {
        "date" => timestamp(rng).format("%Y-%m-%d").to_string(),
        "date-time" => timestamp(rng).to_rfc3339_opts(SecondsFormat::Secs, true),
        "time" => timestamp(rng).format("%H:%M:%SZ").to_string(),
        "duration" => {
            let days: u32 = rng.gen_range(0..30);
            let hours: u32 = rng.gen_range(0..24);
            format!("P{days}DT{hours}H")
        }
        "email" => SafeEmail().fake_with_rng(rng),
        "hostname" => hostname(rng),
        "ipv4" => {
            let octets: [u8; 4] = rng.gen();
            format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
        }
        "ipv6" => {
            let groups: Vec<String> = (0..8).map(|_| format!("{:x}", rng.gen::<u16>())).collect();
            groups.join(":")
        }
        "uri" | "url" => {
            let path: String = Word().fake_with_rng(rng);
            format!("https://{}/{}", hostname(rng), path.to_lowercase())
        }
        "uri-reference" => {
            let path: String = Word().fake_with_rng(rng);
            format!("/{}", path.to_lowercase())
        }
        "uuid" => uuid::Builder::from_random_bytes(rng.gen()).into_uuid().to_string(),
        "password" => Password(8..16).fake_with_rng(rng),
        "byte" => {
            let len = rng.gen_range(4..16);
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            STANDARD.encode(bytes)
        }
        "binary" => {
            let len = rng.gen_range(4..16);
            (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
        }
        _ => return None,
    };
    Some(value)
}

/// String guessed from a property name, if the name is recognized.
pub(crate) fn by_name(name: Option<&str>, rng: &mut StdRng) -> Option<String> {
    let name = normalize(name?);
    let value: String = match name.as_str() {
        "email" | "mail" | "emailaddress" => SafeEmail().fake_with_rng(rng),
        "firstname" | "givenname" => FirstName().fake_with_rng(rng),
        "lastname" | "surname" | "familyname" => LastName().fake_with_rng(rng),
        "name" | "fullname" | "displayname" | "author" => Name().fake_with_rng(rng),
        "username" | "login" | "nickname" => Username().fake_with_rng(rng),
        "password" => Password(8..16).fake_with_rng(rng),
        "city" => CityName().fake_with_rng(rng),
        "country" => CountryName().fake_with_rng(rng),
        "state" | "region" => StateName().fake_with_rng(rng),
        "street" | "address" | "streetaddress" => {
            let number: u16 = rng.gen_range(1..999);
            let street: String = StreetName().fake_with_rng(rng);
            format!("{number} {street}")
        }
        "zip" | "zipcode" | "postcode" | "postalcode" => ZipCode().fake_with_rng(rng),
        "phone" | "phonenumber" | "mobile" => PhoneNumber().fake_with_rng(rng),
        "company" | "companyname" | "organization" => CompanyName().fake_with_rng(rng),
        "url" | "website" | "homepage" | "link" => format("url", rng)?,
        "host" | "hostname" | "domain" => hostname(rng),
        "id" | "uuid" | "guid" => format("uuid", rng)?,
        "status" | "state_" => STATUSES[rng.gen_range(0..STATUSES.len())].to_string(),
        "description" | "summary" | "comment" | "text" | "message" => Sentence(3..10).fake_with_rng(rng),
        "title" | "subject" | "label" => {
            let sentence: String = Sentence(2..5).fake_with_rng(rng);
            sentence.trim_end_matches('.').to_string()
        }
        "currency" => ["USD", "EUR", "GBP", "JPY"][rng.gen_range(0..4)].to_string(),
        _ if name.ends_with("email") => SafeEmail().fake_with_rng(rng),
        _ if name.ends_with("url") || name.ends_with("uri") => format("url", rng)?,
        _ if name.ends_with("at") && name.len() > 2 || name.ends_with("date") || name.ends_with("time") => {
            format("date-time", rng)?
        }
        _ if name.ends_with("id") && name.len() > 2 => format("uuid", rng)?,
        _ => return None,
    };
    Some(value)
}

/// Plain text of roughly `min..=max` characters.
pub(crate) fn words(rng: &mut StdRng, min: usize, max: Option<usize>) -> String {
    let mut text: String = Word().fake_with_rng(rng);
    let target = max.map_or(min.max(1), |m| min.max(1).min(m));
    while text.chars().count() < target {
        let word: String = Word().fake_with_rng(rng);
        text.push(' ');
        text.push_str(&word);
    }
    text
}

/// Pad with letters or truncate so the length falls in `min..=max`.
pub(crate) fn fit_length(mut text: String, min: usize, max: Option<usize>, rng: &mut StdRng) -> String {
    let mut len = text.chars().count();
    while len < min {
        text.push(rng.gen_range(b'a'..=b'z') as char);
        len += 1;
    }
    if let Some(max) = max {
        if len > max {
            text = text.chars().take(max).collect();
        }
    }
    text
}

/// Heuristic property name for synthesized free-form objects.
pub(crate) fn property_name(rng: &mut StdRng) -> &'static str {
    PROPERTY_NAMES[rng.gen_range(0..PROPERTY_NAMES.len())]
}

/// Integer range suggested by a property name.
pub(crate) fn integer_range(name: Option<&str>) -> Option<(i64, i64)> {
    match normalize(name?).as_str() {
        "age" => Some((18, 90)),
        "year" => Some((1970, 2030)),
        "month" => Some((1, 12)),
        "day" => Some((1, 28)),
        "hour" => Some((0, 23)),
        "minute" | "second" => Some((0, 59)),
        "count" | "quantity" | "qty" | "total" => Some((0, 100)),
        "port" => Some((1024, 65535)),
        "page" | "limit" | "size" => Some((1, 50)),
        _ => None,
    }
}

/// Number range suggested by a property name.
pub(crate) fn number_range(name: Option<&str>) -> Option<(f64, f64)> {
    match normalize(name?).as_str() {
        "price" | "amount" | "cost" | "total" | "balance" => Some((1.0, 500.0)),
        "latitude" | "lat" => Some((-90.0, 90.0)),
        "longitude" | "lng" | "lon" => Some((-180.0, 180.0)),
        "rating" | "score" => Some((0.0, 5.0)),
        "percent" | "percentage" => Some((0.0, 100.0)),
        _ => None,
    }
}

/// Untyped value inferred from a property name.
pub(crate) fn guess(name: &str, rng: &mut StdRng) -> Value {
    let key = normalize(name);
    if key == "enabled" || key == "active" || key.starts_with("is") || key.starts_with("has") {
        return Value::Bool(rng.gen_bool(0.5));
    }
    if let Some((lo, hi)) = integer_range(Some(name)) {
        return Value::from(rng.gen_range(lo..=hi));
    }
    if let Some((lo, hi)) = number_range(Some(name)) {
        let v: f64 = rng.gen_range(lo..hi);
        return Number::from_f64((v * 100.0).round() / 100.0)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    match by_name(Some(name), rng) {
        Some(s) => Value::String(s),
        None => Value::String(words(rng, 1, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::check_string_format;
    use rand::SeedableRng;

    #[test]
    fn test_formats_pass_validation() {
        let mut rng = StdRng::seed_from_u64(7);
        for name in ["date", "date-time", "time", "email", "hostname", "ipv4", "ipv6", "uri", "uuid", "byte"] {
            for _ in 0..20 {
                let value = format(name, &mut rng).unwrap();
                assert!(check_string_format(name, &value).is_ok(), "{name}: {value}");
            }
        }
        assert!(format("no-such-format", &mut rng).is_none());
    }

    #[test]
    fn test_name_heuristics() {
        let mut rng = StdRng::seed_from_u64(1);
        let email = by_name(Some("contact_email"), &mut rng).unwrap();
        assert!(check_string_format("email", &email).is_ok(), "{email}");
        let created = by_name(Some("createdAt"), &mut rng).unwrap();
        assert!(check_string_format("date-time", &created).is_ok(), "{created}");
        assert!(by_name(Some("zzz"), &mut rng).is_none());
        assert_eq!(integer_range(Some("age")), Some((18, 90)));
        assert!(guess("enabled", &mut rng).is_boolean());
    }

    #[test]
    fn test_fit_length() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(fit_length("abc".into(), 5, None, &mut rng).len(), 5);
        assert_eq!(fit_length("abcdef".into(), 0, Some(2), &mut rng), "ab");
    }
}
