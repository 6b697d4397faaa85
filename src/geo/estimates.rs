//! Static inter-region latency estimates and region→continent grouping.
//! The curated table is the last-resort source between the live matrix and
//! the configured default.

use std::time::Duration;

/// Curated symmetric inter-region estimates, milliseconds
const ESTIMATES_MS: &[(&str, &str, u64)] = &[
    ("us-east", "us-west", 65),
    ("us-east", "us-central", 35),
    ("us-west", "us-central", 40),
    ("us-east", "eu-west", 85),
    ("us-east", "eu-central", 95),
    ("us-west", "eu-west", 140),
    ("eu-west", "eu-central", 25),
    ("eu-west", "eu-north", 35),
    ("us-east", "ap-southeast", 210),
    ("us-west", "ap-southeast", 160),
    ("us-west", "ap-northeast", 110),
    ("eu-west", "ap-southeast", 155),
    ("eu-central", "ap-southeast", 150),
    ("ap-southeast", "ap-northeast", 70),
    ("ap-southeast", "ap-south", 55),
    ("us-east", "sa-east", 115),
    ("us-west", "sa-east", 175),
    ("eu-west", "sa-east", 180),
    ("eu-west", "af-south", 150),
    ("us-east", "ca-central", 20),
];

/// Assumed latency between two distinct regions on the same continent when
/// no curated pair exists
const SAME_CONTINENT_MS: u64 = 50;

/// Coarse geographic grouping derived from the region prefix
pub fn continent_of(region: &str) -> Option<&'static str> {
    let prefix = region.split('-').next()?;
    match prefix {
        "us" | "ca" => Some("north-america"),
        "sa" => Some("south-america"),
        "eu" => Some("europe"),
        "ap" => Some("asia-pacific"),
        "af" => Some("africa"),
        "me" => Some("middle-east"),
        _ => None,
    }
}

/// Last-resort latency estimate for a region pair. Symmetric; zero for a
/// region to itself; None when the pair cannot be estimated at all.
pub fn estimated_latency(a: &str, b: &str) -> Option<Duration> {
    if a == b {
        return Some(Duration::ZERO);
    }

    for (x, y, ms) in ESTIMATES_MS {
        if (a == *x && b == *y) || (a == *y && b == *x) {
            return Some(Duration::from_millis(*ms));
        }
    }

    match (continent_of(a), continent_of(b)) {
        (Some(ca), Some(cb)) if ca == cb => Some(Duration::from_millis(SAME_CONTINENT_MS)),
        _ => None,
    }
}

/// Rough country→region mapping used when geolocation yields no region
pub fn region_for_country(country: &str) -> Option<&'static str> {
    match country.to_ascii_uppercase().as_str() {
        "US" => Some("us-east"),
        "CA" => Some("ca-central"),
        "MX" => Some("us-west"),
        "BR" | "AR" | "CL" | "CO" => Some("sa-east"),
        "GB" | "IE" | "FR" | "ES" | "PT" | "NL" | "BE" => Some("eu-west"),
        "DE" | "AT" | "CH" | "PL" | "CZ" | "IT" => Some("eu-central"),
        "SE" | "NO" | "DK" | "FI" => Some("eu-north"),
        "SG" | "MY" | "ID" | "TH" | "VN" | "PH" | "AU" | "NZ" => Some("ap-southeast"),
        "JP" | "KR" | "TW" | "HK" => Some("ap-northeast"),
        "IN" | "PK" | "BD" | "LK" => Some("ap-south"),
        "ZA" | "NG" | "KE" | "EG" => Some("af-south"),
        "AE" | "SA" | "IL" | "TR" => Some("me-central"),
        _ => None,
    }
}
