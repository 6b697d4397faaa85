//! Cloud-provider metadata probes: AWS IMDSv2, GCP metadata server, Azure
//! IMDS, tried in that order. Every probe runs under a hard timeout and
//! fails silently; a misconfigured host must never stall startup detection.

use super::{Location, LocationSource};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const AWS_TOKEN_URL: &str = "http://169.254.169.254/latest/api/token";
const AWS_IDENTITY_URL: &str =
    "http://169.254.169.254/latest/dynamic/instance-identity/document";
const GCP_ZONE_URL: &str = "http://metadata.google.internal/computeMetadata/v1/instance/zone";
const AZURE_LOCATION_URL: &str =
    "http://169.254.169.254/metadata/instance/compute/location?api-version=2021-02-01&format=text";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AwsIdentityDocument {
    region: String,
    #[serde(default)]
    availability_zone: Option<String>,
}

/// Try AWS, then GCP, then Azure. Returns the first hit.
pub async fn detect(client: &reqwest::Client, timeout: Duration) -> Option<Location> {
    if let Some(location) = detect_aws(client, timeout).await {
        return Some(location);
    }
    if let Some(location) = detect_gcp(client, timeout).await {
        return Some(location);
    }
    detect_azure(client, timeout).await
}

/// IMDSv2: PUT a session token, then GET the identity document with it
async fn detect_aws(client: &reqwest::Client, timeout: Duration) -> Option<Location> {
    let token = client
        .put(AWS_TOKEN_URL)
        .header("X-aws-ec2-metadata-token-ttl-seconds", "21600")
        .timeout(timeout)
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?
        .text()
        .await
        .ok()?;

    let document: AwsIdentityDocument = client
        .get(AWS_IDENTITY_URL)
        .header("X-aws-ec2-metadata-token", token)
        .timeout(timeout)
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?
        .json()
        .await
        .ok()?;

    debug!(region = %document.region, "detected AWS instance metadata");
    Some(cloud_location(
        "aws",
        document.region,
        document.availability_zone,
    ))
}

/// The zone value looks like `projects/<n>/zones/us-central1-a`; the region
/// is the zone with its trailing suffix trimmed.
async fn detect_gcp(client: &reqwest::Client, timeout: Duration) -> Option<Location> {
    let zone_path = client
        .get(GCP_ZONE_URL)
        .header("Metadata-Flavor", "Google")
        .timeout(timeout)
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?
        .text()
        .await
        .ok()?;

    let zone = zone_path.rsplit('/').next()?.trim().to_string();
    if zone.is_empty() {
        return None;
    }
    let region = zone
        .rsplit_once('-')
        .map(|(region, _)| region.to_string())
        .unwrap_or_else(|| zone.clone());

    debug!(%region, %zone, "detected GCP instance metadata");
    Some(cloud_location("gcp", region, Some(zone)))
}

async fn detect_azure(client: &reqwest::Client, timeout: Duration) -> Option<Location> {
    let location = client
        .get(AZURE_LOCATION_URL)
        .header("Metadata", "true")
        .timeout(timeout)
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?
        .text()
        .await
        .ok()?;

    let region = location.trim().to_string();
    if region.is_empty() {
        return None;
    }

    debug!(%region, "detected Azure instance metadata");
    Some(cloud_location("azure", region, None))
}

fn cloud_location(provider: &str, region: String, zone: Option<String>) -> Location {
    Location {
        region: region.clone(),
        zone,
        country: None,
        city: None,
        latitude: None,
        longitude: None,
        isp: None,
        cloud_provider: Some(provider.to_string()),
        cloud_region: Some(region),
        source: LocationSource::Metadata,
        detected_at: Utc::now(),
    }
}
