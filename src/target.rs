use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};

/// Environment variable consulted when the options payload omits the token.
const API_TOKEN_ENV: &str = "HETZNER_API_TOKEN";

const LOCATIONS: &[&str] = &["fsn1", "nbg1", "hel1", "ash", "hil", "sin"];

const DISK_IMAGES: &[&str] = &[
    "ubuntu-20.04",
    "ubuntu-22.04",
    "ubuntu-24.04",
    "debian-11",
    "debian-12",
    "centos-stream-9",
    "rocky-8",
    "rocky-9",
    "alma-8",
    "alma-9",
    "fedora-40",
];

const SERVER_TYPES: &[&str] = &[
    "cpx11", "cpx21", "cpx31", "cpx41", "cpx51", "cax11", "cax21", "cax31", "cax41", "ccx13",
    "ccx23", "ccx33", "ccx43", "ccx53", "ccx63", "cx22", "cx32", "cx42", "cx52",
];

/// Provisioning parameters for one workspace, decoded fresh from the
/// request's options payload on every call.
///
/// The JSON keys are fixed by the orchestrator's target-options format and
/// match the manifest field names, spaces included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetOptions {
    #[serde(rename = "Location", default)]
    pub location: String,
    #[serde(rename = "Disk Image", default)]
    pub disk_image: String,
    #[serde(rename = "Disk Size", default)]
    pub disk_size: u32,
    #[serde(rename = "Server Type", default)]
    pub server_type: String,
    #[serde(rename = "API Token", default)]
    pub api_token: String,
}

impl TargetOptions {
    /// Decode the options payload, falling back to `HETZNER_API_TOKEN` for
    /// the credential. Unknown fields are ignored for forward compatibility.
    pub fn parse(payload: &str) -> Result<Self> {
        let mut options: TargetOptions = serde_json::from_str(payload)
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        if options.api_token.is_empty() {
            if let Ok(token) = std::env::var(API_TOKEN_ENV) {
                options.api_token = token;
            }
        }

        if options.api_token.is_empty() {
            return Err(ProviderError::Configuration(
                "auth token not set in env/target options".to_string(),
            ));
        }

        Ok(options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPropertyType {
    String,
    Int,
}

/// One configurable field in the target manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: TargetPropertyType,
    pub default_value: String,
    pub description: String,
    pub suggestions: Vec<String>,
    pub input_masked: bool,
}

/// Declarative description of the configurable target fields, in the order
/// the orchestrator should prompt for them. Purely static.
pub fn target_manifest() -> Vec<TargetProperty> {
    vec![
        TargetProperty {
            name: "Location".to_string(),
            property_type: TargetPropertyType::String,
            default_value: "fsn1".to_string(),
            description: "The locations where the resources will be created. Default is fsn1.\n\
                          https://docs.hetzner.com/cloud/general/locations"
                .to_string(),
            suggestions: LOCATIONS.iter().map(|s| s.to_string()).collect(),
            input_masked: false,
        },
        TargetProperty {
            name: "Disk Image".to_string(),
            property_type: TargetPropertyType::String,
            default_value: "ubuntu-24.04".to_string(),
            description: "The Hetzner image to use for the VM. Default is ubuntu-24.04.\n\
                          https://docs.hetzner.com/robot/dedicated-server/operating-systems/standard-images"
                .to_string(),
            suggestions: DISK_IMAGES.iter().map(|s| s.to_string()).collect(),
            input_masked: false,
        },
        TargetProperty {
            name: "Disk Size".to_string(),
            property_type: TargetPropertyType::Int,
            default_value: "20".to_string(),
            description: "The size of the instance volume, in GB. Default is 20 GB.".to_string(),
            suggestions: Vec::new(),
            input_masked: false,
        },
        TargetProperty {
            name: "Server Type".to_string(),
            property_type: TargetPropertyType::String,
            default_value: "cpx11".to_string(),
            description: "The Hetzner server type to use for the VM. Default is cpx11.\n\
                          https://docs.hetzner.com/cloud/servers/overview"
                .to_string(),
            suggestions: SERVER_TYPES.iter().map(|s| s.to_string()).collect(),
            input_masked: false,
        },
        TargetProperty {
            name: "API Token".to_string(),
            property_type: TargetPropertyType::String,
            default_value: String::new(),
            description: "If empty, token will be fetched from the HETZNER_API_TOKEN environment variable."
                .to_string(),
            suggestions: Vec::new(),
            input_masked: true,
        },
    ]
}
