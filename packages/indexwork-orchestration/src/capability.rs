//! Backend capability resolution.
//!
//! Maps a backend distribution and version to the strategies that depend on
//! it. Resolution is a plain table lookup; every supported version line is
//! listed in [`resolve`].

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Elastic,
    OpenSearch,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Elastic => "elastic",
            Distribution::OpenSearch => "opensearch",
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Distribution {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "elastic" | "elasticsearch" => Ok(Distribution::Elastic),
            "opensearch" => Ok(Distribution::OpenSearch),
            _ => Err(OrchestratorError::UnsupportedVersion(format!(
                "unknown distribution '{}'",
                s
            ))),
        }
    }
}

/// The version line a bundle was resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Elastic56,
    Elastic6,
    Elastic7,
    Elastic8,
    OpenSearch1,
    OpenSearch2,
}

/// How bulk action lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkFormat {
    /// Every action names a mapping type.
    TypedActions,
    TypelessActions,
}

/// How search responses report the total hit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitsTotalFormat {
    /// `"total": 42`
    Numeric,
    /// `"total": { "value": 42, "relation": "eq" }`
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTypeMapping {
    Elastic5,
    Elastic6,
    Elastic7,
    OpenSearch,
}

impl FieldTypeMapping {
    pub fn requires_mapping_type(&self) -> bool {
        matches!(self, FieldTypeMapping::Elastic5 | FieldTypeMapping::Elastic6)
    }

    pub fn supports_date_nanos(&self) -> bool {
        matches!(self, FieldTypeMapping::Elastic7 | FieldTypeMapping::OpenSearch)
    }

    /// Field type used for vector embeddings, if any.
    pub fn vector_type(&self) -> Option<&'static str> {
        match self {
            FieldTypeMapping::Elastic5 | FieldTypeMapping::Elastic6 => None,
            FieldTypeMapping::Elastic7 => Some("dense_vector"),
            FieldTypeMapping::OpenSearch => Some("knn_vector"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityBundle {
    pub dialect: Dialect,
    pub work_builder: BulkFormat,
    pub result_extractor: HitsTotalFormat,
    pub field_types: FieldTypeMapping,
}

impl CapabilityBundle {
    const fn new(
        dialect: Dialect,
        work_builder: BulkFormat,
        result_extractor: HitsTotalFormat,
        field_types: FieldTypeMapping,
    ) -> Self {
        Self {
            dialect,
            work_builder,
            result_extractor,
            field_types,
        }
    }
}

const ELASTIC_56: CapabilityBundle = CapabilityBundle::new(
    Dialect::Elastic56,
    BulkFormat::TypedActions,
    HitsTotalFormat::Numeric,
    FieldTypeMapping::Elastic5,
);
const ELASTIC_6: CapabilityBundle = CapabilityBundle::new(
    Dialect::Elastic6,
    BulkFormat::TypedActions,
    HitsTotalFormat::Numeric,
    FieldTypeMapping::Elastic6,
);
const ELASTIC_7: CapabilityBundle = CapabilityBundle::new(
    Dialect::Elastic7,
    BulkFormat::TypelessActions,
    HitsTotalFormat::Object,
    FieldTypeMapping::Elastic7,
);
const ELASTIC_8: CapabilityBundle = CapabilityBundle::new(
    Dialect::Elastic8,
    BulkFormat::TypelessActions,
    HitsTotalFormat::Object,
    FieldTypeMapping::Elastic7,
);
const OPENSEARCH_1: CapabilityBundle = CapabilityBundle::new(
    Dialect::OpenSearch1,
    BulkFormat::TypelessActions,
    HitsTotalFormat::Object,
    FieldTypeMapping::OpenSearch,
);
const OPENSEARCH_2: CapabilityBundle = CapabilityBundle::new(
    Dialect::OpenSearch2,
    BulkFormat::TypelessActions,
    HitsTotalFormat::Object,
    FieldTypeMapping::OpenSearch,
);

/// Resolves the capabilities of a backend version.
///
/// `minor` is only consulted where a major version is partially supported
/// (Elastic 5 requires 5.6). A major version newer than every known one
/// resolves to the latest known bundle of the distribution, with a warning.
pub fn resolve(
    distribution: Distribution,
    major: u32,
    minor: Option<u32>,
) -> Result<CapabilityBundle> {
    let bundle = match (distribution, major, minor) {
        (Distribution::Elastic, 5, Some(minor)) if minor >= 6 => ELASTIC_56,
        (Distribution::Elastic, 6, _) => ELASTIC_6,
        (Distribution::Elastic, 7, _) => ELASTIC_7,
        (Distribution::Elastic, 8, _) => ELASTIC_8,
        (Distribution::Elastic, major, _) if major > 8 => future_version(distribution, major, ELASTIC_8),
        (Distribution::OpenSearch, 1, _) => OPENSEARCH_1,
        (Distribution::OpenSearch, 2, _) => OPENSEARCH_2,
        (Distribution::OpenSearch, major, _) if major > 2 => {
            future_version(distribution, major, OPENSEARCH_2)
        }
        _ => {
            return Err(OrchestratorError::UnsupportedVersion(format!(
                "{} {}",
                distribution,
                format_version(major, minor)
            )))
        }
    };
    Ok(bundle)
}

fn future_version(distribution: Distribution, major: u32, latest: CapabilityBundle) -> CapabilityBundle {
    warn!(
        distribution = %distribution,
        major,
        dialect = ?latest.dialect,
        "Unknown backend version; assuming it behaves like the latest known one"
    );
    latest
}

fn format_version(major: u32, minor: Option<u32>) -> String {
    match minor {
        Some(minor) => format!("{}.{}", major, minor),
        None => major.to_string(),
    }
}

/// Parses `"7"`, `"7.10"` or `"7.10.2-SNAPSHOT"` into a major and optional minor.
pub fn parse_version(version: &str) -> Result<(u32, Option<u32>)> {
    let invalid = || OrchestratorError::UnsupportedVersion(format!("invalid version '{}'", version));

    let core = version.trim().split('-').next().unwrap_or_default();
    let mut parts = core.split('.');
    let major = parts
        .next()
        .and_then(|part| part.parse::<u32>().ok())
        .ok_or_else(invalid)?;
    let minor = match parts.next() {
        Some(part) => Some(part.parse::<u32>().map_err(|_| invalid())?),
        None => None,
    };
    Ok((major, minor))
}
