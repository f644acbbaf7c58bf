//! Upstream planning artifacts: the capability map and the physical map.
//!
//! The capability map groups behaviors under capabilities and domains. The
//! physical map attributes implementation and test files to behaviors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::definition::{FileMapping, SpecRef};
use crate::errors::{ResourceKind, Result};
use crate::state::persist::read_json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityBehavior {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_ref: Option<SpecRef>,
    #[serde(default)]
    pub behaviors: Vec<CapabilityBehavior>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityMap {
    pub domains: Vec<Domain>,
}

/// Where a behavior lives in the capability hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct BehaviorLocation<'a> {
    pub domain: &'a Domain,
    pub capability: &'a Capability,
    pub behavior: &'a CapabilityBehavior,
}

impl CapabilityMap {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path, ResourceKind::Artifact)
    }

    /// Every behavior keyed by ID.
    pub fn behavior_index(&self) -> BTreeMap<&str, BehaviorLocation<'_>> {
        let mut index = BTreeMap::new();
        for domain in &self.domains {
            for capability in &domain.capabilities {
                for behavior in &capability.behaviors {
                    index.insert(
                        behavior.id.as_str(),
                        BehaviorLocation {
                            domain,
                            capability,
                            behavior,
                        },
                    );
                }
            }
        }
        index
    }

    pub fn behavior_count(&self) -> usize {
        self.domains
            .iter()
            .flat_map(|d| &d.capabilities)
            .map(|c| c.behaviors.len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorFiles {
    pub behavior_id: String,
    #[serde(default)]
    pub files: Vec<FileMapping>,
    #[serde(default)]
    pub tests: Vec<FileMapping>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalMap {
    pub file_mapping: Vec<BehaviorFiles>,
}

impl PhysicalMap {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path, ResourceKind::Artifact)
    }

    pub fn for_behavior<'a>(&'a self, behavior_id: &'a str) -> impl Iterator<Item = &'a BehaviorFiles> {
        self.file_mapping
            .iter()
            .filter(move |m| m.behavior_id == behavior_id)
    }
}
