// Module definitions: identity, display name and archive part list.

use reqwest::Url;

use crate::cache::address::validate_module_name;
use crate::config::ResolvedConfig;
use crate::error::{EngineError, Result};

/// Modules offered on the landing page, in display order.
pub const DEFAULT_CATALOG: &[(&str, &str)] = &[
    ("walkthrough", "Walkthrough"),
    ("intro", "Introduction"),
    ("m1-yourdriverslicence", "Module 1 - Your Driver's Licence"),
    ("m2-roadsafety", "Module 2 - Road Safety"),
    ("m3-safedriving", "Module 3 - Safe Driving"),
    ("m4-roadrules", "Module 4 - Road Rules"),
    ("m5-penalties", "Module 5 - Penalties"),
    ("whereto", "Where to from here?"),
    ("test", "Test"),
];

/// One downloadable archive of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePart {
    /// 1-based position in the part list.
    pub number: u32,
    pub total: u32,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    pub display_name: String,
    pub parts: Vec<ArchivePart>,
}

impl ModuleSpec {
    pub fn new(config: &ResolvedConfig, name: &str, display_name: &str) -> Result<Self> {
        validate_module_name(name)?;
        let total = config.part_count(name);
        let parts = part_file_names(name, total)
            .into_iter()
            .enumerate()
            .map(|(i, file_name)| ArchivePart {
                number: i as u32 + 1,
                total,
                file_name,
            })
            .collect();
        let display_name = if display_name.trim().is_empty() {
            name.to_string()
        } else {
            display_name.to_string()
        };
        Ok(Self {
            name: name.to_string(),
            display_name,
            parts,
        })
    }

    /// Download address of `part` below `remote_base`.
    pub fn part_url(&self, remote_base: &Url, part: &ArchivePart) -> Result<String> {
        remote_base
            .join(&part.file_name)
            .map(|u| u.to_string())
            .map_err(|e| EngineError::Config(format!("part url for {}: {e}", self.name)))
    }
}

/// `{name}.zip`, then `{name}-part2.zip` … `{name}-part{n}.zip`.
pub fn part_file_names(name: &str, count: u32) -> Vec<String> {
    (1..=count.max(1))
        .map(|n| {
            if n == 1 {
                format!("{name}.zip")
            } else {
                format!("{name}-part{n}.zip")
            }
        })
        .collect()
}
