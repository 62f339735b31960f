//! Line-level updates of the `dependencies:` section of `pubspec.yaml`.

use crate::config::EngineConfig;
use crate::data::DependencyDeclaration;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use yaml_rust::{Yaml, YamlLoader};

const SECTION: &str = "dependencies:";
const DEFAULT_INDENT: &str = "  ";

fn entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s+)([A-Za-z_][A-Za-z0-9_]*)\s*:(.*)$").expect("valid regex")
    })
}

fn package_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*(?:import|export)\s+['"]package:([A-Za-z_][A-Za-z0-9_]*)/"#)
            .expect("valid regex")
    })
}

/// Merges dependency declarations into the manifest text.
#[derive(Debug, Clone)]
pub struct ManifestUpdater {
    reserved: Vec<String>,
}

/// One direct child line of the dependency section.
struct Entry {
    line: usize,
    name: String,
    inline: bool,
}

impl ManifestUpdater {
    pub fn new(reserved: Vec<String>) -> Self {
        Self { reserved }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.reserved_packages.clone())
    }

    /// Applies `declarations` in order; the last version given for a package wins.
    ///
    /// Reserved packages and block entries are left alone. A manifest without
    /// a top-level `dependencies:` section is returned unchanged, as is any
    /// result that would no longer parse as YAML.
    pub fn merge(&self, manifest: &str, declarations: &[DependencyDeclaration]) -> String {
        let mut lines: Vec<String> = manifest.lines().map(str::to_string).collect();
        if find_section(&lines).is_none() {
            tracing::warn!("manifest has no dependencies section, leaving it untouched");
            return manifest.to_string();
        }

        for declaration in declarations {
            if self.reserved.iter().any(|r| r == &declaration.name) {
                tracing::debug!(package = %declaration.name, "reserved package skipped");
                continue;
            }
            apply(&mut lines, declaration);
        }

        let mut merged = lines.join("\n");
        if manifest.ends_with('\n') {
            merged.push('\n');
        }
        if merged == manifest {
            return merged;
        }

        match YamlLoader::load_from_str(&merged) {
            Ok(_) => merged,
            Err(e) => {
                tracing::warn!(error = %e, "merged manifest is not valid YAML, keeping original");
                manifest.to_string()
            }
        }
    }
}

/// `(start, end)`: the header line and the index of the next top-level line.
fn find_section(lines: &[String]) -> Option<(usize, usize)> {
    let start = lines
        .iter()
        .position(|l| l.split('#').next().unwrap_or_default().trim_end() == SECTION)?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| {
            let first = l.chars().next();
            first.is_some_and(|c| !c.is_whitespace() && c != '#')
        })
        .map(|i| start + 1 + i)
        .unwrap_or(lines.len());
    Some((start, end))
}

fn section_entries(lines: &[String], start: usize, end: usize) -> (String, Vec<Entry>) {
    let mut indent: Option<String> = None;
    let mut entries = Vec::new();
    for (i, line) in lines.iter().enumerate().take(end).skip(start + 1) {
        let Some(caps) = entry_regex().captures(line) else {
            continue;
        };
        let line_indent = &caps[1];
        match &indent {
            None => indent = Some(line_indent.to_string()),
            Some(child) if child != line_indent => continue,
            Some(_) => {}
        }
        let value = caps[3].split('#').next().unwrap_or_default().trim();
        entries.push(Entry {
            line: i,
            name: caps[2].to_string(),
            inline: !value.is_empty(),
        });
    }
    (indent.unwrap_or_else(|| DEFAULT_INDENT.to_string()), entries)
}

fn apply(lines: &mut Vec<String>, declaration: &DependencyDeclaration) {
    let Some((start, end)) = find_section(lines) else {
        return;
    };
    let (indent, entries) = section_entries(lines, start, end);
    let line = format!("{}{}: {}", indent, declaration.name, quote_version(&declaration.version));

    let existing: Vec<&Entry> = entries.iter().filter(|e| e.name == declaration.name).collect();
    if existing.iter().any(|e| !e.inline) {
        tracing::debug!(package = %declaration.name, "block entry left as is");
        return;
    }

    match existing.split_first() {
        Some((first, duplicates)) => {
            if lines[first.line] != line {
                tracing::info!(package = %declaration.name, version = %declaration.version, "dependency constraint updated");
            }
            lines[first.line] = line;
            for duplicate in duplicates.iter().rev() {
                lines.remove(duplicate.line);
            }
        }
        None => {
            let insert_at = (start + 1..end)
                .rev()
                .find(|&i| !lines[i].trim().is_empty())
                .map(|i| i + 1)
                .unwrap_or(start + 1);
            tracing::info!(package = %declaration.name, version = %declaration.version, "dependency added");
            lines.insert(insert_at, line);
        }
    }
}

/// Quotes constraints YAML would otherwise misread.
fn quote_version(version: &str) -> String {
    let version = version.trim();
    if version.is_empty() {
        return DependencyDeclaration::ANY_VERSION.to_string();
    }
    let quoted = (version.starts_with('"') && version.ends_with('"') && version.len() > 1)
        || (version.starts_with('\'') && version.ends_with('\'') && version.len() > 1);
    if quoted {
        return version.to_string();
    }
    if version.starts_with(['>', '<']) || version.contains([' ', '#']) {
        format!("\"{}\"", version.replace('"', "\\\""))
    } else {
        version.to_string()
    }
}

fn parse_manifest(manifest: &str) -> Option<Yaml> {
    match YamlLoader::load_from_str(manifest) {
        Ok(mut docs) if !docs.is_empty() => Some(docs.swap_remove(0)),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "manifest does not parse as YAML");
            None
        }
    }
}

/// Names under `dependencies` and `dev_dependencies`.
pub fn declared_packages(manifest: &str) -> BTreeSet<String> {
    let Some(doc) = parse_manifest(manifest) else {
        return BTreeSet::new();
    };
    ["dependencies", "dev_dependencies"]
        .iter()
        .filter_map(|section| doc[*section].as_hash())
        .flat_map(|hash| hash.keys().filter_map(|k| k.as_str().map(str::to_string)))
        .collect()
}

/// The manifest's own package name.
pub fn package_name(manifest: &str) -> Option<String> {
    parse_manifest(manifest)?["name"].as_str().map(str::to_string)
}

/// Packages referenced by `package:` imports and exports.
pub fn imported_packages(content: &str) -> BTreeSet<String> {
    package_import_regex()
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .collect()
}
