use crate::contexts::entry_point::merge_imports;
use crate::contexts::response_parser::extract_code;
use crate::contexts::source_scan::{find_matching, line_indent, split_top_level};
use crate::data::{EntryPointUpdate, TextGenerator};
use crate::error::{PromptError, ServiceError};
use crate::registries::PromptRegistry;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

pub const PROVIDER_IMPORT: &str = "package:provider/provider.dart";

/// Why a merge attempt produced no candidate.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no '{0}' found in entry file")]
    AnchorNotFound(&'static str),

    #[error("'{0}.router' takes its routes from the router config; use the collaborator merge strategy")]
    RouterApp(String),

    #[error("unbalanced brackets after '{0}'")]
    Unbalanced(&'static str),

    #[error("merge response contained no code")]
    EmptyResponse,

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Adds routes, providers and the initial route to an entry file.
///
/// Implementations only produce candidates; acceptance is decided by the
/// reconciler's validation gate.
pub trait MergeStrategy {
    fn name(&self) -> &'static str;

    fn merge(&self, entry: &str, update: &EntryPointUpdate) -> Result<String, MergeError>;
}

impl<S: MergeStrategy + ?Sized> MergeStrategy for &S {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn merge(&self, entry: &str, update: &EntryPointUpdate) -> Result<String, MergeError> {
        (**self).merge(entry, update)
    }
}

impl<S: MergeStrategy + ?Sized> MergeStrategy for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn merge(&self, entry: &str, update: &EntryPointUpdate) -> Result<String, MergeError> {
        (**self).merge(entry, update)
    }
}

fn routes_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\broutes\s*:\s*(?:<[^>]*>\s*)?\{").expect("valid regex"))
}

fn providers_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bproviders\s*:\s*(?:<[^>]*>\s*)?\[").expect("valid regex"))
}

fn app_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:MaterialApp|CupertinoApp|WidgetsApp)\s*\(").expect("valid regex"))
}

fn router_app_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(MaterialApp|CupertinoApp|WidgetsApp)\.router\s*\(").expect("valid regex")
    })
}

fn initial_route_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\binitialRoute\s*:\s*(?:'([^'\n]*)'|"([^"\n]*)")"#).expect("valid regex")
    })
}

fn run_app_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\brunApp\s*\(").expect("valid regex"))
}

fn route_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^(?:'([^']*)'|"([^"]*)")\s*:"#).expect("valid regex"))
}

/// Route keys of the first `routes: {...}` map in `content`.
pub fn route_keys(content: &str) -> Vec<String> {
    let Some(found) = routes_re().find(content) else {
        return Vec::new();
    };
    let open = found.end() - 1;
    let Some(close) = find_matching(content, open) else {
        return Vec::new();
    };
    split_top_level(&content[open + 1..close])
        .into_iter()
        .filter_map(|entry| {
            route_key_re()
                .captures(entry)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// The current `initialRoute:` value, if the entry file sets one.
pub fn initial_route(content: &str) -> Option<String> {
    initial_route_re()
        .captures(content)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
}

fn quote(route: &str) -> String {
    format!("'{}'", route.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn route_builder(constructor: &str) -> String {
    if constructor.contains("=>") {
        constructor.to_string()
    } else {
        format!("(context) => {}", constructor)
    }
}

/// Rewrites the inside of a bracketed list so `additions` follow the existing items.
fn append_items(content: &str, open: usize, close: usize, additions: &[String]) -> String {
    let inner = &content[open + 1..close];
    let outer_indent = line_indent(content, open).to_string();
    let item_indent = format!("{}  ", outer_indent);

    let kept = inner.trim_end();
    let mut rebuilt = kept.to_string();
    if !kept.trim().is_empty() && !kept.ends_with(',') {
        rebuilt.push(',');
    }
    for item in additions {
        rebuilt.push('\n');
        rebuilt.push_str(&item_indent);
        rebuilt.push_str(item);
        rebuilt.push(',');
    }
    rebuilt.push('\n');
    rebuilt.push_str(&outer_indent);

    format!("{}{}{}", &content[..open + 1], rebuilt, &content[close..])
}

/// Inserts a named argument right after the opening parenthesis of the app widget.
fn insert_app_argument(content: &str, argument: &str) -> Result<String, MergeError> {
    let found = app_re()
        .find(content)
        .ok_or(MergeError::AnchorNotFound("MaterialApp"))?;
    let open = found.end() - 1;
    let indent = format!("{}  ", line_indent(content, found.start()));
    let mut indented = String::new();
    for (i, line) in argument.lines().enumerate() {
        if i > 0 {
            indented.push('\n');
        }
        if !line.is_empty() {
            indented.push_str(&indent);
        }
        indented.push_str(line);
    }
    Ok(format!(
        "{}\n{},{}",
        &content[..open + 1],
        indented,
        &content[open + 1..]
    ))
}

fn merge_routes(content: &str, routes: &BTreeMap<String, String>) -> Result<String, MergeError> {
    match routes_re().find(content) {
        Some(found) => {
            let open = found.end() - 1;
            let close = find_matching(content, open).ok_or(MergeError::Unbalanced("routes"))?;
            let existing = route_keys(content);
            let additions: Vec<String> = routes
                .iter()
                .filter(|(route, _)| !existing.contains(*route))
                .map(|(route, constructor)| format!("{}: {}", quote(route), route_builder(constructor)))
                .collect();
            if additions.is_empty() {
                return Ok(content.to_string());
            }
            Ok(append_items(content, open, close, &additions))
        }
        None => {
            let mut table = String::from("routes: {");
            for (route, constructor) in routes {
                table.push_str(&format!("\n  {}: {},", quote(route), route_builder(constructor)));
            }
            table.push_str("\n}");
            insert_app_argument(content, &table)
        }
    }
}

fn set_initial_route(content: &str, route: &str) -> Result<String, MergeError> {
    match initial_route_re().captures(content) {
        Some(caps) => {
            let Some(value) = caps.get(1).or_else(|| caps.get(2)) else {
                return Ok(content.to_string());
            };
            if value.as_str() == route {
                return Ok(content.to_string());
            }
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(value.range());
            let replaced = format!("initialRoute: {}", quote(route));
            Ok(format!("{}{}{}", &content[..whole.start], replaced, &content[whole.end..]))
        }
        None => insert_app_argument(content, &format!("initialRoute: {}", quote(route))),
    }
}

fn normalize_expression(expr: &str) -> String {
    expr.chars().filter(|c| !c.is_whitespace()).collect::<String>().trim_end_matches(',').to_string()
}

fn merge_providers(content: &str, providers: &[String]) -> Result<String, MergeError> {
    let merged = match providers_re().find(content) {
        Some(found) => {
            let open = found.end() - 1;
            let close = find_matching(content, open).ok_or(MergeError::Unbalanced("providers"))?;
            let existing: Vec<String> = split_top_level(&content[open + 1..close])
                .into_iter()
                .map(normalize_expression)
                .collect();
            let additions: Vec<String> = providers
                .iter()
                .filter(|p| !existing.contains(&normalize_expression(p)))
                .map(|p| p.trim().trim_end_matches(',').to_string())
                .collect();
            if additions.is_empty() {
                return Ok(content.to_string());
            }
            append_items(content, open, close, &additions)
        }
        None => {
            let found = run_app_re()
                .find(content)
                .ok_or(MergeError::AnchorNotFound("runApp"))?;
            let open = found.end() - 1;
            let close = find_matching(content, open).ok_or(MergeError::Unbalanced("runApp"))?;
            let child = content[open + 1..close].trim().trim_end_matches(',').trim();
            let indent = line_indent(content, found.start()).to_string();

            let mut wrapped = format!("\n{indent}  MultiProvider(\n{indent}    providers: [");
            for provider in providers {
                wrapped.push_str(&format!(
                    "\n{indent}      {},",
                    provider.trim().trim_end_matches(',')
                ));
            }
            wrapped.push_str(&format!(
                "\n{indent}    ],\n{indent}    child: {child},\n{indent}  ),\n{indent}"
            ));
            format!("{}{}{}", &content[..open + 1], wrapped, &content[close..])
        }
    };

    if merged.contains(PROVIDER_IMPORT) {
        Ok(merged)
    } else {
        Ok(merge_imports(&merged, &[PROVIDER_IMPORT.to_string()]))
    }
}

/// Line- and bracket-based merge that never calls a collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicMerge;

impl MergeStrategy for HeuristicMerge {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn merge(&self, entry: &str, update: &EntryPointUpdate) -> Result<String, MergeError> {
        let touches_routes = !update.routes_to_add.is_empty() || update.initial_route.is_some();
        if touches_routes && app_re().find(entry).is_none() {
            if let Some(caps) = router_app_re().captures(entry) {
                let app = caps[1].to_string();
                tracing::warn!(app = %app, "router-based app, heuristic merge cannot add routes");
                return Err(MergeError::RouterApp(app));
            }
        }

        let mut content = entry.to_string();
        if !update.routes_to_add.is_empty() {
            content = merge_routes(&content, &update.routes_to_add)?;
        }
        if let Some(route) = &update.initial_route {
            content = set_initial_route(&content, route)?;
        }
        if !update.providers_to_initialize.is_empty() {
            content = merge_providers(&content, &update.providers_to_initialize)?;
        }
        Ok(content)
    }
}

#[derive(Serialize)]
struct MergeInput<'a> {
    path: &'a str,
    routes: &'a BTreeMap<String, String>,
    initial_route: Option<&'a str>,
    providers: &'a [String],
    content: &'a str,
}

/// Delegates the structural edit to the text-generation collaborator.
pub struct CollaboratorMerge<G: TextGenerator> {
    generator: G,
    prompts: PromptRegistry,
    entry_path: String,
}

impl<G: TextGenerator> CollaboratorMerge<G> {
    pub fn new(generator: G, prompts: PromptRegistry, entry_path: impl Into<String>) -> Self {
        Self {
            generator,
            prompts,
            entry_path: entry_path.into(),
        }
    }
}

impl<G: TextGenerator> MergeStrategy for CollaboratorMerge<G> {
    fn name(&self) -> &'static str {
        "collaborator"
    }

    fn merge(&self, entry: &str, update: &EntryPointUpdate) -> Result<String, MergeError> {
        let prompt = self.prompts.render(
            "entry_point_merge",
            &MergeInput {
                path: &self.entry_path,
                routes: &update.routes_to_add,
                initial_route: update.initial_route.as_deref(),
                providers: &update.providers_to_initialize,
                content: entry,
            },
        )?;
        let completion = self.generator.generate(&prompt)?;
        let code = extract_code(&completion.text).content;
        if code.trim().is_empty() {
            return Err(MergeError::EmptyResponse);
        }
        Ok(format!("{}\n", code.trim_end()))
    }
}
