use std::collections::BTreeMap;

/// One tracked file as seen by callers of the state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    /// Forward-slash path relative to the project root.
    pub path: String,
    pub content: String,
    pub exists: bool,
}

/// Snapshot of all tracked files, keyed by relative path.
///
/// Paths iterate in sorted order, which keeps every rendering built from a
/// snapshot stable for a given on-disk state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectState {
    files: BTreeMap<String, String>,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path listing followed by every file's contents.
    pub fn render(&self) -> String {
        self.render_filtered(|_| true)
    }

    /// Like [`render`](Self::render) but only for paths accepted by `keep`.
    pub fn render_filtered<F: Fn(&str) -> bool>(&self, keep: F) -> String {
        let mut out = String::from("Project Structure:\n");
        let paths: Vec<&str> = self.paths().filter(|p| keep(p)).collect();
        out.push_str(&paths.join("\n"));
        out.push_str("\n\nFile Contents:\n");
        for path in paths {
            let content = self.files.get(path).map(String::as_str).unwrap_or_default();
            out.push_str(&format!("\n--- {} ---\n{}\n", path, content));
        }
        out
    }
}

/// Shortens `text` to at most roughly `max_length` bytes, keeping the head and the tail.
pub fn truncate_context(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }
    let half = max_length / 2;
    let mut head_end = half;
    while !text.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = text.len() - half;
    while !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!("{}\n...\n{}", &text[..head_end], &text[tail_start..])
}
