use dashmap::DashMap;

/// A fenced block of file text injected ahead of a question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextFragment {
    pub path: String,
    pub language: String,
    pub text: String,
}

impl ContextFragment {
    pub fn render(&self) -> String {
        format!(
            "\nFile: {}\n```{}\n{}\n```\n",
            self.path, self.language, self.text
        )
    }
}

/// Session-lifetime memo of file fragments keyed by the path the user selected.
///
/// Entries are never invalidated: once a path has been read, later asks reuse the
/// first snapshot even if the file changes on disk. Concurrent misses on the same
/// path may both read and insert; the last insert wins.
#[derive(Debug, Default)]
pub struct FileContextCache {
    entries: DashMap<String, ContextFragment>,
}

impl FileContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<ContextFragment> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    pub fn put(&self, path: impl Into<String>, fragment: ContextFragment) {
        self.entries.insert(path.into(), fragment);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
