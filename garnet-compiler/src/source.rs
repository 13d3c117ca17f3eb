use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: SourceId,
    pub path: PathBuf,
    pub contents: String,
}

impl SourceFile {
    pub fn new(id: SourceId, path: PathBuf, contents: String) -> Self {
        Self { id, path, contents }
    }

    /// In-memory source with a synthetic path, used for the prelude and tests.
    pub fn named(id: SourceId, name: &str, contents: impl Into<String>) -> Self {
        Self::new(id, PathBuf::from(name), contents.into())
    }

    pub fn display_name(&self) -> String {
        self.path.display().to_string()
    }
}
