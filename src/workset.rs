use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    A,
    F,
    R,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::A, Category::F, Category::R];

    /// Folder name under the keep directory.
    pub fn label(&self) -> &'static str {
        match self {
            Category::A => "A",
            Category::F => "F",
            Category::R => "R",
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(Category::A),
            'F' => Some(Category::F),
            'R' => Some(Category::R),
            _ => None,
        }
    }
}

/// A video and its contact sheet. The video path is the identity.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePair {
    pub video_path: PathBuf,
    pub image_path: PathBuf,
    pub category: Option<Category>,
}

impl FilePair {
    pub fn new(video_path: PathBuf, image_path: PathBuf) -> Self {
        Self { video_path, image_path, category: None }
    }

    pub fn id(&self) -> &Path {
        &self.video_path
    }

    pub fn video_name(&self) -> String {
        self.video_path.file_name().unwrap_or_default().to_string_lossy().to_string()
    }
}

/// Pairs still waiting to be sorted.
///
/// Pairs live in a map keyed by identity; `order` is rebuilt on every removal
/// so indices stay contiguous and never point at a removed pair.
#[derive(Debug, Default)]
pub struct WorkingSet {
    pairs: HashMap<PathBuf, FilePair>,
    order: Vec<PathBuf>,
}

impl WorkingSet {
    pub fn new(pairs: Vec<FilePair>) -> Self {
        let mut set = Self::default();
        for pair in pairs {
            if set.pairs.contains_key(pair.id()) {
                log::warn!("Duplicate pair ignored: {:?}", pair.video_path);
                continue;
            }
            set.order.push(pair.video_path.clone());
            set.pairs.insert(pair.video_path.clone(), pair);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&FilePair> {
        self.order.get(idx).and_then(|id| self.pairs.get(id))
    }

    pub fn contains(&self, id: &Path) -> bool {
        self.pairs.contains_key(id)
    }

    pub fn index_of(&self, id: &Path) -> Option<usize> {
        if !self.contains(id) {
            return None;
        }
        self.order.iter().position(|p| p == id)
    }

    pub fn id_at(&self, idx: usize) -> Option<&PathBuf> {
        self.order.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilePair> {
        self.order.iter().filter_map(|id| self.pairs.get(id))
    }

    /// Remove the given identities and return the removed pairs in their
    /// former order.
    pub fn remove_all(&mut self, ids: &HashSet<PathBuf>) -> Vec<FilePair> {
        let mut removed = Vec::new();
        for id in &self.order {
            if ids.contains(id)
                && let Some(pair) = self.pairs.remove(id)
            {
                removed.push(pair);
            }
        }
        self.order.retain(|id| self.pairs.contains_key(id));
        removed
    }
}
