//! Entity pools: bundles of currently-valid relative paths.
//!
//! Every handle is a path relative to the root pair; a handle only enters
//! a pool after the same creation succeeded on both roots. Storage is
//! insertion-ordered, selection is uniformly random. Picking from an
//! empty pool yields `None`, which callers treat as a step skip.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

/// The root of the tree itself, a folder handle that is always live.
pub const ROOT_SENTINEL: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTag {
    File,
    Folder,
}

/// A file known to carry a specific extended attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XattrHandle {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct EntityPool {
    files: Vec<String>,
    folders: Vec<String>,
    xattrs: Vec<XattrHandle>,
    acls: Vec<String>,
}

impl EntityPool {
    pub fn new() -> Self {
        EntityPool {
            folders: vec![ROOT_SENTINEL.to_string()],
            ..EntityPool::default()
        }
    }

    pub fn produce(&mut self, tag: EntityTag, path: &str) {
        let bundle = match tag {
            EntityTag::File => &mut self.files,
            EntityTag::Folder => &mut self.folders,
        };
        if !bundle.iter().any(|p| p == path) {
            bundle.push(path.to_string());
        }
    }

    pub fn consume(&mut self, tag: EntityTag, path: &str) {
        let bundle = match tag {
            EntityTag::File => &mut self.files,
            EntityTag::Folder => &mut self.folders,
        };
        bundle.retain(|p| p != path);
    }

    pub fn produce_xattr(&mut self, path: &str, name: &str) {
        let handle = XattrHandle {
            path: path.to_string(),
            name: name.to_string(),
        };
        if !self.xattrs.contains(&handle) {
            self.xattrs.push(handle);
        }
    }

    pub fn consume_xattr(&mut self, path: &str, name: &str) {
        self.xattrs.retain(|h| !(h.path == path && h.name == name));
    }

    pub fn produce_acl(&mut self, path: &str) {
        if !self.acls.iter().any(|p| p == path) {
            self.acls.push(path.to_string());
        }
    }

    pub fn consume_acl(&mut self, path: &str) {
        self.acls.retain(|p| p != path);
    }

    pub fn pick(&self, tag: EntityTag, rng: &mut SmallRng) -> Option<String> {
        let bundle = match tag {
            EntityTag::File => &self.files,
            EntityTag::Folder => &self.folders,
        };
        bundle.choose(rng).cloned()
    }

    /// Uniform pick over handles satisfying `pred`.
    pub fn pick_with<F>(&self, tag: EntityTag, rng: &mut SmallRng, pred: F) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let bundle = match tag {
            EntityTag::File => &self.files,
            EntityTag::Folder => &self.folders,
        };
        let candidates: Vec<&String> = bundle.iter().filter(|p| pred(p)).collect();
        candidates.choose(rng).map(|p| (*p).clone())
    }

    /// Any live entry, file or folder, root included.
    pub fn pick_any(&self, rng: &mut SmallRng) -> Option<(EntityTag, String)> {
        let total = self.files.len() + self.folders.len();
        if total == 0 {
            return None;
        }
        let mut tagged: Vec<(EntityTag, &String)> = Vec::with_capacity(total);
        tagged.extend(self.files.iter().map(|p| (EntityTag::File, p)));
        tagged.extend(self.folders.iter().map(|p| (EntityTag::Folder, p)));
        tagged.choose(rng).map(|(t, p)| (*t, (*p).clone()))
    }

    pub fn pick_xattr(&self, rng: &mut SmallRng) -> Option<XattrHandle> {
        self.xattrs.choose(rng).cloned()
    }

    pub fn pick_acl(&self, rng: &mut SmallRng) -> Option<String> {
        self.acls.choose(rng).cloned()
    }

    pub fn contains(&self, tag: EntityTag, path: &str) -> bool {
        match tag {
            EntityTag::File => self.files.iter().any(|p| p == path),
            EntityTag::Folder => self.folders.iter().any(|p| p == path),
        }
    }

    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }

    /// A folder other than the root sentinel exists.
    pub fn has_subfolders(&self) -> bool {
        self.folders.iter().any(|p| p != ROOT_SENTINEL)
    }

    pub fn has_xattrs(&self) -> bool {
        !self.xattrs.is_empty()
    }

    pub fn has_acls(&self) -> bool {
        !self.acls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    #[test]
    fn root_sentinel_is_always_live() {
        let pool = EntityPool::new();
        let mut rng = rng();
        assert_eq!(pool.pick(EntityTag::Folder, &mut rng).as_deref(), Some(""));
        assert!(!pool.has_subfolders());
    }

    #[test]
    fn produce_then_consume_round_trip() {
        let mut pool = EntityPool::new();
        pool.produce(EntityTag::File, "a/b");
        assert!(pool.contains(EntityTag::File, "a/b"));
        assert!(pool.has_files());
        pool.consume(EntityTag::File, "a/b");
        assert!(!pool.contains(EntityTag::File, "a/b"));
        assert!(!pool.has_files());
    }

    #[test]
    fn duplicate_produce_keeps_one_handle() {
        let mut pool = EntityPool::new();
        pool.produce(EntityTag::File, "f");
        pool.produce(EntityTag::File, "f");
        pool.consume(EntityTag::File, "f");
        assert!(!pool.has_files());
    }

    #[test]
    fn empty_pick_is_none() {
        let pool = EntityPool::new();
        let mut rng = rng();
        assert!(pool.pick(EntityTag::File, &mut rng).is_none());
        assert!(pool.pick_xattr(&mut rng).is_none());
        assert!(pool.pick_acl(&mut rng).is_none());
    }

    #[test]
    fn predicate_excludes_the_root() {
        let mut pool = EntityPool::new();
        let mut rng = rng();
        assert!(pool
            .pick_with(EntityTag::Folder, &mut rng, |p| p != ROOT_SENTINEL)
            .is_none());
        pool.produce(EntityTag::Folder, "d");
        assert_eq!(
            pool.pick_with(EntityTag::Folder, &mut rng, |p| p != ROOT_SENTINEL)
                .as_deref(),
            Some("d")
        );
    }

    #[test]
    fn xattr_handles_track_path_and_name() {
        let mut pool = EntityPool::new();
        pool.produce_xattr("f", "user.a");
        pool.produce_xattr("f", "user.b");
        pool.consume_xattr("f", "user.a");
        let mut rng = rng();
        let h = pool.pick_xattr(&mut rng).unwrap();
        assert_eq!(h.name, "user.b");
    }

    #[test]
    fn pick_any_spans_both_bundles() {
        let mut pool = EntityPool::new();
        pool.produce(EntityTag::File, "f");
        let mut rng = rng();
        let mut saw_file = false;
        let mut saw_folder = false;
        for _ in 0..64 {
            match pool.pick_any(&mut rng).unwrap().0 {
                EntityTag::File => saw_file = true,
                EntityTag::Folder => saw_folder = true,
            }
        }
        assert!(saw_file && saw_folder);
    }
}
