//! Strategy catalog: bounded random draws for every operation parameter.
//!
//! All draws come from one seeded `SmallRng`, so a run is fully replayable
//! from its seed. Draws are pure value generation; offsets are reduced
//! modulo the live file size at execution time, never here.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

pub const MAX_ENTRY_NAME: usize = 4;
pub const MAX_FILE_SIZE: usize = 10 * 1024;
pub const MAX_TRUNCATE_SIZE: u64 = 128 * 1024;
pub const MAX_FALLOCATE_LENGTH: u64 = 128 * 1024;
pub const MAX_XATTR_NAME: usize = 255;
pub const MAX_XATTR_VALUE: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XattrFlag {
    None,
    Create,
    Replace,
}

impl XattrFlag {
    pub fn to_raw(self) -> libc::c_int {
        match self {
            XattrFlag::None => 0,
            XattrFlag::Create => libc::XATTR_CREATE,
            XattrFlag::Replace => libc::XATTR_REPLACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl Whence {
    pub fn to_raw(self) -> libc::c_int {
        match self {
            Whence::Set => libc::SEEK_SET,
            Whence::Cur => libc::SEEK_CUR,
            Whence::End => libc::SEEK_END,
        }
    }
}

/// Mode-string style open, the r/w/a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadPlus,
    Write,
    WritePlus,
    Append,
    AppendPlus,
}

pub struct Draws {
    rng: SmallRng,
}

impl Draws {
    pub fn new(seed: u64) -> Self {
        Draws {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// 1 to 4 lowercase letters.
    pub fn entry_name(&mut self) -> String {
        let len = self.rng.gen_range(1..=MAX_ENTRY_NAME);
        (0..len)
            .map(|_| char::from(b'a' + self.rng.gen_range(0..26)))
            .collect()
    }

    /// 0 to 10 KiB of binary content.
    pub fn file_content(&mut self) -> Vec<u8> {
        let len = self.rng.gen_range(0..=MAX_FILE_SIZE);
        let mut buf = vec![0u8; len];
        self.rng.fill(buf.as_mut_slice());
        buf
    }

    /// Attribute name in the user namespace, 1 to 255 chars total.
    pub fn xattr_name(&mut self) -> String {
        let budget = MAX_XATTR_NAME - "user.".len();
        let len = self.rng.gen_range(1..=budget);
        let body: String = (0..len)
            .map(|_| char::from(b'a' + self.rng.gen_range(0..26)))
            .collect();
        format!("user.{body}")
    }

    pub fn xattr_value(&mut self) -> Vec<u8> {
        let len = self.rng.gen_range(1..=MAX_XATTR_VALUE);
        let mut buf = vec![0u8; len];
        self.rng.fill(buf.as_mut_slice());
        buf
    }

    pub fn xattr_flag(&mut self) -> XattrFlag {
        *[XattrFlag::None, XattrFlag::Create, XattrFlag::Replace]
            .choose(&mut self.rng)
            .unwrap_or(&XattrFlag::None)
    }

    pub fn mode(&mut self) -> u32 {
        self.rng.gen_range(0o000..=0o777)
    }

    /// Usually the conventional 0o022, occasionally sampled.
    pub fn umask(&mut self) -> u32 {
        if self.rng.gen_bool(0.8) {
            0o022
        } else {
            self.rng.gen_range(0o000..=0o777)
        }
    }

    /// Raw offset; execution reduces it modulo the live file size.
    pub fn offset(&mut self) -> u64 {
        self.rng.gen_range(0..=MAX_FILE_SIZE as u64)
    }

    pub fn length(&mut self) -> u64 {
        self.rng.gen_range(0..=MAX_FILE_SIZE as u64)
    }

    pub fn truncate_size(&mut self) -> u64 {
        self.rng.gen_range(0..=MAX_TRUNCATE_SIZE)
    }

    pub fn fallocate_length(&mut self) -> u64 {
        self.rng.gen_range(0..=MAX_FALLOCATE_LENGTH)
    }

    pub fn whence(&mut self) -> Whence {
        *[Whence::Set, Whence::Cur, Whence::End]
            .choose(&mut self.rng)
            .unwrap_or(&Whence::Set)
    }

    pub fn open_mode(&mut self) -> OpenMode {
        *[
            OpenMode::Read,
            OpenMode::ReadPlus,
            OpenMode::Write,
            OpenMode::WritePlus,
            OpenMode::Append,
            OpenMode::AppendPlus,
        ]
        .choose(&mut self.rng)
        .unwrap_or(&OpenMode::Read)
    }

    /// A flag-list open: one access mode plus a random subset of extras.
    pub fn open_flags(&mut self) -> libc::c_int {
        let access = *[libc::O_RDONLY, libc::O_WRONLY, libc::O_RDWR]
            .choose(&mut self.rng)
            .unwrap_or(&libc::O_RDONLY);
        let mut flags = access;
        for extra in [libc::O_CREAT, libc::O_TRUNC, libc::O_APPEND, libc::O_EXCL] {
            if self.rng.gen_bool(0.25) {
                flags |= extra;
            }
        }
        flags
    }

    /// Subset of rwx; empty is valid and renders as `-` in ACL entries.
    pub fn perm_set(&mut self) -> String {
        let mut s = String::new();
        for p in ['r', 'w', 'x'] {
            if self.rng.gen_bool(0.5) {
                s.push(p);
            }
        }
        s
    }

    pub fn bool(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    /// Seconds since the epoch between 0 and now.
    pub fn utime_secs(&mut self) -> i64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.rng.gen_range(0..=now.max(1))
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    pub fn vdirs(&mut self) -> u32 {
        self.rng.gen_range(2..=32)
    }

    pub fn threads(&mut self) -> u32 {
        self.rng.gen_range(1..=10)
    }

    /// Small positive count for quotas, capacities and retention days.
    pub fn small_count(&mut self) -> u64 {
        self.rng.gen_range(1..=100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_replays_identically() {
        let mut a = Draws::new(42);
        let mut b = Draws::new(42);
        for _ in 0..32 {
            assert_eq!(a.entry_name(), b.entry_name());
            assert_eq!(a.offset(), b.offset());
            assert_eq!(a.file_content(), b.file_content());
            assert_eq!(a.mode(), b.mode());
        }
    }

    #[test]
    fn entry_names_are_short_lowercase() {
        let mut d = Draws::new(1);
        for _ in 0..200 {
            let name = d.entry_name();
            assert!((1..=MAX_ENTRY_NAME).contains(&name.len()));
            assert!(name.chars().all(|c| c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn xattr_names_fit_the_namespace() {
        let mut d = Draws::new(2);
        for _ in 0..50 {
            let name = d.xattr_name();
            assert!(name.starts_with("user."));
            assert!(name.len() <= MAX_XATTR_NAME);
            let value = d.xattr_value();
            assert!((1..=MAX_XATTR_VALUE).contains(&value.len()));
        }
    }

    #[test]
    fn bounds_hold_for_sizes() {
        let mut d = Draws::new(3);
        for _ in 0..200 {
            assert!(d.file_content().len() <= MAX_FILE_SIZE);
            assert!(d.truncate_size() <= MAX_TRUNCATE_SIZE);
            assert!(d.fallocate_length() <= MAX_FALLOCATE_LENGTH);
            assert!(d.mode() <= 0o777);
        }
    }

    #[test]
    fn perm_sets_draw_from_rwx() {
        let mut d = Draws::new(4);
        let mut saw_empty = false;
        for _ in 0..100 {
            let p = d.perm_set();
            assert!(p.chars().all(|c| "rwx".contains(c)));
            saw_empty |= p.is_empty();
        }
        assert!(saw_empty);
    }
}
