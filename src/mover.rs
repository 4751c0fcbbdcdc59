//! Moves sorted pairs into `<root>/<keep_dir>/<label>/` and tidies up
//! directories left empty behind them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use walkdir::WalkDir;

use crate::context::LayoutConfig;
use crate::error::SortError;
use crate::workset::{Category, FilePair};

#[derive(Debug, Clone, PartialEq)]
pub struct MovedPair {
    pub pair: FilePair,
    pub video_dest: PathBuf,
    pub image_dest: PathBuf,
}

pub fn category_dir(root: &Path, layout: &LayoutConfig, category: Category) -> PathBuf {
    root.join(&layout.keep_dir).join(category.label())
}

/// Move both files of `pair` into the category folder.
///
/// Nothing is overwritten: an existing destination fails the whole pair with
/// `MoveConflict` before either source is touched.
pub fn move_pair(
    root: &Path,
    layout: &LayoutConfig,
    pair: &FilePair,
    category: Category,
) -> Result<MovedPair, SortError> {
    let dest_dir = category_dir(root, layout, category);
    fs::create_dir_all(&dest_dir).map_err(|e| SortError::move_io(&dest_dir, e))?;

    let video_dest = dest_dir.join(file_name(&pair.video_path)?);
    let image_dest = dest_dir.join(file_name(&pair.image_path)?);

    for dest in [&video_dest, &image_dest] {
        if dest.symlink_metadata().is_ok() {
            return Err(SortError::MoveConflict(dest.clone()));
        }
    }

    move_no_replace(&pair.video_path, &video_dest).map_err(|e| to_sort_error(&pair.video_path, &video_dest, e))?;

    if let Err(e) = move_no_replace(&pair.image_path, &image_dest) {
        // Put the video back so the pair stays together.
        if let Err(undo) = move_no_replace(&video_dest, &pair.video_path) {
            log::error!(
                "Could not restore {:?} after failed sheet move: {}",
                pair.video_path, undo
            );
        }
        return Err(to_sort_error(&pair.image_path, &image_dest, e));
    }

    let mut moved = pair.clone();
    moved.category = Some(category);
    log::info!("Moved {} -> {:?}", pair.video_name(), dest_dir);
    Ok(MovedPair { pair: moved, video_dest, image_dest })
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr, SortError> {
    path.file_name().ok_or_else(|| {
        SortError::move_io(path, io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))
    })
}

fn to_sort_error(src: &Path, dest: &Path, err: io::Error) -> SortError {
    if is_already_exists(&err) {
        SortError::MoveConflict(dest.to_path_buf())
    } else {
        SortError::move_io(src, err)
    }
}

fn is_already_exists(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::AlreadyExists || err.raw_os_error() == Some(libc::EEXIST)
}

fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV) || err.kind() == io::ErrorKind::CrossesDevices
}

/// Rename without ever replacing `to`; copies across devices.
fn move_no_replace(from: &Path, to: &Path) -> io::Result<()> {
    match rename_noreplace(from, to) {
        Err(e) if is_cross_device(&e) => copy_then_remove(from, to),
        other => other,
    }
}

fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use nix::fcntl::{RenameFlags, renameat2};
        use std::os::fd::BorrowedFd;

        // Safety: AT_FDCWD is a constant valid fd for CWD
        let cwd = unsafe { BorrowedFd::borrow_raw(libc::AT_FDCWD) };

        match renameat2(cwd, from, cwd, to, RenameFlags::RENAME_NOREPLACE) {
            Ok(_) => return Ok(()),
            Err(e) if e == nix::errno::Errno::EXDEV || e == nix::errno::Errno::EEXIST => {
                return Err(io::Error::from_raw_os_error(e as i32));
            }
            // Filesystems without renameat2 support (FAT, some FUSE) fall through.
            Err(e) => log::debug!("renameat2 {:?} failed: {}, falling back", from, e),
        }
    }

    match fs::hard_link(from, to) {
        Ok(()) => return fs::remove_file(from),
        Err(e) if is_already_exists(&e) || is_cross_device(&e) => return Err(e),
        Err(_) => {}
    }

    if to.symlink_metadata().is_ok() {
        return Err(io::Error::from(io::ErrorKind::AlreadyExists));
    }
    fs::rename(from, to)
}

/// Cross-device move: exclusive create, copy, restore metadata, fsync, unlink.
fn copy_then_remove(src: &Path, dst: &Path) -> io::Result<()> {
    let mut reader = fs::File::open(src)?;
    let metadata = reader.metadata()?;
    let mut writer = fs::OpenOptions::new().write(true).create_new(true).open(dst)?;

    if let Err(e) = io::copy(&mut reader, &mut writer) {
        drop(writer);
        let _ = fs::remove_file(dst);
        return Err(e);
    }

    if let Err(e) = fs::set_permissions(dst, metadata.permissions()) {
        log::warn!("Failed to restore permissions on {:?}: {}", dst, e);
    }

    let mtime = FileTime::from_last_modification_time(&metadata);
    let atime = FileTime::from_last_access_time(&metadata);
    if let Err(e) = filetime::set_file_times(dst, atime, mtime) {
        log::warn!("Failed to restore timestamps on {:?}: {}", dst, e);
    }

    #[cfg(unix)]
    {
        if let Ok(names) = xattr::list(src) {
            for name in names {
                if let Ok(Some(value)) = xattr::get(src, &name) {
                    let _ = xattr::set(dst, &name, &value);
                }
            }
        }
    }

    writer.sync_all()?;
    drop(writer);
    drop(reader);
    fs::remove_file(src)
}

/// Directories under `root` in pre-order, with the keep tree pruned.
fn walk_dirs(root: &Path, keep: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !e.path().starts_with(keep))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                log::warn!("cleanup: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect()
}

/// Remove empty directories under `root`, deepest first. The root and the
/// keep tree are never touched. Failures are logged, not returned.
pub fn cleanup_empty_dirs(root: &Path, layout: &LayoutConfig) -> usize {
    let keep = root.join(&layout.keep_dir);
    let mut removed = 0usize;

    // Reversed pre-order visits children before their parents.
    for dir in walk_dirs(root, &keep).into_iter().rev() {
        let is_empty = match fs::read_dir(&dir) {
            Ok(mut it) => it.next().is_none(),
            Err(e) => {
                log::warn!("cleanup: cannot read {:?}: {}", dir, e);
                continue;
            }
        };
        if !is_empty {
            continue;
        }

        match fs::remove_dir(&dir) {
            Ok(()) => {
                log::info!("Removed empty directory {:?}", dir);
                removed += 1;
            }
            Err(e) => log::warn!("cleanup: cannot remove {:?}: {}", dir, e),
        }
    }
    removed
}
