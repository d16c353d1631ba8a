//! The union mount seam
//!
//! A container root is assembled from read-only layers plus one RW layer.
//! The overlay driver asks the kernel to stack them; when that is not
//! permitted (no privileges, no overlayfs) the copy driver materializes the
//! stack into the mount root instead. The copy driver cannot divert writes
//! into the RW layer, so change detection always reads the RW layer only.

use crate::errors::FsError;
use std::{
    ffi::CString,
    fs, io,
    os::unix::{
        ffi::OsStrExt,
        fs::{symlink, FileTypeExt, MetadataExt},
    },
    path::{Path, PathBuf},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountKind {
    Overlay,
    Copy,
}

/// Stack `layers` (top to bottom) and the RW layer onto `target`
///
/// `BOXD_DRIVER=copy` skips overlay entirely.
pub fn mount(layers: &[PathBuf], rw: &Path, work: &Path, target: &Path) -> Result<MountKind, FsError> {
    fs::create_dir_all(target).map_err(FsError::Io)?;
    fs::create_dir_all(work).map_err(FsError::Io)?;
    if let Ok(forced) = std::env::var("BOXD_DRIVER") {
        if forced == "copy" {
            mount_copy(layers, rw, target)?;
            return Ok(MountKind::Copy);
        }
    }
    match mount_overlay(layers, rw, work, target) {
        Ok(()) => Ok(MountKind::Overlay),
        Err(err) => {
            log::warn!(
                "overlay mount on {:?} failed ({}), using the copy driver",
                target,
                err
            );
            mount_copy(layers, rw, target)?;
            Ok(MountKind::Copy)
        }
    }
}

pub fn unmount(target: &Path, kind: MountKind) -> Result<(), FsError> {
    match kind {
        MountKind::Overlay => {
            let target_c = cstr(target.as_os_str().as_bytes())?;
            let rc = unsafe { libc::umount2(target_c.as_ptr(), libc::MNT_DETACH) };
            if rc != 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        MountKind::Copy => {
            fs::remove_dir_all(target).map_err(FsError::Io)?;
            fs::create_dir_all(target).map_err(FsError::Io)?;
        }
    }
    Ok(())
}

fn mount_overlay(layers: &[PathBuf], rw: &Path, work: &Path, target: &Path) -> io::Result<()> {
    if layers.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "overlay needs at least one lower layer",
        ));
    }
    let lower = layers
        .iter()
        .map(|layer| layer.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(":");
    let opts = format!(
        "lowerdir={},upperdir={},workdir={}",
        lower,
        rw.display(),
        work.display()
    );
    let source = cstr(b"overlay")?;
    let fstype = cstr(b"overlay")?;
    let target_c = cstr(target.as_os_str().as_bytes())?;
    let opts_c = cstr(opts.as_bytes())?;
    let rc = unsafe {
        libc::mount(
            source.as_ptr(),
            target_c.as_ptr(),
            fstype.as_ptr(),
            0,
            opts_c.as_ptr() as *const libc::c_void,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn cstr(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
}

fn mount_copy(layers: &[PathBuf], rw: &Path, target: &Path) -> Result<(), FsError> {
    for layer in layers.iter().rev() {
        apply_tree(layer, target)?;
    }
    apply_tree(rw, target)?;
    Ok(())
}

/// Copy one layer onto the assembled tree, honoring whiteout markers
fn apply_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let meta = entry.metadata()?;
        if meta.file_type().is_char_device() && meta.rdev() == 0 {
            remove_existing(&dst.join(&name));
            continue;
        }
        let lossy = name.to_string_lossy();
        if let Some(original) = lossy.strip_prefix(".wh.") {
            if !original.starts_with(".wh.") {
                remove_existing(&dst.join(original));
            }
            continue;
        }
        let to = dst.join(&name);
        let file_type = meta.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&to)?;
            fs::set_permissions(&to, meta.permissions())?;
            apply_tree(&entry.path(), &to)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            remove_existing(&to);
            symlink(link, &to)?;
        } else if file_type.is_file() {
            remove_existing(&to);
            fs::copy(entry.path(), &to)?;
        } else {
            log::debug!("copy driver skipping special file {:?}", entry.path());
        }
    }
    Ok(())
}

fn remove_existing(path: &Path) {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).ok();
        }
        Ok(_) => {
            fs::remove_file(path).ok();
        }
        Err(_) => {}
    }
}
