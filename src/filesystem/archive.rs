//! Tar archives in and out of directory trees

use flate2::read::GzDecoder;
use std::{
    fs,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
};
use tar::{Archive, Builder};

/// Extract a spooled archive into `dest`, creating it
///
/// Gzip-compressed archives are recognized by their magic bytes. Entries
/// whose paths would escape `dest` are skipped, not an error.
pub fn extract(tar_path: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    let mut file = fs::File::open(tar_path)?;
    let mut magic = [0u8; 2];
    let sniffed = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    if sniffed == 2 && magic == [0x1f, 0x8b] {
        unpack(Archive::new(GzDecoder::new(file)), dest)
    } else {
        unpack(Archive::new(file), dest)
    }
}

fn unpack<R: Read>(mut archive: Archive<R>, dest: &Path) -> io::Result<()> {
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(dest)? {
            log::warn!("skipping archive entry with unsafe path {:?}", entry.path().ok());
        }
    }
    Ok(())
}

/// Archive a directory tree as an uncompressed tar stream
///
/// Entry paths are relative to the tree root. Symlinks are archived as
/// links, never followed.
pub fn tar_dir(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}
