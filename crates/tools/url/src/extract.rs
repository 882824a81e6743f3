//! Archive extraction.
//!
//! Entries are written beneath the destination only: absolute paths and `..`
//! components are rejected, symlinks must point inside the destination, and
//! no entry is written through a previously extracted symlink. Unix modes are
//! preserved so executables stay executable.

use agentenv_core::tools::ArchiveKind;
use agentenv_core::{Error, IoResultExt, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, trace};

/// Extract an archive into `dest`, dropping `strip` leading path components.
pub fn extract(archive: &Path, kind: ArchiveKind, strip: usize, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).with_path(dest, "create extraction directory")?;
    debug!(archive = %archive.display(), %kind, strip, "Extracting");
    match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive, strip, dest),
        ArchiveKind::Zip => extract_zip(archive, strip, dest),
    }
}

/// The only entry of `dir`, if that entry is a directory.
pub fn single_root(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = std::fs::read_dir(dir).with_path(dir, "read extracted archive")?;
    let Some(first) = entries.next() else {
        return Ok(None);
    };
    if entries.next().is_some() {
        return Ok(None);
    }
    let first = first.with_path(dir, "read extracted archive")?;
    let file_type = first.file_type().with_path(&first.path(), "stat")?;
    Ok(file_type.is_dir().then(|| first.path()))
}

/// Relative path of an entry after stripping, or `None` if nothing remains.
fn stripped(path: &Path, strip: usize) -> Result<Option<PathBuf>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            _ => return Err(escapes(path)),
        }
    }
    if parts.len() <= strip {
        return Ok(None);
    }
    Ok(Some(parts[strip..].iter().collect()))
}

fn malformed(archive: &Path, err: impl std::fmt::Display) -> Error {
    Error::configuration(format!(
        "Failed to read archive {}: {err}",
        archive.display()
    ))
}

fn escapes(entry: &Path) -> Error {
    Error::configuration(format!(
        "Archive entry '{}' escapes the install directory",
        entry.display()
    ))
}

/// Fail if any parent of `dest/relative` is a symlink.
fn check_parents(dest: &Path, relative: &Path) -> Result<()> {
    let mut current = dest.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        match current.symlink_metadata() {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(Error::configuration(format!(
                    "Archive entry '{}' is written through the symlink '{}'",
                    relative.display(),
                    current.strip_prefix(dest).unwrap_or(&current).display()
                )));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(())
}

/// Prepare `dest/relative` for writing.
///
/// An existing symlink at the entry itself is removed so the entry replaces
/// it rather than writing through it.
fn prepare(dest: &Path, relative: &Path) -> Result<PathBuf> {
    check_parents(dest, relative)?;
    let target = dest.join(relative);
    if target
        .symlink_metadata()
        .is_ok_and(|meta| meta.file_type().is_symlink())
    {
        std::fs::remove_file(&target).with_path(&target, "replace symlink")?;
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).with_path(parent, "create directory")?;
    }
    Ok(target)
}

/// Reject symlink targets that are absolute or climb out of the destination.
///
/// `relative` is the (stripped) location of the link inside the destination.
fn check_link(relative: &Path, link: &Path) -> Result<()> {
    let mut depth = relative.components().count().saturating_sub(1);
    for component in link.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    Error::configuration(format!(
                        "Symlink '{}' -> '{}' points outside the install directory",
                        relative.display(),
                        link.display()
                    ))
                })?;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::configuration(format!(
                    "Symlink '{}' -> '{}' is absolute",
                    relative.display(),
                    link.display()
                )));
            }
        }
    }
    Ok(())
}

fn extract_tar_gz(archive_path: &Path, strip: usize, dest: &Path) -> Result<()> {
    let file = File::open(archive_path).with_path(archive_path, "open archive")?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    for entry in archive.entries().map_err(|e| malformed(archive_path, e))? {
        let mut entry = entry.map_err(|e| malformed(archive_path, e))?;
        let path = entry
            .path()
            .map_err(|e| malformed(archive_path, e))?
            .into_owned();
        let Some(relative) = stripped(&path, strip)? else {
            continue;
        };
        let target = prepare(dest, &relative)?;
        trace!(entry = %path.display(), target = %target.display(), "Unpacking");

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&target).with_path(&target, "create directory")?;
            }
            EntryType::Link => {
                // Hard link targets are archive paths, not filesystem paths.
                let link = link_name(&entry, archive_path)?;
                let Some(source) = stripped(&link, strip)? else {
                    continue;
                };
                check_parents(dest, &source)?;
                std::fs::hard_link(dest.join(source), &target)
                    .with_path(&target, "create hard link")?;
            }
            EntryType::Symlink => {
                check_link(&relative, &link_name(&entry, archive_path)?)?;
                entry
                    .unpack(&target)
                    .map_err(|e| Error::io(e, &target, "unpack"))?;
            }
            _ => {
                entry
                    .unpack(&target)
                    .map_err(|e| Error::io(e, &target, "unpack"))?;
            }
        }
    }
    Ok(())
}

fn link_name<R: std::io::Read>(entry: &tar::Entry<'_, R>, archive: &Path) -> Result<PathBuf> {
    Ok(entry
        .link_name()
        .map_err(|e| malformed(archive, e))?
        .ok_or_else(|| malformed(archive, "link without target"))?
        .into_owned())
}

fn extract_zip(archive_path: &Path, strip: usize, dest: &Path) -> Result<()> {
    let file = File::open(archive_path).with_path(archive_path, "open archive")?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| malformed(archive_path, e))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| malformed(archive_path, e))?;
        let Some(enclosed) = file.enclosed_name() else {
            return Err(escapes(Path::new(file.name())));
        };
        let Some(relative) = stripped(&enclosed, strip)? else {
            continue;
        };
        let target = prepare(dest, &relative)?;
        trace!(entry = %file.name(), target = %target.display(), "Unpacking");

        if file.is_dir() {
            std::fs::create_dir_all(&target).with_path(&target, "create directory")?;
            continue;
        }

        #[cfg(unix)]
        if file.unix_mode().is_some_and(|mode| mode & 0o170_000 == 0o120_000) {
            let mut link = String::new();
            std::io::Read::read_to_string(&mut file, &mut link)
                .map_err(|e| malformed(archive_path, e))?;
            check_link(&relative, Path::new(&link))?;
            std::os::unix::fs::symlink(&link, &target).with_path(&target, "create symlink")?;
            continue;
        }

        let mut out = File::create(&target).with_path(&target, "create file")?;
        std::io::copy(&mut file, &mut out).with_path(&target, "write file")?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode & 0o7777))
                .with_path(&target, "set permissions")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn tarball(dir: &Path, files: &[(&str, &[u8], u32)]) -> PathBuf {
        let path = dir.join("test.tar.gz");
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content, mode) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append(&header, &content[..]).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    fn zipfile(dir: &Path, files: &[(&str, &[u8], u32)]) -> PathBuf {
        let path = dir.join("test.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        for (name, content, mode) in files {
            let options = zip::write::SimpleFileOptions::default().unix_permissions(*mode);
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    enum Item<'a> {
        File(&'a str, &'a [u8]),
        Symlink(&'a str, &'a str),
    }

    fn tarball_with_links(dir: &Path, items: &[Item<'_>]) -> PathBuf {
        let path = dir.join("links.tar.gz");
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for item in items {
            let mut header = tar::Header::new_gnu();
            match item {
                Item::File(name, content) => {
                    header.set_path(name).unwrap();
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append(&header, &content[..]).unwrap();
                }
                Item::Symlink(name, target) => {
                    header.set_path(name).unwrap();
                    header.set_entry_type(EntryType::Symlink);
                    header.set_link_name(target).unwrap();
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_cksum();
                    builder.append(&header, std::io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    fn zip_with_links(dir: &Path, items: &[Item<'_>]) -> PathBuf {
        let path = dir.join("links.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        for item in items {
            match item {
                Item::File(name, content) => {
                    writer
                        .start_file(*name, zip::write::SimpleFileOptions::default())
                        .unwrap();
                    writer.write_all(content).unwrap();
                }
                Item::Symlink(name, target) => {
                    writer
                        .add_symlink(*name, *target, zip::write::SimpleFileOptions::default())
                        .unwrap();
                }
            }
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_check_link() {
        assert!(check_link(Path::new("bin/mvnDebug"), Path::new("mvn")).is_ok());
        assert!(check_link(Path::new("bin/java"), Path::new("../jre/bin/java")).is_ok());
        assert!(check_link(Path::new("bin/java"), Path::new("../../java")).is_err());
        assert!(check_link(Path::new("escape"), Path::new("..")).is_err());
        assert!(check_link(Path::new("escape"), Path::new("/tmp/outside")).is_err());
    }

    #[test]
    fn test_stripped() {
        assert_eq!(
            stripped(Path::new("apache-maven-3.9.6/bin/mvn"), 1).unwrap(),
            Some(PathBuf::from("bin/mvn"))
        );
        assert_eq!(stripped(Path::new("apache-maven-3.9.6/"), 1).unwrap(), None);
        assert_eq!(
            stripped(Path::new("./bin/mvn"), 0).unwrap(),
            Some(PathBuf::from("bin/mvn"))
        );
        assert!(stripped(Path::new("../etc/passwd"), 0).is_err());
        assert!(stripped(Path::new("/etc/passwd"), 0).is_err());
    }

    #[test]
    fn test_extract_tar_gz_with_strip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tarball(
            dir.path(),
            &[
                ("apache-maven-3.9.6/bin/mvn", b"#!/bin/sh\n", 0o755),
                ("apache-maven-3.9.6/conf/settings.xml", b"<settings/>", 0o644),
            ],
        );
        let dest = dir.path().join("out");
        extract(&archive, ArchiveKind::TarGz, 1, &dest).unwrap();
        assert!(dest.join("bin/mvn").is_file());
        assert!(dest.join("conf/settings.xml").is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("bin/mvn")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_extract_zip_preserves_mode() {
        let dir = tempfile::tempdir().unwrap();
        let archive = zipfile(
            dir.path(),
            &[
                ("gradle-8.5/bin/gradle", b"#!/bin/sh\n", 0o755),
                ("gradle-8.5/lib/gradle.jar", b"PK", 0o644),
            ],
        );
        let dest = dir.path().join("out");
        extract(&archive, ArchiveKind::Zip, 0, &dest).unwrap();
        assert!(dest.join("gradle-8.5/bin/gradle").is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("gradle-8.5/bin/gradle"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        assert_eq!(single_root(&dest).unwrap(), Some(dest.join("gradle-8.5")));
    }

    #[test]
    fn test_single_root() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(single_root(dir.path()).unwrap(), None);

        std::fs::write(dir.path().join("file"), "x").unwrap();
        assert_eq!(single_root(dir.path()).unwrap(), None);

        std::fs::remove_file(dir.path().join("file")).unwrap();
        std::fs::create_dir(dir.path().join("only")).unwrap();
        assert_eq!(single_root(dir.path()).unwrap(), Some(dir.path().join("only")));

        std::fs::create_dir(dir.path().join("second")).unwrap();
        assert_eq!(single_root(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.zip");
        std::fs::write(&archive, b"not a zip").unwrap();
        let err = extract(&archive, ArchiveKind::Zip, 0, &dir.path().join("out")).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[cfg(unix)]
    #[test]
    fn test_tar_symlink_outside_destination_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        let outside_str = outside.display().to_string();

        for target in [outside_str.as_str(), "../outside"] {
            let archive = tarball_with_links(
                dir.path(),
                &[
                    Item::Symlink("escape", target),
                    Item::File("escape/pwned.txt", b"pwned"),
                ],
            );
            let dest = dir.path().join("out");
            let err = extract(&archive, ArchiveKind::TarGz, 0, &dest).unwrap_err();
            assert_eq!(err.kind(), "configuration");
            assert!(!outside.join("pwned.txt").exists());
            std::fs::remove_dir_all(&dest).unwrap();
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_tar_entry_through_symlink_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tarball_with_links(
            dir.path(),
            &[
                Item::File("real/keep.txt", b"keep"),
                Item::Symlink("alias", "real"),
                Item::File("alias/other.txt", b"other"),
            ],
        );
        let dest = dir.path().join("out");
        let err = extract(&archive, ArchiveKind::TarGz, 0, &dest).unwrap_err();
        assert!(err.to_string().contains("through the symlink 'alias'"));
        assert!(!dest.join("real/other.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_tar_internal_symlink_kept() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tarball_with_links(
            dir.path(),
            &[
                Item::File("maven/bin/mvn", b"#!/bin/sh\n"),
                Item::Symlink("maven/bin/mvnw", "mvn"),
            ],
        );
        let dest = dir.path().join("out");
        extract(&archive, ArchiveKind::TarGz, 1, &dest).unwrap();
        assert_eq!(
            std::fs::read_link(dest.join("bin/mvnw")).unwrap(),
            PathBuf::from("mvn")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_zip_symlink_outside_destination_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).unwrap();

        let archive = zip_with_links(
            dir.path(),
            &[
                Item::Symlink("escape", &outside.display().to_string()),
                Item::File("escape/pwned.txt", b"pwned"),
            ],
        );
        let err = extract(&archive, ArchiveKind::Zip, 0, &dir.path().join("out")).unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(!outside.join("pwned.txt").exists());

        let archive = zip_with_links(
            dir.path(),
            &[
                Item::File("gradle/lib/a.jar", b"PK"),
                Item::Symlink("gradle/current", "lib"),
                Item::File("gradle/current/b.jar", b"PK"),
            ],
        );
        let dest = dir.path().join("out2");
        let err = extract(&archive, ArchiveKind::Zip, 0, &dest).unwrap_err();
        assert!(err.to_string().contains("through the symlink"));
        assert!(!dest.join("gradle/lib/b.jar").exists());
    }
}
