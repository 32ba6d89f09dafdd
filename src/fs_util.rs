use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::MibigError;

/// Archives the contents of `source_dir` into `zip_path`, skipping the
/// archive itself. The archive is assembled in a temporary file next to the
/// target and moved into place once complete.
pub fn zip_dir(source_dir: &Path, zip_path: &Path) -> Result<(), MibigError> {
    let parent = zip_path
        .parent()
        .ok_or_else(|| MibigError::Filesystem("invalid archive path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| MibigError::Filesystem(err.to_string()))?;
    if zip_path.exists() {
        fs::remove_file(zip_path).map_err(|err| MibigError::Filesystem(err.to_string()))?;
    }

    let temp = tempfile::Builder::new()
        .prefix("mibig-zip")
        .suffix(".zip")
        .tempfile_in(parent)
        .map_err(|err| MibigError::Filesystem(err.to_string()))?;
    let temp_path = temp.path().to_path_buf();
    let file = temp
        .reopen()
        .map_err(|err| MibigError::Filesystem(err.to_string()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in walk_dir(source_dir)? {
        if path == zip_path || path == temp_path {
            continue;
        }
        let relative = path
            .strip_prefix(source_dir)
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        let name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if path.is_dir() {
            writer
                .add_directory(name, options)
                .map_err(|err| MibigError::Filesystem(err.to_string()))?;
            continue;
        }
        writer
            .start_file(name, options)
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        let mut input =
            fs::File::open(&path).map_err(|err| MibigError::Filesystem(err.to_string()))?;
        io::copy(&mut input, &mut writer).map_err(|err| MibigError::Filesystem(err.to_string()))?;
    }
    writer
        .finish()
        .map_err(|err| MibigError::Filesystem(err.to_string()))?;
    temp.persist(zip_path)
        .map_err(|err| MibigError::Filesystem(err.to_string()))?;
    Ok(())
}

/// File names stored in an archive, in archive order.
pub fn zip_entry_names(zip_path: &Path) -> Result<Vec<String>, MibigError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| MibigError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| MibigError::Filesystem(err.to_string()))?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|err| MibigError::Filesystem(err.to_string()))?;
        names.push(entry.name().to_string());
    }
    Ok(names)
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, MibigError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| MibigError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| MibigError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    items.sort();
    Ok(items)
}
