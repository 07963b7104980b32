//! Filesystem channel — messages exchanged through a directory tree.
//!
//! Directories whose full path matches a configured pattern hold pending
//! messages; each regular file directly inside is one pending item,
//! identified by its absolute path. Consumed files move to a sibling
//! `archived/` directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, error, info};

use crate::channels::Channel;
use crate::error::{ChannelError, ConfigError};
use crate::message::SinliMessage;

/// Name of the per-directory archive for consumed message files.
const ARCHIVE_DIR: &str = "archived";

/// Transport backed by a directory tree.
pub struct FilesystemChannel {
    base_path: PathBuf,
    dir_pattern: Regex,
}

impl FilesystemChannel {
    /// Create a channel rooted at `base_path`.
    ///
    /// `dir_pattern` is matched against the full path of every directory
    /// under the base; matching directories are message-bearing.
    pub fn new(base_path: impl Into<PathBuf>, dir_pattern: &str) -> Result<Self, ConfigError> {
        let base_path = base_path.into();
        let dir_pattern = Regex::new(dir_pattern).map_err(|e| ConfigError::InvalidValue {
            key: "dir_pattern".into(),
            message: e.to_string(),
        })?;
        Ok(Self {
            base_path,
            dir_pattern,
        })
    }

    /// Depth-first walk of all directories under (and including) the base.
    ///
    /// Entries are visited in sorted order so two walks of an unchanged
    /// tree enumerate identically.
    fn walk_dirs(&self) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut stack = vec![self.base_path.clone()];
        while let Some(dir) = stack.pop() {
            let mut children: Vec<PathBuf> = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    children.push(entry.path());
                }
            }
            children.sort();
            // Reversed so the stack pops in sorted order.
            for child in children.into_iter().rev() {
                stack.push(child);
            }
            dirs.push(dir);
        }
        Ok(dirs)
    }

    /// Regular files directly inside `dir`, sorted.
    fn files_in(dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Channel for FilesystemChannel {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn enumerate_pending(&mut self) -> Result<Vec<String>, ChannelError> {
        debug!(base = %self.base_path.display(), "Walking message tree");
        let mut ids = Vec::new();
        for dir in self.walk_dirs()? {
            if !self.dir_pattern.is_match(&dir.to_string_lossy()) {
                continue;
            }
            for file in Self::files_in(&dir)? {
                ids.push(file.to_string_lossy().into_owned());
            }
        }
        debug!(count = ids.len(), "Pending message files found");
        Ok(ids)
    }

    fn fetch(&mut self, id: &str) -> Result<SinliMessage, ChannelError> {
        let path = Path::new(id);
        let body = match fs::read_to_string(path) {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ChannelError::NotFound { id: id.into() });
            }
            Err(e) => return Err(e.into()),
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Ok(SinliMessage::parse(body, filename)?)
    }

    fn deliver(&mut self, message: &SinliMessage) -> Result<(), ChannelError> {
        let needle = format!("{}_{}", message.source_code, message.destination_code);
        let dst_dir = self
            .walk_dirs()?
            .into_iter()
            .find(|dir| dir.to_string_lossy().contains(&needle))
            .ok_or_else(|| ChannelError::NoDestinationDirectory {
                needle: needle.clone(),
            })?;

        let type_dir = dst_dir.join(&message.document_type);
        if !type_dir.is_dir() {
            debug!(dir = %type_dir.display(), "Creating document type directory");
            fs::create_dir_all(&type_dir)?;
        }

        // Overwrites silently; generated filenames are fingerprinted to
        // keep collisions to identical bodies.
        let file_path = type_dir.join(&message.filename);
        info!(path = %file_path.display(), "Writing message file");
        fs::write(&file_path, &message.body)?;
        Ok(())
    }

    fn acknowledge(&mut self, id: &str) -> Result<(), ChannelError> {
        let path = Path::new(id);
        if !path.is_file() {
            error!(id, "Message file no longer exists, nothing to archive");
            return Ok(());
        }

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let filename = match path.file_name() {
            Some(name) => name,
            None => {
                error!(id, "Message id has no file name component");
                return Ok(());
            }
        };
        let archived = parent.join(ARCHIVE_DIR).join(filename);

        info!(id, to = %archived.display(), "Archiving message file");
        match fs::rename(path, &archived) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Archive directory missing: create it and retry once.
                // create_dir_all tolerates a concurrent creator.
                fs::create_dir_all(parent.join(ARCHIVE_DIR))?;
                fs::rename(path, &archived)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn release(&mut self) {
        // No held resources; the walk re-opens the tree on every call.
    }
}
