//! /proc/<pid>/maps enumeration.
//!
//! The locator needs two things from the maps table: which loaded image is
//! the CPython runtime (the executable itself, or a libpython shared
//! object), and that image's load base for PIE correction.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::LocatorError;

#[derive(Debug, Clone)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub permissions: String,
    pub offset: u64,
    pub device: String,
    pub inode: u64,
    pub pathname: String,
}

impl MemoryMapping {
    pub fn is_executable(&self) -> bool {
        self.permissions.contains('x')
    }
}

/// Parses one maps line of the form
/// `559a9c400000-559a9c401000 r--p 00000000 103:02 2621487 /path/to/exe`.
/// Anonymous mappings (no pathname) are kept with an empty pathname.
pub fn parse_memory_mapping(line: &str) -> Option<MemoryMapping> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }

    let addr_parts: Vec<&str> = parts[0].split('-').collect();
    if addr_parts.len() != 2 {
        return None;
    }

    Some(MemoryMapping {
        start: u64::from_str_radix(addr_parts[0], 16).ok()?,
        end: u64::from_str_radix(addr_parts[1], 16).ok()?,
        permissions: parts[1].to_string(),
        offset: u64::from_str_radix(parts[2], 16).ok()?,
        device: parts[3].to_string(),
        inode: parts[4].parse().ok()?,
        pathname: parts.get(5..).map_or(String::new(), |p| p.join(" ")),
    })
}

pub fn read_process_maps(pid: i32) -> Result<Vec<MemoryMapping>, LocatorError> {
    let maps_path = format!("/proc/{pid}/maps");
    let file = File::open(&maps_path).map_err(|source| LocatorError::Maps { pid, source })?;
    let reader = BufReader::new(file);

    let mut mappings = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|source| LocatorError::Maps { pid, source })?;
        if let Some(mapping) = parse_memory_mapping(&line) {
            mappings.push(mapping);
        }
    }
    Ok(mappings)
}

/// The runtime image the interpreter-state symbol lives in.
#[derive(Debug, Clone)]
pub struct PythonImage {
    /// Path as the target sees it (pre namespace translation).
    pub path: PathBuf,
    /// Lowest mapped address of the image, for PIE correction.
    pub load_base: u64,
}

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
}

fn looks_like_libpython(path: &str) -> bool {
    file_name(path).starts_with("libpython")
}

fn looks_like_python_exe(path: &str) -> bool {
    file_name(path).starts_with("python")
}

/// Picks the image holding the interpreter symbols. A dynamically linked
/// python keeps them in libpython, so that wins over the thin executable
/// when both are mapped.
pub fn find_python_image(mappings: &[MemoryMapping]) -> Option<PythonImage> {
    let image_for = |select: fn(&str) -> bool| -> Option<PythonImage> {
        let path = mappings
            .iter()
            .find(|m| m.is_executable() && select(&m.pathname))
            .map(|m| m.pathname.clone())?;
        let load_base = mappings
            .iter()
            .filter(|m| m.pathname == path && m.offset == 0)
            .map(|m| m.start)
            .min()?;
        Some(PythonImage {
            path: PathBuf::from(path),
            load_base,
        })
    };

    image_for(looks_like_libpython).or_else(|| image_for(looks_like_python_exe))
}
