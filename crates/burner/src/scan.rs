use std::collections::HashSet;
use std::path::{Path, PathBuf};
use anyhow::{bail, Result};
use walkdir::WalkDir;
use log::{debug, info, warn};

use crate::job::JobDescriptor;
use crate::sidecar;

/// Media file extensions accepted into the queue
const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "m4v", "webm"];

/// Check if a path looks like a video file by extension
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Media files directly inside a folder (no recursion), sorted by name
pub fn scan_folder(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_file() && is_media_file(path) {
            debug!("Found media file: {}", path.display());
            found.push(path.to_path_buf());
        }
    }
    found
}

/// Turn files and folders into an ordered job list.
///
/// Outputs go to `<parent of the first input>/<output_dir_name>/<file name>`.
/// Duplicates are dropped, as are files already inside the output folder.
pub fn collect_jobs(inputs: &[PathBuf], output_dir_name: &str) -> Result<Vec<JobDescriptor>> {
    let mut sources = Vec::new();
    for input in inputs {
        if input.is_dir() {
            info!("Scanning directory: {}", input.display());
            sources.extend(scan_folder(input));
        } else if input.is_file() {
            if is_media_file(input) {
                sources.push(input.clone());
            } else {
                warn!("Skipping non-video file: {}", input.display());
            }
        } else {
            bail!("Input does not exist: {}", input.display());
        }
    }

    let output_dir = match sources.first().and_then(|first| first.parent()) {
        Some(parent) => parent.join(output_dir_name),
        None => return Ok(Vec::new()),
    };

    let mut seen = HashSet::new();
    let jobs: Vec<JobDescriptor> = sources
        .into_iter()
        .filter(|path| !path.starts_with(&output_dir))
        .filter(|path| seen.insert(path.clone()))
        .filter_map(|path| {
            let file_name = path.file_name()?.to_owned();
            let subtitle = sidecar::find_subtitle(&path);
            Some(JobDescriptor::new(path, subtitle, output_dir.join(file_name)))
        })
        .collect();

    info!("Collected {} job(s), output folder {}", jobs.len(), output_dir.display());
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_is_media_file_case_insensitive() {
        assert!(is_media_file(Path::new("a/B.MKV")));
        assert!(is_media_file(Path::new("clip.mp4")));
        assert!(!is_media_file(Path::new("clip.srt")));
        assert!(!is_media_file(Path::new("README")));
    }

    #[test]
    fn test_collect_jobs_from_folder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("b.mkv"), b"").unwrap();
        fs::write(root.join("a.mp4"), b"").unwrap();
        fs::write(root.join("a.srt"), b"").unwrap();
        fs::write(root.join("notes.txt"), b"").unwrap();
        fs::create_dir(root.join("Output_V3")).unwrap();
        fs::write(root.join("Output_V3").join("a.mp4"), b"").unwrap();

        let jobs = collect_jobs(&[root.to_path_buf()], "Output_V3").unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.display_name()).collect();
        assert_eq!(names, vec!["a.mp4", "b.mkv"]);

        assert_eq!(jobs[0].subtitle_path, Some(root.join("a.srt")));
        assert_eq!(jobs[1].subtitle_path, None);
        assert_eq!(jobs[0].output_path, root.join("Output_V3").join("a.mp4"));
        assert_ne!(jobs[0].id, jobs[1].id);
    }

    #[test]
    fn test_collect_jobs_dedupes_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let z = root.join("z.mkv");
        let a = root.join("a.mkv");
        fs::write(&z, b"").unwrap();
        fs::write(&a, b"").unwrap();

        let jobs = collect_jobs(&[z.clone(), a.clone(), z.clone()], "out").unwrap();
        let sources: Vec<_> = jobs.iter().map(|j| j.source_path.clone()).collect();
        assert_eq!(sources, vec![z, a]);
    }

    #[test]
    fn test_collect_jobs_missing_input() {
        assert!(collect_jobs(&[PathBuf::from("/no/such/input.mkv")], "out").is_err());
    }
}
