use std::path::{Path, PathBuf};

/// Subtitle extensions looked up next to a media file, in priority order
const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass"];

/// Get the path of a sidecar file sharing the media file's stem
pub fn sidecar_path(file_path: &Path, extension: &str) -> PathBuf {
    let mut path = file_path.to_path_buf();
    path.set_extension(extension);
    path
}

/// Find an external subtitle for a media file (`<stem>.srt`, then `<stem>.ass`)
pub fn find_subtitle(file_path: &Path) -> Option<PathBuf> {
    SUBTITLE_EXTENSIONS
        .iter()
        .map(|ext| sidecar_path(file_path, ext))
        .find(|candidate| candidate.is_file())
}

/// Path of the preview clip rendered next to a source file
pub fn preview_path(file_path: &Path) -> PathBuf {
    file_path
        .parent()
        .map(|dir| dir.join("preview.mp4"))
        .unwrap_or_else(|| PathBuf::from("preview.mp4"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/media/show/ep01.mkv"), "srt"),
            PathBuf::from("/media/show/ep01.srt")
        );
    }

    #[test]
    fn test_find_subtitle_prefers_srt() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("ep01.mkv");
        fs::write(&video, b"").unwrap();
        assert_eq!(find_subtitle(&video), None);

        fs::write(dir.path().join("ep01.ass"), b"").unwrap();
        assert_eq!(find_subtitle(&video), Some(dir.path().join("ep01.ass")));

        fs::write(dir.path().join("ep01.srt"), b"").unwrap();
        assert_eq!(find_subtitle(&video), Some(dir.path().join("ep01.srt")));
    }

    #[test]
    fn test_preview_path() {
        assert_eq!(
            preview_path(Path::new("/media/show/ep01.mkv")),
            PathBuf::from("/media/show/preview.mp4")
        );
    }
}
