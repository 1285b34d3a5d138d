use std::fmt;
use std::path::{Path, PathBuf};
use crate::config::{AppConfig, AudioMode, EncodeSettings, EncodePreset};
use crate::job::JobDescriptor;

/// Length of the preview clip in seconds
const PREVIEW_SECONDS: u32 = 30;

/// An executable invocation: program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Builds the external tool invocations for a job.
///
/// The controller does not look inside the produced command lines; it only
/// hands them to `ProcessHandle::start`.
pub trait CommandBuilder: Send + Sync {
    /// Binary every invocation runs, checked once before a batch starts
    fn program(&self) -> &Path;

    /// Lightweight invocation whose diagnostic output carries the source duration
    fn probe_command(&self, job: &JobDescriptor) -> CommandLine;

    /// Full transcode invocation for one job
    fn transcode_command(&self, job: &JobDescriptor, settings: &EncodeSettings) -> CommandLine;
}

/// Command builder for ffmpeg with NVENC and the `subtitles` filter
#[derive(Debug, Clone)]
pub struct FfmpegCommandBuilder {
    ffmpeg_bin: PathBuf,
    video_quality: u8,
}

impl FfmpegCommandBuilder {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            ffmpeg_bin: cfg.ffmpeg_bin.clone(),
            video_quality: cfg.video_quality,
        }
    }

    /// Video filter burning either the sidecar subtitle or the source's own stream
    pub fn subtitle_filter(&self, job: &JobDescriptor, settings: &EncodeSettings) -> String {
        let subtitle_source = job.subtitle_path.as_deref().unwrap_or(&job.source_path);
        format!(
            "subtitles='{}':force_style='{}'",
            escape_filter_path(subtitle_source),
            settings.force_style()
        )
    }

    /// Build a short low-latency preview of the first seconds of a job
    pub fn preview_command(
        &self,
        job: &JobDescriptor,
        settings: &EncodeSettings,
        output: &Path,
    ) -> CommandLine {
        CommandLine::new(&self.ffmpeg_bin)
            .args(["-y", "-hide_banner", "-t"])
            .arg(PREVIEW_SECONDS.to_string())
            .arg("-i")
            .arg(job.source_path.to_string_lossy())
            .arg("-vf")
            .arg(self.subtitle_filter(job, settings))
            .args(["-c:v", "hevc_nvenc", "-preset"])
            .arg(EncodePreset::Fast.nvenc_name())
            .arg(output.to_string_lossy())
    }
}

impl CommandBuilder for FfmpegCommandBuilder {
    fn program(&self) -> &Path {
        &self.ffmpeg_bin
    }

    fn probe_command(&self, job: &JobDescriptor) -> CommandLine {
        // ffmpeg exits non-zero without an output file, the banner is all we need
        CommandLine::new(&self.ffmpeg_bin)
            .arg("-hide_banner")
            .arg("-i")
            .arg(job.source_path.to_string_lossy())
    }

    fn transcode_command(&self, job: &JobDescriptor, settings: &EncodeSettings) -> CommandLine {
        let filter = format!("{},format=yuv420p", self.subtitle_filter(job, settings));

        CommandLine::new(&self.ffmpeg_bin)
            .args(["-y", "-hide_banner", "-hwaccel", "cuda", "-i"])
            .arg(job.source_path.to_string_lossy())
            .arg("-vf")
            .arg(filter)
            .args(["-c:v", "hevc_nvenc", "-preset"])
            .arg(settings.preset.nvenc_name())
            .arg("-cq")
            .arg(self.video_quality.to_string())
            .args(audio_args(settings.audio_mode))
            .arg(job.output_path.to_string_lossy())
    }
}

/// Audio arguments for the chosen mode
pub fn audio_args(mode: AudioMode) -> Vec<&'static str> {
    match mode {
        AudioMode::Copy => vec!["-c:a", "copy"],
        AudioMode::ReEncode => vec!["-c:a", "aac", "-b:a", "192k"],
        AudioMode::Normalize => vec!["-af", "loudnorm=I=-16:TP=-1.5:LRA=11", "-c:a", "aac"],
    }
}

/// Escape a path for use inside a quoted filtergraph argument
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubtitleColor;

    fn job(subtitle: Option<&str>) -> JobDescriptor {
        JobDescriptor::new(
            PathBuf::from("/media/show/ep01.mkv"),
            subtitle.map(PathBuf::from),
            PathBuf::from("/media/show/Output_V3/ep01.mkv"),
        )
    }

    fn builder() -> FfmpegCommandBuilder {
        FfmpegCommandBuilder::new(&AppConfig::default())
    }

    #[test]
    fn test_escape_windows_path() {
        let escaped = escape_filter_path(Path::new(r"C:\Videos\it's.srt"));
        assert_eq!(escaped, r"C\:/Videos/it\'s.srt");
    }

    #[test]
    fn test_probe_command() {
        let cmd = builder().probe_command(&job(None));
        assert_eq!(cmd.program, PathBuf::from("ffmpeg"));
        assert_eq!(cmd.args, vec!["-hide_banner", "-i", "/media/show/ep01.mkv"]);
    }

    #[test]
    fn test_transcode_uses_sidecar_subtitle() {
        let settings = EncodeSettings::default();
        let cmd = builder().transcode_command(&job(Some("/media/show/ep01.srt")), &settings);

        let vf_pos = cmd.args.iter().position(|a| a == "-vf").unwrap();
        let filter = &cmd.args[vf_pos + 1];
        assert!(filter.starts_with("subtitles='/media/show/ep01.srt'"));
        assert!(filter.ends_with(",format=yuv420p"));
        assert_eq!(cmd.args.last().unwrap(), "/media/show/Output_V3/ep01.mkv");
    }

    #[test]
    fn test_transcode_falls_back_to_embedded_subtitles() {
        let cmd = builder().transcode_command(&job(None), &EncodeSettings::default());
        let filter = cmd.args.iter().find(|a| a.starts_with("subtitles=")).unwrap();
        assert!(filter.starts_with("subtitles='/media/show/ep01.mkv'"));
    }

    #[test]
    fn test_transcode_encoder_arguments() {
        let settings = EncodeSettings {
            preset: EncodePreset::Best,
            color: SubtitleColor::Green,
            ..Default::default()
        };
        let cmd = builder().transcode_command(&job(None), &settings);
        let joined = cmd.args.join(" ");
        assert!(joined.contains("-hwaccel cuda"));
        assert!(joined.contains("-c:v hevc_nvenc -preset p7 -cq 22"));
        assert!(joined.contains("PrimaryColour=&H00FF00&"));
    }

    #[test]
    fn test_audio_modes() {
        assert_eq!(audio_args(AudioMode::Copy), vec!["-c:a", "copy"]);
        assert_eq!(audio_args(AudioMode::ReEncode), vec!["-c:a", "aac", "-b:a", "192k"]);
        assert!(audio_args(AudioMode::Normalize).contains(&"loudnorm=I=-16:TP=-1.5:LRA=11"));
    }

    #[test]
    fn test_preview_command_is_short_and_fast() {
        let cmd = builder().preview_command(
            &job(None),
            &EncodeSettings::default(),
            Path::new("/media/show/preview.mp4"),
        );
        let joined = cmd.args.join(" ");
        assert!(joined.contains("-t 30"));
        assert!(joined.contains("-preset p1"));
        assert_eq!(cmd.args.last().unwrap(), "/media/show/preview.mp4");
    }

    #[test]
    fn test_display_quotes_arguments_with_spaces() {
        let cmd = CommandLine::new("ffmpeg").arg("-i").arg("my file.mkv");
        assert_eq!(cmd.to_string(), "ffmpeg -i \"my file.mkv\"");
    }
}
