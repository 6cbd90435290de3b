use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// V4L2 device node for a camera index
pub fn device_path(index: u32) -> String {
    format!("/dev/video{}", index)
}

/// `{base}_processed.{ext}` beside the input file.
pub fn processed_output_path(input: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    input.with_file_name(format!("{}_processed.{}", stem, extension))
}

/// Timestamped camera recording, `recording_YYYYmmdd_HHMMSS.{ext}`.
pub fn recording_output_path(dir: &Path, extension: &str, now: DateTime<Local>) -> PathBuf {
    dir.join(format!(
        "recording_{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        extension
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn processed_path_sits_next_to_input() {
        let out = processed_output_path(Path::new("/data/clips/table.mov"), "mp4");
        assert_eq!(out, PathBuf::from("/data/clips/table_processed.mp4"));

        let out = processed_output_path(Path::new("game"), "mkv");
        assert_eq!(out, PathBuf::from("game_processed.mkv"));
    }

    #[test]
    fn recording_path_is_timestamped() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let out = recording_output_path(Path::new("/tmp/rec"), "mp4", now);
        assert_eq!(out, PathBuf::from("/tmp/rec/recording_20240309_070501.mp4"));
    }

    #[test]
    fn device_paths() {
        assert_eq!(device_path(2), "/dev/video2");
    }
}
