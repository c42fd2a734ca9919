//! FFmpeg screen recorder
//!
//! Captures screen + audio segments by running the `ffmpeg` executable once
//! per segment. Device enumeration parses ffmpeg's `-list_devices` output,
//! which is only available for DirectShow (Windows) and AVFoundation (macOS).

use super::traits::{DeviceList, Recorder};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// How long a capture may run past its requested duration before it is killed
const CAPTURE_GRACE: Duration = Duration::from_secs(30);

/// Number of stderr lines kept in capture error messages
const STDERR_TAIL_LINES: usize = 5;

/// Devices used for the next capture
#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectedDevices {
    video: String,
    audio: String,
}

/// Recorder backed by an ffmpeg executable
pub struct FfmpegRecorder {
    ffmpeg: PathBuf,
    devices: RwLock<SelectedDevices>,
}

impl FfmpegRecorder {
    /// Create a recorder using the ffmpeg binary at `ffmpeg`
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            devices: RwLock::new(SelectedDevices {
                video: "1".to_string(),
                audio: "0".to_string(),
            }),
        }
    }

    /// Select the video and audio devices for subsequent captures
    pub fn set_devices(&self, video: impl Into<String>, audio: impl Into<String>) {
        let mut devices = self.devices.write();
        devices.video = video.into();
        devices.audio = audio.into();
        tracing::info!("Using video device {:?}, audio device {:?}", devices.video, devices.audio);
    }

    /// Currently selected (video, audio) devices
    pub fn devices(&self) -> (String, String) {
        let devices = self.devices.read();
        (devices.video.clone(), devices.audio.clone())
    }

    /// Enumerate capture devices on this platform
    pub async fn available_devices(&self) -> AppResult<DeviceList> {
        let os = std::env::consts::OS;
        let args = list_devices_args(os)
            .ok_or_else(|| AppError::Platform(format!("device listing is unsupported on {}", os)))?;

        // ffmpeg exits non-zero after listing ("Immediate exit requested")
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::Platform(format!("Failed to run {:?}: {}", self.ffmpeg, e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let devices = parse_device_list(os, &text);
        if devices.is_empty() && !output.status.success() {
            return Err(AppError::Platform(format!(
                "ffmpeg device listing failed: {}",
                tail(&text, STDERR_TAIL_LINES)
            )));
        }

        Ok(devices)
    }

    /// Pick the platform's default devices and select them
    pub async fn use_default_devices(&self) -> AppResult<()> {
        let os = std::env::consts::OS;
        let devices = if list_devices_args(os).is_some() {
            self.available_devices().await?
        } else {
            DeviceList::default()
        };

        let (video, audio) = default_devices_for(os, &devices)?;
        self.set_devices(video, audio);
        Ok(())
    }

    fn capture_args(&self, path: &Path, duration: Duration) -> Vec<String> {
        let devices = self.devices.read();
        capture_args_for(std::env::consts::OS, &devices.video, &devices.audio, path, duration)
    }
}

#[async_trait]
impl Recorder for FfmpegRecorder {
    async fn capture(&self, path: &Path, duration: Duration) -> AppResult<()> {
        let args = self.capture_args(path, duration);
        tracing::debug!("Starting FFmpeg capture: {:?}", args);

        let child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Capture(format!("Failed to start FFmpeg: {}", e)))?;

        let output = tokio::time::timeout(duration + CAPTURE_GRACE, child.wait_with_output())
            .await
            .map_err(|_| {
                AppError::Capture(format!(
                    "FFmpeg ran past {:?} while capturing {:?}",
                    duration + CAPTURE_GRACE,
                    path
                ))
            })?
            .map_err(|e| AppError::Capture(format!("Failed to wait for FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Capture(format!(
                "FFmpeg exited with {}: {}",
                output.status,
                tail(&stderr, STDERR_TAIL_LINES)
            )));
        }

        if !path.exists() {
            return Err(AppError::Capture(format!("FFmpeg produced no file at {:?}", path)));
        }

        Ok(())
    }
}

/// ffmpeg arguments that list capture devices on `os`
fn list_devices_args(os: &str) -> Option<&'static [&'static str]> {
    match os {
        "windows" => Some(&["-hide_banner", "-list_devices", "true", "-f", "dshow", "-i", "dummy"]),
        "macos" => Some(&["-hide_banner", "-f", "avfoundation", "-list_devices", "true", "-i", ""]),
        _ => None,
    }
}

/// Default (video, audio) devices for `os`
fn default_devices_for(os: &str, devices: &DeviceList) -> AppResult<(String, String)> {
    match os {
        "windows" | "macos" => {
            if devices.video.is_empty() || devices.audio.is_empty() {
                return Err(AppError::Platform(
                    "video or audio device is unavailable".to_string(),
                ));
            }
            if os == "windows" {
                Ok((devices.video[0].clone(), devices.audio[0].clone()))
            } else {
                // The screen devices are listed after the cameras
                Ok(((devices.video.len() - 1).to_string(), "0".to_string()))
            }
        }
        _ => Ok((":0.0".to_string(), "default".to_string())),
    }
}

/// Build the capture command line for `os`
fn capture_args_for(os: &str, video: &str, audio: &str, path: &Path, duration: Duration) -> Vec<String> {
    let output = path.to_string_lossy().to_string();
    let seconds = format!("{:.3}", duration.as_secs_f64());

    let mut args: Vec<String> = match os {
        "windows" => [
            "-hide_banner", "-y", "-rtbufsize", "200M", "-f", "gdigrab", "-thread_queue_size", "1024",
            "-probesize", "10M", "-r", "30", "-draw_mouse", "1", "-i", "desktop", "-f", "dshow",
            "-channel_layout", "stereo", "-thread_queue_size", "1024",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain([
            "-i".to_string(),
            format!("audio={}", audio),
        ])
        .chain(
            [
                "-c:v", "libx264", "-r", "30", "-preset", "ultrafast", "-tune", "zerolatency", "-crf", "25",
                "-pix_fmt", "yuv420p", "-c:a", "aac", "-strict", "-2", "-ac", "2", "-b:a", "128k",
            ]
            .iter()
            .map(|s| s.to_string()),
        )
        .collect(),
        "macos" => vec![
            "-f".to_string(),
            "avfoundation".to_string(),
            "-i".to_string(),
            format!("{}:{}", video, audio),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-y".to_string(),
            "-r".to_string(),
            "10".to_string(),
        ],
        _ => vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "x11grab".to_string(),
            "-framerate".to_string(),
            "10".to_string(),
            "-i".to_string(),
            video.to_string(),
            "-f".to_string(),
            "pulse".to_string(),
            "-i".to_string(),
            audio.to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "ultrafast".to_string(),
            "-tune".to_string(),
            "zerolatency".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
        ],
    };

    args.extend(["-t".to_string(), seconds, output]);
    args
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Video,
    Audio,
}

/// Parse ffmpeg `-list_devices` output for `os`
fn parse_device_list(os: &str, output: &str) -> DeviceList {
    match os {
        "windows" => parse_dshow_devices(output),
        "macos" => parse_avfoundation_devices(output),
        _ => DeviceList::default(),
    }
}

/// Text after the `[component @ 0x...]` log prefix
fn strip_log_prefix(line: &str) -> Option<&str> {
    let end = line.find(']')?;
    Some(line[end + 1..].trim())
}

fn parse_dshow_devices(output: &str) -> DeviceList {
    let mut devices = DeviceList::default();
    let mut section = Section::Preamble;

    for line in output.lines() {
        let Some(clean) = strip_log_prefix(line) else {
            continue;
        };
        if clean.is_empty() || clean.starts_with("Alternative name") {
            continue;
        }
        if clean.starts_with("DirectShow video devices") {
            section = Section::Video;
            continue;
        }
        if clean.starts_with("DirectShow audio devices") {
            section = Section::Audio;
            continue;
        }

        // Newer builds print a flat list: "Name" (video) / "Name" (audio)
        let (name, kind) = match clean.rsplit_once(" (") {
            Some((name, "video)")) => (name, Section::Video),
            Some((name, "audio)")) => (name, Section::Audio),
            Some((_, "none)")) => continue,
            _ => (clean, section),
        };
        let name = name.trim().trim_matches('"').to_string();
        if name.is_empty() {
            continue;
        }

        match kind {
            Section::Video => devices.video.push(name),
            Section::Audio => devices.audio.push(name),
            Section::Preamble => {}
        }
    }

    devices
}

fn parse_avfoundation_devices(output: &str) -> DeviceList {
    let mut devices = DeviceList::default();
    let mut section = Section::Preamble;

    for line in output.lines() {
        let Some(clean) = strip_log_prefix(line) else {
            continue;
        };
        match clean {
            "AVFoundation video devices:" => section = Section::Video,
            "AVFoundation audio devices:" => section = Section::Audio,
            _ => {
                // "[0] FaceTime HD Camera"
                let Some(rest) = clean.strip_prefix('[') else {
                    continue;
                };
                let Some((_, name)) = rest.split_once(']') else {
                    continue;
                };
                let name = name.trim().to_string();
                match section {
                    Section::Video => devices.video.push(name),
                    Section::Audio => devices.audio.push(name),
                    Section::Preamble => {}
                }
            }
        }
    }

    devices
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSHOW_CLASSIC: &str = r#"[dshow @ 000001c8] DirectShow video devices (some may be both video and audio devices)
[dshow @ 000001c8]  "Integrated Camera"
[dshow @ 000001c8]     Alternative name "@device_pnp_\\?\usb#vid_04f2"
[dshow @ 000001c8]  "screen-capture-recorder"
[dshow @ 000001c8]     Alternative name "@device_sw_{860BB310}"
[dshow @ 000001c8] DirectShow audio devices
[dshow @ 000001c8]  "Microphone (Realtek(R) Audio)"
[dshow @ 000001c8]     Alternative name "@device_cm_{33D9A762}"
dummy: Immediate exit requested"#;

    const DSHOW_FLAT: &str = r#"[dshow @ 0000020a] "Integrated Camera" (video)
[dshow @ 0000020a]   Alternative name "@device_pnp_\\?\usb"
[dshow @ 0000020a] "OBS Virtual Camera" (none)
[dshow @ 0000020a] "Microphone Array" (audio)
[in#0 @ 0000020b] Error opening input: Immediate exit requested"#;

    const AVFOUNDATION: &str = r#"[AVFoundation indev @ 0x7f8] AVFoundation video devices:
[AVFoundation indev @ 0x7f8] [0] FaceTime HD Camera
[AVFoundation indev @ 0x7f8] [1] Capture screen 0
[AVFoundation indev @ 0x7f8] AVFoundation audio devices:
[AVFoundation indev @ 0x7f8] [0] MacBook Pro Microphone
: Input/output error"#;

    #[test]
    fn test_parse_dshow_classic_sections() {
        let devices = parse_dshow_devices(DSHOW_CLASSIC);
        assert_eq!(devices.video, vec!["Integrated Camera", "screen-capture-recorder"]);
        assert_eq!(devices.audio, vec!["Microphone (Realtek(R) Audio)"]);
    }

    #[test]
    fn test_parse_dshow_flat_list() {
        let devices = parse_dshow_devices(DSHOW_FLAT);
        assert_eq!(devices.video, vec!["Integrated Camera"]);
        assert_eq!(devices.audio, vec!["Microphone Array"]);
    }

    #[test]
    fn test_parse_avfoundation() {
        let devices = parse_avfoundation_devices(AVFOUNDATION);
        assert_eq!(devices.video, vec!["FaceTime HD Camera", "Capture screen 0"]);
        assert_eq!(devices.audio, vec!["MacBook Pro Microphone"]);
    }

    #[test]
    fn test_default_devices_per_platform() {
        let devices = DeviceList {
            video: vec!["FaceTime HD Camera".into(), "Capture screen 0".into()],
            audio: vec!["Mic".into()],
        };

        assert_eq!(
            default_devices_for("macos", &devices).unwrap(),
            ("1".to_string(), "0".to_string())
        );
        assert_eq!(
            default_devices_for("windows", &devices).unwrap(),
            ("FaceTime HD Camera".to_string(), "Mic".to_string())
        );
        assert_eq!(
            default_devices_for("linux", &DeviceList::default()).unwrap(),
            (":0.0".to_string(), "default".to_string())
        );
    }

    #[test]
    fn test_default_devices_require_both_kinds() {
        let devices = DeviceList {
            video: vec!["Capture screen 0".into()],
            audio: vec![],
        };
        let err = default_devices_for("macos", &devices).unwrap_err();
        assert!(matches!(err, AppError::Platform(_)));
    }

    #[test]
    fn test_capture_args_end_with_duration_and_output() {
        let path = Path::new("/tmp/stream/sample_3.mp4");
        for os in ["windows", "macos", "linux"] {
            let args = capture_args_for(os, "1", "0", path, Duration::from_millis(2500));
            let n = args.len();
            assert_eq!(&args[n - 3..], &["-t", "2.500", "/tmp/stream/sample_3.mp4"]);
        }
    }

    #[test]
    fn test_capture_args_use_selected_devices() {
        let path = Path::new("out.mp4");
        let mac = capture_args_for("macos", "2", "1", path, Duration::from_secs(10));
        assert!(mac.contains(&"2:1".to_string()));

        let win = capture_args_for("windows", "cam", "Mic", path, Duration::from_secs(10));
        assert!(win.contains(&"audio=Mic".to_string()));
    }

    #[test]
    fn test_recorder_device_selection() {
        let recorder = FfmpegRecorder::new("ffmpeg");
        assert_eq!(recorder.devices(), ("1".to_string(), "0".to_string()));

        recorder.set_devices("3", "1");
        assert_eq!(recorder.devices(), ("3".to_string(), "1".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_capture_error() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FfmpegRecorder::new(dir.path().join("no-such-ffmpeg"));

        let err = recorder
            .capture(&dir.path().join("sample_0.mp4"), Duration::from_millis(10))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Capture(_)));
    }
}
