//! Per-application audio streams
//!
//! Streams are listed and muted through `pactl`, which PulseAudio and
//! PipeWire (via pipewire-pulse) both provide. Plain ALSA has no
//! per-application streams; there the master channel is muted instead.

use curfew_host_api::{HostError, HostResult};
use curfew_util::AppId;
use std::process::Command;
use tracing::{debug, info, warn};

/// Detected sound backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundBackend {
    /// PipeWire with WirePlumber
    PipeWire,
    /// PulseAudio
    PulseAudio,
    /// ALSA (direct)
    Alsa,
}

impl SoundBackend {
    /// Detect the best available sound backend
    pub fn detect() -> Option<Self> {
        if Self::is_pipewire_available() {
            info!("Detected PipeWire sound backend");
            return Some(Self::PipeWire);
        }

        if Self::is_pulseaudio_available() {
            info!("Detected PulseAudio sound backend");
            return Some(Self::PulseAudio);
        }

        if Self::is_alsa_available() {
            info!("Detected ALSA sound backend");
            return Some(Self::Alsa);
        }

        warn!("No sound backend detected");
        None
    }

    fn is_pipewire_available() -> bool {
        Command::new("wpctl")
            .args(["status"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn is_pulseaudio_available() -> bool {
        Command::new("pactl")
            .args(["info"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn is_alsa_available() -> bool {
        Command::new("amixer")
            .args(["sget", "Master"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PipeWire => "pipewire",
            Self::PulseAudio => "pulseaudio",
            Self::Alsa => "alsa",
        }
    }

    pub fn has_streams(&self) -> bool {
        !matches!(self, Self::Alsa)
    }
}

/// One playback stream ("sink input")
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioStream {
    pub index: u32,
    /// Executable name of the client
    pub binary: Option<String>,
    pub pid: Option<i32>,
    /// Paused streams are corked
    pub corked: bool,
    pub muted: bool,
}

impl AudioStream {
    /// Muted streams still count as playing
    pub fn is_playing(&self) -> bool {
        !self.corked
    }

    pub fn app_id(&self) -> Option<AppId> {
        self.binary.as_deref().map(AppId::new)
    }
}

/// Parse the output of `pactl list sink-inputs`
pub fn parse_sink_inputs(output: &str) -> Vec<AudioStream> {
    let mut streams = Vec::new();
    let mut current: Option<AudioStream> = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(index) = line.strip_prefix("Sink Input #") {
            streams.extend(current.take());
            current = index.trim().parse().ok().map(|index| AudioStream {
                index,
                ..AudioStream::default()
            });
            continue;
        }

        let Some(stream) = current.as_mut() else {
            continue;
        };

        if let Some(value) = line.strip_prefix("Corked:") {
            stream.corked = value.trim() == "yes";
        } else if let Some(value) = line.strip_prefix("Mute:") {
            stream.muted = value.trim() == "yes";
        } else if let Some((key, value)) = line.split_once(" = ") {
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "application.process.binary" => stream.binary = Some(value.to_string()),
                "application.process.id" => stream.pid = value.parse().ok(),
                _ => {}
            }
        }
    }

    streams.extend(current);
    streams
}

/// Lists and mutes playback streams
#[derive(Debug, Clone, Copy)]
pub struct AudioControl {
    backend: Option<SoundBackend>,
}

impl AudioControl {
    /// Create a controller with auto-detection
    pub fn new() -> Self {
        Self {
            backend: SoundBackend::detect(),
        }
    }

    pub fn with_backend(backend: Option<SoundBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Option<SoundBackend> {
        self.backend
    }

    /// Current playback streams; empty without a stream-capable backend
    pub fn streams(&self) -> HostResult<Vec<AudioStream>> {
        if !self.backend.is_some_and(|b| b.has_streams()) {
            return Ok(Vec::new());
        }

        let output = Command::new("pactl")
            .args(["list", "sink-inputs"])
            .output()?;
        if !output.status.success() {
            return Err(HostError::Unavailable(format!(
                "pactl list sink-inputs exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let streams = parse_sink_inputs(&stdout);
        debug!(streams = streams.len(), "Listed audio streams");
        Ok(streams)
    }

    /// Mute or unmute every stream of `app`
    pub fn set_app_muted(&self, app: &AppId, muted: bool) -> HostResult<()> {
        match self.backend {
            Some(SoundBackend::PipeWire) | Some(SoundBackend::PulseAudio) => {
                let state = if muted { "1" } else { "0" };
                for stream in self.streams()? {
                    if stream.app_id().as_ref() == Some(app) {
                        run(Command::new("pactl").args([
                            "set-sink-input-mute",
                            &stream.index.to_string(),
                            state,
                        ]))?;
                    }
                }
                Ok(())
            }
            Some(SoundBackend::Alsa) => {
                let state = if muted { "mute" } else { "unmute" };
                run(Command::new("amixer").args(["sset", "Master", state]))
            }
            None => Err(HostError::Unavailable("No sound backend available".into())),
        }
    }
}

impl Default for AudioControl {
    fn default() -> Self {
        Self::new()
    }
}

fn run(cmd: &mut Command) -> HostResult<()> {
    let status = cmd.status()?;
    if status.success() {
        Ok(())
    } else {
        Err(HostError::EnforcementFailed(format!(
            "{:?} exited with {}",
            cmd.get_program(),
            status
        )))
    }
}
