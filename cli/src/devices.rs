use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use miniquery_core::QueryOptions;
use serde::Serialize;

pub type Devices = Arc<Vec<MediaDevice>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaDevice {
    pub name: String,
    pub path: PathBuf,
    pub kind: DeviceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Audio,
    Video,
    Other,
}

impl DeviceKind {
    // ALSA and V4L node naming.
    fn from_node_name(name: &str) -> Self {
        const AUDIO: [&str; 5] = ["pcm", "control", "midi", "hw", "seq"];

        if AUDIO.iter().any(|prefix| name.starts_with(prefix)) {
            DeviceKind::Audio
        } else if name.starts_with("video") {
            DeviceKind::Video
        } else {
            DeviceKind::Other
        }
    }
}

/// Lists the entries of `dir` as devices, sorted by name.
pub async fn enumerate_devices(dir: &Path) -> std::io::Result<Vec<MediaDevice>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut devices = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        devices.push(MediaDevice {
            kind: DeviceKind::from_node_name(&name),
            path: entry.path(),
            name,
        });
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

pub async fn sleep_to_show_loading_states(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// The `["mediaDevices"]` query: waits `delay`, then enumerates `dir`.
pub fn media_devices_query(dir: PathBuf, delay: Duration) -> QueryOptions<Devices> {
    QueryOptions::new("mediaDevices", move || {
        let dir = dir.clone();
        async move {
            sleep_to_show_loading_states(delay).await;
            enumerate_devices(&dir).await.map(Arc::new)
        }
    })
}
