// SPDX-License-Identifier: MPL-2.0

//! Where a mount keeps its state between `mount` and `umount`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// The file-system locations belonging to one mount of one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    /// The name given to the mapped device.
    pub name: String,
    /// `/dev/mapper/<name>`.
    pub mapped: PathBuf,
    /// The session file, `<basename>.info.json`.
    pub session: PathBuf,
    /// The overlay image, `<basename>.sparse`.
    pub overlay: PathBuf,
    /// Everything xmount owns for this mount.
    pub cache_base: PathBuf,
    pub cache_file: PathBuf,
    pub data_dir: PathBuf,
    /// The raw image xmount presents, `<data_dir>/<stem>.dd`.
    pub image: PathBuf,
}

impl Paths {
    pub fn new(device: &Path, name: &str, state_dir: &Path, cache_root: &Path) -> Self {
        let basename = device
            .file_name()
            .map(|it| it.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_owned());
        let stem = device
            .file_stem()
            .map(|it| it.to_string_lossy().into_owned())
            .unwrap_or_else(|| basename.clone());

        let cache_base = cache_root.join(name);
        let data_dir = cache_base.join("data");

        Self {
            name: name.to_owned(),
            mapped: Path::new("/dev/mapper").join(name),
            session: state_dir.join(format!("{}.info.json", basename)),
            overlay: state_dir.join(format!("{}.sparse", basename)),
            cache_file: cache_base.join("cache"),
            image: data_dir.join(format!("{}.dd", stem)),
            data_dir,
            cache_base,
        }
    }
}

/// The loop devices one mount created, as written to the session file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSession {
    /// Backs the original image.
    pub tos_loop_device: String,
    /// Backs the overlay.
    pub dos_loop_device: String,
    /// Exposes the partitions of the mapped device.
    pub final_device: String,
    /// Whether xmount presented the device through `--morph swab`. Absent in session files
    /// written before this was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_swapped: Option<bool>,
}

/// One device-level layer of a mount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Layer {
    Loop(String),
    Mapped(PathBuf),
}

impl MountSession {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;

        serde_json::from_str(&text)
            .with_context(|| format!("Malformed session file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write session file {}", path.display()))
    }

    /// Whether the device was known to be mounted without byte swapping, in which case the xmount
    /// cache holds blocks in the device's own order.
    pub fn is_native(&self) -> bool {
        self.byte_swapped == Some(false)
    }

    /// The layers of this mount in the order they were created.
    pub fn layers(&self, mapped: &Path) -> Vec<Layer> {
        vec![
            Layer::Loop(self.tos_loop_device.clone()),
            Layer::Loop(self.dos_loop_device.clone()),
            Layer::Mapped(mapped.to_owned()),
            Layer::Loop(self.final_device.clone()),
        ]
    }

    /// The layers of this mount in the order they must be removed.
    pub fn teardown(&self, mapped: &Path) -> impl Iterator<Item = Layer> {
        self.layers(mapped).into_iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> MountSession {
        MountSession {
            tos_loop_device: "/dev/loop0".into(),
            dos_loop_device: "/dev/loop1".into(),
            final_device: "/dev/loop2".into(),
            byte_swapped: None,
        }
    }

    #[test]
    fn paths_follow_device_and_name() {
        let paths = Paths::new(
            Path::new("/dev/sdb"),
            "atari",
            Path::new("/var/lib/tosimg"),
            Path::new("/tmp/xmount"),
        );

        assert_eq!(paths.mapped, Path::new("/dev/mapper/atari"));
        assert_eq!(paths.session, Path::new("/var/lib/tosimg/sdb.info.json"));
        assert_eq!(paths.overlay, Path::new("/var/lib/tosimg/sdb.sparse"));
        assert_eq!(paths.cache_file, Path::new("/tmp/xmount/atari/cache"));
        assert_eq!(paths.image, Path::new("/tmp/xmount/atari/data/sdb.dd"));
    }

    #[test]
    fn image_files_lose_their_extension() {
        let paths = Paths::new(Path::new("card.img"), "c", Path::new("."), Path::new("/x"));
        assert_eq!(paths.image, Path::new("/x/c/data/card.dd"));
        assert_eq!(paths.session, Path::new("./card.img.info.json"));
    }

    #[test]
    fn session_file_uses_camel_case_keys() {
        let json: serde_json::Value = serde_json::to_value(session()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "tosLoopDevice": "/dev/loop0",
                "dosLoopDevice": "/dev/loop1",
                "finalDevice": "/dev/loop2",
            }),
        );
    }

    #[test]
    fn swap_flag_is_written_only_when_known() {
        let native = MountSession {
            byte_swapped: Some(false),
            ..session()
        };
        let json = serde_json::to_value(&native).unwrap();
        assert_eq!(json["byteSwapped"], serde_json::json!(false));
        assert!(native.is_native());

        let swapped = MountSession {
            byte_swapped: Some(true),
            ..session()
        };
        assert!(!swapped.is_native());
        assert!(!session().is_native());
    }

    #[test]
    fn older_session_files_still_load() {
        let text = r#"{"tosLoopDevice":"/dev/loop0","dosLoopDevice":"/dev/loop1","finalDevice":"/dev/loop2"}"#;
        let loaded: MountSession = serde_json::from_str(text).unwrap();
        assert_eq!(loaded, session());
        assert_eq!(loaded.byte_swapped, None);
    }

    #[test]
    fn session_survives_a_round_trip_through_disk() {
        let path = std::env::temp_dir().join(format!("tosimg-{}-session.json", std::process::id()));
        session().save(&path).unwrap();
        assert_eq!(MountSession::load(&path).unwrap(), session());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_session_file_is_an_error() {
        assert!(MountSession::load(Path::new("/definitely/not/here.info.json")).is_err());
    }

    #[test]
    fn teardown_reverses_creation() {
        let mapped = Path::new("/dev/mapper/atari");
        let mut layers = session().layers(mapped);
        layers.reverse();

        assert_eq!(session().teardown(mapped).collect::<Vec<_>>(), layers);
        assert_eq!(
            session().teardown(mapped).next(),
            Some(Layer::Loop("/dev/loop2".into()))
        );
    }
}
