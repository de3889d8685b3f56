#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use assert_cmd::{assert::Assert, cargo::cargo_bin_cmd, Command};
use serde_json::Value;
use tempfile::TempDir;

pub const WINDOWS_APP: &str = r#"[
    {
        "appid": "Splunk_TA_windows",
        "name": "Splunk Add-on for Microsoft Windows",
        "uid": 742,
        "updated_time": "2025-06-01T08:30:00Z",
        "version": "9.0.0"
    }
]
"#;

const ENV_KEYS: &[&str] = &[
    "SBSYNC_MANIFEST",
    "SBSYNC_OUTDIR",
    "SBSYNC_BACKUPS",
    "SBSYNC_API_URL",
    "SBSYNC_DOWNLOAD_URL",
    "SBSYNC_HTTP_ATTEMPTS",
    "SBSYNC_HTTP_BACKOFF_MS",
    "SBSYNC_CREDENTIALS",
    "SBSYNC_USERNAME",
    "SBSYNC_PASSWORD",
    "SBSYNC_STATE_DIR",
];

/// A manifest, an archive directory and a private state directory.
pub struct Inventory {
    pub temp: TempDir,
    pub manifest: PathBuf,
    pub outdir: PathBuf,
}

impl Inventory {
    pub fn new(contents: &str) -> Self {
        let temp = tempfile::Builder::new()
            .prefix("sbsync-cli")
            .tempdir()
            .expect("tempdir");
        let manifest = temp.path().join("Your_apps.json");
        let outdir = temp.path().join("apps");
        fs::create_dir_all(&outdir).expect("outdir");
        fs::write(&manifest, contents).expect("write manifest");
        Self {
            temp,
            manifest,
            outdir,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp.path().join("state")
    }

    pub fn archive(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.outdir.join(name);
        fs::write(&path, bytes).expect("write archive");
        path
    }

    pub fn manifest_json(&self) -> Value {
        read_json(&self.manifest)
    }

    /// `sbsync` pointed at this inventory with a scrubbed environment.
    pub fn command(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("sbsync");
        for key in ENV_KEYS {
            cmd.env_remove(key);
        }
        cmd.current_dir(self.temp.path())
            .env("NO_COLOR", "1")
            .env("SBSYNC_STATE_DIR", self.state_dir())
            .arg("--manifest")
            .arg(&self.manifest)
            .arg("--outdir")
            .arg(&self.outdir);
        cmd
    }
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}

pub fn stdout(assert: &Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).into_owned()
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read json")).expect("valid json")
}
