//! Temp directories and scenario files for CLI and loader tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use apiprobe::model::Scenario;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Create a unique temporary directory for a test.
///
/// The name carries a timestamp and a per-process counter so parallel tests
/// never share a directory.
#[must_use]
pub fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.push(format!(
        "apiprobe-{prefix}-{}-{stamp}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("failed to create temp directory");
    dir
}

/// Write a scenario as pretty JSON.
pub fn write_scenario(path: &Path, scenario: &Scenario) {
    let data = serde_json::to_vec_pretty(scenario).expect("failed to serialize scenario");
    fs::write(path, data).expect("failed to write scenario file");
}

/// Write raw scenario text (YAML or hand-written JSON).
pub fn write_scenario_text(path: &Path, text: &str) {
    fs::write(path, text).expect("failed to write scenario file");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_creates_unique_directories() {
        let dir1 = temp_dir("test");
        let dir2 = temp_dir("test");

        assert!(dir1.exists());
        assert!(dir2.exists());
        assert_ne!(dir1, dir2);
        assert!(dir1
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("apiprobe-test-"));

        let _ = fs::remove_dir_all(&dir1);
        let _ = fs::remove_dir_all(&dir2);
    }
}
