use std::io;
use std::path::Path;

/// File marking a complete checkpoint inside an expert's directory
pub const CHECKPOINT_FILE: &str = "checkpoint_last.pt";

/// Create the checkpoint directory if it does not exist yet
pub fn ensure_checkpoint_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)
}

/// Uids of experts with a saved checkpoint under `dir`, sorted.
///
/// Each expert owns a subdirectory named after its uid; only directories
/// holding [`CHECKPOINT_FILE`] count.
pub fn discover_checkpoints(dir: &Path) -> io::Result<Vec<String>> {
    let mut uids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if !entry.path().join(CHECKPOINT_FILE).is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            uids.push(name.to_string());
        }
    }
    uids.sort();
    Ok(uids)
}
