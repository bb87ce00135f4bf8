use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "passlock";
pub const APP_NAME: &str = "passlock";

pub const SETTINGS_FILE: &str = "settings.json";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_dir) = std::env::var("PASSLOCK_DATA_DIR") {
        return Ok(PathBuf::from(override_dir));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join(SETTINGS_FILE))
}
