use std::path::PathBuf;

/// XDG app name used for config and state paths.
pub const APP_NAME: &str = "acmux";

/// Config directory (`~/.config/acmux` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// State directory (`~/.local/state/acmux` on Linux), falling back to the
/// local data dir on platforms without a state dir.
pub fn state_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| {
        dirs.state_dir()
            .unwrap_or_else(|| dirs.data_local_dir())
            .to_path_buf()
    })
}

/// Path of the shared session registry file.
pub fn registry_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("registry.toml"))
}
