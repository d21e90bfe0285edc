use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base buildreg config directory (~/.config/buildreg/ on all platforms)
pub fn buildreg() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("buildreg"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("buildreg"))
    }
}

/// Global buildreg.json config file path
pub fn buildreg_json() -> Result<PathBuf> {
    Ok(buildreg()?.join("buildreg.json"))
}
