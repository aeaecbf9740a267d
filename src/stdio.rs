use std::fs::File;

/// Target of one standard descriptor (0, 1 or 2) after daemonization.
#[derive(Debug, Default)]
pub enum Stdio {
    /// Point the descriptor at `/dev/null`. Same as leaving the slot unset.
    #[default]
    Devnull,
    /// Duplicate this file onto the descriptor.
    RedirectToFile(File),
    /// Leave the inherited descriptor alone; a daemon keeping a terminal
    /// stream can block or die on `SIGHUP`, so use it for debugging only.
    Keep,
}

impl Stdio {
    pub fn devnull() -> Self {
        Stdio::Devnull
    }
}

impl From<File> for Stdio {
    fn from(file: File) -> Self {
        Stdio::RedirectToFile(file)
    }
}

/// `None` means "unset", which is the null device.
impl From<Option<File>> for Stdio {
    fn from(file: Option<File>) -> Self {
        file.map_or(Stdio::Devnull, Stdio::RedirectToFile)
    }
}
