use log::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// User-facing message about something that happened in the background.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl Notification {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, Severity::Info)
    }

    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, Severity::Success)
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, Severity::Error)
    }

    fn new(title: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Notification {
            title: title.into(),
            description: description.into(),
            severity,
        }
    }

    pub fn log(&self) {
        match self.severity {
            Severity::Error => error!("{}: {}", self.title, self.description),
            Severity::Info | Severity::Success => info!("{}: {}", self.title, self.description),
        }
    }
}
