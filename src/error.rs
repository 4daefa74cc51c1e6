//! Error types for the few fallible operations: configuration loading and
//! device playback. Data sparsity in the frame stream is never an error.

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid { field: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config read failed: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse failed: {e}"),
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config value for {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Failure reported by a sound emitter. Logged by the emitter's caller,
/// never propagated into agent state.
#[derive(Debug)]
pub enum EmitterError {
    NoOutputDevice,
    MissingPcm(String),
    Device(String),
}

impl std::fmt::Display for EmitterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmitterError::NoOutputDevice => write!(f, "no audio output device available"),
            EmitterError::MissingPcm(name) => write!(f, "call sample {name} has no PCM data"),
            EmitterError::Device(msg) => write!(f, "audio device error: {msg}"),
        }
    }
}

impl std::error::Error for EmitterError {}
