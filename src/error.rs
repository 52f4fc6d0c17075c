use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("network error while {context}: {source}")]
    Network {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("control plane returned {status} for {request}")]
    ControlPlane { request: String, status: u16 },

    #[error("control plane unreachable after {attempts} attempts")]
    ControlPlaneUnavailable { attempts: u32 },

    #[error("checksum mismatch for {uri}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        expected: String,
        actual: String,
        uri: String,
    },

    #[error("unknown compression for artifact '{0}'")]
    UnknownCompression(String),

    #[error("archive '{archive}' contains {count} driver executables, expected exactly one")]
    AmbiguousArtifact { archive: String, count: usize },

    #[error("archive '{0}' contains no driver executable")]
    ArtifactNotFound(String),

    #[error("required tool '{0}' not found on PATH")]
    ToolNotFound(String),

    #[error("{tool} failed to extract '{archive}': {stderr}")]
    ExtractionFailed {
        tool: String,
        archive: String,
        stderr: String,
    },

    #[error("plugin for driver '{driver}' unreachable at {address}: {cause}")]
    PluginUnreachable {
        driver: String,
        address: String,
        cause: String,
    },

    #[error("plugin for driver '{driver}' violated the wire protocol: {detail}")]
    PluginProtocol { driver: String, detail: String },

    #[error("malformed flag name '{flag}' for driver '{driver}'")]
    MalformedFlagName { driver: String, flag: String },

    #[error("timed out waiting for schema '{name}' to settle")]
    SchemaTimeout { name: String },

    #[error("timed out waiting for driver '{driver}' to reach state {expected}")]
    DriverStateTimeout { driver: String, expected: String },

    #[error("task for driver '{driver}' aborted: {detail}")]
    TaskAborted { driver: String, detail: String },

    #[error("invalid driver name '{0}'")]
    InvalidDriverName(String),

    #[error("driver '{0}' not found")]
    DriverNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("reconciliation failed for {} driver(s): {}", .0.len(), FailureList(.0))]
    Aggregate(Vec<DriverFailure>),
}

impl DriverError {
    pub fn network(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            context: context.into(),
            source,
        }
    }

    /// Connectivity problems the watchdog backs off on instead of the
    /// reconciler recording them against a driver.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::ControlPlane { .. } | Self::ControlPlaneUnavailable { .. }
        )
    }

    /// Failures collected in an aggregate, or an empty slice.
    pub fn failures(&self) -> &[DriverFailure] {
        match self {
            Self::Aggregate(failures) => failures,
            _ => &[],
        }
    }
}

/// One driver's failure within a reconciliation cycle.
#[derive(Debug)]
pub struct DriverFailure {
    pub driver: String,
    pub stage: Stage,
    pub error: DriverError,
}

impl DriverFailure {
    pub fn new(driver: impl Into<String>, stage: Stage, error: DriverError) -> Self {
        Self {
            driver: driver.into(),
            stage,
            error,
        }
    }
}

impl fmt::Display for DriverFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.driver, self.stage, self.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Worker,
    Install,
    Schema,
    Teardown,
    MachineSchema,
    Activate,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Worker => "worker",
            Self::Install => "install",
            Self::Schema => "schema",
            Self::Teardown => "teardown",
            Self::MachineSchema => "machine-schema",
            Self::Activate => "activate",
            Self::Report => "report",
        };
        f.write_str(name)
    }
}

struct FailureList<'a>(&'a [DriverFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
