use std::path::PathBuf;

/// Structural failures which abort the load or recompute that triggered them
///
/// Local numeric problems never surface here: an unparseable cell becomes a missing value and
/// flows through the engine as `None`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("table `{table}` is missing required column(s): {}", columns.join(", "))]
    MissingColumn {
        table: &'static str,
        columns: Vec<String>,
    },
    #[error("sample `{sample_id}` has more than one injection numbered {replicate_index}")]
    DuplicateReplicate {
        sample_id: String,
        replicate_index: u32,
    },
    #[error("record of sample `{found}` given to the block of sample `{sample_id}`")]
    ForeignRecord { sample_id: String, found: String },
    #[error("standard `{0}` is not present in the registry")]
    UnknownStandard(String),
    #[error("invalid target for standard `{name}`: d18O = {d18o}, d2H = {d2h}")]
    InvalidTarget { name: String, d18o: f64, d2h: f64 },
    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Why a computation had nothing to work on
///
/// This is returned in place of a result rather than as an [`Error`]: asking for statistics
/// over an empty selection is a legitimate state of the caller, and must stay distinguishable
/// from a successful computation that produced an empty table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmptySelection {
    /// No replicate of the sample survived the selection and quality filter
    NoReplicates { sample_id: String },
    /// No calibration curve has been detected
    NoCurves,
    /// Curves exist but none of them is enabled
    NoCurvesEnabled,
    /// No sample was chosen for a custom quantification
    NoSamples,
}

impl std::fmt::Display for EmptySelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReplicates { sample_id } => {
                write!(f, "no replicate selected for sample `{sample_id}`")
            }
            Self::NoCurves => write!(f, "no calibration curve available"),
            Self::NoCurvesEnabled => write!(f, "no calibration curve enabled"),
            Self::NoSamples => write!(f, "no sample selected"),
        }
    }
}

/// Outcome of an engine computation over a caller-chosen selection
#[derive(Clone, Debug, PartialEq)]
pub enum Computation<T> {
    Computed(T),
    Nothing(EmptySelection),
}

impl<T> Computation<T> {
    pub fn computed(self) -> Option<T> {
        match self {
            Self::Computed(value) => Some(value),
            Self::Nothing(_) => None,
        }
    }

    pub const fn as_computed(&self) -> Option<&T> {
        match self {
            Self::Computed(value) => Some(value),
            Self::Nothing(_) => None,
        }
    }

    pub const fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing(_))
    }
}
