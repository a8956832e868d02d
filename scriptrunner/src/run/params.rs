//! Submission parameters for a script run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default matrix encoding.
pub const DEFAULT_ENCODING: &str = "UTF-8";

/// Immutable parameters captured when a run is submitted.
#[derive(Clone, Debug, PartialEq)]
pub struct RunParams {
    /// Matrix file, relative to the workspace matrix folder or absolute.
    pub matrix_path: PathBuf,

    /// Optional environment settings file copied next to the matrix.
    pub settings_path: Option<PathBuf>,

    /// Optional sub-folder inside the run's working directory.
    pub sub_folder: Option<String>,

    /// Case-range filter, e.g. `"1-3,7"`. Empty means every case.
    pub range: String,

    /// Keep executing remaining cases after a failed one.
    pub continue_on_failure: bool,

    /// Start executing without waiting at the first debug checkpoint.
    pub auto_start: bool,

    /// Skip the manual prepare/run gates.
    pub auto_run: bool,

    /// Matrix file encoding.
    pub encoding: String,

    /// User that requested the run.
    pub user: String,

    /// Free-form tags attached to the run's report.
    pub tags: Vec<String>,

    /// Static-variable overrides passed to the compiler.
    pub static_variables: BTreeMap<String, String>,

    /// Environment name used by the report.
    pub environment: String,
}

impl RunParams {
    /// Starts a builder for a run of the given matrix.
    pub fn builder(matrix_path: impl Into<PathBuf>) -> RunParamsBuilder {
        RunParamsBuilder::new(matrix_path)
    }

    /// Parses the case-range filter.
    pub fn case_range(&self) -> Result<CaseRange, RangeParseError> {
        self.range.parse()
    }

    /// File stem of the matrix, used to name the working directory.
    pub fn matrix_name(&self) -> String {
        self.matrix_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "matrix".to_string())
    }
}

/// Builder for [`RunParams`].
#[derive(Clone, Debug)]
pub struct RunParamsBuilder {
    params: RunParams,
}

impl RunParamsBuilder {
    fn new(matrix_path: impl Into<PathBuf>) -> Self {
        Self {
            params: RunParams {
                matrix_path: matrix_path.into(),
                settings_path: None,
                sub_folder: None,
                range: String::new(),
                continue_on_failure: false,
                auto_start: true,
                auto_run: true,
                encoding: DEFAULT_ENCODING.to_string(),
                user: "anonymous".to_string(),
                tags: Vec::new(),
                static_variables: BTreeMap::new(),
                environment: "default".to_string(),
            },
        }
    }

    pub fn settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.params.settings_path = Some(path.into());
        self
    }

    pub fn sub_folder(mut self, folder: impl Into<String>) -> Self {
        self.params.sub_folder = Some(folder.into());
        self
    }

    pub fn range(mut self, range: impl Into<String>) -> Self {
        self.params.range = range.into();
        self
    }

    pub fn continue_on_failure(mut self, value: bool) -> Self {
        self.params.continue_on_failure = value;
        self
    }

    pub fn auto_start(mut self, value: bool) -> Self {
        self.params.auto_start = value;
        self
    }

    pub fn auto_run(mut self, value: bool) -> Self {
        self.params.auto_run = value;
        self
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.params.encoding = encoding.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.params.user = user.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.params.tags.push(tag.into());
        self
    }

    pub fn static_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .static_variables
            .insert(name.into(), value.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.params.environment = environment.into();
        self
    }

    pub fn build(self) -> RunParams {
        self.params
    }
}

/// Error returned for malformed case-range filters.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid case range '{input}': {reason}")]
pub struct RangeParseError {
    pub input: String,
    pub reason: String,
}

/// Parsed case-range filter.
///
/// Syntax is a comma separated list of `n`, `a-b` or `a-` items, 1-based.
/// An empty filter selects every case.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaseRange {
    spans: Vec<(u32, Option<u32>)>,
}

impl CaseRange {
    /// Filter that selects every case.
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns true when the filter selects every case.
    pub fn is_all(&self) -> bool {
        self.spans.is_empty()
    }

    /// Returns true if the 1-based case number is selected.
    pub fn contains(&self, case: u32) -> bool {
        self.is_all()
            || self
                .spans
                .iter()
                .any(|(start, end)| case >= *start && end.map_or(true, |end| case <= end))
    }
}

impl FromStr for CaseRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| RangeParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let parse_bound = |text: &str| -> Result<u32, RangeParseError> {
            let value: u32 = text
                .trim()
                .parse()
                .map_err(|_| fail("bounds must be positive integers"))?;
            if value == 0 {
                return Err(fail("case numbers start at 1"));
            }
            Ok(value)
        };

        let mut spans = Vec::new();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let span = match item.split_once('-') {
                Some((start, end)) if end.trim().is_empty() => (parse_bound(start)?, None),
                Some((start, end)) => {
                    let (start, end) = (parse_bound(start)?, parse_bound(end)?);
                    if end < start {
                        return Err(fail("range end precedes its start"));
                    }
                    (start, Some(end))
                }
                None => {
                    let value = parse_bound(item)?;
                    (value, Some(value))
                }
            };
            spans.push(span);
        }
        Ok(Self { spans })
    }
}

impl fmt::Display for CaseRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self
            .spans
            .iter()
            .map(|(start, end)| match end {
                Some(end) if end == start => start.to_string(),
                Some(end) => format!("{}-{}", start, end),
                None => format!("{}-", start),
            })
            .collect();
        write!(f, "{}", items.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let params = RunParams::builder("suite/login.csv").build();
        assert!(params.auto_run);
        assert!(params.auto_start);
        assert!(!params.continue_on_failure);
        assert_eq!(params.encoding, DEFAULT_ENCODING);
        assert_eq!(params.matrix_name(), "login");
    }

    #[test]
    fn test_builder_overrides() {
        let params = RunParams::builder("m.csv")
            .auto_run(false)
            .user("qa")
            .tag("nightly")
            .static_variable("host", "10.0.0.1")
            .range("2-4")
            .build();
        assert!(!params.auto_run);
        assert_eq!(params.user, "qa");
        assert_eq!(params.tags, vec!["nightly"]);
        assert_eq!(params.static_variables.get("host").unwrap(), "10.0.0.1");
        assert!(params.case_range().unwrap().contains(3));
    }

    #[test]
    fn test_empty_range_selects_everything() {
        let range: CaseRange = "".parse().unwrap();
        assert!(range.is_all());
        assert!(range.contains(1));
        assert!(range.contains(999));
    }

    #[test]
    fn test_range_items() {
        let range: CaseRange = "1-3, 5, 8-".parse().unwrap();
        assert!(range.contains(1));
        assert!(range.contains(3));
        assert!(!range.contains(4));
        assert!(range.contains(5));
        assert!(!range.contains(7));
        assert!(range.contains(8));
        assert!(range.contains(100));
        assert_eq!(range.to_string(), "1-3,5,8-");
    }

    #[test]
    fn test_range_rejects_garbage() {
        assert!("a-b".parse::<CaseRange>().is_err());
        assert!("0".parse::<CaseRange>().is_err());
        let err = "5-2".parse::<CaseRange>().unwrap_err();
        assert!(err.to_string().contains("5-2"));
    }
}
