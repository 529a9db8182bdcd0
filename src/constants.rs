//! Central constants for gitoteko configuration
//!
//! All string literals for defaults, filenames, and env-derived limits are
//! defined here to avoid duplication across modules.

/// Default extension list for language detection (comma-separated)
pub const DEFAULT_LANGUAGE_EXTENSIONS: &str =
    ".py,.ts,.js,.java,.tf,.yml,.yaml,.json,.xml,.go,.cs,.rb,.php,.kt,.scala,.sql,.sh,.dockerfile";

/// Default file name of the language report inside the base directory
pub const DEFAULT_LANGUAGE_REPORT_FILE: &str = "language_report.csv";

/// Column order of the language report CSV
pub const LANGUAGE_REPORT_COLUMNS: [&str; 5] =
    ["workspace", "repo_name", "repo_slug", "local_path", "extensions"];

/// Delimiter used to join detected extensions inside one CSV cell
pub const EXTENSIONS_DELIMITER: &str = ";";

/// Sonar descriptor file emitted at every working-copy root
pub const SONAR_PROPERTIES_FILENAME: &str = "sonar-project.properties";

/// Per-working-copy Sonar state file (relative to the repository root)
pub const DEFAULT_SONAR_STATE_FILE: &str = ".git/gitoteko_sonar_state.json";

/// Default `sonar.java.binaries` value for the Java template
pub const DEFAULT_JAVA_BINARIES_PATH: &str = "target/classes";

/// Default sonar-scanner executable name
pub const DEFAULT_SONAR_SCANNER_EXECUTABLE: &str = "sonar-scanner";

/// Default timeout for one sonar-scanner invocation
pub const DEFAULT_SONAR_SCANNER_TIMEOUT_SECONDS: f64 = 1800.0;

/// Default CE-task poll interval and total wait budget
pub const DEFAULT_SONAR_POLL_INTERVAL_SECONDS: f64 = 5.0;
pub const DEFAULT_SONAR_WAIT_TIMEOUT_SECONDS: f64 = 1800.0;

/// Lower bounds accepted for the poll interval / wait budget
pub const MIN_SONAR_POLL_INTERVAL_SECONDS: f64 = 0.1;
pub const MIN_SONAR_WAIT_TIMEOUT_SECONDS: f64 = 1.0;

/// Default timeout for one git subprocess invocation
pub const DEFAULT_GIT_TIMEOUT_SECONDS: f64 = 300.0;

/// Bitbucket Cloud REST 2.0 endpoint
pub const DEFAULT_BITBUCKET_API_BASE_URL: &str = "https://api.bitbucket.org/2.0";

/// Default Bitbucket API request timeout
pub const DEFAULT_BITBUCKET_TIMEOUT_SECONDS: f64 = 30.0;

/// Action names accepted in `GIT_ACTIONS`
pub const ACTION_DETECT_LANGUAGES: &str = "detect-languages";
pub const ACTION_WRITE_LANGUAGE_CSV: &str = "write-language-csv";
pub const ACTION_GENERATE_SONAR_PROPERTIES: &str = "generate-sonar-properties";
pub const ACTION_RUN_SONAR_SCAN: &str = "run-sonar-scan";
