//! Administrative connection to the target Postgres server.
//!
//! The [`AdminConnection`] trait is the only way steps talk to Postgres. The
//! production implementation, [`PsqlConnection`], runs each statement through
//! `psql` so setup needs nothing beyond the client tools already installed
//! next to the server.

use crate::errors::QueryError;
use regex::Regex;
use std::cell::OnceCell;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::LazyLock;

/// One result row, addressed by column position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    values: Vec<String>,
}

impl Row {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_str(&self, index: usize) -> Result<&str, QueryError> {
        self.values
            .get(index)
            .map(String::as_str)
            .ok_or(QueryError::ColumnOutOfRange {
                index,
                len: self.values.len(),
            })
    }

    pub fn get_string(&self, index: usize) -> Result<String, QueryError> {
        self.get_str(index).map(str::to_string)
    }

    pub fn get_bool(&self, index: usize) -> Result<bool, QueryError> {
        match self.get_str(index)? {
            "t" | "true" | "on" => Ok(true),
            "f" | "false" | "off" => Ok(false),
            other => Err(self.parse_error(index, other, "boolean")),
        }
    }

    pub fn get_int(&self, index: usize) -> Result<i64, QueryError> {
        let raw = self.get_str(index)?;
        raw.trim()
            .parse()
            .map_err(|_| self.parse_error(index, raw, "integer"))
    }

    pub fn get_float(&self, index: usize) -> Result<f64, QueryError> {
        let raw = self.get_str(index)?;
        raw.trim()
            .parse()
            .map_err(|_| self.parse_error(index, raw, "float"))
    }

    fn parse_error(&self, index: usize, value: &str, expected: &'static str) -> QueryError {
        QueryError::Parse {
            index,
            value: value.to_string(),
            expected,
        }
    }
}

/// Where and as whom to connect. Unset fields fall back to libpq defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnParams {
    /// Hostname or socket directory.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl ConnParams {
    /// Parameters for a local socket connection.
    pub fn socket(dir: &str, port: u16, user: &str) -> Self {
        Self {
            host: Some(dir.to_string()),
            port: Some(port),
            user: Some(user.to_string()),
            ..Default::default()
        }
    }

    fn env(&self) -> Vec<(&'static str, String)> {
        let mut vars = Vec::new();
        if let Some(host) = &self.host {
            vars.push(("PGHOST", host.clone()));
        }
        if let Some(port) = self.port {
            vars.push(("PGPORT", port.to_string()));
        }
        if let Some(user) = &self.user {
            vars.push(("PGUSER", user.clone()));
        }
        if let Some(password) = &self.password {
            vars.push(("PGPASSWORD", password.clone()));
        }
        if let Some(database) = &self.database {
            vars.push(("PGDATABASE", database.clone()));
        }
        vars
    }
}

/// An authenticated channel to the target database.
pub trait AdminConnection {
    /// Trivial round-trip to confirm the server answers.
    fn ping(&self) -> Result<(), QueryError> {
        self.query_row("SELECT 1").map(|_| ())
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>, QueryError>;

    fn exec(&self, sql: &str) -> Result<(), QueryError>;

    /// Rebind to another database on the same server.
    fn switch_target(&mut self, database: &str);

    fn params(&self) -> &ConnParams;

    /// Exactly one row, with a distinguished error for none.
    fn query_row(&self, sql: &str) -> Result<Row, QueryError> {
        let mut rows = self.query(sql)?;
        match rows.len() {
            0 => Err(QueryError::NoRows),
            1 => Ok(rows.remove(0)),
            n => Err(QueryError::UnexpectedRowCount(n)),
        }
    }
}

/// Opens administrative connections.
pub trait Connector {
    fn connect(&self, params: ConnParams) -> Box<dyn AdminConnection>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Csv,
    Unaligned,
}

impl OutputFormat {
    fn delimiter(self) -> u8 {
        match self {
            OutputFormat::Csv => b',',
            OutputFormat::Unaligned => b'\t',
        }
    }
}

static PSQL_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"psql \(PostgreSQL\) (\d+)").expect("valid regex"));

static PASSWORD_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(PASSWORD\s+)'(?:[^']|'')*'").expect("valid regex")
});

/// Replace password literals so statements can be logged.
pub fn redact(sql: &str) -> String {
    PASSWORD_LITERAL_RE
        .replace_all(sql, "${1}'********'")
        .into_owned()
}

/// [`AdminConnection`] backed by the `psql` client.
pub struct PsqlConnection {
    program: String,
    params: ConnParams,
    format: OnceCell<OutputFormat>,
}

impl PsqlConnection {
    pub fn new(program: impl Into<String>, params: ConnParams) -> Self {
        Self {
            program: program.into(),
            params,
            format: OnceCell::new(),
        }
    }

    /// psql 12 and later can emit CSV, which quotes embedded separators.
    fn output_format(&self) -> OutputFormat {
        *self.format.get_or_init(|| {
            let output = Command::new(&self.program)
                .args(["--no-psqlrc", "--version"])
                .output();
            let Ok(output) = output else {
                return OutputFormat::Unaligned;
            };
            let text = String::from_utf8_lossy(&output.stdout);
            match PSQL_VERSION_RE
                .captures(&text)
                .and_then(|c| c[1].parse::<u32>().ok())
            {
                Some(major) if major >= 12 => OutputFormat::Csv,
                _ => OutputFormat::Unaligned,
            }
        })
    }

    fn run_sql(&self, sql: &str) -> Result<String, QueryError> {
        let format = self.output_format();
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "--no-psqlrc",
            "--tuples-only",
            "--command",
            "SET search_path = pg_catalog",
            "--command",
            sql,
        ]);
        match format {
            OutputFormat::Csv => {
                cmd.arg("--csv");
            }
            OutputFormat::Unaligned => {
                cmd.args(["--no-align", "--field-separator", "\t"]);
            }
        }
        cmd.envs(self.params.env());

        // Peer authentication needs the OS user matching the Postgres user.
        if crate::host::effective_uid() == 0
            && let Some(user) = &self.params.user
            && let Some((uid, gid)) = crate::host::lookup_os_user(user)
        {
            cmd.uid(uid).gid(gid);
        }

        tracing::debug!(
            sql = %redact(sql),
            database = self.params.database.as_deref().unwrap_or(""),
            "running psql"
        );
        let output = cmd.output().map_err(|source| QueryError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(QueryError::Failed {
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl AdminConnection for PsqlConnection {
    fn query(&self, sql: &str) -> Result<Vec<Row>, QueryError> {
        let output = self.run_sql(sql)?;
        let mut rows = parse_rows(&output, self.output_format())?;
        // The first row is the result of the search_path SET.
        if !rows.is_empty() {
            rows.remove(0);
        }
        Ok(rows)
    }

    fn exec(&self, sql: &str) -> Result<(), QueryError> {
        self.run_sql(sql).map(|_| ())
    }

    fn switch_target(&mut self, database: &str) {
        self.params.database = Some(database.to_string());
    }

    fn params(&self) -> &ConnParams {
        &self.params
    }
}

/// Opens [`PsqlConnection`]s using the given `psql` binary.
pub struct PsqlConnector {
    program: String,
}

impl PsqlConnector {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Connector for PsqlConnector {
    fn connect(&self, params: ConnParams) -> Box<dyn AdminConnection> {
        Box::new(PsqlConnection::new(self.program.clone(), params))
    }
}

/// Split delimited psql output into rows.
///
/// CSV fields may be quoted and then contain the separator, doubled quotes
/// and newlines. Unaligned output has no quoting. Blank lines are skipped.
fn parse_rows(output: &str, format: OutputFormat) -> Result<Vec<Row>, QueryError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(format.delimiter())
        .quoting(format == OutputFormat::Csv)
        .from_reader(output.as_bytes());
    reader
        .records()
        .map(|record| {
            let record = record.map_err(|err| QueryError::Malformed(err.to_string()))?;
            Ok(Row::new(record.iter().map(str::to_string).collect()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_typed_getters() {
        let row = Row::new(vec![
            "t".to_string(),
            "150004".to_string(),
            "0.25".to_string(),
            "hello".to_string(),
        ]);
        assert!(row.get_bool(0).unwrap());
        assert_eq!(row.get_int(1).unwrap(), 150004);
        assert_eq!(row.get_float(2).unwrap(), 0.25);
        assert_eq!(row.get_str(3).unwrap(), "hello");
    }

    #[test]
    fn test_row_getters_report_errors_instead_of_panicking() {
        let row = Row::new(vec!["maybe".to_string()]);
        assert!(matches!(
            row.get_bool(0),
            Err(QueryError::Parse { expected: "boolean", .. })
        ));
        assert!(matches!(row.get_int(0), Err(QueryError::Parse { .. })));
        assert!(matches!(
            row.get_str(3),
            Err(QueryError::ColumnOutOfRange { index: 3, len: 1 })
        ));
    }

    #[test]
    fn test_parse_csv_with_quotes_and_newlines() {
        let output = "SET\napp,\"a,b\"\n\"say \"\"hi\"\"\",\"line1\nline2\"\n";
        let rows = parse_rows(output, OutputFormat::Csv).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get_str(0).unwrap(), "SET");
        assert_eq!(rows[1].get_str(1).unwrap(), "a,b");
        assert_eq!(rows[2].get_str(0).unwrap(), "say \"hi\"");
        assert_eq!(rows[2].get_str(1).unwrap(), "line1\nline2");
    }

    #[test]
    fn test_parse_unaligned_skips_blank_lines() {
        let rows = parse_rows("SET\n\nfoo\tbar\n\n", OutputFormat::Unaligned).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_str(1).unwrap(), "bar");
    }

    #[test]
    fn test_parse_keeps_quoted_empty_value() {
        let rows = parse_rows("SET\n\"\"\n", OutputFormat::Csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_str(0).unwrap(), "");
    }

    #[test]
    fn test_parse_unaligned_keeps_quotes_literal() {
        let rows = parse_rows("SET\n\"quoted\"\tsay \"hi\"\n", OutputFormat::Unaligned).unwrap();
        assert_eq!(rows[1].get_str(0).unwrap(), "\"quoted\"");
        assert_eq!(rows[1].get_str(1).unwrap(), "say \"hi\"");
    }

    #[test]
    fn test_parse_allows_rows_of_different_widths() {
        let rows = parse_rows("SET\napp,t,1\n", OutputFormat::Csv).unwrap();
        assert_eq!(rows[0].get_str(0).unwrap(), "SET");
        assert_eq!(rows[1].get_int(2).unwrap(), 1);
    }

    #[test]
    fn test_redact_hides_password_literals() {
        let sql = "SET log_statement = none; ALTER USER \"pganalyze\" WITH ENCRYPTED PASSWORD 'it''s secret'";
        let redacted = redact(sql);
        assert!(!redacted.contains("secret"));
        assert!(redacted.contains("PASSWORD '********'"));
    }

    #[test]
    fn test_conn_params_env_only_includes_set_values() {
        let params = ConnParams::socket("/var/run/postgresql", 5432, "postgres");
        let env = params.env();
        assert!(env.contains(&("PGHOST", "/var/run/postgresql".to_string())));
        assert!(env.contains(&("PGPORT", "5432".to_string())));
        assert!(!env.iter().any(|(k, _)| *k == "PGPASSWORD"));
    }
}
