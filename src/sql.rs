//! SQL text helpers shared by the steps.

use crate::errors::{ActionError, QueryError};
use crate::query::AdminConnection;

/// Quote a string literal. Backslashes switch to the `E''` escape syntax.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!(" E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{}'", escaped)
    }
}

/// Quote an identifier. Anything after a NUL byte is dropped.
pub fn quote_ident(name: &str) -> String {
    let name = name.split('\0').next().unwrap_or_default();
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"a"`, `"a and b"`, `"a, b, and c"`.
pub fn join_with_and(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{} and {}", a, b),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

/// `ALTER SYSTEM SET` followed by a configuration reload.
///
/// `value` is spliced in as written: list settings such as
/// `shared_preload_libraries` must not be quoted as a single literal.
pub fn apply_config_setting(
    conn: &dyn AdminConnection,
    name: &str,
    value: &str,
) -> Result<(), ActionError> {
    tracing::info!(setting = name, value, "applying Postgres setting");
    conn.exec(&format!("ALTER SYSTEM SET {} = {}", name, value))
        .map_err(|e| ActionError::Failed(format!("failed to apply setting: {}", e)))?;
    conn.exec("SELECT pg_reload_conf()").map_err(|e| {
        ActionError::Failed(format!(
            "failed to reload Postgres configuration after applying setting: {}",
            e
        ))
    })
}

/// Current value of a setting as reported by `pg_settings`.
pub fn current_setting(conn: &dyn AdminConnection, name: &str) -> Result<String, QueryError> {
    conn.query_row(&format!(
        "SELECT setting FROM pg_settings WHERE name = {}",
        quote_literal(name)
    ))?
    .get_string(0)
}

/// Restart-pending value of `shared_preload_libraries`.
///
/// A changed value only shows up in `current_setting` after a restart, so
/// when a restart is pending the value is read back from the file that set
/// it. The name column keeps the row non-empty when the value is.
pub const PENDING_SHARED_PRELOAD_LIBRARIES: &str = r"SELECT
  name,
  CASE
    WHEN pending_restart THEN
      left(
        right(
          regexp_replace(
            (SELECT line FROM
              (SELECT row_number() OVER () AS line_no, line FROM
                regexp_split_to_table(
                  pg_read_file(COALESCE(sourcefile, 'postgresql.auto.conf')),
                  '\s*$\s*', 'm'
                ) AS lines(line)
              ) AS numbered(line_no, line)
             WHERE CASE
               WHEN sourceline IS NULL THEN line LIKE name || ' = %'
               ELSE line_no = sourceline
             END),
            name || ' = ', ''),
          -1),
        -1)
    ELSE current_setting(name)
  END AS pending_value
FROM pg_settings
WHERE name = 'shared_preload_libraries'";

pub fn pending_shared_preload_libraries(conn: &dyn AdminConnection) -> Result<String, QueryError> {
    conn.query_row(PENDING_SHARED_PRELOAD_LIBRARIES)?.get_string(1)
}

/// Whether a comma-separated library list names `library`.
pub fn has_library(list: &str, library: &str) -> bool {
    list.split(',')
        .map(|l| l.trim().trim_matches('"').trim_matches('\''))
        .any(|l| l == library)
}

/// Append `library` to a comma-separated list.
pub fn with_library(list: &str, library: &str) -> String {
    if list.trim().is_empty() {
        library.to_string()
    } else {
        format!("{},{}", list.trim(), library)
    }
}

/// Body of `pganalyze.explain(query text, params text[])`.
///
/// Runs `EXPLAIN (VERBOSE, FORMAT JSON)` for a single statement, binding
/// parameters through a prepared statement when any are given.
pub const EXPLAIN_HELPER_BODY: &str = r"DECLARE
	stmt text;
	param_list text;
	plan text;
BEGIN
	stmt := regexp_replace(query, ';+\s*\Z', '');
	IF position(';' in stmt) > 0 THEN
		RAISE EXCEPTION 'EXPLAIN helper only accepts a single statement without semicolons';
	END IF;

	IF coalesce(array_length(params, 1), 0) = 0 THEN
		EXECUTE 'EXPLAIN (VERBOSE, FORMAT JSON) ' || stmt INTO STRICT plan;
		RETURN plan;
	END IF;

	SELECT string_agg(quote_literal(p) || '::unknown', ',') INTO param_list
	FROM unnest(params) AS t(p);

	EXECUTE 'PREPARE pganalyze_explain AS ' || stmt;
	BEGIN
		EXECUTE 'EXPLAIN (VERBOSE, FORMAT JSON) EXECUTE pganalyze_explain(' || param_list || ')'
			INTO STRICT plan;
	EXCEPTION WHEN OTHERS THEN
		DEALLOCATE pganalyze_explain;
		RAISE;
	END;
	DEALLOCATE pganalyze_explain;
	RETURN plan;
END";

/// Statement creating or replacing the EXPLAIN helper.
pub fn explain_helper_definition() -> String {
    format!(
        "CREATE OR REPLACE FUNCTION pganalyze.explain(query text, params text[]) RETURNS text AS $$\n{}\n$$ LANGUAGE plpgsql VOLATILE SECURITY DEFINER;",
        EXPLAIN_HELPER_BODY
    )
}

/// One row: whether the installed helper is owned by a superuser, is
/// `SECURITY DEFINER` and has exactly the expected body. No rows when the
/// helper is missing.
pub fn explain_helper_check() -> String {
    format!(
        "SELECT md5(btrim(prosrc, E' \\n\\r\\t')) = md5(btrim({}, E' \\n\\r\\t'))
FROM pg_proc INNER JOIN pg_user ON (pg_proc.proowner = pg_user.usesysid)
WHERE proname = 'explain'
  AND pronamespace::regnamespace::text = 'pganalyze'
  AND prosecdef
  AND pg_user.usesuper",
        quote_literal(EXPLAIN_HELPER_BODY)
    )
}
