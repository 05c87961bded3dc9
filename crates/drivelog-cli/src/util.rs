//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use drivelog_store::{RouteQuery, RouteStore};
use drivelog_types::RouteStatus;

use crate::cli::RouteFilterArgs;

/// Open the route database, creating it if needed.
pub fn open_store(path: &Path) -> Result<RouteStore> {
    RouteStore::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))
}

/// Parse a date/time given as RFC3339 or `YYYY-MM-DD` (midnight UTC).
pub fn parse_datetime(s: &str) -> Result<OffsetDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt);
    }

    let format = time::format_description::parse("[year]-[month]-[day]")?;
    if let Ok(date) = time::Date::parse(s, &format) {
        return Ok(date.with_hms(0, 0, 0)?.assume_utc());
    }

    bail!("Invalid date/time format: {}. Use RFC3339 or YYYY-MM-DD", s)
}

/// Build a store query from route filter arguments.
pub fn build_query(filter: &RouteFilterArgs) -> Result<RouteQuery> {
    let mut query = RouteQuery::new();

    if let Some(status) = &filter.status {
        let status: RouteStatus = status.parse().with_context(|| {
            format!(
                "Invalid status '{}'. Use active, completed, or cancelled",
                status
            )
        })?;
        query = query.status(status);
    }
    if let Some(since) = &filter.since {
        query = query.since(parse_datetime(since)?);
    }
    if let Some(until) = &filter.until {
        query = query.until(parse_datetime(until)?);
    }
    if filter.limit > 0 {
        query = query.limit(filter.limit);
    }

    Ok(query)
}

/// Write output to file or stdout
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_datetime_rfc3339() {
        assert_eq!(
            parse_datetime("2025-06-01T12:30:00Z").unwrap(),
            datetime!(2025-06-01 12:30 UTC)
        );
    }

    #[test]
    fn test_parse_datetime_date_only() {
        assert_eq!(
            parse_datetime("2025-06-01").unwrap(),
            datetime!(2025-06-01 0:00 UTC)
        );
    }

    #[test]
    fn test_parse_datetime_invalid() {
        let err = parse_datetime("yesterday").unwrap_err().to_string();
        assert!(err.contains("Invalid date/time format"));
    }

    #[test]
    fn test_build_query_rejects_unknown_status() {
        let filter = RouteFilterArgs {
            status: Some("parked".to_string()),
            ..Default::default()
        };
        assert!(build_query(&filter).is_err());
    }

    #[test]
    fn test_build_query_filters_store() {
        let store = RouteStore::open_in_memory().unwrap();
        let mut done = drivelog_types::RouteSession::new(datetime!(2025-06-01 8:00 UTC), None);
        done.cancel(datetime!(2025-06-01 8:05 UTC), Vec::new());
        store.insert_route(&done).unwrap();
        store
            .insert_route(&drivelog_types::RouteSession::new(
                datetime!(2025-06-02 8:00 UTC),
                None,
            ))
            .unwrap();

        let filter = RouteFilterArgs {
            status: Some("cancelled".to_string()),
            ..Default::default()
        };
        let routes = store.query_routes(&build_query(&filter).unwrap()).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id, done.id);

        let filter = RouteFilterArgs {
            since: Some("2025-06-02".to_string()),
            ..Default::default()
        };
        let routes = store.query_routes(&build_query(&filter).unwrap()).unwrap();
        assert_eq!(routes.len(), 1);
        assert_ne!(routes[0].id, done.id);
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_output(Some(&path), "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
