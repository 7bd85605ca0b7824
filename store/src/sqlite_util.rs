//! Shared SQLite helpers: secure file creation, WAL setup, and chrono-lite
//! ISO 8601 timestamp formatting, used by every table migration in this
//! crate.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::error::StoreResult;

/// Open a SQLite database at `path`, creating its parent directory and
/// tightening permissions on Unix, then enabling WAL mode.
pub(crate) fn open_secure_db(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        tighten_dir_permissions(parent)?;
    }

    let db = Connection::open(path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

    #[cfg(unix)]
    tighten_file_permissions(path)?;

    Ok(db)
}

#[cfg(unix)]
fn tighten_dir_permissions(path: &Path) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(unix)]
fn tighten_file_permissions(path: &Path) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    if path.exists() {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Convert a `SystemTime` to ISO 8601 with millisecond precision
/// (`YYYY-MM-DDTHH:MM:SS.mmmZ`), stored alongside every durable row.
#[must_use]
pub(crate) fn system_time_to_iso8601(time: SystemTime) -> String {
    let duration = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    let days = secs / 86400;
    let remaining = secs % 86400;
    let hours = remaining / 3600;
    let remaining = remaining % 3600;
    let minutes = remaining / 60;
    let seconds = remaining % 60;
    let (year, month, day) = days_to_ymd(days);

    format!("{year:04}-{month:02}-{day:02}T{hours:02}:{minutes:02}:{seconds:02}.{millis:03}Z")
}

#[must_use]
pub(crate) fn iso8601_to_system_time(s: &str) -> Option<SystemTime> {
    if s.len() < 19 {
        return None;
    }
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month: u32 = s.get(5..7)?.parse().ok()?;
    let day: u32 = s.get(8..10)?.parse().ok()?;
    let hour: u32 = s.get(11..13)?.parse().ok()?;
    let minute: u32 = s.get(14..16)?.parse().ok()?;
    let second: u32 = s.get(17..19)?.parse().ok()?;
    let millis: u32 = if s.len() >= 23 && s.get(19..20) == Some(".") {
        s.get(20..23)?.parse().ok()?
    } else {
        0
    };

    let days = ymd_to_days(year, month, day)?;
    let secs = days as u64 * 86400 + u64::from(hour) * 3600 + u64::from(minute) * 60 + u64::from(second);
    let duration = Duration::from_secs(secs) + Duration::from_millis(u64::from(millis));
    UNIX_EPOCH.checked_add(duration)
}

/// Howard Hinnant's civil_from_days algorithm.
fn days_to_ymd(days: u64) -> (i32, u32, u32) {
    let z = days as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = i64::from(yoe) + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };
    (year as i32, m, d)
}

fn ymd_to_days(year: i32, month: u32, day: u32) -> Option<i64> {
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let y = i64::from(if month <= 2 { year - 1 } else { year });
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u32;
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Some(era * 146_097 + i64::from(doe) - 719_468)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_roundtrip() {
        let original = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let iso = system_time_to_iso8601(original);
        let parsed = iso8601_to_system_time(&iso).expect("parses back");
        assert_eq!(parsed, original);
    }

    #[test]
    fn known_epoch_date() {
        assert_eq!(days_to_ymd(0), (1970, 1, 1));
    }
}
