use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Days,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Timelike,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "ccwidget-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "CCWIDGET_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "CCWIDGET_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "UTC";

pub const MILLIS_PER_DAY: i64 =
  86_400_000;

/// Due dates further than this from now
/// are treated as garbage.
pub const VALIDITY_WINDOW_DAYS: i64 =
  5 * 365;

pub const DEFAULT_DUE_DAY: u32 = 15;

// 0001-01-01T00:00:00Z and
// 9999-12-31T23:59:59.999Z
const MIN_MILLIS: i64 =
  -62_135_596_800_000;
const MAX_MILLIS: i64 =
  253_402_300_799_999;

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

#[must_use]
pub fn project_now() -> DateTime<Tz> {
  Utc::now()
    .with_timezone(project_timezone())
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
  {
    if let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    ) {
      return tz;
    }
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or(chrono_tz::UTC)
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Clamps an epoch-millisecond value into
/// the range the calendar code handles.
#[must_use]
pub fn saturate_millis(
  millis: i64
) -> i64 {
  millis.clamp(MIN_MILLIS, MAX_MILLIS)
}

#[must_use]
pub fn from_millis(
  millis: i64,
  tz: &Tz
) -> DateTime<Tz> {
  DateTime::<Utc>::from_timestamp_millis(
    saturate_millis(millis)
  )
  .unwrap_or_default()
  .with_timezone(tz)
}

/// Resolves a wall-clock time on `date`
/// in `tz`. Ambiguous times take the
/// earliest instant; times inside a gap
/// move forward to the next hour.
#[must_use]
pub fn local_datetime(
  tz: &Tz,
  date: NaiveDate,
  hour: u32,
  minute: u32
) -> Option<DateTime<Tz>> {
  let naive =
    date.and_hms_opt(hour, minute, 0)?;
  match tz.from_local_datetime(&naive) {
    | LocalResult::Single(dt) => Some(dt),
    | LocalResult::Ambiguous(
      first,
      second
    ) => Some(first.min(second)),
    | LocalResult::None => {
      let shifted = naive
        .checked_add_signed(
          Duration::hours(1)
        )?
        .with_minute(0)?;
      tz.from_local_datetime(&shifted)
        .earliest()
    }
  }
}

#[must_use]
pub fn days_in_month(
  year: i32,
  month: u32
) -> Option<u32> {
  let first =
    NaiveDate::from_ymd_opt(
      year, month, 1
    )?;
  let next = first
    .checked_add_months(
      chrono::Months::new(1)
    )?;
  Some(
    next.signed_duration_since(first)
      .num_days() as u32
  )
}

/// Same day-of-month `months` months
/// after `from`, clamped to the last day
/// of the target month.
#[must_use]
pub fn add_months_clamped(
  from: NaiveDate,
  months: u32,
  day: u32
) -> Option<NaiveDate> {
  let first = from
    .with_day(1)?
    .checked_add_months(
      chrono::Months::new(months)
    )?;
  let last = days_in_month(
    first.year(),
    first.month()
  )?;
  first.with_day(day.clamp(1, last))
}

/// The 15th of next month at local
/// midnight.
#[must_use]
pub fn default_due_date(
  now: &DateTime<Tz>
) -> Option<DateTime<Tz>> {
  let date = add_months_clamped(
    now.date_naive(),
    1,
    DEFAULT_DUE_DAY
  )?;
  local_datetime(
    &now.timezone(),
    date,
    0,
    0
  )
}

#[must_use]
pub fn default_due_millis(
  now: &DateTime<Tz>
) -> i64 {
  match default_due_date(now) {
    | Some(dt) => dt.timestamp_millis(),
    | None => {
      tracing::warn!(
        now = %now,
        "could not build default due \
         date; using now + 30 days"
      );
      now
        .timestamp_millis()
        .saturating_add(
          30 * MILLIS_PER_DAY
        )
    }
  }
}

#[must_use]
pub fn within_validity_window(
  millis: i64,
  now: &DateTime<Tz>
) -> bool {
  let span = VALIDITY_WINDOW_DAYS
    * MILLIS_PER_DAY;
  let now_millis =
    now.timestamp_millis();
  millis >= now_millis.saturating_sub(span)
    && millis
      <= now_millis.saturating_add(span)
}

/// Signed number of calendar days from
/// `from` to `to`.
#[must_use]
pub fn day_difference(
  from: NaiveDate,
  to: NaiveDate
) -> i64 {
  to.signed_duration_since(from)
    .num_days()
}

#[must_use]
pub fn days_before(
  date: NaiveDate,
  days: u32
) -> Option<NaiveDate> {
  date.checked_sub_days(Days::new(
    u64::from(days)
  ))
}

#[must_use]
pub fn format_short_date(
  dt: &DateTime<Tz>
) -> String {
  dt.format("%b %d").to_string()
}

#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Tz>
) -> anyhow::Result<DateTime<Tz>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let tz = now.timezone();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return local_datetime(
        &tz,
        now.date_naive(),
        0,
        0
      )
      .ok_or_else(|| {
        anyhow!(
          "failed to construct \
           midnight for today"
        )
      });
    }
    | "tomorrow" => {
      let date = now
        .date_naive()
        .succ_opt()
        .ok_or_else(|| {
          anyhow!(
            "failed to advance to \
             tomorrow"
          )
        })?;
      return local_datetime(
        &tz, date, 0, 0
      )
      .ok_or_else(|| {
        anyhow!(
          "failed to construct \
           midnight for tomorrow"
        )
      });
    }
    | _ => {}
  }

  if let Some(target_month) =
    parse_month_name(&lower)
  {
    let today = now.date_naive();
    let mut year = today.year();
    if target_month <= today.month() {
      year = year.saturating_add(1);
    }
    let date = NaiveDate::from_ymd_opt(
      year,
      target_month,
      DEFAULT_DUE_DAY
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid month/year \
         candidate"
      )
    })?;
    return local_datetime(
      &tz, date, 0, 0
    )
    .ok_or_else(|| {
      anyhow!(
        "failed to construct month \
         midnight"
      )
    });
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "d" => Duration::try_days(num),
      | "h" => Duration::try_hours(num),
      | "m" => {
        Duration::try_minutes(num)
      }
      | _ => None
    }
    .ok_or_else(|| {
      anyhow!(
        "relative offset out of \
         range: {token}"
      )
    })?;

    let shifted = if sign == "-" {
      now.checked_sub_signed(duration)
    } else {
      now.checked_add_signed(duration)
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative offset out of \
         range: {token}"
      )
    });
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&tz));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_datetime(
      &tz, date, 0, 0
    )
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for date"
      )
    });
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return local_datetime(
        &tz,
        ndt.date(),
        ndt.hour(),
        ndt.minute()
      )
      .ok_or_else(|| {
        anyhow!(
          "local datetime does not \
           exist in {}: {token}",
          tz.name()
        )
      });
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow, month names \
     (the 15th of that month), \
     +Nd/+Nh/+Nm, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  match token.trim() {
    | "january" | "jan" => Some(1),
    | "february" | "feb" => Some(2),
    | "march" | "mar" => Some(3),
    | "april" | "apr" => Some(4),
    | "may" => Some(5),
    | "june" | "jun" => Some(6),
    | "july" | "jul" => Some(7),
    | "august" | "aug" => Some(8),
    | "september" | "sep" | "sept" => {
      Some(9)
    }
    | "october" | "oct" => Some(10),
    | "november" | "nov" => Some(11),
    | "december" | "dec" => Some(12),
    | _ => None
  }
}
