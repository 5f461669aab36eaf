use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

const TIMEZONE_ENV_VAR: &str =
  "QUESTLOG_TIMEZONE";

static PROJECT_TZ: OnceLock<Tz> =
  OnceLock::new();

/// Fixes the timezone that decides
/// "today" for the rest of the process.
/// `QUESTLOG_TIMEZONE` beats the
/// `timezone` config key. Only the
/// first call has any effect.
pub fn init_project_timezone(
  configured: Option<&str>
) -> Tz {
  *PROJECT_TZ.get_or_init(|| {
    let from_env =
      std::env::var(TIMEZONE_ENV_VAR)
        .ok();
    choose_timezone(
      from_env.as_deref(),
      configured
    )
  })
}

pub fn project_timezone() -> Tz {
  init_project_timezone(None)
}

/// Calendar date of `now` in the
/// project timezone.
#[must_use]
pub fn project_date(
  now: DateTime<Utc>
) -> NaiveDate {
  now
    .with_timezone(&project_timezone())
    .date_naive()
}

#[must_use]
pub fn today() -> NaiveDate {
  project_date(Utc::now())
}

#[must_use]
pub fn format_deadline(
  date: NaiveDate
) -> String {
  date.format("%Y-%m-%d").to_string()
}

fn choose_timezone(
  from_env: Option<&str>,
  configured: Option<&str>
) -> Tz {
  let candidates = [
    (TIMEZONE_ENV_VAR, from_env),
    ("config key timezone", configured)
  ];
  for (source, raw) in candidates {
    let Some(name) = raw
      .map(str::trim)
      .filter(|name| !name.is_empty())
    else {
      continue;
    };
    match name.parse::<Tz>() {
      | Ok(tz) => {
        tracing::debug!(source, timezone = %tz, "using project timezone");
        return tz;
      }
      | Err(err) => {
        tracing::warn!(source, timezone = name, error = %err, "ignoring unknown timezone");
      }
    }
  }
  chrono_tz::UTC
}

fn relative_offset_re()
-> anyhow::Result<&'static Regex> {
  static RELATIVE: OnceLock<
    Result<Regex, regex::Error>
  > = OnceLock::new();
  RELATIVE
    .get_or_init(|| {
      Regex::new(
        r"^(?P<sign>[+-])?(?P<num>\d+)(?P<unit>[dw])$"
      )
    })
    .as_ref()
    .map_err(|e| {
      anyhow!(
        "internal regex compile \
         failure: {e}"
      )
    })
}

/// Parses a deadline expression
/// relative to `today`.
#[tracing::instrument(level = "debug")]
pub fn parse_deadline(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "" => {
      return Err(anyhow!(
        "deadline cannot be empty"
      ));
    }
    | "today" => return Ok(today),
    | "tomorrow" => {
      return shift_days(today, 1);
    }
    | "yesterday" => {
      return shift_days(today, -1);
    }
    | _ => {}
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, weekday
    ));
  }

  let rel_re = relative_offset_re()?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
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
    let days = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("w") => {
        num.checked_mul(7).ok_or_else(
          || {
            anyhow!(
              "relative deadline too \
               large: {token}"
            )
          }
        )?
      }
      | _ => num
    };
    let negative = caps
      .name("sign")
      .is_some_and(|m| m.as_str() == "-");
    return shift_days(
      today,
      if negative { -days } else { days }
    );
  }

  for fmt in ["%Y-%m-%d", "%Y%m%d"] {
    if let Ok(date) =
      NaiveDate::parse_from_str(
        token, fmt
      )
    {
      return Ok(date);
    }
  }

  Err(anyhow!(
    "unrecognized deadline: {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, \
     weekday names (e.g. friday), \
     +Nd/-Nd/+Nw, YYYY-MM-DD, YYYYMMDD"
  })
}

fn shift_days(
  from: NaiveDate,
  days: i64
) -> anyhow::Result<NaiveDate> {
  Duration::try_days(days)
    .and_then(|delta| {
      from.checked_add_signed(delta)
    })
    .ok_or_else(|| {
      anyhow!(
        "deadline out of range: \
         {days} days from {from}"
      )
    })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    choose_timezone,
    format_deadline,
    parse_deadline
  };

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn parses_iso_dates() {
    let today = date(2026, 2, 17);
    assert_eq!(
      parse_deadline("2026-03-01", today)
        .expect("iso date"),
      date(2026, 3, 1)
    );
    assert_eq!(
      parse_deadline("20260301", today)
        .expect("basic date"),
      date(2026, 3, 1)
    );
  }

  #[test]
  fn parses_named_days() {
    let today = date(2026, 2, 17);
    assert_eq!(
      parse_deadline("Today", today)
        .expect("today"),
      today
    );
    assert_eq!(
      parse_deadline("tomorrow", today)
        .expect("tomorrow"),
      date(2026, 2, 18)
    );
    assert_eq!(
      parse_deadline("yesterday", today)
        .expect("yesterday"),
      date(2026, 2, 16)
    );
  }

  #[test]
  fn parses_weekday_name() {
    // 2026-02-17 is a Tuesday
    let today = date(2026, 2, 17);
    assert_eq!(
      parse_deadline("wednesday", today)
        .expect("weekday"),
      date(2026, 2, 18)
    );
    assert_eq!(
      parse_deadline("tue", today)
        .expect("same weekday"),
      date(2026, 2, 24)
    );
  }

  #[test]
  fn parses_relative_offsets() {
    let today = date(2026, 2, 17);
    assert_eq!(
      parse_deadline("+3d", today)
        .expect("days"),
      date(2026, 2, 20)
    );
    assert_eq!(
      parse_deadline("-1d", today)
        .expect("past"),
      date(2026, 2, 16)
    );
    assert_eq!(
      parse_deadline("2w", today)
        .expect("weeks"),
      date(2026, 3, 3)
    );
  }

  #[test]
  fn rejects_garbage() {
    let today = date(2026, 2, 17);
    assert!(
      parse_deadline("soonish", today)
        .is_err()
    );
    assert!(
      parse_deadline("  ", today)
        .is_err()
    );
    assert!(
      parse_deadline("2026-02-30", today)
        .is_err()
    );
  }

  #[test]
  fn formats_as_iso_date() {
    assert_eq!(
      format_deadline(date(2024, 1, 5)),
      "2024-01-05"
    );
  }

  #[test]
  fn env_timezone_beats_config_key() {
    assert_eq!(
      choose_timezone(
        Some("Asia/Tokyo"),
        Some("Europe/Paris")
      ),
      chrono_tz::Asia::Tokyo
    );
    assert_eq!(
      choose_timezone(
        None,
        Some(" Europe/Paris ")
      ),
      chrono_tz::Europe::Paris
    );
  }

  #[test]
  fn unknown_or_missing_timezone_is_utc()
  {
    assert_eq!(
      choose_timezone(
        Some("Mars/Olympus"),
        None
      ),
      chrono_tz::UTC
    );
    assert_eq!(
      choose_timezone(Some(""), None),
      chrono_tz::UTC
    );
    assert_eq!(
      choose_timezone(
        Some("Nowhere/Special"),
        Some("America/New_York")
      ),
      chrono_tz::America::New_York
    );
  }
}
