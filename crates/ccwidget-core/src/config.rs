use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow,
  bail
};
use tracing::{
  debug,
  info,
  warn
};

const RC_ENV_VAR: &str = "CCWIDGETRC";
const RC_FILE_NAME: &str =
  ".ccwidgetrc";

/// Every key ccwidget reads, with its
/// default.
const KNOWN_KEYS: &[(&str, &str)] = &[
  ("data.location", "~/.ccwidget"),
  ("color", "on"),
  ("reminder.hour", "9"),
  ("reminder.offsets", "3,1,0"),
  ("alarm.start", "10"),
  ("alarm.end", "17"),
  ("alarm.autostop.minutes", "2")
];

/// Widget settings: defaults, then the
/// rc file, then command-line overrides.
#[derive(Debug, Clone)]
pub struct Config {
  values: BTreeMap<String, String>,
  pub rc_path: Option<PathBuf>
}

impl Config {
  pub fn defaults() -> Self {
    Config {
      values:  KNOWN_KEYS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      rc_path: None
    }
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let Some(path) =
      locate_rc(rc_override)
    else {
      debug!(
        "no ccwidgetrc; using defaults"
      );
      return Ok(cfg);
    };

    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    info!(rc = %path.display(), "loading ccwidgetrc");
    for (key, value) in
      parse_rc(&text, &path)?
    {
      cfg.set(key, value);
    }
    cfg.rc_path = Some(path);

    Ok(cfg)
  }

  /// `rc.` prefixes are accepted so
  /// `rc.color=off` and `color=off`
  /// mean the same.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.set(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<&str> {
    self
      .values
      .get(key)
      .map(String::as_str)
  }

  pub fn get_u32(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u32>> {
    self
      .get(key)
      .map(|raw| parse_u32(key, raw))
      .transpose()
  }

  /// Comma-separated whole numbers,
  /// duplicates dropped, first
  /// occurrence kept.
  pub fn get_u32_list(
    &self,
    key: &str
  ) -> anyhow::Result<Option<Vec<u32>>>
  {
    let Some(raw) = self.get(key)
    else {
      return Ok(None);
    };
    let mut out = Vec::new();
    for part in raw
      .split(',')
      .map(str::trim)
      .filter(|p| !p.is_empty())
    {
      let n = parse_u32(key, part)?;
      if !out.contains(&n) {
        out.push(n);
      }
    }
    Ok(Some(out))
  }

  fn set(
    &mut self,
    key: String,
    value: String
  ) {
    if !KNOWN_KEYS
      .iter()
      .any(|(k, _)| *k == key)
    {
      warn!(key = %key, "unknown config key");
    }
    self.values.insert(key, value);
  }
}

/// Data directory: `--data`, else
/// `data.location`. Created when
/// missing.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match override_dir {
    Some(path) => path.to_path_buf(),
    None => {
      let location = cfg
        .get("data.location")
        .ok_or_else(|| {
          anyhow!(
            "data.location is not set"
          )
        })?;
      expand_home(location)?
    }
  };

  fs::create_dir_all(&dir)
    .with_context(|| {
      format!(
        "failed to create {}",
        dir.display()
      )
    })?;
  debug!(dir = %dir.display(), "using data directory");
  Ok(dir)
}

/// `--ccwidgetrc`, else `$CCWIDGETRC`
/// (empty or `/dev/null` means none),
/// else `~/.ccwidgetrc` if present.
fn locate_rc(
  rc_override: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = rc_override {
    return Some(path.to_path_buf());
  }

  if let Ok(env) =
    std::env::var(RC_ENV_VAR)
  {
    let env = env.trim();
    if env.is_empty()
      || env == "/dev/null"
    {
      return None;
    }
    return Some(PathBuf::from(env));
  }

  dirs::home_dir()
    .map(|home| home.join(RC_FILE_NAME))
    .filter(|path| path.is_file())
}

/// `key = value` lines; `#` starts a
/// comment.
fn parse_rc(
  text: &str,
  origin: &Path
) -> anyhow::Result<Vec<(String, String)>>
{
  let mut out = Vec::new();
  for (idx, raw_line) in
    text.lines().enumerate()
  {
    let line = raw_line
      .split_once('#')
      .map_or(raw_line, |(before, _)| {
        before
      })
      .trim();
    if line.is_empty() {
      continue;
    }

    let Some((k, v)) =
      line.split_once('=')
    else {
      bail!(
        "invalid config line {}:{}: \
         {raw_line}",
        origin.display(),
        idx + 1
      );
    };
    let key = k.trim();
    if key.is_empty() {
      bail!(
        "missing key at {}:{}",
        origin.display(),
        idx + 1
      );
    }
    out.push((
      key.to_string(),
      v.trim().to_string()
    ));
  }
  Ok(out)
}

fn expand_home(
  raw: &str
) -> anyhow::Result<PathBuf> {
  let Some(rest) = raw
    .strip_prefix("~/")
    .or_else(|| {
      (raw == "~").then_some("")
    })
  else {
    return Ok(PathBuf::from(raw));
  };
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory for {raw}"
      )
    })?;
  Ok(home.join(rest))
}

fn parse_u32(
  key: &str,
  raw: &str
) -> anyhow::Result<u32> {
  raw.trim().parse::<u32>().map_err(
    |_| {
      anyhow!(
        "config key {key} expects a \
         whole number, got: {raw}"
      )
    }
  )
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn rc_file_overrides_defaults() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# widget settings\n\
       reminder.hour=8  # earlier\n\
       \n\
       reminder.offsets = 7, 3,7\n\
       color = off\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load");
    assert_eq!(
      cfg.get_u32("reminder.hour")
        .expect("number"),
      Some(8)
    );
    assert_eq!(
      cfg
        .get_u32_list("reminder.offsets")
        .expect("list"),
      Some(vec![7, 3])
    );
    assert_eq!(
      cfg.get("color"),
      Some("off")
    );
    assert_eq!(
      cfg.get("alarm.end"),
      Some("17")
    );
    assert_eq!(
      cfg.rc_path.as_deref(),
      Some(rc.as_path())
    );
  }

  #[test]
  fn malformed_line_names_its_location() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(
      &rc,
      "color = on\nreminder.hour\n"
    )
    .expect("write rc");
    let err = Config::load(Some(&rc))
      .expect_err("rejected");
    assert!(
      err.to_string().contains("bad.rc:2")
    );
  }

  #[test]
  fn non_numeric_values_are_rejected() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides([
      (
        "rc.alarm.start".to_string(),
        "ten".to_string()
      ),
      (
        "reminder.offsets".to_string(),
        "3,x".to_string()
      )
    ]);
    assert!(
      cfg.get_u32("alarm.start").is_err()
    );
    assert!(
      cfg
        .get_u32_list("reminder.offsets")
        .is_err()
    );
    assert_eq!(
      cfg.get_u32("missing")
        .expect("absent"),
      None
    );
  }

  #[test]
  fn data_dir_prefers_the_override() {
    let temp =
      tempdir().expect("tempdir");
    let mut cfg = Config::defaults();
    let configured =
      temp.path().join("configured");
    cfg.apply_overrides([(
      "data.location".to_string(),
      configured.display().to_string()
    )]);

    let explicit =
      temp.path().join("explicit");
    assert_eq!(
      resolve_data_dir(
        &cfg,
        Some(&explicit)
      )
      .expect("dir"),
      explicit
    );
    assert_eq!(
      resolve_data_dir(&cfg, None)
        .expect("dir"),
      configured
    );
    assert!(configured.is_dir());
  }
}
