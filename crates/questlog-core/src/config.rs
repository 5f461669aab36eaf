use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::model::DEFAULT_QUEST_COLORS;

const RC_ENV_VAR: &str = "QUESTRC";
const DEFAULT_STORAGE_KEY: &str =
  "questTaskManager";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", "~/.questlog"),
      ("storage.key", DEFAULT_STORAGE_KEY),
      ("default.command", "list"),
      ("autosave", "on"),
      ("color", "on"),
      ("overdue.warnings", "on"),
      ("hooks", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    map.insert(
      "quest.colors".to_string(),
      DEFAULT_QUEST_COLORS.join(",")
    );

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(questrc = %path.display(), "loading questrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no questrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

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
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  /// Ordered quest color table.
  pub fn quest_colors(
    &self
  ) -> anyhow::Result<Vec<String>> {
    let raw = self
      .get("quest.colors")
      .unwrap_or_default();
    let colors: Vec<String> = raw
      .split(',')
      .map(str::trim)
      .filter(|c| !c.is_empty())
      .map(ToString::to_string)
      .collect();
    if colors.is_empty() {
      return Err(anyhow!(
        "quest.colors must name at \
         least one color"
      ));
    }
    Ok(colors)
  }

  pub fn storage_key(&self) -> String {
    self
      .get("storage.key")
      .map(|k| k.trim().to_string())
      .filter(|k| !k.is_empty())
      .unwrap_or_else(|| {
        DEFAULT_STORAGE_KEY.to_string()
      })
  }

  pub fn autosave(&self) -> bool {
    self
      .get_bool("autosave")
      .unwrap_or(true)
  }

  pub fn overdue_warnings(
    &self
  ) -> bool {
    self
      .get_bool("overdue.warnings")
      .unwrap_or(true)
  }

  /// Zone name for "today", when set.
  pub fn timezone(
    &self
  ) -> Option<String> {
    self
      .get("timezone")
      .filter(|tz| !tz.trim().is_empty())
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .to_path_buf();

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let line_no = idx + 1;
      match parse_rc_line(raw_line)
        .with_context(|| {
          format!(
            "{}:{line_no}",
            path.display()
          )
        })? {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let include =
            resolve_include_path(
              &base_dir, target
            )?;
          if include.exists() {
            debug!(include = %include.display(), line_no, "following include");
            self.load_file(&include)?;
          } else {
            warn!(include = %include.display(), "skipping missing include");
          }
        }
        | RcLine::Setting(key, value) => {
          trace!(key, value, "loaded config key");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }
}

#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Blank,
  Include(&'a str),
  Setting(&'a str, &'a str)
}

fn parse_rc_line(
  raw: &str
) -> anyhow::Result<RcLine<'_>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(RcLine::Blank);
  }
  if let Some(target) =
    line.strip_prefix("include ")
  {
    return Ok(RcLine::Include(
      target.trim()
    ));
  }
  match line.split_once('=') {
    | Some((key, value))
      if !key.trim().is_empty() =>
    {
      Ok(RcLine::Setting(
        key.trim(),
        value.trim()
      ))
    }
    | _ => Err(anyhow!(
      "expected key = value, got: {}",
      raw.trim()
    ))
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping questrc"
    );
    return Ok(None);
  };
  let candidate = home.join(".questrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".questlog"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    RcLine,
    parse_rc_line
  };

  #[test]
  fn defaults_cover_every_known_key() {
    let cfg = Config::default();
    assert_eq!(
      cfg.quest_colors().expect("colors").len(),
      8
    );
    assert_eq!(
      cfg.storage_key(),
      "questTaskManager"
    );
    assert!(cfg.autosave());
    assert!(cfg.overdue_warnings());
    assert_eq!(
      cfg.get("default.command").as_deref(),
      Some("list")
    );
  }

  #[test]
  fn rc_file_with_include_and_overrides()
  {
    let dir = tempdir().expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "autosave = off\n"
    )
    .expect("write include");
    let rc = dir.path().join("questrc");
    fs::write(
      &rc,
      "# palette\nquest.colors = red, \
       green ,blue # trailing\ninclude \
       extra.rc\n"
    )
    .expect("write rc");

    let mut cfg =
      Config::load(Some(rc.as_path()))
        .expect("load");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.quest_colors().expect("colors"),
      vec!["red", "green", "blue"]
    );
    assert!(!cfg.autosave());

    cfg.apply_overrides([(
      "rc.autosave".to_string(),
      "yes".to_string()
    )]);
    assert!(cfg.autosave());
  }

  #[test]
  fn empty_palette_is_an_error() {
    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "quest.colors".to_string(),
      " , ".to_string()
    )]);
    assert!(cfg.quest_colors().is_err());
  }

  #[test]
  fn malformed_line_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let rc = dir.path().join("questrc");
    fs::write(&rc, "autosave off\n")
      .expect("write rc");
    assert!(
      Config::load(Some(rc.as_path()))
        .is_err()
    );
  }

  #[test]
  fn rc_lines_classify() {
    assert_eq!(
      parse_rc_line("  # note")
        .expect("comment"),
      RcLine::Blank
    );
    assert_eq!(
      parse_rc_line(
        "include ~/extra.rc # more"
      )
      .expect("include"),
      RcLine::Include("~/extra.rc")
    );
    assert_eq!(
      parse_rc_line(
        "timezone = Europe/Paris"
      )
      .expect("setting"),
      RcLine::Setting(
        "timezone",
        "Europe/Paris"
      )
    );
    assert!(
      parse_rc_line("= orphan").is_err()
    );
  }

  #[test]
  fn timezone_key_is_optional() {
    let mut cfg = Config::default();
    assert!(cfg.timezone().is_none());
    cfg.apply_overrides([(
      "rc.timezone".to_string(),
      "Asia/Tokyo".to_string()
    )]);
    assert_eq!(
      cfg.timezone().as_deref(),
      Some("Asia/Tokyo")
    );
  }
}
