pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod error;
pub mod hooks;
pub mod model;
pub mod render;
pub mod session;
pub mod snapshot;
pub mod store;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use error::StoreError;
pub use model::{
  Quest,
  QuestId,
  QuestProgress,
  Task,
  TaskId
};
pub use snapshot::Snapshot;
pub use store::QuestTaskStore;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting questlog CLI"
  );
  debug!(overrides = ?pre.rc_overrides, "positional rc overrides");

  let mut cfg = config::Config::load(
    cli.questrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre
      .rc_overrides
      .into_iter()
      .chain(cli.rc_overrides)
      .map(|o| (o.key, o.value))
  );

  let tz = datetime::init_project_timezone(
    cfg.timezone().as_deref()
  );
  debug!(%tz, "project timezone");

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let palette = cfg.quest_colors()?;
  let store =
    store::QuestTaskStore::with_palette(
      palette.clone()
    )?;

  let storage =
    datastore::FileStorage::open(
      &data_dir,
      &cfg.storage_key(),
      palette
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let renderer =
    render::Renderer::new(&cfg)?;
  let hooks = hooks::HookRunner::new(
    &cfg, &data_dir
  );

  let mut session =
    session::Session::new(
      store, storage, renderer
    )
    .with_hooks(hooks)
    .with_autosave(cfg.autosave());
  session.load();

  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  commands::dispatch(
    &mut session,
    &cfg,
    inv
  )?;

  info!("done");
  Ok(())
}
