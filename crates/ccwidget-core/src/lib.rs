pub mod alert;
pub mod card;
pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod datastore;
pub mod datetime;
pub mod display;
pub mod form;
pub mod host;
pub mod render;
pub mod resolver;
pub mod scheduler;
pub mod widget;
pub mod writer;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info,
  warn
};

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
    "starting ccwidget"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.ccwidgetrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store = Arc::new(
    datastore::DataStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?
  );

  let policy =
    scheduler::ReminderPolicy::from_config(
      &cfg
    )
    .context("invalid reminder settings")?;
  let mut renderer =
    render::Renderer::new(&cfg)?;
  let now = datetime::project_now();
  let command = cli.command;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async move {
    let (writer, writer_task) =
      writer::StoreWriter::spawn(
        Arc::clone(&store)
      );
    let service =
      widget::WidgetService::new(
        store,
        writer,
        scheduler::Scheduler::new(
          policy
        )
      );

    let result = commands::dispatch(
      &service,
      &mut renderer,
      &data_dir,
      command,
      now
    )
    .await;

    // Closing the last writer handle
    // lets queued writes drain.
    drop(service);
    if let Err(err) = writer_task.await
    {
      warn!(error = %err, "store writer ended abnormally");
    }

    result
  })?;

  info!("done");
  Ok(())
}
