//! Navigation commands: next, skip, back, set

use anyhow::Result;
use stepwise_runtime::Advance;
use tracing::debug;

use super::{load_flow, parse_assignments, Session};
use crate::cli::{InstanceArgs, StoreArgs};
use crate::output::{print_instance, OutputFormat};

/// `next` and `skip`
pub async fn next(
    store: &StoreArgs,
    target: &InstanceArgs,
    to: Option<String>,
    assignments: &[String],
    skip: bool,
) -> Result<()> {
    let definition = load_flow(&target.file)?;
    let patch = parse_assignments(assignments)?;

    let mut advance = Advance::new();
    if !patch.is_empty() {
        advance = advance.update(patch);
    }
    if let Some(to) = to {
        advance = advance.target(to);
    }

    let mut session = Session::open(store, definition, target.instance.as_deref()).await?;
    let step = if skip {
        session.instance.skip(advance).await?
    } else {
        session.instance.next(advance).await?
    };
    debug!(step = %step, skip, "Moved to step");

    print_instance(&session.finish()?, OutputFormat::Text)
}

pub async fn back(store: &StoreArgs, target: &InstanceArgs) -> Result<()> {
    let definition = load_flow(&target.file)?;
    let mut session = Session::open(store, definition, target.instance.as_deref()).await?;

    if !session.instance.back().await? {
        println!("Already at the first step");
    }

    print_instance(&session.finish()?, OutputFormat::Text)
}

pub async fn set(store: &StoreArgs, target: &InstanceArgs, assignments: &[String]) -> Result<()> {
    let definition = load_flow(&target.file)?;
    let patch = parse_assignments(assignments)?;

    let mut session = Session::open(store, definition, target.instance.as_deref()).await?;
    session.instance.set_context(patch).await?;

    print_instance(&session.finish()?, OutputFormat::Text)
}
