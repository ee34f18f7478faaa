//! Reset an instance, or purge saved state

use anyhow::{bail, Result};

use super::{load_flow, open_persister, Session};
use crate::cli::{InstanceArgs, StoreArgs};
use crate::output::{print_instance, OutputFormat};

pub async fn reset(store: &StoreArgs, target: &InstanceArgs) -> Result<()> {
    let definition = load_flow(&target.file)?;
    let mut session = Session::open(store, definition, target.instance.as_deref()).await?;
    session.instance.reset().await?;

    print_instance(&session.finish()?, OutputFormat::Text)
}

pub async fn purge(store: &StoreArgs, expired_only: bool) -> Result<()> {
    if expired_only && store.ttl_secs.is_none() {
        bail!("--expired needs a TTL; pass --ttl-secs or set STEPWISE_TTL_SECS");
    }

    let persister = open_persister(store).await?;
    let removed = if expired_only {
        persister.purge_expired().await?
    } else {
        persister.remove_all().await?
    };

    println!(
        "Removed {} record(s) under prefix '{}'",
        removed,
        persister.prefix()
    );
    Ok(())
}
