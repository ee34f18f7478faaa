//! List saved instances of a flow

use anyhow::Result;
use std::path::Path;

use super::{load_flow, open_persister};
use crate::cli::StoreArgs;
use crate::output::{print_instances, InstanceRow, OutputFormat};

pub async fn execute(store: &StoreArgs, file: &Path, output: OutputFormat) -> Result<()> {
    let definition = load_flow(file)?;
    let persister = open_persister(store).await?;

    let rows: Vec<InstanceRow> = persister
        .list(definition.id())
        .await?
        .iter()
        .map(InstanceRow::from)
        .collect();

    print_instances(definition.id(), &rows, output)
}
