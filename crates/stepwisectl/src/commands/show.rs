//! Show an instance's state

use anyhow::Result;
use stepwise_runtime::{FlowInstance, FlowOptions};

use super::{load_flow, open_persister};
use crate::cli::{InstanceArgs, StoreArgs};
use crate::output::{print_instance, OutputFormat};

pub async fn execute(store: &StoreArgs, target: &InstanceArgs, output: OutputFormat) -> Result<()> {
    let definition = load_flow(&target.file)?;
    let persister = open_persister(store).await?;

    let mut options = FlowOptions::new().persister(persister);
    if let Some(id) = &target.instance {
        options = options.instance_id(id.clone());
    }

    // Read-only: nothing is written unless the instance is navigated
    let instance = FlowInstance::open(definition, options).await;
    print_instance(&instance, output)
}
