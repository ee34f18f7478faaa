//! Start or resume a flow instance

use anyhow::Result;
use uuid::Uuid;

use super::{load_flow, Session};
use crate::cli::{InstanceArgs, StoreArgs};
use crate::output::{print_instance, OutputFormat};

pub async fn execute(store: &StoreArgs, target: InstanceArgs, new: bool) -> Result<()> {
    let definition = load_flow(&target.file)?;
    let instance_id = if new {
        Some(Uuid::new_v4().to_string())
    } else {
        target.instance
    };

    let mut session = Session::open(store, definition, instance_id.as_deref()).await?;
    // Write the starting point so the instance shows up in `list`
    session.instance.save().await?;
    let instance = session.finish()?;

    print_instance(&instance, OutputFormat::Text)
}
