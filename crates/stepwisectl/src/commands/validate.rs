//! Validate a flow definition file

use anyhow::Result;
use std::path::Path;
use stepwise_core::NextSpec;

use super::load_flow;
use crate::output::colors;

pub fn execute(file: &Path) -> Result<()> {
    let definition = load_flow(file)?;

    println!(
        "{}✓{} flow '{}' is valid ({} steps, start: {})",
        colors::GREEN,
        colors::RESET,
        definition.id(),
        definition.len(),
        definition.start()
    );
    if let Some(variant) = definition.variant_id() {
        println!("  variant: {}", variant);
    }

    for step_id in definition.step_ids() {
        let Some(node) = definition.step(step_id) else {
            continue;
        };
        let rule = match &node.next {
            NextSpec::Terminal => "(terminal)".to_string(),
            NextSpec::Single(next) => format!("-> {}", next),
            NextSpec::Branch { targets, .. } => format!("-> one of [{}]", targets.join(", ")),
        };
        println!("  {:<20} {}", step_id, rule);
    }
    Ok(())
}
