//! Terminal output for flow state

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use stepwise_core::{EntryKind, FlowInstanceState, FlowStatus};
use stepwise_runtime::FlowInstance;
use stepwise_store::StoredInstance;

/// ANSI color codes for terminal styling
pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

/// Serialize `value` as JSON or YAML
pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json | OutputFormat::Text => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}

pub fn print_instance(instance: &FlowInstance, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            print!("{}", describe(instance));
            Ok(())
        }
        _ => {
            println!("{}", render(instance.state(), format)?.trim_end());
            Ok(())
        }
    }
}

/// Human-readable summary of an instance
pub fn describe(instance: &FlowInstance) -> String {
    use colors::*;

    let state = instance.state();
    let mut out = String::new();

    out.push_str(&format!("{}Flow:{}       {}\n", BOLD, RESET, state.flow_id));
    out.push_str(&format!(
        "{}Instance:{}   {}\n",
        BOLD,
        RESET,
        state.instance_id.as_deref().unwrap_or("<default>")
    ));
    if let Some(variant) = &state.variant_id {
        out.push_str(&format!("{}Variant:{}    {}\n", BOLD, RESET, variant));
    }
    out.push_str(&format!(
        "{}Step:{}       {}{}{}\n",
        BOLD, RESET, CYAN, state.step_id, RESET
    ));
    if let Some(title) = instance
        .current_meta()
        .and_then(|meta| meta.get("title"))
        .and_then(|title| title.as_str())
    {
        out.push_str(&format!("{}Title:{}      {}\n", BOLD, RESET, title));
    }
    out.push_str(&format!("{}Status:{}     {}\n", BOLD, RESET, status_label(state)));

    if !instance.is_completed() {
        let targets = instance.definition().targets(&state.step_id);
        if targets.len() > 1 {
            out.push_str(&format!(
                "{}Choices:{}    {}\n",
                BOLD,
                RESET,
                targets.join(", ")
            ));
        }
    }

    out.push_str(&format!(
        "{}History:{}    {}\n",
        BOLD,
        RESET,
        state.history.join(" -> ")
    ));
    let path: Vec<String> = state
        .path
        .iter()
        .map(|entry| match entry.via {
            EntryKind::Skip => format!("{} {}(skipped){}", entry.step_id, DIM, RESET),
            _ => entry.step_id.clone(),
        })
        .collect();
    out.push_str(&format!("{}Path:{}       {}\n", BOLD, RESET, path.join(" -> ")));
    out.push_str(&format!(
        "{}Started:{}    {}\n",
        BOLD,
        RESET,
        state.started_at.to_rfc3339()
    ));
    if let Some(completed_at) = state.completed_at {
        out.push_str(&format!(
            "{}Completed:{}  {}\n",
            BOLD,
            RESET,
            completed_at.to_rfc3339()
        ));
    }

    if state.context.is_empty() {
        out.push_str(&format!("{}Context:{}    {}(empty){}\n", BOLD, RESET, DIM, RESET));
    } else {
        out.push_str(&format!("{}Context:{}\n", BOLD, RESET));
        for (key, value) in &state.context {
            out.push_str(&format!("  {}: {}\n", key, value));
        }
    }

    out
}

fn status_label(state: &FlowInstanceState) -> String {
    match state.status {
        FlowStatus::Active => format!("{}active{}", colors::YELLOW, colors::RESET),
        FlowStatus::Completed => format!("{}completed{}", colors::GREEN, colors::RESET),
    }
}

/// One row of `list` output
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRow {
    pub instance_id: Option<String>,
    pub step_id: String,
    pub status: FlowStatus,
    pub saved_at: String,
}

impl From<&StoredInstance> for InstanceRow {
    fn from(stored: &StoredInstance) -> Self {
        Self {
            instance_id: stored.instance_id.clone(),
            step_id: stored.state.step_id.clone(),
            status: stored.state.status,
            saved_at: stored.state.saved_at.to_rfc3339(),
        }
    }
}

pub fn print_instances(flow_id: &str, rows: &[InstanceRow], format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Text {
        println!("{}", render(&rows, format)?.trim_end());
        return Ok(());
    }

    if rows.is_empty() {
        println!("No saved instances of flow '{}'", flow_id);
        return Ok(());
    }

    println!(
        "{}{:<38} {:<20} {:<10} {}{}",
        colors::BOLD,
        "INSTANCE",
        "STEP",
        "STATUS",
        "SAVED",
        colors::RESET
    );
    for row in rows {
        let status = match row.status {
            FlowStatus::Active => "active",
            FlowStatus::Completed => "completed",
        };
        println!(
            "{:<38} {:<20} {:<10} {}",
            row.instance_id.as_deref().unwrap_or("<default>"),
            row.step_id,
            status,
            row.saved_at
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_formats() {
        let value = json!({"stepId": "profile"});
        assert!(render(&value, OutputFormat::Json)
            .unwrap()
            .contains("\"stepId\": \"profile\""));
        assert_eq!(
            render(&value, OutputFormat::Yaml).unwrap().trim(),
            "stepId: profile"
        );
    }

    #[test]
    fn test_output_format_parses_from_flag() {
        assert_eq!(
            OutputFormat::from_str("yaml", true).unwrap(),
            OutputFormat::Yaml
        );
        assert!(OutputFormat::from_str("xml", true).is_err());
    }
}
