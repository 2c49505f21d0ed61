//! Planner command files.
//!
//! A plan is either a JSON array of commands or one command per line.
//! Blank lines and `#` comments are skipped in the line form. Entries that
//! do not parse into a known command, in either form, are reported and left
//! out; they never reach the scheduler.

use mindgraph_core::PlannerCommand;

#[derive(Debug, Default)]
pub struct Plan {
    pub commands: Vec<PlannerCommand>,
    /// (1-based line, or array position, and the parse error) for every
    /// rejected entry.
    pub rejected: Vec<(usize, String)>,
}

pub fn parse_plan(text: &str) -> anyhow::Result<Plan> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let items: Vec<serde_json::Value> = serde_json::from_str(trimmed)
            .map_err(|e| anyhow::anyhow!("plan is not a JSON array: {}", e))?;
        let mut plan = Plan::default();
        for (idx, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<PlannerCommand>(item) {
                Ok(cmd) => plan.commands.push(cmd),
                Err(e) => plan.rejected.push((idx + 1, e.to_string())),
            }
        }
        return Ok(plan);
    }

    let mut plan = Plan::default();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<PlannerCommand>(line) {
            Ok(cmd) => plan.commands.push(cmd),
            Err(e) => plan.rejected.push((idx + 1, e.to_string())),
        }
    }
    Ok(plan)
}
