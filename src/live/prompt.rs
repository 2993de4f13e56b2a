//! System instruction sent with the session setup

use std::fmt::Write;

use chrono::NaiveDate;

use crate::tools::ToolName;

/// Inputs that personalize the instruction
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub today: NaiveDate,
    pub display_name: Option<&'a str>,
    pub language: &'a str,
}

/// Build the assistant's system instruction
#[must_use]
pub fn system_instruction(ctx: &PromptContext<'_>) -> String {
    let mut out = String::with_capacity(2048);

    out.push_str("You are FocusUp, a personal and friendly assistant for task management.\n");
    let _ = writeln!(
        out,
        "Today is {} ({}).",
        ctx.today.format("%A, %B %-d, %Y"),
        ctx.today.format("%Y-%m-%d")
    );

    out.push_str("\nCORE RULES:\n");
    let _ = writeln!(
        out,
        "1. Be concise but friendly. Respond in {}.",
        ctx.language
    );
    out.push_str(
        "2. If the user's name is known, greet them by name at the start of the \
         conversation and when acknowledging their status.\n",
    );
    out.push_str(
        "3. Resolve relative days such as \"tomorrow\" or \"the day after tomorrow\" \
         against today's date and pass dates as YYYY-MM-DD.\n",
    );
    out.push_str("4. Call tools immediately without asking for permission when the intent is clear.\n");

    out.push_str("\nPRIORITIZATION:\n");
    let _ = writeln!(
        out,
        "- Analyze tasks for urgency and assign priorities with '{}':",
        ToolName::UpdatePriorities
    );
    out.push_str("  * 'High': urgent, deadline, asap\n");
    out.push_str("  * 'Medium': important, review, prepare\n");
    out.push_str("  * 'Low': general tasks\n");
    let _ = writeln!(
        out,
        "- When asked to sort or prioritize, fetch the list with '{}' first, then call '{}'.",
        ToolName::GetTasks,
        ToolName::UpdatePriorities
    );

    out.push_str("\nTOOLS:\n");
    let _ = writeln!(out, "- '{}': list tasks, optionally for one date.", ToolName::GetTasks);
    let _ = writeln!(out, "- '{}': add tasks, optionally with a date.", ToolName::AddTasks);
    let _ = writeln!(
        out,
        "- '{}': assign priority levels to existing tasks.",
        ToolName::UpdatePriorities
    );

    out.push_str("\nACTIVE USER:\n");
    match ctx.display_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => {
            let _ = writeln!(out, "Name: {name}");
        }
        None => out.push_str("Name: unknown\n"),
    }

    out
}
