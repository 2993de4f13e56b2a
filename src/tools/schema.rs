//! Function declarations sent with the session setup

use serde_json::{Value, json};

use super::ToolName;

/// Declarations for every tool, in the Live API schema dialect
#[must_use]
pub fn function_declarations() -> Value {
    Value::Array(ToolName::ALL.into_iter().map(declaration).collect())
}

fn declaration(tool: ToolName) -> Value {
    match tool {
        ToolName::AddTasks => json!({
            "name": tool.as_str(),
            "description": "Add one or more tasks to the user's list. Use when the user mentions something they need to do.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "new_tasks": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "content": {
                                    "type": "STRING",
                                    "description": "What needs to be done"
                                },
                                "date": {
                                    "type": "STRING",
                                    "description": "Day the task belongs to (YYYY-MM-DD), default today"
                                },
                                "status": {
                                    "type": "STRING",
                                    "description": "pending or done (default: pending)"
                                }
                            },
                            "required": ["content"]
                        }
                    }
                },
                "required": ["new_tasks"]
            }
        }),
        ToolName::GetTasks => json!({
            "name": tool.as_str(),
            "description": "List the user's tasks, optionally only those of one day.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "date": {
                        "type": "STRING",
                        "description": "Day to list (YYYY-MM-DD); omit for all tasks"
                    }
                }
            }
        }),
        ToolName::UpdatePriorities => json!({
            "name": tool.as_str(),
            "description": "Set the priority of existing tasks by id. Tasks not listed keep their priority.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "priorities": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "id": {
                                    "type": "STRING",
                                    "description": "Task id as returned by get-tasks"
                                },
                                "priority": {
                                    "type": "STRING",
                                    "enum": ["High", "Medium", "Low", "Normal"]
                                }
                            },
                            "required": ["id", "priority"]
                        }
                    }
                },
                "required": ["priorities"]
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_every_tool_once() {
        let decls = function_declarations();
        let names: Vec<&str> = decls
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["add-tasks", "get-tasks", "update-priorities"]);
    }

    #[test]
    fn priority_enum_matches_model() {
        let decls = function_declarations();
        let priority = &decls[2]["parameters"]["properties"]["priorities"]["items"]["properties"]
            ["priority"]["enum"];
        for value in priority.as_array().unwrap() {
            let parsed: crate::tasks::TaskPriority =
                serde_json::from_value(value.clone()).unwrap();
            assert_eq!(parsed.as_str(), value.as_str().unwrap());
        }
    }
}
