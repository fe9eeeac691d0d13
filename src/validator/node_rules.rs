//! Per-node configuration rules, keyed on (category, subtype).

use serde_json::Value;

use crate::model::{Node, NodeType};

use super::types::{Diagnostic, ValidationReport};

const VALID_OPERATORS: &[&str] = &[
    "equals",
    "not_equals",
    "contains",
    "not_contains",
    "starts_with",
    "ends_with",
    "greater_than",
    "less_than",
    "greater_than_or_equal",
    "less_than_or_equal",
    "is_null",
    "is_not_null",
    "is_empty",
    "is_not_empty",
    "in",
    "not_in",
];

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

pub(super) fn check_node(node: &Node, report: &mut ValidationReport) {
    match node.node_type {
        NodeType::Trigger => check_trigger(node, report),
        NodeType::Condition => check_condition(node, report),
        NodeType::Data => check_data(node, report),
        NodeType::Communication => check_communication(node, report),
        NodeType::Task => check_task(node, report),
        NodeType::Approval => check_approval(node, report),
        NodeType::Delay => check_delay(node, report),
        NodeType::Integration => check_integration(node, report),
        NodeType::List => check_list(node, report),
        NodeType::Error => check_error(node, report),
        NodeType::Collection => check_collection(node, report),
        NodeType::Scheduled => check_scheduled(node, report),
        NodeType::Event => check_event(node, report),
    }
}

fn check_trigger(node: &Node, report: &mut ValidationReport) {
    match node.subtype.as_str() {
        "record_created" | "record_updated" | "record_deleted" => {
            require(node, "entity", "Trigger must specify entity", report);
        }
        "field_changed" | "status_changed" | "stage_changed" => {
            require(node, "entity", "Trigger must specify entity", report);
            require(node, "field", "Trigger must specify which field changed", report);
        }
        other => unknown_subtype(node, other, report),
    }
}

fn check_condition(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    match node.subtype.as_str() {
        "if_else" | "field_check" => {
            require(node, "field", "Condition must specify field to check", report);
            match node.config_str("operator") {
                None => report.push(Diagnostic::error(
                    "E111",
                    "Condition must specify operator",
                    Some(node.id.clone()),
                )),
                Some(op) if !VALID_OPERATORS.contains(&op) => report.push(Diagnostic::error(
                    "E111",
                    format!("Invalid operator: {op}"),
                    Some(node.id.clone()),
                )),
                Some(op) => {
                    if !is_null_check(op) && !has(node, "value") {
                        report.push(Diagnostic::error(
                            "E110",
                            "Condition must specify value to compare",
                            Some(node.id.clone()),
                        ));
                    }
                }
            }
        }
        "compare_fields" => {
            require(node, "field1", "Must specify first field", report);
            require(node, "field2", "Must specify second field", report);
            require(node, "operator", "Must specify comparison operator", report);
        }
        "multi_branch" | "switch" => {
            require(node, "field", "Branch must specify field to switch on", report);
            if !has(node, "cases") {
                report.push(Diagnostic::warning(
                    "W110",
                    "Switch has no cases, only the default branch is reachable",
                    Some(node.id.clone()),
                ));
            }
        }
        "formula" => match node.config_str("formula") {
            None => report.push(Diagnostic::error(
                "E110",
                "Formula condition must specify formula",
                Some(node.id.clone()),
            )),
            Some(f) if !crate::formula::FormulaEngine::validate_formula(f) => report.push(Diagnostic::error(
                "E112",
                "Invalid formula syntax",
                Some(node.id.clone()),
            )),
            Some(_) => {}
        },
        other => unknown_subtype(node, other, report),
    }
}

fn check_data(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    match node.subtype.as_str() {
        "get_records" | "query_database" | "search_records" => {
            require(node, "entity", "Query must specify entity", report);
            if !has(node, "criteria") && !has(node, "query") {
                report.push(Diagnostic::warning(
                    "W110",
                    "Query should have criteria or query string",
                    Some(node.id.clone()),
                ));
            }
        }
        "create_record" | "create_multiple" | "clone_record" => {
            require(node, "entity", "Create operation must specify entity", report);
            require(node, "fields", "Create operation must specify fields", report);
        }
        "update_record" | "update_multiple" => {
            require(node, "entity", "Update operation must specify entity", report);
            if !has(node, "recordId") && !has(node, "criteria") {
                report.push(Diagnostic::error(
                    "E110",
                    "Update operation must specify recordId or criteria",
                    Some(node.id.clone()),
                ));
            }
            require(node, "fields", "Update operation must specify fields to update", report);
        }
        "delete_record" | "delete_multiple" => {
            require(node, "entity", "Delete operation must specify entity", report);
            if !has(node, "recordId") && !has(node, "criteria") {
                report.push(Diagnostic::error(
                    "E110",
                    "Delete operation must specify recordId or criteria",
                    Some(node.id.clone()),
                ));
            }
        }
        "set_field" | "copy_field" | "clear_field" => {
            require(node, "field", "Field operation must specify field", report);
            if node.subtype == "set_field" && !has(node, "value") {
                report.push(Diagnostic::error(
                    "E110",
                    "Set field operation must specify value",
                    Some(node.id.clone()),
                ));
            }
            if node.subtype == "copy_field" && !has(node, "sourceField") {
                report.push(Diagnostic::error(
                    "E110",
                    "Copy field operation must specify sourceField",
                    Some(node.id.clone()),
                ));
            }
        }
        "increment" | "decrement" => {
            require(node, "field", "Increment/Decrement must specify field", report);
            if let Some(amount) = node.config.get("amount") {
                if !amount.is_number() {
                    report.push(Diagnostic::error(
                        "E113",
                        "Amount must be a number",
                        Some(node.id.clone()),
                    ));
                }
            }
        }
        "assign_record" | "rotate_owner" | "assign_team" => {
            require(node, "entity", "Assignment must specify entity", report);
            require(node, "recordId", "Assignment must specify recordId", report);
            if node.subtype == "assign_record" && !has(node, "assignTo") && !has(node, "strategy") {
                report.push(Diagnostic::error(
                    "E110",
                    "Assignment must specify assignTo user or strategy",
                    Some(node.id.clone()),
                ));
            }
            if node.subtype == "assign_team" && !has(node, "team") {
                report.push(Diagnostic::error(
                    "E110",
                    "Team assignment must specify team",
                    Some(node.id.clone()),
                ));
            }
        }
        other => unknown_subtype(node, other, report),
    }
}

fn check_communication(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    match node.subtype.as_str() {
        "send_email" => {
            match node.config_str("to") {
                None => report.push(Diagnostic::error(
                    "E110",
                    "Email must specify recipient (to)",
                    Some(node.id.clone()),
                )),
                Some(to) if !is_email_or_variable(to) => report.push(Diagnostic::error(
                    "E114",
                    format!("Invalid email address: {to}"),
                    Some(node.id.clone()),
                )),
                Some(_) => {}
            }
            require(node, "subject", "Email must have subject", report);
            if !has(node, "body") && !has(node, "templateId") {
                report.push(Diagnostic::error(
                    "E110",
                    "Email must have body or templateId",
                    Some(node.id.clone()),
                ));
            }
        }
        "send_template_email" => {
            require(node, "to", "Email must specify recipient", report);
            require(node, "templateId", "Template email must specify templateId", report);
        }
        "send_bulk_email" => {
            require(node, "recipients", "Bulk email must specify recipients list", report);
            require(node, "templateId", "Bulk email must specify templateId", report);
        }
        "send_sms" | "send_whatsapp" => {
            require(node, "phoneNumber", "SMS/WhatsApp must specify phoneNumber", report);
            if !has(node, "message") && !has(node, "templateId") {
                report.push(Diagnostic::error(
                    "E110",
                    "SMS/WhatsApp must have message or templateId",
                    Some(node.id.clone()),
                ));
            }
        }
        "send_notification" | "internal_notification" | "push_notification" => {
            if !has(node, "userId") && !has(node, "userIds") {
                report.push(Diagnostic::error(
                    "E110",
                    "Notification must specify userId or userIds",
                    Some(node.id.clone()),
                ));
            }
            require(node, "title", "Notification must have title", report);
            require(node, "message", "Notification must have message", report);
        }
        "post_to_chat" | "slack_message" => {
            require(node, "channel", "Chat message must specify channel", report);
            require(node, "message", "Chat message must have message", report);
        }
        other => unknown_subtype(node, other, report),
    }
}

fn check_task(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    match node.subtype.as_str() {
        "create_task" | "create_activity" => {
            require(node, "title", "Task must have title", report);
            require(node, "assignTo", "Task must specify assignTo user", report);
            if !has(node, "dueDate") {
                report.push(Diagnostic::warning(
                    "W110",
                    "Task should have dueDate",
                    Some(node.id.clone()),
                ));
            }
        }
        "create_event" | "create_meeting" => {
            require(node, "title", "Event must have title", report);
            require(node, "startDate", "Event must have startDate", report);
            require(node, "endDate", "Event must have endDate", report);
        }
        "update_task" | "complete_task" | "assign_task" => {
            require(node, "taskId", "Task operation must specify taskId", report);
            if node.subtype == "assign_task" && !has(node, "assignTo") {
                report.push(Diagnostic::error(
                    "E110",
                    "Task assignment must specify assignTo user",
                    Some(node.id.clone()),
                ));
            }
        }
        "add_note" | "add_comment" => {
            require(node, "recordId", "Note/Comment must specify recordId", report);
            if !has(node, "note") && !has(node, "comment") {
                report.push(Diagnostic::error(
                    "E110",
                    "Must specify note or comment text",
                    Some(node.id.clone()),
                ));
            }
        }
        "attach_file" => {
            require(node, "recordId", "File attachment must specify recordId", report);
            if !has(node, "fileUrl") && !has(node, "fileId") {
                report.push(Diagnostic::error(
                    "E110",
                    "File attachment must specify fileUrl or fileId",
                    Some(node.id.clone()),
                ));
            }
        }
        other => unknown_subtype(node, other, report),
    }
}

fn check_approval(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    let uses_steps = node.subtype == "multi_step_approval";
    let approver_key = if uses_steps { "steps" } else { "approvers" };
    match node.config.get(approver_key) {
        None => report.push(Diagnostic::error(
            "E110",
            format!("Approval must specify {approver_key}"),
            Some(node.id.clone()),
        )),
        Some(Value::Array(list)) if list.is_empty() => report.push(Diagnostic::error(
            "E110",
            format!("Approval must have at least one entry in {approver_key}"),
            Some(node.id.clone()),
        )),
        Some(_) => {}
    }
    if !has(node, "message") {
        report.push(Diagnostic::warning(
            "W110",
            "Approval should have message for approvers",
            Some(node.id.clone()),
        ));
    }
    if let Some(expires_in) = node.config_i64("expiresIn") {
        if expires_in < 1 {
            report.push(Diagnostic::error(
                "E113",
                "Approval expiration must be at least 1 hour",
                Some(node.id.clone()),
            ));
        }
    }
}

fn check_delay(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    match node.subtype.as_str() {
        "wait_duration" => {
            match node.config_i64("duration") {
                None => report.push(Diagnostic::error(
                    "E110",
                    "Wait duration must specify duration",
                    Some(node.id.clone()),
                )),
                Some(d) if d < 1 => report.push(Diagnostic::error(
                    "E113",
                    "Duration must be at least 1",
                    Some(node.id.clone()),
                )),
                Some(_) => {}
            }
            require(node, "unit", "Wait duration must specify unit (MINUTES, HOURS, DAYS, WEEKS)", report);
        }
        "wait_until_date" => {
            require(node, "targetDate", "Wait until date must specify targetDate", report);
        }
        "wait_for_event" => {
            require(node, "eventType", "Wait for event must specify eventType", report);
            if !has(node, "timeout") {
                report.push(Diagnostic::warning(
                    "W110",
                    "Wait for event should have timeout to prevent indefinite waiting",
                    Some(node.id.clone()),
                ));
            }
        }
        "schedule_action" => {
            require(node, "scheduleTime", "Schedule action must specify scheduleTime", report);
        }
        other => unknown_subtype(node, other, report),
    }
}

fn check_integration(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    match node.subtype.as_str() {
        "webhook" | "api_call" => {
            match node.config_str("url") {
                None => report.push(Diagnostic::error(
                    "E110",
                    "Webhook/API call must specify url",
                    Some(node.id.clone()),
                )),
                Some(url) if !is_url_or_variable(url) => report.push(Diagnostic::error(
                    "E114",
                    format!("Invalid URL: {url}"),
                    Some(node.id.clone()),
                )),
                Some(_) => {}
            }
            match node.config_str("method") {
                None => report.push(Diagnostic::warning(
                    "W110",
                    "HTTP method not specified, will default to POST",
                    Some(node.id.clone()),
                )),
                Some(m) if !HTTP_METHODS.contains(&m.to_uppercase().as_str()) => {
                    report.push(Diagnostic::error(
                        "E114",
                        format!("Invalid HTTP method: {m}"),
                        Some(node.id.clone()),
                    ));
                }
                Some(_) => {}
            }
        }
        "custom_function" => {
            require(node, "functionName", "Custom function must specify functionName", report);
        }
        "call_subflow" => {
            require(node, "subflowId", "Sub-workflow call must specify subflowId", report);
        }
        "external_service" => {
            require(node, "serviceName", "External service must specify serviceName", report);
            require(node, "action", "External service must specify action", report);
        }
        other => unknown_subtype(node, other, report),
    }
}

fn check_list(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    require(node, "recordId", "List operation must specify recordId", report);
    if node.subtype.contains("list") && !has(node, "listId") {
        report.push(Diagnostic::error(
            "E110",
            "List operation must specify listId",
            Some(node.id.clone()),
        ));
    }
    if node.subtype.contains("tag") && !has(node, "tag") {
        report.push(Diagnostic::error(
            "E110",
            "Tag operation must specify tag",
            Some(node.id.clone()),
        ));
    }
}

fn check_error(node: &Node, report: &mut ValidationReport) {
    match node.subtype.as_str() {
        "retry_on_failure" => match node.config_i64("maxRetries") {
            None => report.push(Diagnostic::warning(
                "W110",
                "Retry should specify maxRetries",
                Some(node.id.clone()),
            )),
            Some(n) if n < 0 => report.push(Diagnostic::error(
                "E113",
                "maxRetries must not be negative",
                Some(node.id.clone()),
            )),
            Some(_) => {}
        },
        "stop_workflow" => {
            if !has(node, "reason") {
                report.push(Diagnostic::warning(
                    "W110",
                    "Stop workflow should specify reason",
                    Some(node.id.clone()),
                ));
            }
        }
        "error_handler" => {}
        other => unknown_subtype(node, other, report),
    }
}

fn check_collection(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    match node.subtype.as_str() {
        "loop" => {
            require(node, "collection", "Loop must specify collection to iterate", report);
            if !has(node, "maxIterations") {
                report.push(Diagnostic::warning(
                    "W111",
                    "Loop should have maxIterations to prevent runaway iteration",
                    Some(node.id.clone()),
                ));
            }
        }
        "filter_collection" | "sort_collection" => {
            require(node, "variable", "Collection operation must specify variable", report);
            if node.subtype == "filter_collection" {
                require(node, "field", "Filter must specify field", report);
            }
            if node.subtype == "sort_collection" && !has(node, "sortBy") && !has(node, "field") {
                report.push(Diagnostic::error(
                    "E110",
                    "Sort must specify sortBy or field",
                    Some(node.id.clone()),
                ));
            }
        }
        other => unknown_subtype(node, other, report),
    }
}

fn check_scheduled(node: &Node, report: &mut ValidationReport) {
    if !require_config(node, report) {
        return;
    }
    match node.subtype.as_str() {
        "scheduled" | "recurring" => match node.config_str("schedule") {
            None => report.push(Diagnostic::error(
                "E110",
                "Scheduled trigger must have cron expression",
                Some(node.id.clone()),
            )),
            Some(cron) if !is_cron_like(cron) => report.push(Diagnostic::error(
                "E114",
                format!("Invalid cron expression: {cron}"),
                Some(node.id.clone()),
            )),
            Some(_) => {}
        },
        "date_based" => {
            require(node, "dateField", "Date-based trigger must specify date field", report);
            if !has(node, "offset") {
                report.push(Diagnostic::warning(
                    "W110",
                    "Date-based trigger should specify offset",
                    Some(node.id.clone()),
                ));
            }
        }
        other => unknown_subtype(node, other, report),
    }
}

fn check_event(node: &Node, report: &mut ValidationReport) {
    match node.subtype.as_str() {
        "email_opened" | "email_clicked" | "email_replied" => {
            if !has(node, "emailId") && !has(node, "campaignId") {
                report.push(Diagnostic::error(
                    "E110",
                    "Email trigger must specify emailId or campaignId",
                    Some(node.id.clone()),
                ));
            }
        }
        "form_submit" => {
            require(node, "formId", "Form submission trigger must specify formId", report);
        }
        "added_to_list" | "removed_from_list" => {
            require(node, "listId", "List event must specify listId", report);
        }
        "tag_added" | "tag_removed" => {
            require(node, "tag", "Tag event must specify tag", report);
        }
        "button_click" | "manual_enrollment" | "page_viewed" | "record_assigned"
        | "owner_changed" => {}
        other => unknown_subtype(node, other, report),
    }
}

fn has(node: &Node, key: &str) -> bool {
    node.config.get(key).map(|v| !v.is_null()).unwrap_or(false)
}

fn require(node: &Node, key: &str, message: &str, report: &mut ValidationReport) {
    if !has(node, key) {
        report.push(Diagnostic::error("E110", message, Some(node.id.clone())));
    }
}

/// Nodes whose rules read individual keys need an object config; a missing
/// or non-object config is a single error instead of one per key.
fn require_config(node: &Node, report: &mut ValidationReport) -> bool {
    if node.config.is_object() {
        return true;
    }
    report.push(Diagnostic::error(
        "E109",
        format!("{} node must have configuration", node.node_type),
        Some(node.id.clone()),
    ));
    false
}

fn unknown_subtype(node: &Node, subtype: &str, report: &mut ValidationReport) {
    report.push(Diagnostic::warning(
        "W112",
        format!("Unknown {} subtype: {subtype}", node.node_type),
        Some(node.id.clone()),
    ));
}

fn is_null_check(operator: &str) -> bool {
    matches!(
        operator,
        "is_null" | "is_not_null" | "is_empty" | "is_not_empty"
    )
}

fn is_email_or_variable(value: &str) -> bool {
    if value.contains("{{") && value.contains("}}") {
        return true;
    }
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

fn is_url_or_variable(value: &str) -> bool {
    if value.contains("{{") && value.contains("}}") {
        return true;
    }
    value.starts_with("http://") || value.starts_with("https://")
}

fn is_cron_like(cron: &str) -> bool {
    let fields = cron.split_whitespace().count();
    fields == 5 || fields == 6
}
