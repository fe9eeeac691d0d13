//! Static workflow validation.
//!
//! [`validate`] never fails: every problem it finds becomes a
//! [`Diagnostic`] in the returned report. Errors block activation,
//! warnings are advisory.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::Workflow;

mod node_rules;
mod types;

pub use types::{Diagnostic, DiagnosticLevel, ValidationReport};

pub fn validate(workflow: &Workflow) -> ValidationReport {
    let mut report = ValidationReport::default();

    if workflow.graph.nodes.is_empty() {
        report.push(Diagnostic::error(
            "E100",
            "Workflow must have at least one node",
            None,
        ));
        return report;
    }

    let mut seen_ids = HashSet::new();
    for node in &workflow.graph.nodes {
        if node.id.is_empty() {
            report.push(Diagnostic::error("E105", "Node must have an id", None));
            continue;
        }
        if !seen_ids.insert(node.id.as_str()) {
            report.push(Diagnostic::error(
                "E106",
                format!("Duplicate node id: {}", node.id),
                Some(node.id.clone()),
            ));
        }
        node_rules::check_node(node, &mut report);
    }

    validate_structure(workflow, &mut report);
    report
}

fn validate_structure(workflow: &Workflow, report: &mut ValidationReport) {
    let node_ids: HashSet<&str> = workflow.graph.nodes.iter().map(|n| n.id.as_str()).collect();

    let mut out_edges: HashMap<String, Vec<String>> = HashMap::new();
    for node in &workflow.graph.nodes {
        out_edges.entry(node.id.clone()).or_default();
        for target in node.connections.values() {
            if !node_ids.contains(target.as_str()) {
                report.push(Diagnostic::error(
                    "E102",
                    format!("Connection points to non-existent node: {target}"),
                    Some(node.id.clone()),
                ));
            } else {
                out_edges
                    .entry(node.id.clone())
                    .or_default()
                    .push(target.clone());
            }
        }
    }

    let entry_points = workflow.graph.entry_points();
    if entry_points.is_empty() {
        report.push(Diagnostic::error(
            "E103",
            "Workflow must have at least one trigger node",
            None,
        ));
    } else {
        let mut reachable = HashSet::new();
        for entry in &entry_points {
            bfs_reachable(&entry.id, &out_edges, &mut reachable);
        }
        for node in &workflow.graph.nodes {
            if !node.node_type.is_entry_point() && !reachable.contains(node.id.as_str()) {
                report.push(Diagnostic::warning(
                    "W101",
                    format!("Unreachable node: {}", node.id),
                    Some(node.id.clone()),
                ));
            }
        }
    }

    detect_cycles(&out_edges, report);
}

fn bfs_reachable(
    start: &str,
    out_edges: &HashMap<String, Vec<String>>,
    reachable: &mut HashSet<String>,
) {
    if !reachable.insert(start.to_string()) {
        return;
    }
    let mut queue = VecDeque::new();
    queue.push_back(start.to_string());

    while let Some(node) = queue.pop_front() {
        if let Some(nexts) = out_edges.get(&node) {
            for n in nexts {
                if reachable.insert(n.clone()) {
                    queue.push_back(n.clone());
                }
            }
        }
    }
}

fn detect_cycles(out_edges: &HashMap<String, Vec<String>>, report: &mut ValidationReport) {
    let mut state: HashMap<String, u8> = HashMap::new();
    let mut stack: Vec<String> = Vec::new();

    let mut roots: Vec<&String> = out_edges.keys().collect();
    roots.sort();

    for node in roots {
        if state.get(node.as_str()).copied().unwrap_or(0) == 0 {
            dfs(node, out_edges, &mut state, &mut stack, report);
        }
    }
}

// Tri-state DFS: 0 = unvisited, 1 = on the recursion stack, 2 = done.
// A back edge to a state-1 node closes a cycle; the stack slice from that
// node gives the cycle path for the message.
fn dfs(
    node: &str,
    out_edges: &HashMap<String, Vec<String>>,
    state: &mut HashMap<String, u8>,
    stack: &mut Vec<String>,
    report: &mut ValidationReport,
) {
    state.insert(node.to_string(), 1);
    stack.push(node.to_string());

    if let Some(nexts) = out_edges.get(node) {
        for next in nexts {
            match state.get(next.as_str()).copied().unwrap_or(0) {
                0 => dfs(next, out_edges, state, stack, report),
                1 => {
                    if let Some(pos) = stack.iter().position(|n| n == next) {
                        let mut path = stack[pos..].to_vec();
                        path.push(next.clone());
                        report.push(Diagnostic::error(
                            "E101",
                            format!("Cycle detected: {}", path.join(" -> ")),
                            Some(next.clone()),
                        ));
                    }
                }
                _ => {}
            }
        }
    }

    stack.pop();
    state.insert(node.to_string(), 2);
}
