//! Branching nodes. Every subtype resolves to a boolean (or a switch case)
//! and selects the outgoing edge by name.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::engine::NodeHandler;
use crate::error::NodeError;
use crate::formula::FormulaEngine;
use crate::model::{ExecutionContext, ExecutionResult, Node, OUTCOME_DEFAULT};
use crate::runtime::RuntimeContext;
use crate::template;

use super::support;

pub struct ConditionHandler {
    formulas: FormulaEngine,
}

impl ConditionHandler {
    pub fn new(runtime: RuntimeContext) -> Self {
        Self {
            formulas: FormulaEngine::new(runtime),
        }
    }

    fn field_check(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let field = node
            .config_str("field")
            .ok_or_else(|| NodeError::ConfigError("missing required field: field".into()))?;
        let operator = node
            .config_str("operator")
            .ok_or_else(|| NodeError::ConfigError("missing required field: operator".into()))?;
        let actual = template::resolve_path(field, &ctx.variables);
        let expected = node.config.get("value");

        let holds = support::evaluate_condition(actual, operator, expected);
        debug!(field, operator, holds, "condition evaluated");

        let mut output = BTreeMap::new();
        output.insert("conditionResult".into(), json!(holds));
        output.insert("field".into(), json!(field));
        output.insert(
            "actualValue".into(),
            actual.cloned().unwrap_or(Value::Null),
        );
        Ok(ExecutionResult::branch(bool_outcome(holds), output))
    }

    fn switch(&self, node: &Node, ctx: &ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let field = node
            .config_str("field")
            .ok_or_else(|| NodeError::ConfigError("missing required field: field".into()))?;
        let actual = template::resolve_path(field, &ctx.variables)
            .map(template::stringify)
            .unwrap_or_default();

        let outcome = match node.config.get("cases") {
            Some(Value::Array(cases)) => cases
                .iter()
                .map(template::stringify)
                .find(|case| *case == actual),
            // Object form maps case values to explicit outcome keys.
            Some(Value::Object(cases)) => cases.get(&actual).map(template::stringify),
            _ => None,
        }
        .unwrap_or_else(|| OUTCOME_DEFAULT.to_string());

        let mut output = BTreeMap::new();
        output.insert("switchValue".into(), json!(actual));
        output.insert("matchedCase".into(), json!(outcome != OUTCOME_DEFAULT));
        Ok(ExecutionResult::branch(outcome, output))
    }

    fn compare_fields(
        &self,
        node: &Node,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        let field1 = node
            .config_str("field1")
            .ok_or_else(|| NodeError::ConfigError("missing required field: field1".into()))?;
        let field2 = node
            .config_str("field2")
            .ok_or_else(|| NodeError::ConfigError("missing required field: field2".into()))?;
        let operator = node
            .config_str("operator")
            .ok_or_else(|| NodeError::ConfigError("missing required field: operator".into()))?;

        let left = template::resolve_path(field1, &ctx.variables);
        let right = template::resolve_path(field2, &ctx.variables).cloned();
        let holds = support::evaluate_condition(left, operator, right.as_ref());

        let mut output = BTreeMap::new();
        output.insert("conditionResult".into(), json!(holds));
        Ok(ExecutionResult::branch(bool_outcome(holds), output))
    }

    fn formula(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<ExecutionResult, NodeError> {
        let formula = node
            .config_str("formula")
            .ok_or_else(|| NodeError::ConfigError("missing required field: formula".into()))?;
        if !FormulaEngine::validate_formula(formula) {
            return Ok(ExecutionResult::failed(format!(
                "Invalid formula syntax: {formula}"
            )));
        }

        let result = self.formulas.evaluate(formula, &ctx.variables)?;
        let holds = support::truthy(&result);

        let result_variable = node.config_str("resultVariable").unwrap_or("formulaResult");
        ctx.set_variable(result_variable.to_string(), result.clone());

        let mut output = BTreeMap::new();
        output.insert("conditionResult".into(), json!(holds));
        output.insert("formulaResult".into(), result);
        Ok(ExecutionResult::branch(bool_outcome(holds), output))
    }
}

fn bool_outcome(holds: bool) -> &'static str {
    if holds {
        "true"
    } else {
        "false"
    }
}

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionResult, NodeError> {
        match node.subtype.as_str() {
            "if_else" | "field_check" | "multi_branch" => self.field_check(node, ctx),
            "switch" => self.switch(node, ctx),
            "compare_fields" => self.compare_fields(node, ctx),
            "formula" => self.formula(node, ctx),
            other => Err(NodeError::UnknownSubtype {
                node_type: node.node_type.to_string(),
                subtype: other.to_string(),
            }),
        }
    }
}
