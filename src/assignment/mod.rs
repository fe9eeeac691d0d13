//! Record-to-owner routing strategies.
//!
//! [`AssignmentEngine::assign`] picks an owner for a record given a strategy
//! name and a strategy config. Stateful strategies (round-robin position,
//! workload counts) keep their counters on the engine instance, keyed so
//! that concurrent executions update a single counter atomically.

use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};

pub const STRATEGY_ROUND_ROBIN: &str = "ROUND_ROBIN";
pub const STRATEGY_WORKLOAD_BASED: &str = "WORKLOAD_BASED";
pub const STRATEGY_TERRITORY: &str = "TERRITORY";
pub const STRATEGY_SKILL_BASED: &str = "SKILL_BASED";
pub const STRATEGY_LEAD_SOURCE: &str = "LEAD_SOURCE";
pub const STRATEGY_LEAD_VALUE: &str = "LEAD_VALUE";
pub const STRATEGY_AVAILABILITY: &str = "AVAILABILITY";
pub const STRATEGY_PERFORMANCE: &str = "PERFORMANCE";
pub const STRATEGY_CUSTOM_RULES: &str = "CUSTOM_RULES";

#[derive(Debug, Default)]
pub struct AssignmentEngine {
    round_robin_counters: DashMap<String, u64>,
    workload: DashMap<String, i64>,
}

impl AssignmentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a record to an owner. Returns `None` only when no candidate
    /// can be determined at all; an unknown strategy falls back to
    /// round-robin so assignment keeps making progress.
    pub fn assign(&self, record: &Value, strategy: &str, config: &Value) -> Option<String> {
        let normalized = strategy.to_uppercase();
        info!(strategy = %normalized, "assigning record");

        match normalized.as_str() {
            STRATEGY_ROUND_ROBIN => self.assign_round_robin(config),
            STRATEGY_WORKLOAD_BASED => self.assign_by_workload(config),
            STRATEGY_TERRITORY => assign_by_territory(record, config),
            STRATEGY_SKILL_BASED => assign_by_skill(record, config),
            STRATEGY_LEAD_SOURCE => assign_by_source(record, config),
            STRATEGY_LEAD_VALUE => assign_by_value(record, config),
            STRATEGY_AVAILABILITY => assign_by_availability(config),
            STRATEGY_PERFORMANCE => assign_by_performance(config),
            STRATEGY_CUSTOM_RULES => assign_by_custom_rules(record, config),
            other => {
                warn!(strategy = %other, "unknown strategy, using round-robin");
                self.assign_round_robin(config)
            }
        }
    }

    /// Per-team monotonic counter mod candidate count.
    fn assign_round_robin(&self, config: &Value) -> Option<String> {
        let candidates = string_list(config, "userIds");
        if candidates.is_empty() {
            warn!("no candidates for round-robin assignment");
            return None;
        }
        let team_key = config
            .get("teamKey")
            .and_then(Value::as_str)
            .unwrap_or("default");

        let mut counter = self
            .round_robin_counters
            .entry(team_key.to_string())
            .or_insert(0);
        let owner = candidates[(*counter as usize) % candidates.len()].clone();
        *counter += 1;
        Some(owner)
    }

    /// Candidate with the lowest tracked open-item count.
    fn assign_by_workload(&self, config: &Value) -> Option<String> {
        let candidates = string_list(config, "userIds");
        let owner = candidates
            .into_iter()
            .min_by_key(|c| self.workload_of(c))?;
        *self.workload.entry(owner.clone()).or_insert(0) += 1;
        Some(owner)
    }

    /// Decrement an owner's tracked workload, floored at zero.
    pub fn release(&self, owner: &str) {
        if let Some(mut count) = self.workload.get_mut(owner) {
            *count = (*count - 1).max(0);
        }
    }

    pub fn reset_round_robin(&self, team_key: &str) {
        self.round_robin_counters.insert(team_key.to_string(), 0);
    }

    pub fn workload_of(&self, owner: &str) -> i64 {
        self.workload.get(owner).map(|c| *c).unwrap_or(0)
    }
}

/// Specificity order: zip, city, state, country, then the default key.
fn assign_by_territory(record: &Value, config: &Value) -> Option<String> {
    let mapping = config.get("territoryMapping")?.as_object()?;

    let lookups = [
        ("zip_", record.get("zipCode")),
        ("city_", record.get("city")),
        ("state_", record.get("state")),
        ("country_", record.get("country")),
    ];
    for (prefix, field) in lookups {
        if let Some(value) = field.and_then(Value::as_str) {
            if let Some(owner) = mapping.get(&format!("{prefix}{value}")).and_then(Value::as_str) {
                return Some(owner.to_string());
            }
        }
    }
    mapping.get("default").and_then(Value::as_str).map(String::from)
}

/// Product interest beats industry; the `general` pool is the fallback.
/// Within a matched group the pick is pseudo-random to spread load.
fn assign_by_skill(record: &Value, config: &Value) -> Option<String> {
    let mapping = config.get("skillMapping")?.as_object()?;

    if let Some(product) = record.get("productInterest").and_then(Value::as_str) {
        if let Some(pool) = mapping.get(&format!("product_{product}")) {
            return pick_random(&value_list(pool));
        }
    }
    if let Some(industry) = record.get("industry").and_then(Value::as_str) {
        if let Some(pool) = mapping.get(&format!("industry_{industry}")) {
            return pick_random(&value_list(pool));
        }
    }
    mapping.get("general").and_then(|pool| pick_random(&value_list(pool)))
}

fn assign_by_source(record: &Value, config: &Value) -> Option<String> {
    let mapping = config.get("sourceMapping")?.as_object()?;
    let source = record.get("source").and_then(Value::as_str)?;

    if let Some(owner) = mapping.get(source).and_then(Value::as_str) {
        return Some(owner.to_string());
    }
    if is_web_source(source) {
        if let Some(owner) = mapping.get("web_team").and_then(Value::as_str) {
            return Some(owner.to_string());
        }
    }
    if is_social_source(source) {
        if let Some(owner) = mapping.get("social_team").and_then(Value::as_str) {
            return Some(owner.to_string());
        }
    }
    mapping.get("default").and_then(Value::as_str).map(String::from)
}

/// Estimated value at or above the threshold routes to the senior pool.
fn assign_by_value(record: &Value, config: &Value) -> Option<String> {
    let value = record_value(record);
    let threshold = config
        .get("highValueThreshold")
        .and_then(Value::as_f64)
        .unwrap_or(10_000.0);

    let senior = string_list(config, "seniorReps");
    let junior = string_list(config, "juniorReps");

    if value >= threshold && !senior.is_empty() {
        info!(value, "high-value record routed to senior pool");
        return pick_random(&senior);
    }
    pick_random(&junior)
}

fn assign_by_availability(config: &Value) -> Option<String> {
    let online = string_list(config, "onlineUsers");
    if !online.is_empty() {
        return pick_random(&online);
    }
    pick_random(&string_list(config, "userIds"))
}

/// Roulette-wheel draw: one random value scaled to the total weight,
/// compared against the cumulative sum.
fn assign_by_performance(config: &Value) -> Option<String> {
    let scores = config.get("userPerformance")?.as_object()?;
    if scores.is_empty() {
        return None;
    }

    let total: f64 = scores.values().filter_map(Value::as_f64).sum();
    let draw = rand::thread_rng().gen::<f64>() * total;

    let mut cumulative = 0.0;
    for (owner, score) in scores {
        cumulative += score.as_f64().unwrap_or(0.0);
        if draw <= cumulative {
            return Some(owner.clone());
        }
    }
    scores.keys().next().cloned()
}

/// Ordered rules, each an AND over record-field conditions. First full
/// match wins; otherwise the configured default.
fn assign_by_custom_rules(record: &Value, config: &Value) -> Option<String> {
    let rules = config.get("rules").and_then(Value::as_array)?;

    for rule in rules {
        if rule_matches(record, rule) {
            if let Some(owner) = rule.get("assignTo").and_then(Value::as_str) {
                info!(owner, "custom rule matched");
                return Some(owner.to_string());
            }
        }
    }
    config.get("defaultUser").and_then(Value::as_str).map(String::from)
}

fn rule_matches(record: &Value, rule: &Value) -> bool {
    let Some(conditions) = rule.get("conditions").and_then(Value::as_array) else {
        return false;
    };
    conditions.iter().all(|condition| {
        let field = condition.get("field").and_then(Value::as_str).unwrap_or("");
        let operator = condition.get("operator").and_then(Value::as_str).unwrap_or("");
        let expected = condition.get("value").unwrap_or(&Value::Null);
        condition_holds(record.get(field), operator, expected)
    })
}

fn condition_holds(actual: Option<&Value>, operator: &str, expected: &Value) -> bool {
    let Some(actual) = actual.filter(|v| !v.is_null()) else {
        return operator == "is_null";
    };
    match operator {
        "equals" => actual == expected,
        "not_equals" => actual != expected,
        "contains" => stringify(actual).contains(&stringify(expected)),
        "greater_than" => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => a > e,
            _ => false,
        },
        "less_than" => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => a < e,
            _ => false,
        },
        _ => false,
    }
}

/// Explicit `estimatedValue`, else a head-count estimate.
fn record_value(record: &Value) -> f64 {
    if let Some(value) = record.get("estimatedValue").and_then(Value::as_f64) {
        return value;
    }
    record
        .get("companySize")
        .and_then(Value::as_f64)
        .map(|size| size * 100.0)
        .unwrap_or(0.0)
}

fn is_web_source(source: &str) -> bool {
    ["website", "web form", "landing page", "organic search"]
        .contains(&source.to_lowercase().as_str())
}

fn is_social_source(source: &str) -> bool {
    source.contains("Facebook")
        || source.contains("LinkedIn")
        || source.contains("Twitter")
        || source.contains("Instagram")
        || source.eq_ignore_ascii_case("Social Media")
}

fn string_list(config: &Value, key: &str) -> Vec<String> {
    config.get(key).map(value_list).unwrap_or_default()
}

fn value_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn pick_random(candidates: &[String]) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    let index = rand::thread_rng().gen_range(0..candidates.len());
    Some(candidates[index].clone())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_round_robin_visits_each_candidate_once() {
        let engine = AssignmentEngine::new();
        let config = json!({"userIds": ["u1", "u2", "u3"], "teamKey": "sales"});

        let picks: Vec<_> = (0..3)
            .map(|_| engine.assign(&json!({}), "ROUND_ROBIN", &config).unwrap())
            .collect();
        assert_eq!(picks, vec!["u1", "u2", "u3"]);

        // Counter wraps.
        assert_eq!(
            engine.assign(&json!({}), "ROUND_ROBIN", &config).unwrap(),
            "u1"
        );
    }

    #[test]
    fn test_round_robin_counters_are_per_team() {
        let engine = AssignmentEngine::new();
        let sales = json!({"userIds": ["u1", "u2"], "teamKey": "sales"});
        let support = json!({"userIds": ["u1", "u2"], "teamKey": "support"});

        engine.assign(&json!({}), "ROUND_ROBIN", &sales);
        assert_eq!(
            engine.assign(&json!({}), "ROUND_ROBIN", &support).unwrap(),
            "u1"
        );
    }

    #[test]
    fn test_reset_round_robin() {
        let engine = AssignmentEngine::new();
        let config = json!({"userIds": ["u1", "u2"], "teamKey": "sales"});
        engine.assign(&json!({}), "ROUND_ROBIN", &config);
        engine.reset_round_robin("sales");
        assert_eq!(
            engine.assign(&json!({}), "ROUND_ROBIN", &config).unwrap(),
            "u1"
        );
    }

    #[test]
    fn test_round_robin_with_no_candidates() {
        let engine = AssignmentEngine::new();
        assert_eq!(engine.assign(&json!({}), "ROUND_ROBIN", &json!({})), None);
    }

    #[test]
    fn test_unknown_strategy_falls_back_to_round_robin() {
        let engine = AssignmentEngine::new();
        let config = json!({"userIds": ["u1"]});
        assert_eq!(
            engine.assign(&json!({}), "MOON_PHASE", &config).unwrap(),
            "u1"
        );
    }

    #[test]
    fn test_workload_picks_least_loaded() {
        let engine = AssignmentEngine::new();
        let config = json!({"userIds": ["u1", "u2"]});

        // First two assignments balance across both candidates.
        let a = engine.assign(&json!({}), "WORKLOAD_BASED", &config).unwrap();
        let b = engine.assign(&json!({}), "WORKLOAD_BASED", &config).unwrap();
        assert_ne!(a, b);
        assert_eq!(engine.workload_of(&a), 1);
        assert_eq!(engine.workload_of(&b), 1);
    }

    #[test]
    fn test_release_floors_at_zero() {
        let engine = AssignmentEngine::new();
        let config = json!({"userIds": ["u1"]});
        engine.assign(&json!({}), "WORKLOAD_BASED", &config);
        engine.release("u1");
        engine.release("u1");
        assert_eq!(engine.workload_of("u1"), 0);
    }

    #[test]
    fn test_territory_specificity_order() {
        let engine = AssignmentEngine::new();
        let config = json!({"territoryMapping": {
            "zip_94107": "zip-owner",
            "city_SF": "city-owner",
            "country_US": "country-owner",
            "default": "fallback",
        }});

        let lead = json!({"zipCode": "94107", "city": "SF", "country": "US"});
        assert_eq!(
            engine.assign(&lead, "TERRITORY", &config).unwrap(),
            "zip-owner"
        );

        let lead = json!({"city": "SF", "country": "US"});
        assert_eq!(
            engine.assign(&lead, "TERRITORY", &config).unwrap(),
            "city-owner"
        );

        let lead = json!({"city": "Austin"});
        assert_eq!(engine.assign(&lead, "TERRITORY", &config).unwrap(), "fallback");
    }

    #[test]
    fn test_skill_product_beats_industry() {
        let engine = AssignmentEngine::new();
        let config = json!({"skillMapping": {
            "product_crm": ["crm-rep"],
            "industry_fintech": ["fintech-rep"],
            "general": ["anyone"],
        }});

        let lead = json!({"productInterest": "crm", "industry": "fintech"});
        assert_eq!(engine.assign(&lead, "SKILL_BASED", &config).unwrap(), "crm-rep");

        let lead = json!({"industry": "fintech"});
        assert_eq!(
            engine.assign(&lead, "SKILL_BASED", &config).unwrap(),
            "fintech-rep"
        );

        let lead = json!({});
        assert_eq!(engine.assign(&lead, "SKILL_BASED", &config).unwrap(), "anyone");
    }

    #[test]
    fn test_source_category_buckets() {
        let engine = AssignmentEngine::new();
        let config = json!({"sourceMapping": {
            "Referral": "ref-owner",
            "web_team": "webby",
            "social_team": "socially",
            "default": "fallback",
        }});

        let direct = json!({"source": "Referral"});
        assert_eq!(engine.assign(&direct, "LEAD_SOURCE", &config).unwrap(), "ref-owner");

        let web = json!({"source": "Landing Page"});
        assert_eq!(engine.assign(&web, "LEAD_SOURCE", &config).unwrap(), "webby");

        let social = json!({"source": "LinkedIn Ads"});
        assert_eq!(engine.assign(&social, "LEAD_SOURCE", &config).unwrap(), "socially");

        let other = json!({"source": "Trade Show"});
        assert_eq!(engine.assign(&other, "LEAD_SOURCE", &config).unwrap(), "fallback");
    }

    #[test]
    fn test_lead_value_threshold_routing() {
        let engine = AssignmentEngine::new();
        let config = json!({
            "seniorReps": ["senior"],
            "juniorReps": ["junior"],
            "highValueThreshold": 10000.0,
        });

        let big = json!({"estimatedValue": 50000.0});
        assert_eq!(engine.assign(&big, "LEAD_VALUE", &config).unwrap(), "senior");

        let small = json!({"estimatedValue": 500.0});
        assert_eq!(engine.assign(&small, "LEAD_VALUE", &config).unwrap(), "junior");

        // 200 employees x 100.0 = 20000 clears the threshold.
        let sized = json!({"companySize": 200});
        assert_eq!(engine.assign(&sized, "LEAD_VALUE", &config).unwrap(), "senior");
    }

    #[test]
    fn test_availability_prefers_online_pool() {
        let engine = AssignmentEngine::new();
        let config = json!({"userIds": ["u1", "u2"], "onlineUsers": ["u2"]});
        assert_eq!(engine.assign(&json!({}), "AVAILABILITY", &config).unwrap(), "u2");

        let config = json!({"userIds": ["u1"], "onlineUsers": []});
        assert_eq!(engine.assign(&json!({}), "AVAILABILITY", &config).unwrap(), "u1");
    }

    #[test]
    fn test_performance_single_weighted_candidate() {
        let engine = AssignmentEngine::new();
        let config = json!({"userPerformance": {"star": 5.0}});
        assert_eq!(engine.assign(&json!({}), "PERFORMANCE", &config).unwrap(), "star");
    }

    #[test]
    fn test_performance_empty_scores() {
        let engine = AssignmentEngine::new();
        let config = json!({"userPerformance": {}});
        assert_eq!(engine.assign(&json!({}), "PERFORMANCE", &config), None);
    }

    #[test]
    fn test_custom_rules_first_match_wins() {
        let engine = AssignmentEngine::new();
        let config = json!({
            "rules": [
                {
                    "conditions": [
                        {"field": "industry", "operator": "equals", "value": "fintech"},
                        {"field": "companySize", "operator": "greater_than", "value": 100},
                    ],
                    "assignTo": "fintech-senior",
                },
                {
                    "conditions": [{"field": "industry", "operator": "equals", "value": "fintech"}],
                    "assignTo": "fintech-any",
                },
            ],
            "defaultUser": "fallback",
        });

        let big = json!({"industry": "fintech", "companySize": 500});
        assert_eq!(engine.assign(&big, "CUSTOM_RULES", &config).unwrap(), "fintech-senior");

        // Second condition fails, second rule catches it.
        let small = json!({"industry": "fintech", "companySize": 5});
        assert_eq!(engine.assign(&small, "CUSTOM_RULES", &config).unwrap(), "fintech-any");

        let other = json!({"industry": "retail"});
        assert_eq!(engine.assign(&other, "CUSTOM_RULES", &config).unwrap(), "fallback");
    }

    #[test]
    fn test_custom_rule_is_null_operator() {
        let engine = AssignmentEngine::new();
        let config = json!({
            "rules": [{
                "conditions": [{"field": "owner", "operator": "is_null"}],
                "assignTo": "catcher",
            }],
        });
        assert_eq!(
            engine.assign(&json!({}), "CUSTOM_RULES", &config).unwrap(),
            "catcher"
        );
        assert_eq!(
            engine.assign(&json!({"owner": "u1"}), "CUSTOM_RULES", &config),
            None
        );
    }
}
