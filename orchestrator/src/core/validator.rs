//! Repair and validation of untrusted model output.
//!
//! Every entry point is total: malformed or semantically invalid input yields a
//! fallback record instead of an error, so the engine always has a transition
//! to apply. Raw output is first parsed into loosely-typed `Raw*` shapes whose
//! fields are all optional JSON values, then sanitized field by field.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::types::{
    CriticRecord, ExecStatus, ExecutorRecord, MAX_ACCEPTANCE_CRITERIA, MissingDependency,
    PlannedTask, PlannerRecord, Verdict,
};
use crate::graph::{Risk, SideEffect};

/// Id of the single task substituted when a plan has no usable tasks.
pub const FALLBACK_TASK_ID: &str = "task-main";

/// Every task id starts with this prefix.
pub const TASK_ID_PREFIX: &str = "task-";

/// Values the executor uses to say "nothing is missing".
const NO_DEPENDENCY_SENTINELS: [&str; 9] =
    ["", "none", "n/a", "na", "null", "nil", "no", "false", "-"];

#[derive(Debug, Default, Deserialize)]
struct RawPlan {
    #[serde(default)]
    summary: Option<Value>,
    #[serde(default)]
    tasks: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTask {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<Value>,
    #[serde(default)]
    depends_on: Option<Value>,
    #[serde(default)]
    acceptance_criteria: Option<Value>,
    #[serde(default)]
    risk: Option<Value>,
    #[serde(default)]
    side_effect: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawExecution {
    #[serde(default)]
    task_id: Option<Value>,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    summary: Option<Value>,
    #[serde(default)]
    missing_dependency: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMissingDependency {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    install_command: Option<Value>,
    #[serde(default)]
    requires_root: Option<Value>,
    #[serde(default)]
    evidence: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCritique {
    #[serde(default)]
    task_id: Option<Value>,
    #[serde(default)]
    verdict: Option<Value>,
    #[serde(default)]
    issues: Option<Value>,
    #[serde(default)]
    reason: Option<Value>,
}

/// Parse `raw` as JSON, falling back to the outermost `{...}` span.
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}

/// Lower-case slug with `TASK_ID_PREFIX`, or `None` if nothing alphanumeric remains.
pub fn slugify_task_id(raw: &str) -> Option<String> {
    static NON_ALNUM: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug regex should be valid"));

    let lowered = raw.trim().to_lowercase();
    let slug = NON_ALNUM.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        return None;
    }
    if slug.starts_with(TASK_ID_PREFIX) {
        return Some(slug.to_string());
    }
    Some(format!("{TASK_ID_PREFIX}{slug}"))
}

/// Validate planner output into at most `max_tasks` tasks.
///
/// `known_ids` are ids already present in the graph (kept nodes during a
/// replan); new tasks may depend on them but never reuse them.
pub fn validate_planner_output(
    raw: &str,
    goal: &str,
    max_tasks: usize,
    known_ids: &[String],
) -> PlannerRecord {
    let Some(value) = extract_json(raw) else {
        return fallback_plan(goal);
    };

    // A bare array is accepted as the task list.
    let plan = match value {
        Value::Array(items) => RawPlan {
            summary: None,
            tasks: Some(Value::Array(items)),
        },
        Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
        _ => return fallback_plan(goal),
    };

    let raw_tasks: Vec<RawTask> = match plan.tasks {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    };

    let known: HashSet<&str> = known_ids.iter().map(String::as_str).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut tasks: Vec<PlannedTask> = Vec::new();
    let mut raw_deps: Vec<Vec<String>> = Vec::new();

    for (position, task) in raw_tasks.iter().enumerate() {
        let Some(title) = task.title.as_ref().and_then(text) else {
            continue;
        };
        let id = task
            .id
            .as_ref()
            .and_then(text)
            .and_then(|id| slugify_task_id(&id))
            .or_else(|| slugify_task_id(&title))
            .unwrap_or_else(|| format!("{TASK_ID_PREFIX}{}", position + 1));
        if known.contains(id.as_str()) || !seen.insert(id.clone()) {
            continue;
        }
        tasks.push(PlannedTask {
            id,
            title,
            depends_on: Vec::new(),
            acceptance_criteria: acceptance_list(task.acceptance_criteria.as_ref()),
            risk: task
                .risk
                .as_ref()
                .and_then(text)
                .and_then(|r| Risk::parse(&r))
                .unwrap_or_default(),
            side_effect: task
                .side_effect
                .as_ref()
                .and_then(text)
                .and_then(|s| SideEffect::parse(&s))
                .unwrap_or_default(),
        });
        raw_deps.push(string_list(task.depends_on.as_ref()));
        if tasks.len() == max_tasks {
            break;
        }
    }

    if tasks.is_empty() {
        return fallback_plan(goal);
    }

    let retained: HashSet<String> = tasks.iter().map(|task| task.id.clone()).collect();
    for (task, deps) in tasks.iter_mut().zip(raw_deps) {
        let mut resolved: Vec<String> = Vec::new();
        for dep in deps {
            let Some(dep) = slugify_task_id(&dep) else {
                continue;
            };
            let resolves = retained.contains(&dep) || known.contains(dep.as_str());
            if resolves && dep != task.id && !resolved.contains(&dep) {
                resolved.push(dep);
            }
        }
        task.depends_on = resolved;
    }
    break_cycles(&mut tasks);

    PlannerRecord {
        summary: plan.summary.as_ref().and_then(text).unwrap_or_default(),
        tasks,
        fallback: false,
    }
}

/// Validate executor output for `task_id`.
pub fn validate_executor_output(raw: &str, task_id: &str) -> ExecutorRecord {
    let Some(Value::Object(map)) = extract_json(raw) else {
        return fallback_execution(task_id, "executor output was not valid JSON");
    };
    let Ok(exec) = serde_json::from_value::<RawExecution>(Value::Object(map)) else {
        return fallback_execution(task_id, "executor output had an unexpected shape");
    };
    if let Some(reported) = exec.task_id.as_ref().and_then(text)
        && slugify_task_id(&reported).as_deref() != Some(task_id)
    {
        return fallback_execution(
            task_id,
            &format!("executor reported task '{reported}' instead of '{task_id}'"),
        );
    }

    let status = match exec.status.as_ref().and_then(text) {
        Some(status) if status.eq_ignore_ascii_case("done") => ExecStatus::Done,
        _ => ExecStatus::Failed,
    };

    ExecutorRecord {
        status,
        summary: exec.summary.as_ref().and_then(text).unwrap_or_default(),
        missing_dependency: exec.missing_dependency.and_then(missing_dependency),
    }
}

/// Validate critic output for `task_id`.
pub fn validate_critic_output(raw: &str, task_id: &str) -> CriticRecord {
    let Some(Value::Object(map)) = extract_json(raw) else {
        return fallback_critique("critic output was not valid JSON");
    };
    let Ok(critique) = serde_json::from_value::<RawCritique>(Value::Object(map)) else {
        return fallback_critique("critic output had an unexpected shape");
    };
    if let Some(reported) = critique.task_id.as_ref().and_then(text)
        && slugify_task_id(&reported).as_deref() != Some(task_id)
    {
        return fallback_critique(&format!(
            "critic reviewed task '{reported}' instead of '{task_id}'"
        ));
    }
    let Some(verdict) = critique.verdict.as_ref().and_then(text) else {
        return fallback_critique("critic output had no verdict");
    };

    CriticRecord {
        verdict: Verdict::parse(&verdict),
        issues: string_list(critique.issues.as_ref()),
        reason: critique.reason.as_ref().and_then(text),
    }
}

fn fallback_plan(goal: &str) -> PlannerRecord {
    let title = goal.trim();
    PlannerRecord {
        summary: String::new(),
        tasks: vec![PlannedTask {
            id: FALLBACK_TASK_ID.to_string(),
            title: if title.is_empty() {
                "Complete the request".to_string()
            } else {
                title.to_string()
            },
            depends_on: Vec::new(),
            acceptance_criteria: Vec::new(),
            risk: Risk::default(),
            side_effect: SideEffect::default(),
        }],
        fallback: true,
    }
}

fn fallback_execution(task_id: &str, why: &str) -> ExecutorRecord {
    ExecutorRecord {
        status: ExecStatus::Failed,
        summary: format!("{task_id}: {why}"),
        missing_dependency: None,
    }
}

fn fallback_critique(why: &str) -> CriticRecord {
    CriticRecord {
        verdict: Verdict::Retry,
        issues: vec![why.to_string()],
        reason: None,
    }
}

fn missing_dependency(value: Value) -> Option<MissingDependency> {
    let raw: RawMissingDependency = serde_json::from_value(value).ok()?;
    let name = raw.name.as_ref().and_then(text)?;
    if is_no_dependency(&name) {
        return None;
    }
    let install_command = raw
        .install_command
        .as_ref()
        .and_then(text)
        .filter(|cmd| !is_no_dependency(cmd));
    let requires_root = match raw.requires_root {
        Some(Value::Bool(flag)) => flag,
        Some(Value::String(flag)) => matches!(flag.trim().to_lowercase().as_str(), "true" | "yes"),
        _ => false,
    };
    Some(MissingDependency {
        name,
        install_command,
        requires_root,
        evidence: raw.evidence.as_ref().and_then(text),
    })
}

fn is_no_dependency(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    NO_DEPENDENCY_SENTINELS.contains(&lowered.as_str())
}

/// Trimmed, non-empty text from a string or number value.
fn text(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!raw.is_empty()).then_some(raw)
}

/// A list of strings from an array, or a single string as a one-item list.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(text).collect(),
        Some(other) => text(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn acceptance_list(value: Option<&Value>) -> Vec<String> {
    let mut items = string_list(value);
    items.truncate(MAX_ACCEPTANCE_CRITERIA);
    items
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Finished,
}

/// Drop every dependency edge that closes a cycle, visiting in declaration order.
fn break_cycles(tasks: &mut [PlannedTask]) {
    let index: HashMap<String, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| (task.id.clone(), i))
        .collect();
    let mut state = vec![Visit::New; tasks.len()];
    for i in 0..tasks.len() {
        if state[i] == Visit::New {
            visit(i, tasks, &index, &mut state);
        }
    }
}

fn visit(i: usize, tasks: &mut [PlannedTask], index: &HashMap<String, usize>, state: &mut [Visit]) {
    state[i] = Visit::Active;
    let deps = std::mem::take(&mut tasks[i].depends_on);
    let mut kept = Vec::with_capacity(deps.len());
    for dep in deps {
        // Ids outside this plan belong to kept nodes and cannot close a cycle.
        let Some(&j) = index.get(&dep) else {
            kept.push(dep);
            continue;
        };
        match state[j] {
            Visit::Active => {}
            Visit::New => {
                visit(j, tasks, index, state);
                kept.push(dep);
            }
            Visit::Finished => kept.push(dep),
        }
    }
    tasks[i].depends_on = kept;
    state[i] = Visit::Finished;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(record: &PlannerRecord) -> Vec<&str> {
        record.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn slugify_lowercases_and_prefixes() {
        assert_eq!(
            slugify_task_id("Fetch Data!").as_deref(),
            Some("task-fetch-data")
        );
        assert_eq!(
            slugify_task_id("task-already").as_deref(),
            Some("task-already")
        );
        assert_eq!(slugify_task_id("  --  "), None);
    }

    #[test]
    fn extract_json_recovers_object_from_prose() {
        let value = extract_json("Sure! Here it is:\n```json\n{\"verdict\": \"pass\"}\n```")
            .expect("json");
        assert_eq!(value["verdict"], "pass");
        assert!(extract_json("no braces here").is_none());
    }

    #[test]
    fn duplicate_ids_after_slugging_keep_first() {
        let raw = r#"{"tasks": [
            {"id": "Fetch Data", "title": "first"},
            {"id": "fetch-data", "title": "second"},
            {"id": "task-fetch-data", "title": "third"}
        ]}"#;
        let record = validate_planner_output(raw, "goal", 6, &[]);
        assert_eq!(ids(&record), vec!["task-fetch-data"]);
        assert_eq!(record.tasks[0].title, "first");
    }

    #[test]
    fn untitled_tasks_are_dropped() {
        let raw = r#"{"tasks": [{"id": "a"}, {"id": "b", "title": "  "}, {"id": "c", "title": "C"}]}"#;
        let record = validate_planner_output(raw, "goal", 6, &[]);
        assert_eq!(ids(&record), vec!["task-c"]);
    }

    #[test]
    fn unresolved_and_self_dependencies_are_dropped() {
        let raw = r#"{"tasks": [
            {"id": "a", "title": "A", "depends_on": ["a", "ghost"]},
            {"id": "b", "title": "B", "depends_on": ["A", "a", "missing"]}
        ]}"#;
        let record = validate_planner_output(raw, "goal", 6, &[]);
        assert!(record.tasks[0].depends_on.is_empty());
        assert_eq!(record.tasks[1].depends_on, vec!["task-a"]);
    }

    #[test]
    fn dependencies_on_truncated_tasks_are_dropped() {
        let raw = r#"{"tasks": [
            {"id": "a", "title": "A", "depends_on": ["c"]},
            {"id": "b", "title": "B", "depends_on": ["a"]},
            {"id": "c", "title": "C"}
        ]}"#;
        let record = validate_planner_output(raw, "goal", 2, &[]);
        assert_eq!(ids(&record), vec!["task-a", "task-b"]);
        assert!(record.tasks[0].depends_on.is_empty());
    }

    #[test]
    fn cycles_are_broken_in_declaration_order() {
        let raw = r#"{"tasks": [
            {"id": "a", "title": "A", "depends_on": ["c"]},
            {"id": "b", "title": "B", "depends_on": ["a"]},
            {"id": "c", "title": "C", "depends_on": ["b"]}
        ]}"#;
        let record = validate_planner_output(raw, "goal", 6, &[]);
        // a -> c -> b -> a: the edge b -> a closes the cycle.
        assert_eq!(record.tasks[0].depends_on, vec!["task-c"]);
        assert!(record.tasks[1].depends_on.is_empty());
        assert_eq!(record.tasks[2].depends_on, vec!["task-b"]);
    }

    #[test]
    fn known_ids_resolve_but_are_not_reused() {
        let known = vec!["task-setup".to_string()];
        let raw = r#"{"tasks": [
            {"id": "setup", "title": "again"},
            {"id": "next", "title": "Next", "depends_on": ["setup"]}
        ]}"#;
        let record = validate_planner_output(raw, "goal", 6, &known);
        assert_eq!(ids(&record), vec!["task-next"]);
        assert_eq!(record.tasks[0].depends_on, vec!["task-setup"]);
    }

    #[test]
    fn garbage_plan_falls_back_to_goal_task() {
        for raw in ["", "not json at all", "{\"tasks\": []}", "[1, 2]", "42"] {
            let record = validate_planner_output(raw, "Ship the report", 6, &[]);
            assert!(record.fallback, "expected fallback for {raw:?}");
            assert_eq!(ids(&record), vec![FALLBACK_TASK_ID]);
            assert_eq!(record.tasks[0].title, "Ship the report");
        }
    }

    #[test]
    fn acceptance_criteria_are_capped() {
        let raw = r#"{"tasks": [{"title": "T", "acceptance_criteria": ["1","2","3","4","5","6","7","8"]}]}"#;
        let record = validate_planner_output(raw, "goal", 6, &[]);
        assert_eq!(record.tasks[0].acceptance_criteria.len(), MAX_ACCEPTANCE_CRITERIA);
        assert_eq!(record.tasks[0].id, "task-t");
    }

    #[test]
    fn unknown_risk_and_side_effect_use_defaults() {
        let raw = r#"{"tasks": [
            {"title": "T", "risk": "extreme", "side_effect": "external_mutation"},
            {"title": "U", "risk": "high", "side_effect": "delete_everything"}]}"#;
        let record = validate_planner_output(raw, "goal", 6, &[]);
        assert_eq!(record.tasks[0].risk, Risk::Medium);
        assert_eq!(record.tasks[0].side_effect, SideEffect::ExternalMutation);
        assert_eq!(record.tasks[1].risk, Risk::High);
        assert_eq!(record.tasks[1].side_effect, SideEffect::Read);
    }

    #[test]
    fn executor_sentinel_dependency_names_are_ignored() {
        for name in ["none", " N/A ", "null", ""] {
            let raw = format!(
                r#"{{"status": "done", "summary": "ok", "missing_dependency": {{"name": "{name}"}}}}"#
            );
            let record = validate_executor_output(&raw, "task-a");
            assert_eq!(record.status, ExecStatus::Done);
            assert!(record.missing_dependency.is_none(), "name {name:?}");
        }
    }

    #[test]
    fn executor_missing_dependency_is_parsed() {
        let raw = r#"{"status": "failed", "summary": "no ffmpeg",
            "missing_dependency": {"name": "ffmpeg", "install_command": "sudo apt install ffmpeg",
            "requires_root": true, "evidence": "ffmpeg: command not found"}}"#;
        let record = validate_executor_output(raw, "task-a");
        let dep = record.missing_dependency.expect("dependency");
        assert_eq!(dep.name, "ffmpeg");
        assert_eq!(dep.install_command.as_deref(), Some("sudo apt install ffmpeg"));
        assert!(dep.requires_root);
        assert_eq!(dep.evidence.as_deref(), Some("ffmpeg: command not found"));
    }

    #[test]
    fn executor_garbage_or_wrong_task_fails() {
        let record = validate_executor_output("oops", "task-a");
        assert_eq!(record.status, ExecStatus::Failed);
        assert!(record.summary.contains("task-a"));

        let record = validate_executor_output(r#"{"task_id": "task-b", "status": "done"}"#, "task-a");
        assert_eq!(record.status, ExecStatus::Failed);
        assert!(record.summary.contains("task-b"));
    }

    #[test]
    fn critic_defaults_to_retry_on_garbage() {
        let record = validate_critic_output("", "task-a");
        assert_eq!(record.verdict, Verdict::Retry);
        let record = validate_critic_output(r#"{"issues": ["x"]}"#, "task-a");
        assert_eq!(record.verdict, Verdict::Retry);
    }

    #[test]
    fn critic_keeps_issues_and_unknown_verdicts() {
        let record = validate_critic_output(
            r#"{"verdict": "Pass", "issues": "minor nit", "reason": "fine"}"#,
            "task-a",
        );
        assert_eq!(record.verdict, Verdict::Pass);
        assert_eq!(record.issues, vec!["minor nit"]);
        assert_eq!(record.reason.as_deref(), Some("fine"));

        let record = validate_critic_output(r#"{"verdict": "shrug"}"#, "task-a");
        assert_eq!(record.verdict, Verdict::Other("shrug".to_string()));
    }
}
