//! Rule-based statement classification
//!
//! Rules live in a JSON document (`category_map.json` in the data dir) and
//! map memo patterns to account codes. Document order defines priority: the
//! first satisfying rule wins. The loader is permissive — malformed rules
//! are skipped and a missing file simply yields no rules.

use std::path::Path;

use chrono::{DateTime, Timelike, Utc};
use regex::RegexBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Settings;
use crate::db::Database;
use crate::error::Result;
use crate::events::{DomainEvent, EventBus};
use crate::models::EntryStatus;

/// Whether a rule targets expense (negative) or income (positive) entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Expense,
    Income,
}

/// A single classification rule.
///
/// Optional filters narrow the match: an absolute amount band and an
/// inclusive hour-of-day window (applied only when both bounds are present).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: String,
    pub account: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub regex: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour_end: Option<u32>,
}

#[derive(Serialize, Deserialize, Default)]
struct RulesDocument {
    #[serde(default)]
    rules: Vec<serde_json::Value>,
}

/// Load rules from the settings' rules path.
///
/// A missing or unreadable document yields an empty list; individually
/// malformed rules (including unknown `type` values) are dropped.
pub fn load_rules(settings: &Settings) -> Vec<Rule> {
    load_rules_from(&settings.rules_path())
}

fn load_rules_from(path: &Path) -> Vec<Rule> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(document) = serde_json::from_str::<RulesDocument>(&text) else {
        return Vec::new();
    };

    let mut rules = Vec::new();
    for raw in document.rules {
        match serde_json::from_value::<Rule>(raw) {
            Ok(rule) if !rule.pattern.is_empty() && !rule.account.is_empty() => rules.push(rule),
            Ok(_) => debug!("Skipping rule with empty pattern or account"),
            Err(err) => debug!("Skipping malformed rule: {}", err),
        }
    }
    rules
}

/// Write the rules document back to disk.
pub fn save_rules(settings: &Settings, rules: &[Rule]) -> Result<()> {
    settings.ensure_data_dir()?;
    let document = json!({ "rules": rules });
    std::fs::write(
        settings.rules_path(),
        serde_json::to_string_pretty(&document)?,
    )?;
    Ok(())
}

/// Append a rule to the document and return the full list.
pub fn add_rule(settings: &Settings, rule: Rule) -> Result<Vec<Rule>> {
    let mut rules = load_rules(settings);
    rules.push(rule);
    save_rules(settings, &rules)?;
    Ok(rules)
}

/// Find the first rule matching the entry text and metadata.
///
/// Rules whose `type` disagrees with the entry's sign are skipped. For the
/// rest, document order decides: pattern first (regex patterns fall back to
/// a substring test when they fail to compile), then the absolute amount
/// band, then the hour window (only when both bounds and a timestamp exist).
pub fn find_matching_rule<'r>(
    rules: &'r [Rule],
    text: &str,
    is_expense: bool,
    amount: Option<Decimal>,
    occurred_at: Option<DateTime<Utc>>,
) -> Option<(usize, &'r Rule)> {
    let normalized = text.to_lowercase();
    let desired = if is_expense {
        RuleType::Expense
    } else {
        RuleType::Income
    };

    for (index, rule) in rules.iter().enumerate() {
        if rule.rule_type != desired {
            continue;
        }

        let matched = if rule.regex {
            match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
                Ok(re) => re.is_match(text),
                Err(_) => normalized.contains(&rule.pattern.to_lowercase()),
            }
        } else {
            normalized.contains(&rule.pattern.to_lowercase())
        };
        if !matched {
            continue;
        }

        if let Some(amount) = amount {
            let magnitude = amount.abs();
            if rule.min_amount.is_some_and(|min| magnitude < min) {
                continue;
            }
            if rule.max_amount.is_some_and(|max| magnitude > max) {
                continue;
            }
        }

        if let (Some(start), Some(end), Some(at)) = (rule.hour_start, rule.hour_end, occurred_at) {
            let hour = at.hour();
            if hour < start || hour > end {
                continue;
            }
        }

        return Some((index, rule));
    }

    None
}

/// Convenience: resolve the matching rule's account code for a text.
pub fn match_account(
    settings: &Settings,
    text: &str,
    is_expense: bool,
    amount: Option<Decimal>,
    occurred_at: Option<DateTime<Utc>>,
) -> Option<String> {
    let rules = load_rules(settings);
    find_matching_rule(&rules, text, is_expense, amount, occurred_at)
        .map(|(_, rule)| rule.account.clone())
}

/// Match confidence reported per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// A rule matched and its account exists.
    High,
    /// No rule matched, or the matched rule names a missing account.
    None,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::None => "none",
        }
    }
}

/// Per-entry diagnostic from a rule application run.
#[derive(Debug, Clone)]
pub struct RuleApplication {
    pub entry_id: Uuid,
    pub external_id: String,
    pub memo: String,
    pub suggested_account_code: Option<String>,
    pub rule_pattern: Option<String>,
    pub confidence: Confidence,
}

/// Aggregate result of a rule application run.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub total_entries: usize,
    pub matched_entries: usize,
    pub unmatched_entries: usize,
    pub applications: Vec<RuleApplication>,
}

/// Applies classification rules to imported statement entries.
pub struct RuleEngine<'a> {
    db: &'a Database,
    bus: &'a EventBus,
}

impl<'a> RuleEngine<'a> {
    pub fn new(db: &'a Database, bus: &'a EventBus) -> Self {
        Self { db, bus }
    }

    /// Run the rules over IMPORTED entries, optionally scoped to one batch.
    ///
    /// `dry_run` previews without persisting anything; with `auto_apply` the
    /// suggestions are written and entries move to MATCHED.
    pub fn apply(
        &self,
        settings: &Settings,
        batch_id: Option<Uuid>,
        dry_run: bool,
        auto_apply: bool,
    ) -> Result<ApplyOutcome> {
        let rules = load_rules(settings);
        if rules.is_empty() {
            return Ok(ApplyOutcome::default());
        }

        let uow = self.db.unit_of_work()?;
        let entries = match batch_id {
            Some(batch_id) => uow
                .entries()
                .find_by_batch_and_status(batch_id, EntryStatus::Imported)?,
            None => uow.entries().find_by_status(EntryStatus::Imported)?,
        };
        if entries.is_empty() {
            return Ok(ApplyOutcome::default());
        }

        let mut outcome = ApplyOutcome {
            total_entries: entries.len(),
            ..Default::default()
        };
        let mut applied_events = Vec::new();

        for mut entry in entries {
            let matched = find_matching_rule(
                &rules,
                &entry.memo,
                entry.is_debit(),
                Some(entry.amount),
                Some(entry.occurred_at),
            );

            let Some((_, rule)) = matched else {
                outcome.unmatched_entries += 1;
                outcome.applications.push(RuleApplication {
                    entry_id: entry.id,
                    external_id: entry.external_id.clone(),
                    memo: entry.memo.clone(),
                    suggested_account_code: None,
                    rule_pattern: None,
                    confidence: Confidence::None,
                });
                continue;
            };

            match uow.accounts().find_by_code(&rule.account)? {
                Some(account) => {
                    if auto_apply && !dry_run {
                        entry.suggest_account(account.id)?;
                        entry.add_metadata("rule_pattern", json!(rule.pattern));
                        entry.add_metadata("rule_account", json!(rule.account));
                        uow.entries().save(&entry)?;
                        applied_events.push(DomainEvent::StatementMatched {
                            entry_id: entry.id,
                            batch_id: entry.batch_id,
                            account_id: account.id,
                            rule_pattern: rule.pattern.clone(),
                        });
                    }
                    outcome.matched_entries += 1;
                    outcome.applications.push(RuleApplication {
                        entry_id: entry.id,
                        external_id: entry.external_id.clone(),
                        memo: entry.memo.clone(),
                        suggested_account_code: Some(rule.account.clone()),
                        rule_pattern: Some(rule.pattern.clone()),
                        confidence: Confidence::High,
                    });
                }
                None => {
                    // rule matched but its account does not exist
                    outcome.unmatched_entries += 1;
                    outcome.applications.push(RuleApplication {
                        entry_id: entry.id,
                        external_id: entry.external_id.clone(),
                        memo: entry.memo.clone(),
                        suggested_account_code: None,
                        rule_pattern: Some(rule.pattern.clone()),
                        confidence: Confidence::None,
                    });
                }
            }
        }

        if dry_run {
            uow.rollback()?;
        } else {
            uow.commit()?;
            for event in &applied_events {
                self.bus.publish(event);
            }
            info!(
                "Applied rules: {}/{} entries matched",
                outcome.matched_entries, outcome.total_entries
            );
        }

        Ok(outcome)
    }
}
