use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{clamp_limit, MAX_LIST_LIMIT};
use crate::error::{Error, Result};
use crate::storage::{like_pattern, now, Scope, ScopeRegistry, ScopeSelector};

const RULE_COLUMNS: &str = "id, title, content, category, priority, enabled, created_at, updated_at";

/// A standing instruction surfaced to agents, highest priority first
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub id: String,
    pub scope: Scope,
    pub title: String,
    pub content: String,
    pub category: String,
    pub priority: i64,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRule {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl NewRule {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Partial update; absent fields keep their stored value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl RulePatch {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.category.is_none()
            && self.priority.is_none()
            && self.enabled.is_none()
    }
}

pub struct RuleStore {
    registry: Arc<ScopeRegistry>,
}

impl RuleStore {
    pub fn new(registry: Arc<ScopeRegistry>) -> Self {
        Self { registry }
    }

    pub fn create(&self, scope: Scope, input: NewRule) -> Result<Rule> {
        let title = required("title", &input.title)?;
        let content = required("content", &input.content)?;
        let category = category(input.category.as_deref());
        let enabled = input.enabled.unwrap_or(true);

        let id = Uuid::new_v4().to_string();
        let timestamp = now();

        let db = self.registry.open(scope)?;
        let conn = db.conn()?;
        conn.execute(
            "INSERT INTO rules (id, title, content, category, priority, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![id, title, content, category, input.priority, enabled, timestamp],
        )?;

        info!("Created rule {} '{}' in {} scope", id, title, scope);

        Ok(Rule {
            id,
            scope,
            title: title.to_string(),
            content: content.to_string(),
            category,
            priority: input.priority,
            enabled,
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    pub fn update(&self, scope: Scope, id: &str, patch: RulePatch) -> Result<Rule> {
        if patch.is_empty() {
            return Err(Error::validation("update requires at least one field"));
        }

        let db = self.registry.open(scope)?;
        let mut conn = db.conn()?;
        let tx = conn.transaction()?;

        let mut rule = fetch(&tx, scope, id)?.ok_or_else(|| Error::not_found("rule", id))?;

        if let Some(title) = &patch.title {
            rule.title = required("title", title)?.to_string();
        }
        if let Some(content) = &patch.content {
            rule.content = required("content", content)?.to_string();
        }
        if let Some(value) = &patch.category {
            rule.category = category(Some(value));
        }
        if let Some(priority) = patch.priority {
            rule.priority = priority;
        }
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        rule.updated_at = now().max(rule.updated_at);

        tx.execute(
            "UPDATE rules
             SET title = ?2, content = ?3, category = ?4, priority = ?5, enabled = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                rule.id,
                rule.title,
                rule.content,
                rule.category,
                rule.priority,
                rule.enabled,
                rule.updated_at
            ],
        )?;
        tx.commit()?;

        info!("Updated rule {} in {} scope", id, scope);
        Ok(rule)
    }

    pub fn delete(&self, scope: Scope, id: &str) -> Result<()> {
        let db = self.registry.open(scope)?;
        let conn = db.conn()?;
        let removed = conn.execute("DELETE FROM rules WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(Error::not_found("rule", id));
        }
        info!("Deleted rule {} from {} scope", id, scope);
        Ok(())
    }

    pub fn get(&self, scope: Scope, id: &str) -> Result<Rule> {
        let db = self.registry.open(scope)?;
        let conn = db.conn()?;
        fetch(&conn, scope, id)?.ok_or_else(|| Error::not_found("rule", id))
    }

    /// Every rule in the selected scopes, highest priority first
    pub fn list(
        &self,
        selector: ScopeSelector,
        category: Option<&str>,
        include_disabled: bool,
    ) -> Result<Vec<Rule>> {
        let filter = RuleFilter {
            query: None,
            category,
            include_disabled,
        };
        self.collect(selector, &filter, None)
    }

    /// Enabled rules matching an optional text query and category
    pub fn retrieve(
        &self,
        selector: ScopeSelector,
        query: Option<&str>,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Rule>> {
        let limit = clamp_limit(limit, MAX_LIST_LIMIT);
        let filter = RuleFilter {
            query: query.map(str::trim).filter(|q| !q.is_empty()),
            category,
            include_disabled: false,
        };
        self.collect(selector, &filter, Some(limit))
    }

    fn collect(&self, selector: ScopeSelector, filter: &RuleFilter, limit: Option<usize>) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        for scope in selector.scopes() {
            let result = self
                .registry
                .open(scope)
                .and_then(|db| query_rules(&*db.conn()?, scope, filter, limit));
            match result {
                Ok(found) => rules.extend(found),
                Err(e) if selector == ScopeSelector::All => warn!("Skipping {} scope: {}", scope, e),
                Err(e) => return Err(e),
            }
        }

        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        if let Some(limit) = limit {
            rules.truncate(limit);
        }
        Ok(rules)
    }
}

struct RuleFilter<'a> {
    query: Option<&'a str>,
    category: Option<&'a str>,
    include_disabled: bool,
}

fn query_rules(conn: &Connection, scope: Scope, filter: &RuleFilter, limit: Option<usize>) -> Result<Vec<Rule>> {
    let pattern = filter.query.map(like_pattern);
    let limit = limit.map(|l| l as i64).unwrap_or(-1);

    let sql = format!(
        "SELECT {} FROM rules
         WHERE (?1 OR enabled = 1)
           AND (?2 IS NULL OR lower(category) = lower(?2))
           AND (?3 IS NULL
                OR lower(title) LIKE ?3 ESCAPE '\\'
                OR lower(content) LIKE ?3 ESCAPE '\\')
         ORDER BY priority DESC, updated_at DESC, rowid DESC
         LIMIT ?4",
        RULE_COLUMNS
    );

    let mut stmt = conn.prepare(&sql)?;
    let rules = stmt
        .query_map(
            params![filter.include_disabled, filter.category, pattern, limit],
            |row| row_to_rule(row, scope),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rules)
}

fn fetch(conn: &Connection, scope: Scope, id: &str) -> Result<Option<Rule>> {
    let rule = conn
        .query_row(
            &format!("SELECT {} FROM rules WHERE id = ?1", RULE_COLUMNS),
            [id],
            |row| row_to_rule(row, scope),
        )
        .optional()?;
    Ok(rule)
}

fn row_to_rule(row: &Row, scope: Scope) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        scope,
        title: row.get(1)?,
        content: row.get(2)?,
        category: row.get(3)?,
        priority: row.get(4)?,
        enabled: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(Error::validation(format!("{} must not be empty", field)))
    } else {
        Ok(value)
    }
}

fn category(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("general")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleStore {
        RuleStore::new(Arc::new(ScopeRegistry::in_memory("rules")))
    }

    #[test]
    fn test_create_validates() {
        let store = rules();
        let err = store.create(Scope::Project, NewRule::new("", "body")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = store.create(Scope::Project, NewRule::new("title", " ")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_retrieve_orders_by_priority() {
        let store = rules();
        store.create(Scope::Project, NewRule::new("A", "first").with_priority(1)).unwrap();
        store.create(Scope::Project, NewRule::new("B", "second").with_priority(5)).unwrap();

        let found = store.retrieve(Scope::Project.into(), None, None, 10).unwrap();
        let titles: Vec<_> = found.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[test]
    fn test_update_and_disable() {
        let store = rules();
        let rule = store
            .create(Scope::User, NewRule::new("tabs", "use tabs").with_category("style"))
            .unwrap();

        let updated = store
            .update(
                Scope::User,
                &rule.id,
                RulePatch {
                    content: Some("use four spaces".into()),
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "tabs");
        assert_eq!(updated.content, "use four spaces");
        assert!(!updated.enabled);

        assert!(store.retrieve(Scope::User.into(), None, None, 10).unwrap().is_empty());
        let listed = store.list(Scope::User.into(), Some("STYLE"), true).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(store.get(Scope::User, &rule.id).unwrap().content, "use four spaces");
    }

    #[test]
    fn test_missing_rule() {
        let store = rules();
        let patch = RulePatch {
            priority: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            store.update(Scope::Global, "missing", patch).unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            store.delete(Scope::Global, "missing").unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            store.update(Scope::Global, "missing", RulePatch::default()).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn test_delete() {
        let store = rules();
        let rule = store.create(Scope::Project, NewRule::new("x", "y")).unwrap();
        store.delete(Scope::Project, &rule.id).unwrap();
        assert!(store.list(Scope::Project.into(), None, true).unwrap().is_empty());
    }

    #[test]
    fn test_retrieve_query_and_all_scopes() {
        let store = rules();
        store
            .create(Scope::Global, NewRule::new("Commit style", "Use imperative mood").with_priority(2))
            .unwrap();
        store
            .create(Scope::Project, NewRule::new("Migrations", "Never edit applied migrations").with_priority(9))
            .unwrap();
        store
            .create(Scope::User, NewRule::new("Editor", "Prefer small commits").with_priority(4))
            .unwrap();

        let found = store.retrieve(ScopeSelector::All, Some("COMMIT"), None, 10).unwrap();
        let titles: Vec<_> = found.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Editor", "Commit style"]);

        let all = store.list(ScopeSelector::All, None, false).unwrap();
        assert_eq!(all[0].scope, Scope::Project);
        assert_eq!(all.len(), 3);
    }
}
