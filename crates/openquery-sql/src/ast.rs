//! Policy AST
//!
//! A deliberately small tree holding only what the policy rules inspect:
//! statement kind, referenced tables, the top-level limiting clause and
//! wildcard projections. Built from sqlparser statements with a visitor so
//! nested queries (CTEs, derived tables, expression subqueries) are covered.

use openquery_core::StatementKind;
use sqlparser::ast::{
    Expr, Fetch, ObjectName, Query, SelectItem, SetExpr, Statement, Value, Visit, Visitor,
};
use std::collections::HashSet;
use std::convert::Infallible;
use std::ops::ControlFlow;

/// Parsed input: one node per top-level statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyAst {
    pub statements: Vec<StatementNode>,
}

impl PolicyAst {
    /// Build the policy tree from sqlparser statements
    pub fn from_statements(statements: &[Statement]) -> Self {
        Self {
            statements: statements.iter().map(StatementNode::from_statement).collect(),
        }
    }

    /// The first non-SELECT kind, or SELECT when every statement reads
    pub fn statement_kind(&self) -> StatementKind {
        self.statements
            .iter()
            .map(|s| s.kind)
            .find(|kind| !kind.is_read())
            .unwrap_or(StatementKind::Select)
    }

    /// All referenced tables across statements, deduplicated case-insensitively
    pub fn tables(&self) -> Vec<&TableRef> {
        let mut seen = HashSet::new();
        self.statements
            .iter()
            .flat_map(|s| s.tables.iter())
            .filter(|t| seen.insert(t.name.to_lowercase()))
            .collect()
    }

    /// All wildcard projections across statements
    pub fn wildcards(&self) -> impl Iterator<Item = &WildcardProjection> {
        self.statements.iter().flat_map(|s| s.wildcards.iter())
    }
}

/// One top-level statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementNode {
    pub kind: StatementKind,

    /// Tables referenced anywhere in the statement (CTE names excluded)
    pub tables: Vec<TableRef>,

    /// Outermost result-limiting clause, SELECT only
    pub limit: Option<LimitClause>,

    /// Wildcard projections anywhere in the statement
    pub wildcards: Vec<WildcardProjection>,
}

impl StatementNode {
    fn from_statement(statement: &Statement) -> Self {
        let mut collector = StructureCollector::default();
        match statement.visit(&mut collector) {
            ControlFlow::Continue(()) => {}
            ControlFlow::Break(never) => match never {},
        }

        let kind = match statement {
            Statement::Query(_) if collector.creates_table => StatementKind::Ddl,
            // Data-modifying statement nested in a query body or CTE
            Statement::Query(_) => collector
                .nested_kinds
                .iter()
                .copied()
                .find(|kind| !kind.is_read())
                .unwrap_or(StatementKind::Select),
            other => statement_kind(other),
        };

        let limit = match statement {
            Statement::Query(query) => limit_clause(query),
            _ => None,
        };

        let mut tables = Vec::new();
        let mut seen = HashSet::new();
        for name in collector.relations.iter().chain(ddl_targets(statement).iter()) {
            let table = TableRef::from_object_name(name);
            if seen.insert(table.name.to_lowercase()) {
                tables.push(table);
            }
        }

        Self {
            kind,
            tables,
            limit,
            wildcards: collector.wildcards,
        }
    }
}

/// A referenced table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Full name as written, unquoted (`public.users`)
    pub name: String,

    /// Last name segment (`users`)
    pub base_name: String,
}

impl TableRef {
    fn from_object_name(name: &ObjectName) -> Self {
        let parts: Vec<&str> = name.0.iter().map(|ident| ident.value.as_str()).collect();
        Self {
            name: parts.join("."),
            base_name: parts.last().copied().unwrap_or_default().to_string(),
        }
    }
}

/// Top-level limiting clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitClause {
    /// `LIMIT n`
    Limit(LimitValue),

    /// `FETCH FIRST n ROWS ONLY`
    Fetch(LimitValue),
}

impl LimitClause {
    pub fn value(&self) -> &LimitValue {
        match self {
            Self::Limit(value) | Self::Fetch(value) => value,
        }
    }
}

/// Value of a limiting clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitValue {
    /// Literal row count
    Count(u64),

    /// Anything that cannot be bounded statically (placeholder, expression, percent)
    Expression(String),
}

/// Wildcard projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WildcardProjection {
    /// `*`
    All,

    /// `tbl.*`
    Qualified(String),
}

impl std::fmt::Display for WildcardProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Qualified(table) => write!(f, "{}.*", table),
        }
    }
}

/// CTE names introduced by one `WITH` clause
struct CteScope {
    /// Query owning the `WITH`; compared by address only
    owner: *const Query,

    /// Names a relation inside this scope may refer to
    visible: HashSet<String>,

    /// Non-recursive CTE bodies not yet visited, in order. Each name becomes
    /// visible once its own body has been walked.
    pending: Vec<(*const Query, String)>,
}

impl CteScope {
    fn open(query: &Query) -> Option<Self> {
        let with = query.with.as_ref()?;
        let names = with
            .cte_tables
            .iter()
            .map(|cte| (&*cte.query as *const Query, cte.alias.name.value.to_lowercase()));

        let (visible, pending) = if with.recursive {
            (names.map(|(_, name)| name).collect(), Vec::new())
        } else {
            (HashSet::new(), names.collect())
        };

        Some(Self {
            owner: query,
            visible,
            pending,
        })
    }
}

#[derive(Default)]
struct StructureCollector {
    relations: Vec<ObjectName>,
    cte_scopes: Vec<CteScope>,
    wildcards: Vec<WildcardProjection>,
    nested_kinds: Vec<StatementKind>,
    creates_table: bool,
}

impl Visitor for StructureCollector {
    type Break = Infallible;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Infallible> {
        if let Some(scope) = CteScope::open(query) {
            self.cte_scopes.push(scope);
        }
        self.collect_set_expr(&query.body);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, query: &Query) -> ControlFlow<Infallible> {
        if self
            .cte_scopes
            .last()
            .is_some_and(|scope| std::ptr::eq(scope.owner, query))
        {
            self.cte_scopes.pop();
        }

        // A finished CTE body makes its name visible to later siblings and the main body
        if let Some(scope) = self.cte_scopes.last_mut() {
            let finished = scope.pending.iter().position(|(body, _)| std::ptr::eq(*body, query));
            if let Some(index) = finished {
                let (_, name) = scope.pending.remove(index);
                scope.visible.insert(name);
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Infallible> {
        if !self.is_cte_reference(relation) {
            self.relations.push(relation.clone());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Infallible> {
        if !matches!(statement, Statement::Query(_)) {
            self.nested_kinds.push(statement_kind(statement));
        }
        ControlFlow::Continue(())
    }
}

impl StructureCollector {
    /// Only an unqualified name with a CTE of that name in scope refers to the CTE
    fn is_cte_reference(&self, relation: &ObjectName) -> bool {
        let [ident] = relation.0.as_slice() else {
            return false;
        };
        let name = ident.value.to_lowercase();
        self.cte_scopes.iter().any(|scope| scope.visible.contains(&name))
    }

    // Nested `SetExpr::Query` bodies are visited as queries on their own.
    fn collect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    self.creates_table = true;
                }
                for item in &select.projection {
                    match item {
                        SelectItem::Wildcard(..) => self.wildcards.push(WildcardProjection::All),
                        SelectItem::QualifiedWildcard(name, ..) => self
                            .wildcards
                            .push(WildcardProjection::Qualified(name.to_string())),
                        _ => {}
                    }
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            _ => {}
        }
    }
}

/// Structural kind of a non-query statement
fn statement_kind(statement: &Statement) -> StatementKind {
    match statement {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Insert(_) => StatementKind::Insert,
            SetExpr::Update(_) => StatementKind::Update,
            _ => StatementKind::Select,
        },
        Statement::Insert { .. } | Statement::Copy { .. } => StatementKind::Insert,
        Statement::Update { .. } | Statement::Merge { .. } => StatementKind::Update,
        Statement::Delete { .. } => StatementKind::Delete,
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. }
        | Statement::CreateRole { .. }
        | Statement::AlterTable { .. }
        | Statement::AlterView { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterRole { .. }
        | Statement::Drop { .. }
        | Statement::DropFunction { .. }
        | Statement::Truncate { .. }
        | Statement::Grant { .. }
        | Statement::Revoke { .. }
        | Statement::Comment { .. } => StatementKind::Ddl,
        other => {
            // Catch schema-changing variants not listed above by their keyword
            let text = other.to_string();
            let keyword = text.split_whitespace().next().unwrap_or_default();
            match keyword.to_ascii_uppercase().as_str() {
                "CREATE" | "ALTER" | "DROP" | "RENAME" => StatementKind::Ddl,
                _ => StatementKind::Other,
            }
        }
    }
}

/// Tables targeted by DDL, which the relation visitor does not report
fn ddl_targets(statement: &Statement) -> Vec<ObjectName> {
    match statement {
        Statement::Drop { names, .. } => names.clone(),
        Statement::AlterTable { name, .. } => vec![name.clone()],
        Statement::CreateTable(create) => vec![create.name.clone()],
        Statement::Truncate { table_names, .. } => {
            table_names.iter().map(|target| target.name.clone()).collect()
        }
        _ => Vec::new(),
    }
}

/// Outermost LIMIT / FETCH of a query
fn limit_clause(query: &Query) -> Option<LimitClause> {
    if let Some(limit) = &query.limit {
        return Some(LimitClause::Limit(limit_value(limit)));
    }
    query.fetch.as_ref().map(|fetch| LimitClause::Fetch(fetch_value(fetch)))
}

pub(crate) fn limit_value(expr: &Expr) -> LimitValue {
    match expr {
        Expr::Value(Value::Number(n, _)) => numeric_count(n)
            .map(LimitValue::Count)
            .unwrap_or_else(|| LimitValue::Expression(n.clone())),
        other => LimitValue::Expression(other.to_string()),
    }
}

/// Whole, non-negative numeric literal as a row count (`25`, `1e9`, `100.0`)
fn numeric_count(literal: &str) -> Option<u64> {
    if let Ok(n) = literal.parse::<u64>() {
        return Some(n);
    }
    let value = literal.parse::<f64>().ok()?;
    let whole = value.is_finite() && value >= 0.0 && value.fract() == 0.0;
    // 2^64 itself rounds in, so compare strictly
    (whole && value < u64::MAX as f64).then_some(value as u64)
}

pub(crate) fn fetch_value(fetch: &Fetch) -> LimitValue {
    match &fetch.quantity {
        _ if fetch.percent => LimitValue::Expression(fetch.to_string()),
        Some(quantity) => limit_value(quantity),
        // FETCH FIRST ROW ONLY
        None => LimitValue::Count(1),
    }
}
