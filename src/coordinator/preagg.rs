//! Preaggregated views
//!
//! When a selection becomes active over an aggregate client, the client's
//! groups are materialized once more with the selection's fields added as
//! extra group keys. The view lives in the `mosaic` schema under a name
//! derived from its defining query, so rebuilding it is a no-op.

use crate::coordinator::catalog::{PREAGG_PREFIX, PREAGG_SCHEMA};
use crate::coordinator::query::{quote_ident, quote_table, Expr, Query};
use crate::coordinator::usage::ColumnUsage;
use crate::spec::AggregateFunc;
use sha2::{Digest, Sha256};

/// A view to build in the engine
#[derive(Debug, Clone, PartialEq)]
pub struct PreaggregateView {
    /// Qualified name, `mosaic.preagg_<hash>`
    pub name: String,
    /// Source table of the client query
    pub source: String,
    /// Statements that create the view
    pub statements: Vec<String>,
    /// Source columns the view reads
    pub usage: ColumnUsage,
}

fn is_decomposable(func: AggregateFunc) -> bool {
    !matches!(func, AggregateFunc::Median)
}

/// Build the view for `query` with `active` selection fields, if the query
/// can be preaggregated
pub fn preaggregate_view(query: &Query, active: &[String]) -> Option<PreaggregateView> {
    if !query.is_aggregate() || active.is_empty() {
        return None;
    }
    let all_decomposable = query.exprs().iter().all(|(_, expr)| match expr {
        Expr::Agg { func, .. } => is_decomposable(*func),
        _ => true,
    });
    if !all_decomposable {
        return None;
    }

    let mut select = Vec::new();
    let mut keys = Vec::new();
    for (alias, expr) in query.dimensions() {
        select.push(format!("{} AS {}", expr.to_sql(), quote_ident(alias)));
        keys.push(expr.to_sql());
    }
    for field in active {
        let key = quote_ident(field);
        let taken = query.exprs().iter().any(|(alias, _)| alias == field);
        if !taken && !keys.contains(&key) {
            select.push(format!("{} AS {}", key, key));
            keys.push(key);
        }
    }
    for (alias, expr) in query.exprs().iter().filter(|(_, e)| e.is_aggregate()) {
        select.push(format!("{} AS {}", expr.to_sql(), quote_ident(alias)));
    }

    // Filters on the active fields are what the view answers, so they are
    // not baked into it.
    let filters: Vec<String> = query
        .filters
        .iter()
        .filter(|p| !active.iter().any(|f| f == p.column()))
        .map(|p| p.to_sql())
        .collect();

    let mut body = format!(
        "SELECT {} FROM {}",
        select.join(", "),
        quote_table(&query.table)
    );
    if !filters.is_empty() {
        body.push_str(" WHERE ");
        body.push_str(&filters.join(" AND "));
    }
    body.push_str(" GROUP BY ");
    body.push_str(&keys.join(", "));

    let digest = hex::encode(Sha256::digest(body.as_bytes()));
    let name = format!("{}.{}{}", PREAGG_SCHEMA, PREAGG_PREFIX, &digest[..8]);

    let mut usage = query.usage();
    usage.merge(&ColumnUsage::columns(active.iter().cloned()));

    Some(PreaggregateView {
        statements: vec![
            format!("CREATE SCHEMA IF NOT EXISTS {}", PREAGG_SCHEMA),
            format!("CREATE TABLE IF NOT EXISTS {} AS {}", quote_table(&name), body),
        ],
        name,
        source: query.table.clone(),
        usage,
    })
}
