//! A small interpreter for the rendered expression strings
//! `tabletheory_expr::ExpressionBuilder` produces (and the few hand-built
//! fragments in `tabletheory_client::lease`). The in-memory store never sees
//! a predicate tree, only these strings plus their placeholder maps, so this
//! is the same shape of work a real hosted store's query planner does.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tabletheory_client::store::AttributeMap;
use tabletheory_core::AttributeValue;

/// Evaluates a condition, filter, or key-condition expression against
/// `item`. Unresolved placeholders are treated as a hard panic rather than a
/// `false` result: they indicate a caller built a malformed request, not a
/// predicate that legitimately doesn't match.
pub fn eval_expression(
    expr: &str,
    names: &BTreeMap<String, String>,
    values: &BTreeMap<String, AttributeValue>,
    item: &AttributeMap,
) -> bool {
    eval_or(expr.trim(), names, values, item)
}

fn eval_or(expr: &str, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttributeValue>, item: &AttributeMap) -> bool {
    let expr = unwrap_fully_parenthesized(expr);
    let parts = split_top_level(expr, " OR ", false);
    if parts.len() > 1 {
        return parts.iter().any(|p| eval_or(p, names, values, item));
    }
    eval_and(expr, names, values, item)
}

fn eval_and(expr: &str, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttributeValue>, item: &AttributeMap) -> bool {
    let parts = split_top_level(expr, " AND ", true);
    if parts.len() > 1 {
        return parts.iter().all(|p| eval_or(p, names, values, item));
    }
    eval_leaf(expr, names, values, item)
}

fn unwrap_fully_parenthesized(s: &str) -> &str {
    let trimmed = s.trim();
    if !trimmed.starts_with('(') || !trimmed.ends_with(')') {
        return trimmed;
    }
    let bytes = trimmed.as_bytes();
    let mut depth = 0i32;
    for (idx, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 && idx != bytes.len() - 1 {
                    return trimmed;
                }
            }
            _ => {}
        }
    }
    trimmed[1..trimmed.len() - 1].trim()
}

/// Splits `expr` on top-level occurrences of `sep`, skipping anything
/// inside parentheses. When `between_aware` is set, the `AND` glueing a
/// `BETWEEN lo AND hi` leaf together is never treated as a split point.
fn split_top_level(expr: &str, sep: &str, between_aware: bool) -> Vec<&str> {
    let bytes = expr.as_bytes();
    let sep_bytes = sep.as_bytes();
    let between = b"BETWEEN";
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut pending_between = false;
    let mut parts = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth -= 1;
                i += 1;
            }
            _ if depth == 0 && between_aware && bytes[i..].starts_with(between) => {
                pending_between = true;
                i += between.len();
            }
            _ if depth == 0 && bytes[i..].starts_with(sep_bytes) => {
                if pending_between {
                    pending_between = false;
                } else {
                    parts.push(expr[start..i].trim());
                    start = i + sep_bytes.len();
                }
                i += sep_bytes.len();
            }
            _ => i += 1,
        }
    }
    parts.push(expr[start..].trim());
    parts
}

fn resolve_name<'a>(token: &str, names: &'a BTreeMap<String, String>) -> &'a str {
    names
        .get(token)
        .unwrap_or_else(|| panic!("unresolved name placeholder {token}"))
}

fn resolve_value<'a>(token: &str, values: &'a BTreeMap<String, AttributeValue>) -> &'a AttributeValue {
    values
        .get(token)
        .unwrap_or_else(|| panic!("unresolved value placeholder {token}"))
}

fn eval_leaf(leaf: &str, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttributeValue>, item: &AttributeMap) -> bool {
    let leaf = leaf.trim();

    if let Some(inner) = strip_call(leaf, "attribute_not_exists") {
        let attr = resolve_name(inner.trim(), names);
        return item.get(attr).is_none();
    }
    if let Some(inner) = strip_call(leaf, "attribute_exists") {
        let attr = resolve_name(inner.trim(), names);
        return item.get(attr).is_some();
    }
    if let Some(inner) = strip_call(leaf, "begins_with") {
        let (name_tok, value_tok) = split_once_trim(inner, ",");
        let attr = resolve_name(name_tok, names);
        let prefix = resolve_value(value_tok, values);
        return match (item.get(attr), prefix) {
            (Some(AttributeValue::S(s)), AttributeValue::S(p)) => s.starts_with(p.as_str()),
            _ => false,
        };
    }
    if let Some(inner) = strip_call(leaf, "contains") {
        let (name_tok, value_tok) = split_once_trim(inner, ",");
        let attr = resolve_name(name_tok, names);
        let needle = resolve_value(value_tok, values);
        return match item.get(attr) {
            Some(AttributeValue::S(s)) => matches!(needle, AttributeValue::S(n) if s.contains(n.as_str())),
            Some(AttributeValue::Ss(set)) => matches!(needle, AttributeValue::S(n) if set.contains(n)),
            Some(AttributeValue::Ns(set)) => matches!(needle, AttributeValue::N(n) if set.contains(n)),
            Some(AttributeValue::Bs(set)) => matches!(needle, AttributeValue::B(n) if set.contains(n)),
            Some(AttributeValue::L(list)) => list.contains(needle),
            _ => false,
        };
    }
    if let Some((name_tok, rest)) = leaf.split_once(" BETWEEN ") {
        let (lo_tok, hi_tok) = rest.split_once(" AND ").expect("BETWEEN leaf missing AND bound");
        let attr = resolve_name(name_tok.trim(), names);
        let lo = resolve_value(lo_tok.trim(), values);
        let hi = resolve_value(hi_tok.trim(), values);
        return match item.get(attr) {
            Some(v) => {
                matches!(compare(v, lo), Some(Ordering::Greater) | Some(Ordering::Equal))
                    && matches!(compare(v, hi), Some(Ordering::Less) | Some(Ordering::Equal))
            }
            None => false,
        };
    }
    if let Some((name_tok, rest)) = leaf.split_once(" IN (") {
        let rest = rest.strip_suffix(')').unwrap_or(rest);
        let attr = resolve_name(name_tok.trim(), names);
        let Some(actual) = item.get(attr) else { return false };
        return rest.split(", ").any(|tok| resolve_value(tok.trim(), values) == actual);
    }

    for (token, op): (&str, fn(Ordering) -> bool) in [
        (" <= ", |o| o != Ordering::Greater),
        (" >= ", |o| o != Ordering::Less),
        (" <> ", |o| o != Ordering::Equal),
        (" = ", |o| o == Ordering::Equal),
        (" < ", |o| o == Ordering::Less),
        (" > ", |o| o == Ordering::Greater),
    ] {
        if let Some((name_tok, value_tok)) = leaf.split_once(token) {
            let attr = resolve_name(name_tok.trim(), names);
            let expected = resolve_value(value_tok.trim(), values);
            return match item.get(attr) {
                Some(actual) => compare(actual, expected).is_some_and(op),
                None => false,
            };
        }
    }

    panic!("unrecognized expression fragment: {leaf}");
}

fn strip_call<'a>(leaf: &'a str, func: &str) -> Option<&'a str> {
    let prefix = format!("{func}(");
    leaf.strip_prefix(prefix.as_str())?.strip_suffix(')')
}

fn split_once_trim<'a>(s: &'a str, sep: &str) -> (&'a str, &'a str) {
    let (a, b) = s.split_once(sep).unwrap_or_else(|| panic!("expected {sep} in {s}"));
    (a.trim(), b.trim())
}

fn compare(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::N(x), AttributeValue::N(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.parse::<f64>().ok()?),
        (AttributeValue::S(x), AttributeValue::S(y)) => Some(x.cmp(y)),
        (AttributeValue::B(x), AttributeValue::B(y)) => Some(x.cmp(y)),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// Parses an update expression into its `SET`/`REMOVE`/`ADD`/`DELETE`
/// clauses, in the order `tabletheory_expr::ExpressionBuilder` joins them.
pub fn split_update_sections(expr: &str) -> Vec<(&'static str, &str)> {
    const KEYWORDS: [&str; 4] = ["SET", "REMOVE", "ADD", "DELETE"];
    let mut boundaries: Vec<(usize, &'static str)> = Vec::new();
    let bytes = expr.as_bytes();
    for i in 0..bytes.len() {
        if i != 0 && bytes[i - 1] != b' ' {
            continue;
        }
        for kw in KEYWORDS {
            let probe = format!("{kw} ");
            if expr[i..].starts_with(probe.as_str()) {
                boundaries.push((i, kw));
                break;
            }
        }
    }
    let mut out = Vec::new();
    for (idx, &(pos, kw)) in boundaries.iter().enumerate() {
        let body_start = pos + kw.len() + 1;
        let body_end = boundaries.get(idx + 1).map(|(p, _)| *p).unwrap_or(expr.len());
        out.push((kw, expr[body_start..body_end].trim()));
    }
    out
}

/// Splits a comma-joined clause body (`SET` assignments, `REMOVE` names, ...)
/// on top-level commas, respecting nested `if_not_exists(...)` calls.
pub fn split_clause_items(body: &str) -> Vec<&str> {
    split_top_level(body, ", ", false)
}
