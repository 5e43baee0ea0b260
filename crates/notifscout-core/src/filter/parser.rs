//! Query language
//!
//! ```text
//! is:unread AND (repo:rust-lang/* OR reason:mention) NOT type:release
//! ```
//!
//! * Operators are `AND`, `OR` and `NOT`, uppercase only. `NOT` binds
//!   tightest, then `AND`, then `OR`. Two terms next to each other are ANDed.
//! * `key:value` terms: `is`, `repo`/`repository`, `org`/`organization`,
//!   `type`, `reason`, `updated`/`since`, `score`. Any other key is a regex
//!   over the field of that name.
//! * Bare words search title, repository, type and reason.
//! * `@name` expands a saved filter.
//! * Double quotes keep spaces, parentheses and operator words literal:
//!   `title:"fix(es)? the parser"`.

use super::logic::{AndFilter, NotFilter, OrFilter};
use super::predicates::{
    AllFilter, OrgFilter, ReasonFilter, RegexFilter, RepoFilter, ScoreFilter, StatusFilter,
    TextFilter, TimeFilter, TypeFilter,
};
use super::store::FilterStore;
use super::Filter;
use crate::error::Error;
use crate::scoring::Scorer;
use crate::Result;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Term {
        key: Option<String>,
        value: String,
        raw: String,
    },
    And,
    Or,
    Not,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    And,
    Or,
    Not,
    LParen,
}

impl Op {
    fn precedence(self) -> u8 {
        match self {
            Op::Not => 3,
            Op::And => 2,
            Op::Or => 1,
            Op::LParen => 0,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Op::And => "AND",
            Op::Or => "OR",
            Op::Not => "NOT",
            Op::LParen => "(",
        }
    }
}

/// Parse tree before it's turned into filters, so nested ANDs/ORs can be flattened
enum Expr {
    Leaf(Box<dyn Filter>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    fn join(op: Op, left: Expr, right: Expr) -> Expr {
        let mut items = Vec::new();
        for side in [left, right] {
            match (op, side) {
                (Op::And, Expr::And(inner)) | (Op::Or, Expr::Or(inner)) => items.extend(inner),
                (_, other) => items.push(other),
            }
        }
        match op {
            Op::Or => Expr::Or(items),
            _ => Expr::And(items),
        }
    }

    fn into_filter(self) -> Box<dyn Filter> {
        match self {
            Expr::Leaf(filter) => filter,
            Expr::And(items) => Box::new(AndFilter::new(
                items.into_iter().map(Expr::into_filter).collect(),
            )),
            Expr::Or(items) => Box::new(OrFilter::new(
                items.into_iter().map(Expr::into_filter).collect(),
            )),
            Expr::Not(inner) => Box::new(NotFilter::new(inner.into_filter())),
        }
    }
}

#[derive(Default)]
struct Lexer {
    tokens: Vec<Token>,
    current: String,
    colon: Option<usize>,
    quoted: bool,
}

impl Lexer {
    fn flush(&mut self) {
        if self.current.is_empty() && !self.quoted {
            return;
        }
        let raw = std::mem::take(&mut self.current);

        let token = match (self.quoted, self.colon, raw.as_str()) {
            (false, None, "AND") => Token::And,
            (false, None, "OR") => Token::Or,
            (false, None, "NOT") => Token::Not,
            (_, Some(at), _) => Token::Term {
                key: Some(raw[..at].to_string()),
                value: raw[at + 1..].to_string(),
                raw: raw.clone(),
            },
            (_, None, _) => Token::Term {
                key: None,
                value: raw.clone(),
                raw: raw.clone(),
            },
        };

        self.tokens.push(token);
        self.colon = None;
        self.quoted = false;
    }
}

fn tokenize(query: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer::default();
    let mut in_quote = false;
    let mut quote_start = 0;

    for (at, c) in query.char_indices() {
        if in_quote {
            if c == '"' {
                in_quote = false;
            } else {
                lexer.current.push(c);
            }
            continue;
        }

        match c {
            '"' => {
                in_quote = true;
                quote_start = at;
                lexer.quoted = true;
            }
            '(' | ')' => {
                lexer.flush();
                lexer.tokens.push(if c == '(' { Token::LParen } else { Token::RParen });
            }
            ':' if lexer.colon.is_none() => {
                lexer.colon = Some(lexer.current.len());
                lexer.current.push(c);
            }
            c if c.is_whitespace() => lexer.flush(),
            c => lexer.current.push(c),
        }
    }

    if in_quote {
        return Err(Error::parse(&query[quote_start..], "unterminated quote"));
    }
    lexer.flush();
    Ok(lexer.tokens)
}

/// Turns query strings into filter trees
#[derive(Clone)]
pub struct QueryParser {
    store: Option<Arc<dyn FilterStore>>,
    scorer: Arc<Scorer>,
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryParser {
    pub fn new() -> Self {
        Self {
            store: None,
            scorer: Arc::new(Scorer::default()),
        }
    }

    /// Where `@name` references are looked up
    pub fn with_store(mut self, store: Arc<dyn FilterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Scorer behind `score:` terms
    pub fn with_scorer(mut self, scorer: Arc<Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn parse(&self, query: &str) -> Result<Box<dyn Filter>> {
        let filter = self.parse_expression(query, &mut Vec::new())?;
        trace!("Parsed {:?} as {}", query, filter.describe());
        Ok(filter)
    }

    fn parse_expression(&self, query: &str, resolving: &mut Vec<String>) -> Result<Box<dyn Filter>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Box::new(AllFilter));
        }

        let tokens = tokenize(query)?;
        let mut output: Vec<Expr> = Vec::new();
        let mut ops: Vec<Op> = Vec::new();
        let mut expect_operand = true;

        for token in tokens {
            match token {
                Token::Term { key, value, raw } => {
                    if !expect_operand {
                        push_operator(Op::And, &mut ops, &mut output)?;
                    }
                    let leaf = self.parse_term(key.as_deref(), &value, &raw, resolving)?;
                    output.push(Expr::Leaf(leaf));
                    expect_operand = false;
                }
                Token::Not => {
                    if !expect_operand {
                        push_operator(Op::And, &mut ops, &mut output)?;
                    }
                    // Prefix and right-associative, nothing to pop
                    ops.push(Op::Not);
                    expect_operand = true;
                }
                Token::LParen => {
                    if !expect_operand {
                        push_operator(Op::And, &mut ops, &mut output)?;
                    }
                    ops.push(Op::LParen);
                    expect_operand = true;
                }
                Token::RParen => {
                    if expect_operand {
                        let message = if ops.last() == Some(&Op::LParen) {
                            "empty parentheses"
                        } else {
                            "expected an operand before ')'"
                        };
                        return Err(Error::parse(")", message));
                    }
                    loop {
                        match ops.pop() {
                            Some(Op::LParen) => break,
                            Some(op) => reduce(op, &mut output)?,
                            None => return Err(Error::parse(")", "unbalanced parentheses")),
                        }
                    }
                    expect_operand = false;
                }
                binary @ (Token::And | Token::Or) => {
                    let op = if binary == Token::And { Op::And } else { Op::Or };
                    if expect_operand {
                        return Err(Error::parse(op.as_str(), "missing left operand"));
                    }
                    push_operator(op, &mut ops, &mut output)?;
                    expect_operand = true;
                }
            }
        }

        if expect_operand {
            let dangling = ops.last().map_or("(", |op| op.as_str());
            return Err(Error::parse(dangling, "expression ends without an operand"));
        }

        while let Some(op) = ops.pop() {
            if op == Op::LParen {
                return Err(Error::parse("(", "unbalanced parentheses"));
            }
            reduce(op, &mut output)?;
        }

        let root = output.pop().ok_or_else(|| Error::parse(query, "empty expression"))?;
        if !output.is_empty() {
            return Err(Error::parse(query, "dangling operands"));
        }
        Ok(root.into_filter())
    }

    fn parse_term(
        &self,
        key: Option<&str>,
        value: &str,
        raw: &str,
        resolving: &mut Vec<String>,
    ) -> Result<Box<dyn Filter>> {
        let Some(key) = key else {
            if let Some(name) = value.strip_prefix('@') {
                return self.resolve(name, resolving);
            }
            if value.is_empty() {
                return Err(Error::parse(raw, "empty search term"));
            }
            return Ok(Box::new(TextFilter::new(value)));
        };

        if value.is_empty() {
            return Err(Error::parse(raw, "missing value"));
        }

        let key = key.to_ascii_lowercase();
        let filter: Box<dyn Filter> = match key.as_str() {
            "is" => match value.to_ascii_lowercase().as_str() {
                "unread" => Box::new(StatusFilter::unread()),
                "read" => Box::new(StatusFilter::read()),
                _ => return Err(Error::parse(raw, "expected read or unread")),
            },
            "repo" | "repository" => Box::new(RepoFilter::new(value)?),
            "org" | "organization" => Box::new(OrgFilter::new(value)?),
            "type" => Box::new(TypeFilter::new(value)),
            "reason" => Box::new(ReasonFilter::new(value)),
            "updated" | "since" => Box::new(parse_time(value, raw, Utc::now())?),
            "score" => Box::new(self.parse_score(value, raw)?),
            field => Box::new(RegexFilter::new(field, value)?),
        };
        Ok(filter)
    }

    fn resolve(&self, name: &str, resolving: &mut Vec<String>) -> Result<Box<dyn Filter>> {
        if name.is_empty() {
            return Err(Error::parse("@", "missing filter name"));
        }
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::ReferenceError(format!("no filter store to resolve @{}", name)))?;

        if resolving.iter().any(|n| n == name) {
            return Err(Error::ReferenceError(format!(
                "@{} refers to itself via {}",
                name,
                resolving
                    .iter()
                    .map(|n| format!("@{}", n))
                    .collect::<Vec<_>>()
                    .join(" -> ")
            )));
        }

        let expression = store.lookup(name)?;
        resolving.push(name.to_string());
        let result = self.parse_expression(&expression, resolving);
        resolving.pop();
        result
    }

    fn parse_score(&self, value: &str, raw: &str) -> Result<ScoreFilter> {
        let (op, number) = [">=", "<=", ">", "<"]
            .iter()
            .find_map(|op| value.strip_prefix(op).map(|rest| (*op, rest)))
            .unwrap_or(("", value));

        let n: i32 = number
            .trim()
            .parse()
            .ok()
            .filter(|n| (0..=100).contains(n))
            .ok_or_else(|| Error::parse(raw, "score must be a whole number from 0 to 100"))?;

        let (min, max) = match op {
            ">=" => (Some(n), None),
            ">" => (Some(n + 1), None),
            "<=" => (None, Some(n)),
            "<" => (None, Some(n - 1)),
            _ => (Some(n), Some(n)),
        };
        Ok(ScoreFilter::range(min, max, Arc::clone(&self.scorer)))
    }
}

fn push_operator(op: Op, ops: &mut Vec<Op>, output: &mut Vec<Expr>) -> Result<()> {
    // Left-associative: pop everything that binds at least as tightly
    while let Some(&top) = ops.last() {
        if top == Op::LParen || top.precedence() < op.precedence() {
            break;
        }
        ops.pop();
        reduce(top, output)?;
    }
    ops.push(op);
    Ok(())
}

fn reduce(op: Op, output: &mut Vec<Expr>) -> Result<()> {
    let missing = || Error::parse(op.as_str(), "missing operand");

    let expr = match op {
        Op::Not => Expr::Not(Box::new(output.pop().ok_or_else(missing)?)),
        Op::And | Op::Or => {
            let right = output.pop().ok_or_else(missing)?;
            let left = output.pop().ok_or_else(missing)?;
            Expr::join(op, left, right)
        }
        Op::LParen => return Err(Error::parse("(", "unbalanced parentheses")),
    };
    output.push(expr);
    Ok(())
}

const TIME_HELP: &str = "expected >Nh, <Nd, Nw, an RFC 3339 timestamp or YYYY-MM-DD";

/// `>2d` = within the last two days, `<1w` = older than a week,
/// `2024-05-01` / `>2024-05-01T10:00:00Z` = on or after, `<...` = before
fn parse_time(value: &str, raw: &str, now: DateTime<Utc>) -> Result<TimeFilter> {
    let (older, rest) = match value.as_bytes().first() {
        Some(b'<') => (true, &value[1..]),
        Some(b'>') => (false, &value[1..]),
        _ => (false, value),
    };

    let cutoff = match relative(rest) {
        Some(amount) => amount
            .and_then(|delta| now.checked_sub_signed(delta))
            .ok_or_else(|| Error::parse(raw, "duration out of range"))?,
        None => absolute(rest).ok_or_else(|| Error::parse(raw, TIME_HELP))?,
    };

    Ok(if older {
        TimeFilter::before(cutoff)
    } else {
        TimeFilter::since(cutoff)
    })
}

/// `Some(None)` means it looked like a duration but didn't fit
fn relative(value: &str) -> Option<Option<TimeDelta>> {
    let unit = value.chars().last()?;
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let amount: i64 = match digits.parse() {
        Ok(amount) => amount,
        Err(_) => return Some(None),
    };
    match unit {
        'h' | 'H' => Some(TimeDelta::try_hours(amount)),
        'd' | 'D' => Some(TimeDelta::try_days(amount)),
        'w' | 'W' => Some(TimeDelta::try_weeks(amount)),
        _ => None,
    }
}

fn absolute(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::store::MockFilterStore;
    use chrono::{Duration, TimeZone};
    use mockall::predicate::eq;
    use notifscout_api::{Notification, NotificationReason, SubjectType};

    fn parse(query: &str) -> Box<dyn Filter> {
        QueryParser::new().parse(query).unwrap()
    }

    fn parse_err(query: &str) -> Error {
        match QueryParser::new().parse(query) {
            Ok(filter) => panic!("{:?} parsed as {}", query, filter.describe()),
            Err(e) => e,
        }
    }

    fn notification(repo: &str, subject_type: SubjectType, unread: bool) -> Notification {
        Notification::new(
            "1",
            repo,
            subject_type,
            "Fix the flaky test",
            NotificationReason::Mention,
            unread,
            Utc::now() - Duration::hours(3),
        )
    }

    #[test]
    fn test_empty_is_all() {
        assert_eq!(parse("").describe(), "all");
        assert_eq!(parse("   ").describe(), "all");
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse("is:unread OR type:pr AND repo:a/b").describe(),
            "(is:unread OR (type:PullRequest AND repo:a/b))"
        );
        assert_eq!(
            parse("NOT is:read AND type:issue").describe(),
            "(NOT is:read AND type:Issue)"
        );
        assert_eq!(
            parse("NOT (is:read OR type:issue)").describe(),
            "NOT (is:read OR type:Issue)"
        );
        assert_eq!(parse("NOT NOT is:read").describe(), "NOT NOT is:read");
    }

    #[test]
    fn test_chains_are_flattened() {
        assert_eq!(
            parse("is:unread AND type:pr AND reason:mention").describe(),
            "(is:unread AND type:PullRequest AND reason:mention)"
        );
        assert_eq!(
            parse("a OR (b OR c)").describe(),
            "(\"a\" OR \"b\" OR \"c\")"
        );
    }

    #[test]
    fn test_implicit_and() {
        assert_eq!(
            parse("is:unread repo:a/b").describe(),
            parse("is:unread AND repo:a/b").describe()
        );
        assert_eq!(
            parse("flaky NOT type:issue").describe(),
            "(\"flaky\" AND NOT type:Issue)"
        );
        assert_eq!(
            parse("(is:read) (type:pr)").describe(),
            "(is:read AND type:PullRequest)"
        );
    }

    #[test]
    fn test_leaves_apply() {
        let n = notification("rust-lang/cargo", SubjectType::PullRequest, true);

        for query in [
            "is:unread",
            "IS:Unread",
            "repo:rust-lang/*",
            "org:rust-lang",
            "type:pr",
            "reason:mention",
            "updated:>1d",
            "since:<1h",
            "title:^fix",
            "title:\"flaky test$\"",
            "FLAKY",
            "score:>=0",
            "score:<=100",
        ] {
            assert!(parse(query).apply(&n), "{} should match", query);
        }

        for query in ["is:read", "repo:tokio-rs/*", "type:issue", "updated:>1h", "milestone:.*"] {
            assert!(!parse(query).apply(&n), "{} should not match", query);
        }
    }

    #[test]
    fn test_quoted_operators_are_words() {
        let filter = parse("\"AND\" \"(\"");
        assert_eq!(filter.describe(), "(\"and\" AND \"(\")");
    }

    #[test]
    fn test_score_bounds_are_strict() {
        // Cached so every lookup sees the same total
        let cache = Arc::new(notifscout_cache::MemoryCache::new(4).unwrap());
        let scorer = Arc::new(Scorer::default().with_cache(cache));
        let parser = QueryParser::new().with_scorer(scorer.clone());
        let n = notification("a/b", SubjectType::Issue, true);
        let total = scorer.score(&n).total;

        assert!(parser.parse(&format!("score:{}", total)).unwrap().apply(&n));
        assert!(parser.parse(&format!("score:>={}", total)).unwrap().apply(&n));
        assert!(!parser.parse(&format!("score:>{}", total)).unwrap().apply(&n));
        assert!(!parser.parse(&format!("score:<{}", total)).unwrap().apply(&n));
    }

    #[test]
    fn test_errors_name_the_fragment() {
        let cases = [
            ("is:maybe", "is:maybe"),
            ("repo:[oops", "repo:[oops"),
            ("title:(", "title:"),
            ("updated:yesterday", "updated:yesterday"),
            ("score:>101", "score:>101"),
            ("score:high", "score:high"),
            ("type:", "type:"),
            ("(is:read", "("),
            ("is:read)", ")"),
            ("()", ")"),
            ("AND is:read", "AND"),
            ("is:read OR", "OR"),
            ("NOT", "NOT"),
            ("\"open", "\"open"),
            ("\"", "\""),
            ("is:read title:\"half open", "\"half open"),
        ];

        for (query, fragment) in cases {
            match parse_err(query) {
                Error::ParseError { fragment: got, .. } => {
                    assert_eq!(got, fragment, "wrong fragment for {:?}", query)
                }
                other => panic!("{:?} gave {:?}", query, other),
            }
        }
    }

    #[test]
    fn test_relative_and_absolute_times() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let at = |hours: i64| {
            Notification::new(
                "1",
                "a/b",
                SubjectType::Issue,
                "t",
                NotificationReason::Mention,
                true,
                now - Duration::hours(hours),
            )
        };

        let recent = parse_time(">2d", "updated:>2d", now).unwrap();
        assert!(recent.apply(&at(47)));
        assert!(!recent.apply(&at(49)));

        let old = parse_time("<1w", "updated:<1w", now).unwrap();
        assert!(old.apply(&at(24 * 8)));
        assert!(!old.apply(&at(24 * 6)));

        let after = parse_time("2025-03-10", "since:2025-03-10", now).unwrap();
        assert!(after.apply(&at(11)));
        assert!(!after.apply(&at(13)));

        let before = parse_time("<2025-03-10T06:00:00Z", "", now).unwrap();
        assert!(before.apply(&at(7)));
        assert!(!before.apply(&at(6)));

        assert!(parse_time(">99999999999999w", "x", now).is_err());
    }

    #[test]
    fn test_named_filters_expand() {
        let mut store = MockFilterStore::new();
        store
            .expect_lookup()
            .with(eq("mine"))
            .returning(|_| Ok("is:unread AND @rusty".to_string()));
        store
            .expect_lookup()
            .with(eq("rusty"))
            .returning(|_| Ok("repo:rust-lang/*".to_string()));

        let parser = QueryParser::new().with_store(Arc::new(store));
        assert_eq!(
            parser.parse("@mine").unwrap().describe(),
            "(is:unread AND repo:rust-lang/*)"
        );
        assert_eq!(
            parser.parse("type:pr @rusty").unwrap().describe(),
            "(type:PullRequest AND repo:rust-lang/*)"
        );
    }

    #[test]
    fn test_reference_cycle_is_reported() {
        let mut store = MockFilterStore::new();
        store
            .expect_lookup()
            .with(eq("a"))
            .returning(|_| Ok("is:unread OR @b".to_string()));
        store
            .expect_lookup()
            .with(eq("b"))
            .returning(|_| Ok("@a".to_string()));

        let parser = QueryParser::new().with_store(Arc::new(store));
        assert!(matches!(parser.parse("@a"), Err(Error::ReferenceError(_))));
    }

    #[test]
    fn test_reference_without_store() {
        assert!(matches!(parse_err("@inbox"), Error::ReferenceError(_)));
    }
}
