//! Compiled grammar rules
//!
//! A raw grammar is flattened into an arena of [`Rule`]s addressed by
//! [`RuleId`]. Includes are resolved once at compile time, so the tokenizer
//! never looks anything up by name.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use onig::{Regex, RegexOptions, Syntax};
use regex::Regex as SimpleRegex;
use tracing::{debug, trace};

use super::raw::{RawCaptures, RawGrammar, RawRule};
use super::GrammarLoadError;

pub(crate) type RuleId = usize;

/// Id of the grammar's top-level pattern group.
pub(crate) const ROOT_RULE: RuleId = 0;

/// Back-references to begin captures inside an `end`/`while` pattern.
static BACK_REFERENCE: Lazy<SimpleRegex> =
    Lazy::new(|| SimpleRegex::new(r"\\(\d+)").expect("valid back-reference regex"));

/// Pattern that never matches; stands in for a `begin` rule without `end`.
const NEVER_MATCHES: &str = "\u{FFFF}";

/// A compiled Oniguruma regex plus the source it came from.
#[derive(Clone)]
pub(crate) struct Pattern {
    pub source: Arc<str>,
    regex: Arc<Regex>,
    /// Compiled only when the source uses `\A` or `\G`.
    anchors: Option<Arc<AnchorVariants>>,
}

/// The same pattern with `\A`, `\G` or both replaced by a never-matching
/// character. `\A` is only live on the first line of a document and `\G`
/// only at the current anchor position.
struct AnchorVariants {
    without_a: Regex,
    without_g: Regex,
    without_both: Regex,
}

fn compile_regex(source: &str) -> Result<Regex, onig::Error> {
    Regex::with_options(source, RegexOptions::REGEX_OPTION_CAPTURE_GROUP, Syntax::default())
}

/// Byte offsets of every `\<letter>` escape in `source`. An escaped
/// backslash (`\\`) never starts one.
fn escape_offsets(source: &str, letter: char) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut chars = source.char_indices();
    while let Some((index, c)) = chars.next() {
        if c != '\\' {
            continue;
        }
        if let Some((_, next)) = chars.next() {
            if next == letter {
                offsets.push(index);
            }
        }
    }
    offsets
}

/// Replaces the two-byte escapes at `offsets` with [`NEVER_MATCHES`].
fn disable_escapes(source: &str, offsets: &[usize]) -> String {
    let mut output = String::with_capacity(source.len());
    let mut copied = 0;
    for &offset in offsets {
        output.push_str(&source[copied..offset]);
        output.push_str(NEVER_MATCHES);
        copied = offset + 2;
    }
    output.push_str(&source[copied..]);
    output
}

impl Pattern {
    pub fn compile(source: &str) -> Result<Self, onig::Error> {
        let regex = compile_regex(source)?;
        let a = escape_offsets(source, 'A');
        let g = escape_offsets(source, 'G');
        let anchors = if a.is_empty() && g.is_empty() {
            None
        } else {
            let mut both: Vec<usize> = a.iter().chain(&g).copied().collect();
            both.sort_unstable();
            Some(Arc::new(AnchorVariants {
                without_a: compile_regex(&disable_escapes(source, &a))?,
                without_g: compile_regex(&disable_escapes(source, &g))?,
                without_both: compile_regex(&disable_escapes(source, &both))?,
            }))
        };
        Ok(Self {
            source: Arc::from(source),
            regex: Arc::new(regex),
            anchors,
        })
    }

    /// The regex to run given whether `\A` and `\G` may match here.
    pub fn regex(&self, allow_a: bool, allow_g: bool) -> &Regex {
        match (&self.anchors, allow_a, allow_g) {
            (None, _, _) | (Some(_), true, true) => &self.regex,
            (Some(v), false, true) => &v.without_a,
            (Some(v), true, false) => &v.without_g,
            (Some(v), false, false) => &v.without_both,
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

/// An `end` or `while` pattern. When it refers back to the begin captures it
/// can only be compiled once the begin match is known.
#[derive(Debug, Clone)]
pub(crate) enum ClosingPattern {
    Static(Pattern),
    BackReferenced(Arc<str>),
}

impl ClosingPattern {
    fn compile(source: &str) -> Result<Self, GrammarLoadError> {
        if BACK_REFERENCE.is_match(source) {
            Ok(Self::BackReferenced(Arc::from(source)))
        } else {
            Pattern::compile(source)
                .map(Self::Static)
                .map_err(|e| GrammarLoadError::invalid_pattern(source, e))
        }
    }
}

/// Scope names attached to capture groups, indexed by group number.
pub(crate) type CaptureTable = Vec<Option<Arc<str>>>;

#[derive(Debug)]
pub(crate) enum Rule {
    /// Disabled rule or an include that could not be resolved.
    Empty,
    /// A bare list of patterns (the grammar root, or a repository entry
    /// that only groups other rules).
    Group {
        candidates: Vec<RuleId>,
    },
    Match {
        name: Option<Arc<str>>,
        pattern: Pattern,
        captures: CaptureTable,
    },
    BeginEnd {
        name: Option<Arc<str>>,
        content_name: Option<Arc<str>>,
        begin: Pattern,
        begin_captures: CaptureTable,
        end: ClosingPattern,
        end_captures: CaptureTable,
        apply_end_pattern_last: bool,
        candidates: Vec<RuleId>,
    },
    BeginWhile {
        name: Option<Arc<str>>,
        content_name: Option<Arc<str>>,
        begin: Pattern,
        begin_captures: CaptureTable,
        while_: ClosingPattern,
        while_captures: CaptureTable,
        candidates: Vec<RuleId>,
    },
}

impl Rule {
    /// Matchable rules tried while this rule is on top of the stack.
    pub fn candidates(&self) -> &[RuleId] {
        match self {
            Rule::Group { candidates }
            | Rule::BeginEnd { candidates, .. }
            | Rule::BeginWhile { candidates, .. } => candidates,
            Rule::Empty | Rule::Match { .. } => &[],
        }
    }
}

type Repository = HashMap<String, RawRule>;

/// Turns a [`RawGrammar`] into a rule arena.
pub(crate) struct Compiler<'a> {
    grammar: &'a RawGrammar,
    rules: Vec<Rule>,
    /// Direct children of each rule before group flattening.
    children: Vec<Vec<RuleId>>,
    compiled: HashMap<*const RawRule, RuleId>,
}

impl<'a> Compiler<'a> {
    pub fn new(grammar: &'a RawGrammar) -> Self {
        Self {
            grammar,
            rules: Vec::new(),
            children: Vec::new(),
            compiled: HashMap::new(),
        }
    }

    pub fn compile(mut self) -> Result<Vec<Rule>, GrammarLoadError> {
        let root = self.allocate();
        debug_assert_eq!(root, ROOT_RULE);

        let grammar = self.grammar;
        let repositories = vec![&grammar.repository];
        let mut root_children = Vec::with_capacity(grammar.patterns.len());
        for raw in &grammar.patterns {
            root_children.push(self.compile_rule(raw, &repositories)?);
        }
        self.children[root] = root_children;
        self.rules[root] = Rule::Group { candidates: Vec::new() };

        self.flatten_candidates();
        debug!(
            "Compiled grammar '{}' into {} rules",
            grammar.scope_name,
            self.rules.len()
        );
        Ok(self.rules)
    }

    fn allocate(&mut self) -> RuleId {
        self.rules.push(Rule::Empty);
        self.children.push(Vec::new());
        self.rules.len() - 1
    }

    fn compile_rule(
        &mut self,
        raw: &'a RawRule,
        repositories: &[&'a Repository],
    ) -> Result<RuleId, GrammarLoadError> {
        let key = raw as *const RawRule;
        if let Some(&id) = self.compiled.get(&key) {
            return Ok(id);
        }

        if let Some(include) = &raw.include {
            let id = self.resolve_include(include, repositories)?;
            self.compiled.insert(key, id);
            return Ok(id);
        }

        let id = self.allocate();
        self.compiled.insert(key, id);
        if raw.disabled {
            return Ok(id);
        }

        let mut scoped = repositories.to_vec();
        if let Some(own) = &raw.repository {
            scoped.push(own);
        }

        let mut children = Vec::new();
        for child in raw.patterns.iter().flatten() {
            children.push(self.compile_rule(child, &scoped)?);
        }
        self.children[id] = children;

        let name = raw.name.as_deref().map(Arc::from);
        let content_name = raw.content_name.as_deref().map(Arc::from);

        let rule = if let Some(source) = &raw.match_ {
            Rule::Match {
                name,
                pattern: compile_pattern(source)?,
                captures: capture_table(raw.captures.as_ref()),
            }
        } else if let Some(begin) = &raw.begin {
            let begin_pattern = compile_pattern(begin)?;
            let begin_captures = capture_table(raw.begin_captures.as_ref().or(raw.captures.as_ref()));
            if let Some(while_) = &raw.while_ {
                Rule::BeginWhile {
                    name,
                    content_name,
                    begin: begin_pattern,
                    begin_captures,
                    while_: ClosingPattern::compile(while_)?,
                    while_captures: capture_table(raw.while_captures.as_ref().or(raw.captures.as_ref())),
                    candidates: Vec::new(),
                }
            } else {
                let end = raw.end.as_deref().unwrap_or(NEVER_MATCHES);
                Rule::BeginEnd {
                    name,
                    content_name,
                    begin: begin_pattern,
                    begin_captures,
                    end: ClosingPattern::compile(end)?,
                    end_captures: capture_table(raw.end_captures.as_ref().or(raw.captures.as_ref())),
                    apply_end_pattern_last: raw.apply_end_pattern_last,
                    candidates: Vec::new(),
                }
            }
        } else {
            Rule::Group { candidates: Vec::new() }
        };
        self.rules[id] = rule;
        Ok(id)
    }

    fn resolve_include(
        &mut self,
        include: &str,
        repositories: &[&'a Repository],
    ) -> Result<RuleId, GrammarLoadError> {
        match include {
            "$self" | "$base" => Ok(ROOT_RULE),
            _ => {
                if let Some(name) = include.strip_prefix('#') {
                    let found = repositories.iter().rev().find_map(|repo| repo.get(name));
                    match found {
                        Some(raw) => self.compile_rule(raw, repositories),
                        None => {
                            debug!("Include '{}' not found in repository, ignoring", include);
                            Ok(self.allocate())
                        }
                    }
                } else {
                    debug!("External grammar include '{}' is not available, ignoring", include);
                    Ok(self.allocate())
                }
            }
        }
    }

    /// Expands groups so every rule carries the flat list of matchable rules
    /// to try, in priority order.
    fn flatten_candidates(&mut self) {
        for id in 0..self.rules.len() {
            let mut flat = Vec::new();
            let mut visited = HashSet::new();
            visited.insert(id);
            self.expand(&self.children[id], &mut flat, &mut visited);
            trace!("Rule {} has {} candidate patterns", id, flat.len());
            match &mut self.rules[id] {
                Rule::Group { candidates }
                | Rule::BeginEnd { candidates, .. }
                | Rule::BeginWhile { candidates, .. } => *candidates = flat,
                Rule::Empty | Rule::Match { .. } => {}
            }
        }
    }

    fn expand(&self, ids: &[RuleId], out: &mut Vec<RuleId>, visited: &mut HashSet<RuleId>) {
        for &id in ids {
            match &self.rules[id] {
                Rule::Empty => {}
                Rule::Group { .. } => {
                    if visited.insert(id) {
                        self.expand(&self.children[id], out, visited);
                    }
                }
                _ => {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
            }
        }
    }
}

fn compile_pattern(source: &str) -> Result<Pattern, GrammarLoadError> {
    Pattern::compile(source).map_err(|e| GrammarLoadError::invalid_pattern(source, e))
}

fn capture_table(raw: Option<&RawCaptures>) -> CaptureTable {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let mut table: CaptureTable = Vec::new();
    for (key, rule) in raw {
        let (Ok(index), Some(name)) = (key.parse::<usize>(), rule.name.as_deref()) else {
            continue;
        };
        if table.len() <= index {
            table.resize(index + 1, None);
        }
        table[index] = Some(Arc::from(name));
    }
    table
}

/// Escapes text captured by a begin pattern so it can be spliced into an
/// end pattern literally.
pub(crate) fn escape_for_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '-' | '\\' | '{' | '}' | '*' | '+' | '?' | '|' | '^' | '$' | '.' | ',' | '[' | ']' | '(' | ')' | '#'
        ) || c.is_whitespace()
        {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Substitutes `\N` references in a closing pattern with the escaped begin
/// captures.
pub(crate) fn resolve_back_references(source: &str, captured: &[Option<&str>]) -> String {
    BACK_REFERENCE
        .replace_all(source, |caps: &regex::Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| captured.get(index).copied().flatten())
                .map(escape_for_regex)
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(json: &str) -> Vec<Rule> {
        let raw = RawGrammar::from_json(json).unwrap();
        Compiler::new(&raw).compile().unwrap()
    }

    #[test]
    fn test_escape_offsets_skip_escaped_backslashes() {
        assert_eq!(escape_offsets(r"\A---", 'A'), vec![0]);
        assert!(escape_offsets(r"\\A", 'A').is_empty());
        assert_eq!(escape_offsets(r"\\\A", 'A'), vec![2]);
        assert_eq!(escape_offsets(r"x\Gy\G", 'G'), vec![1, 4]);
        assert_eq!(disable_escapes(r"x\Gy\G", &[1, 4]), "x\u{FFFF}y\u{FFFF}");
    }

    #[test]
    fn test_root_candidates_follow_includes() {
        let rules = compile(
            r##"{
                "scopeName": "text.test",
                "patterns": [{ "include": "#group" }, { "match": "z" }],
                "repository": {
                    "group": { "patterns": [{ "match": "x" }, { "match": "y" }] }
                }
            }"##,
        );
        assert_eq!(rules[ROOT_RULE].candidates().len(), 3);
    }

    #[test]
    fn test_recursive_self_include_terminates() {
        let rules = compile(
            r##"{
                "scopeName": "text.test",
                "patterns": [{ "include": "#block" }],
                "repository": {
                    "block": {
                        "begin": "\\{", "end": "\\}",
                        "patterns": [{ "include": "#block" }, { "include": "$self" }]
                    }
                }
            }"##,
        );
        let block = rules[ROOT_RULE].candidates()[0];
        assert_eq!(rules[block].candidates(), &[block]);
    }

    #[test]
    fn test_unknown_includes_are_dropped() {
        let rules = compile(
            r##"{
                "scopeName": "text.test",
                "patterns": [
                    { "include": "source.js" },
                    { "include": "#missing" },
                    { "match": "a" }
                ]
            }"##,
        );
        assert_eq!(rules[ROOT_RULE].candidates().len(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let raw = RawGrammar::from_json(r#"{ "scopeName": "t", "patterns": [{ "match": "(" }] }"#).unwrap();
        let err = Compiler::new(&raw).compile().unwrap_err();
        assert!(matches!(err, GrammarLoadError::InvalidPattern { .. }));
    }

    #[test]
    fn test_back_referenced_end_is_deferred() {
        let rules = compile(
            r#"{
                "scopeName": "t",
                "patterns": [{ "begin": "(`{3,})", "end": "\\1" }]
            }"#,
        );
        let fence = rules[ROOT_RULE].candidates()[0];
        assert!(matches!(
            &rules[fence],
            Rule::BeginEnd { end: ClosingPattern::BackReferenced(_), .. }
        ));
    }

    #[test]
    fn test_resolve_back_references_escapes_capture() {
        let resolved = resolve_back_references(r"^\s*\1\s*$", &[Some("```"), Some("**")]);
        assert_eq!(resolved, r"^\s*\*\*\s*$");
    }
}
