//! Line tokenizer
//!
//! Tokenizes one line at a time. The state that has to survive from one line
//! to the next (open begin/end and begin/while rules) lives in [`RuleStack`],
//! which is passed in and handed back explicitly: line N can only be
//! tokenized with the stack produced by line N-1.

use std::sync::Arc;

use once_cell::sync::Lazy;
use onig::{Region, SearchOptions};
use regex::Regex as SimpleRegex;
use tracing::{trace, warn};

use super::rule::{resolve_back_references, CaptureTable, ClosingPattern, Pattern, Rule, RuleId, ROOT_RULE};
use super::{Grammar, TokenizeError};

/// `$1` and `${1:/downcase}` references inside scope names.
static CAPTURE_REFERENCE: Lazy<SimpleRegex> = Lazy::new(|| {
    SimpleRegex::new(r"\$(\d+)|\$\{(\d+):/(downcase|upcase)\}").expect("valid capture reference regex")
});

/// A span of one line and the scopes that apply to it.
///
/// `start` and `end` are byte offsets into the line text (without its line
/// terminator). Tokens of a line are contiguous and cover the whole line; an
/// empty line has exactly one zero-width token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub start: usize,
    pub end: usize,
    pub scopes: Vec<Arc<str>>,
}

impl Token {
    /// True when any scope of this token ends with `suffix`.
    pub fn has_scope_suffix(&self, suffix: &str) -> bool {
        self.scopes.iter().any(|scope| scope.ends_with(suffix))
    }
}

/// Result of tokenizing one line.
#[derive(Debug, Clone)]
pub struct LineTokens {
    pub tokens: Vec<Token>,
    /// State to feed into the next line.
    pub rule_stack: RuleStack,
}

#[derive(Debug, Clone)]
struct StackFrame {
    rule: RuleId,
    /// Scopes for text inside the rule, `contentName` included.
    scopes: Vec<Arc<str>>,
    /// How many of `scopes` belong to the rule's `name` (and its parents).
    name_len: usize,
    closing: Option<Pattern>,
    /// Position on the current line where the frame was pushed.
    enter_pos: Option<usize>,
    /// Where `\G` may match while this frame is on top: the end of its
    /// begin match on the line it was pushed, column 0 of later lines only if
    /// that match consumed the line break.
    anchor: Option<usize>,
    begin_captured_eol: bool,
}

impl PartialEq for StackFrame {
    fn eq(&self, other: &Self) -> bool {
        self.rule == other.rule
            && self.scopes == other.scopes
            && self.name_len == other.name_len
            && self.begin_captured_eol == other.begin_captured_eol
            && self.closing.as_ref().map(|p| &p.source) == other.closing.as_ref().map(|p| &p.source)
    }
}

/// Scanner state carried from one line to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleStack {
    frames: Vec<StackFrame>,
}

impl RuleStack {
    /// State before the first line of a document.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Number of open rules, the grammar root included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn top(&self) -> &StackFrame {
        self.frames.last().expect("rule stack always holds the root frame while tokenizing")
    }

    fn pop_unless_root(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }
}

/// Collects contiguous tokens; `produce` closes the span since the last call.
struct TokenSink {
    tokens: Vec<Token>,
    last_end: usize,
}

impl TokenSink {
    fn new() -> Self {
        Self { tokens: Vec::new(), last_end: 0 }
    }

    fn produce(&mut self, scopes: &[Arc<str>], end: usize) {
        if end <= self.last_end {
            return;
        }
        self.tokens.push(Token {
            start: self.last_end,
            end,
            scopes: scopes.to_vec(),
        });
        self.last_end = end;
    }

    /// Drops the synthetic trailing newline from the token list.
    fn finish(self, line_len: usize) -> Vec<Token> {
        if line_len == 0 {
            let scopes = self.tokens.last().map(|t| t.scopes.clone()).unwrap_or_default();
            return vec![Token { start: 0, end: 0, scopes }];
        }
        self.tokens
            .into_iter()
            .filter(|t| t.start < line_len)
            .map(|mut t| {
                t.end = t.end.min(line_len);
                t
            })
            .collect()
    }
}

enum Target {
    Closing,
    Rule(RuleId),
}

struct Found {
    target: Target,
    region: Region,
}

impl Found {
    fn span(&self) -> (usize, usize) {
        self.region.pos(0).unwrap_or((0, 0))
    }
}

impl Grammar {
    /// Tokenizes `line` (without its terminator) starting from `state`.
    pub fn tokenize_line(&self, line: &str, state: &RuleStack) -> Result<LineTokens, TokenizeError> {
        // Patterns are written against lines that still end in `\n`.
        let text = format!("{line}\n");
        let text_len = text.len();

        let mut stack = state.clone();
        let first_line = stack.frames.is_empty();
        if first_line {
            stack.frames.push(StackFrame {
                rule: ROOT_RULE,
                scopes: vec![Arc::clone(&self.scope)],
                name_len: 1,
                closing: None,
                enter_pos: None,
                anchor: None,
                begin_captured_eol: false,
            });
        }
        for frame in &mut stack.frames {
            frame.enter_pos = None;
            frame.anchor = frame.begin_captured_eol.then_some(0);
        }

        let mut sink = TokenSink::new();
        let mut pos = self.check_while_conditions(&text, &mut stack, &mut sink)?;

        // Each iteration either advances, pushes, or pops; the budget only
        // trips on grammars that keep pushing zero-width rules.
        let mut budget = text_len * 4 + 64;
        while pos < text_len {
            if budget == 0 {
                warn!("Tokenizer made no progress on line {:?}, giving up on the rest of it", line);
                sink.produce(&stack.top().scopes, text_len);
                break;
            }
            budget -= 1;

            let Some(found) = self.find_next(&text, pos, &stack, first_line)? else {
                sink.produce(&stack.top().scopes, text_len);
                break;
            };
            let (start, end) = found.span();
            let advanced = end > pos;
            sink.produce(&stack.top().scopes, start);

            match found.target {
                Target::Closing => {
                    let frame = stack.frames.pop().expect("closing pattern implies a pushed frame");
                    let name_scopes = &frame.scopes[..frame.name_len];
                    if let Rule::BeginEnd { end_captures, .. } = &self.rules[frame.rule] {
                        handle_captures(&text, name_scopes, end_captures, &found.region, &mut sink);
                    }
                    sink.produce(name_scopes, end);
                    if !advanced && frame.enter_pos == Some(pos) {
                        warn!("Grammar pushed and popped rule {} without advancing", frame.rule);
                        stack.frames.push(frame);
                        sink.produce(&stack.top().scopes, text_len);
                        break;
                    }
                }
                Target::Rule(id) => {
                    let parent = stack.top().scopes.clone();
                    match &self.rules[id] {
                        Rule::Match { name, captures, .. } => {
                            let scopes = push_scopes(&parent, name.as_deref(), &text, &found.region);
                            handle_captures(&text, &scopes, captures, &found.region, &mut sink);
                            sink.produce(&scopes, end);
                            if !advanced {
                                warn!("Grammar is not advancing on zero-width match of rule {}", id);
                                stack.pop_unless_root();
                                sink.produce(&stack.top().scopes, text_len);
                                break;
                            }
                        }
                        Rule::BeginEnd { name, content_name, begin_captures, end: closing, .. }
                        | Rule::BeginWhile { name, content_name, begin_captures, while_: closing, .. } => {
                            let name_scopes = push_scopes(&parent, name.as_deref(), &text, &found.region);
                            handle_captures(&text, &name_scopes, begin_captures, &found.region, &mut sink);
                            sink.produce(&name_scopes, end);

                            let scopes = push_scopes(&name_scopes, content_name.as_deref(), &text, &found.region);
                            let closing = resolve_closing(closing, &text, &found.region)?;
                            let repeated = stack
                                .frames
                                .iter()
                                .any(|frame| frame.rule == id && frame.enter_pos == Some(pos));
                            if !advanced && repeated {
                                warn!("Grammar pushed rule {} twice at the same position", id);
                                sink.produce(&stack.top().scopes, text_len);
                                break;
                            }
                            stack.frames.push(StackFrame {
                                rule: id,
                                name_len: name_scopes.len(),
                                scopes,
                                closing: Some(closing),
                                enter_pos: Some(pos),
                                anchor: Some(end),
                                begin_captured_eol: end == text_len,
                            });
                        }
                        Rule::Empty | Rule::Group { .. } => {}
                    }
                }
            }

            if advanced {
                pos = end;
            }
        }

        if sink.last_end < text_len {
            sink.produce(&stack.top().scopes, text_len);
        }
        let tokens = sink.finish(line.len());
        trace!("Tokenized line into {} tokens, stack depth {}", tokens.len(), stack.depth());
        Ok(LineTokens { tokens, rule_stack: stack })
    }

    /// Re-checks every open begin/while rule against the start of a new line,
    /// popping the first one whose condition fails together with everything
    /// above it. Returns the position where regular scanning resumes.
    fn check_while_conditions(
        &self,
        text: &str,
        stack: &mut RuleStack,
        sink: &mut TokenSink,
    ) -> Result<usize, TokenizeError> {
        let mut pos = 0;
        let mut anchor = stack.top().anchor;
        let mut index = 1;
        while index < stack.frames.len() {
            let frame = &stack.frames[index];
            if !matches!(self.rules[frame.rule], Rule::BeginWhile { .. }) {
                index += 1;
                continue;
            }
            let Some(pattern) = frame.closing.as_ref() else {
                index += 1;
                continue;
            };

            let mut region = Region::new();
            let matched = pattern
                .regex(false, anchor == Some(pos))
                .search_with_options(text, pos, text.len(), SearchOptions::SEARCH_OPTION_NONE, Some(&mut region))
                .is_some();
            if !matched {
                trace!("While condition of rule {} failed, closing it", frame.rule);
                stack.frames.truncate(index);
                break;
            }

            let (start, end) = region.pos(0).unwrap_or((pos, pos));
            let scopes = frame.scopes.clone();
            sink.produce(&scopes, start);
            if let Rule::BeginWhile { while_captures, .. } = &self.rules[frame.rule] {
                handle_captures(text, &scopes, while_captures, &region, sink);
            }
            sink.produce(&scopes, end);
            if end > pos {
                pos = end;
                anchor = Some(end);
            }
            index += 1;
        }
        if let Some(top) = stack.frames.last_mut() {
            top.anchor = anchor;
        }
        Ok(pos)
    }

    /// Finds the earliest match among the candidates of the top frame. Ties
    /// go to the candidate listed first; the closing pattern of a begin/end
    /// rule is listed first unless `applyEndPatternLast` is set.
    fn find_next(
        &self,
        text: &str,
        pos: usize,
        stack: &RuleStack,
        first_line: bool,
    ) -> Result<Option<Found>, TokenizeError> {
        let top = stack.top();
        let rule = &self.rules[top.rule];
        let allow_g = top.anchor == Some(pos);

        let (closing_first, closing_last) = match rule {
            Rule::BeginEnd { apply_end_pattern_last, .. } => {
                if *apply_end_pattern_last {
                    (None, top.closing.as_ref())
                } else {
                    (top.closing.as_ref(), None)
                }
            }
            _ => (None, None),
        };

        let mut best: Option<Found> = None;
        let consider = |pattern: &Pattern, target: Target, best: &mut Option<Found>| -> bool {
            let mut region = Region::new();
            let Some(start) = pattern.regex(first_line, allow_g).search_with_options(
                text,
                pos,
                text.len(),
                SearchOptions::SEARCH_OPTION_NONE,
                Some(&mut region),
            ) else {
                return false;
            };
            let better = best.as_ref().map(|b| start < b.span().0).unwrap_or(true);
            if better {
                *best = Some(Found { target, region });
            }
            start == pos
        };

        if let Some(pattern) = closing_first {
            if consider(pattern, Target::Closing, &mut best) {
                return Ok(best);
            }
        }
        for &candidate in rule.candidates() {
            let pattern = match &self.rules[candidate] {
                Rule::Match { pattern, .. } => pattern,
                Rule::BeginEnd { begin, .. } | Rule::BeginWhile { begin, .. } => begin,
                Rule::Empty | Rule::Group { .. } => continue,
            };
            if consider(pattern, Target::Rule(candidate), &mut best) {
                return Ok(best);
            }
        }
        if let Some(pattern) = closing_last {
            consider(pattern, Target::Closing, &mut best);
        }
        Ok(best)
    }
}

fn resolve_closing(closing: &ClosingPattern, text: &str, region: &Region) -> Result<Pattern, TokenizeError> {
    match closing {
        ClosingPattern::Static(pattern) => Ok(pattern.clone()),
        ClosingPattern::BackReferenced(source) => {
            let captured: Vec<Option<&str>> = (0..region.len())
                .map(|i| region.pos(i).map(|(s, e)| &text[s..e]))
                .collect();
            let resolved = resolve_back_references(source, &captured);
            Pattern::compile(&resolved).map_err(|e| TokenizeError::DynamicPattern {
                pattern: resolved,
                message: e.to_string(),
            })
        }
    }
}

/// Appends the scopes named by `name` (several may be space separated) to
/// `parent`, substituting capture references.
fn push_scopes(parent: &[Arc<str>], name: Option<&str>, text: &str, region: &Region) -> Vec<Arc<str>> {
    let mut scopes = parent.to_vec();
    let Some(name) = name else {
        return scopes;
    };
    let name = if name.contains('$') {
        CAPTURE_REFERENCE
            .replace_all(name, |caps: &regex::Captures<'_>| {
                let index = caps.get(1).or_else(|| caps.get(2)).and_then(|m| m.as_str().parse::<usize>().ok());
                let captured = index
                    .and_then(|i| region.pos(i))
                    .map(|(s, e)| text[s..e].trim_start_matches('.'))
                    .unwrap_or_default();
                match caps.get(3).map(|m| m.as_str()) {
                    Some("downcase") => captured.to_lowercase(),
                    Some("upcase") => captured.to_uppercase(),
                    _ => captured.to_string(),
                }
            })
            .into_owned()
    } else {
        name.to_string()
    };
    scopes.extend(name.split_whitespace().map(Arc::from));
    scopes
}

/// Emits tokens for named capture groups. Nested groups stack their scopes
/// on top of the group that encloses them.
fn handle_captures(text: &str, base: &[Arc<str>], captures: &CaptureTable, region: &Region, sink: &mut TokenSink) {
    if captures.is_empty() {
        return;
    }
    let Some((_, max_end)) = region.pos(0) else {
        return;
    };

    let mut open: Vec<(Vec<Arc<str>>, usize)> = Vec::new();
    for (index, name) in captures.iter().enumerate().take(region.len()) {
        let Some(name) = name else {
            continue;
        };
        let Some((start, end)) = region.pos(index) else {
            continue;
        };
        if start == end {
            continue;
        }
        if start > max_end {
            break;
        }

        while let Some((scopes, close)) = open.last() {
            if *close > start {
                break;
            }
            sink.produce(scopes, *close);
            open.pop();
        }

        let parent = open.last().map(|(scopes, _)| scopes.as_slice()).unwrap_or(base);
        sink.produce(parent, start);
        let scopes = push_scopes(parent, Some(name), text, region);
        open.push((scopes, end));
    }

    while let Some((scopes, close)) = open.pop() {
        sink.produce(&scopes, close);
    }
}
