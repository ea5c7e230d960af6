//! LaTeX element tree parsing
//!
//! Produces the macro/element tree the document builder walks. This is not a
//! TeX implementation: it tokenizes macros with their bracket/brace argument
//! groups, matches `\begin`/`\end` environment pairs (keeping raw source
//! spans for fallback rendering), and nests elements under sectioning macros.

/// A parsed LaTeX node
#[derive(Debug, Clone)]
pub enum TexNode {
    Text(String),
    Macro(MacroNode),
    Environment(EnvNode),
}

/// A macro invocation with its argument groups
#[derive(Debug, Clone)]
pub struct MacroNode {
    pub name: String,
    pub star: bool,
    /// `[...]` option groups, raw inner text
    pub options: Vec<String>,
    /// `{...}` argument groups, raw inner text
    pub args: Vec<String>,
}

impl MacroNode {
    /// Last braced argument, the conventional "content" argument
    pub fn main_arg(&self) -> Option<&str> {
        self.args.last().map(|s| s.as_str())
    }

    /// Reassembled source form, used for textual fallback
    pub fn raw(&self) -> String {
        let mut out = format!("\\{}", self.name);
        if self.star {
            out.push('*');
        }
        for opt in &self.options {
            out.push('[');
            out.push_str(opt);
            out.push(']');
        }
        for arg in &self.args {
            out.push('{');
            out.push_str(arg);
            out.push('}');
        }
        out
    }
}

/// A `\begin{...}`/`\end{...}` environment
#[derive(Debug, Clone)]
pub struct EnvNode {
    pub name: String,
    pub children: Vec<TexNode>,
    /// Raw source including the begin/end markers
    pub raw: String,
}

/// Parse LaTeX source into a flat node list.
///
/// Comments are stripped first (unescaped `%` to end of line). Brace groups
/// are transparent: their children are spliced into the surrounding list.
pub fn parse(source: &str) -> Vec<TexNode> {
    let cleaned = strip_comments(source);
    let chars: Vec<char> = cleaned.chars().collect();
    let mut pos = 0;
    parse_nodes(&chars, &mut pos, chars.len())
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut prev_backslash = false;
    let mut in_comment = false;
    for c in source.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
                out.push(c);
            }
            continue;
        }
        if c == '%' && !prev_backslash {
            in_comment = true;
            continue;
        }
        prev_backslash = c == '\\' && !prev_backslash;
        out.push(c);
    }
    out
}

fn parse_nodes(chars: &[char], pos: &mut usize, end: usize) -> Vec<TexNode> {
    let mut nodes = Vec::new();
    let mut text = String::new();

    while *pos < end {
        match chars[*pos] {
            '\\' => {
                flush_text(&mut text, &mut nodes);
                parse_command(chars, pos, end, &mut nodes);
            }
            '{' => {
                flush_text(&mut text, &mut nodes);
                let inner_end = matching_brace(chars, *pos, end);
                *pos += 1;
                let mut inner = parse_nodes(chars, pos, inner_end);
                nodes.append(&mut inner);
                *pos = (inner_end + 1).min(end);
            }
            '}' => {
                // Stray close brace; ignore it rather than abort
                *pos += 1;
            }
            c => {
                text.push(c);
                *pos += 1;
            }
        }
    }

    flush_text(&mut text, &mut nodes);
    nodes
}

fn flush_text(text: &mut String, nodes: &mut Vec<TexNode>) {
    if !text.is_empty() {
        nodes.push(TexNode::Text(std::mem::take(text)));
    }
}

fn parse_command(chars: &[char], pos: &mut usize, end: usize, nodes: &mut Vec<TexNode>) {
    let start = *pos;
    *pos += 1; // consume backslash
    if *pos >= end {
        nodes.push(TexNode::Text("\\".to_string()));
        return;
    }

    if !chars[*pos].is_ascii_alphabetic() {
        // Symbol macro (\\, \&, \%, ...)
        let name = chars[*pos].to_string();
        *pos += 1;
        nodes.push(TexNode::Macro(MacroNode {
            name,
            star: false,
            options: Vec::new(),
            args: Vec::new(),
        }));
        return;
    }

    let mut name = String::new();
    while *pos < end && chars[*pos].is_ascii_alphabetic() {
        name.push(chars[*pos]);
        *pos += 1;
    }
    let mut star = false;
    if *pos < end && chars[*pos] == '*' {
        star = true;
        *pos += 1;
    }

    if name == "begin" {
        if let Some(env_name) = read_group(chars, pos, end) {
            let body_start = *pos;
            let body_end = find_env_end(chars, *pos, end, &env_name);
            let mut inner_pos = body_start;
            let children = parse_nodes(chars, &mut inner_pos, body_end);
            // Skip past \end{name}
            *pos = skip_env_end(chars, body_end, end, &env_name);
            let raw: String = chars[start..*pos].iter().collect();
            nodes.push(TexNode::Environment(EnvNode {
                name: env_name,
                children,
                raw,
            }));
        }
        return;
    }

    if name == "end" {
        // Unmatched \end (its environment was handled textually); drop it
        let _ = read_group(chars, pos, end);
        return;
    }

    // Collect consecutive option and argument groups
    let mut options = Vec::new();
    let mut args = Vec::new();
    while *pos < end {
        match chars[*pos] {
            '[' => {
                let close = matching_bracket(chars, *pos, end);
                let inner_start = (*pos + 1).min(close);
                options.push(chars[inner_start..close].iter().collect());
                *pos = (close + 1).min(end);
            }
            '{' => {
                let close = matching_brace(chars, *pos, end);
                let inner_start = (*pos + 1).min(close);
                args.push(chars[inner_start..close].iter().collect());
                *pos = (close + 1).min(end);
            }
            _ => break,
        }
    }

    nodes.push(TexNode::Macro(MacroNode {
        name,
        star,
        options,
        args,
    }));
}

/// Read one `{...}` group, returning its trimmed inner text
fn read_group(chars: &[char], pos: &mut usize, end: usize) -> Option<String> {
    while *pos < end && chars[*pos].is_whitespace() {
        *pos += 1;
    }
    if *pos >= end || chars[*pos] != '{' {
        return None;
    }
    let close = matching_brace(chars, *pos, end);
    let inner_start = (*pos + 1).min(close);
    let inner: String = chars[inner_start..close].iter().collect();
    *pos = (close + 1).min(end);
    Some(inner.trim().to_string())
}

/// Index of the brace closing the one at `open`, or `end` if unbalanced
fn matching_brace(chars: &[char], open: usize, end: usize) -> usize {
    let mut depth = 0;
    let mut prev_backslash = false;
    for (i, &c) in chars.iter().enumerate().take(end).skip(open) {
        if !prev_backslash {
            if c == '{' {
                depth += 1;
            } else if c == '}' {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
        }
        prev_backslash = c == '\\' && !prev_backslash;
    }
    end.saturating_sub(1).max(open)
}

/// Index of the `]` closing the bracket at `open`, or `end` if unbalanced
fn matching_bracket(chars: &[char], open: usize, end: usize) -> usize {
    let mut brace_depth = 0;
    for (i, &c) in chars.iter().enumerate().take(end).skip(open + 1) {
        match c {
            '{' => brace_depth += 1,
            '}' => brace_depth -= 1,
            ']' if brace_depth <= 0 => return i,
            _ => {}
        }
    }
    end.saturating_sub(1).max(open)
}

/// Start index of the `\end{name}` matching the environment whose body
/// begins at `from`, accounting for nested environments of the same name.
fn find_env_end(chars: &[char], from: usize, end: usize, name: &str) -> usize {
    let begin_marker: Vec<char> = format!("\\begin{{{name}}}").chars().collect();
    let end_marker: Vec<char> = format!("\\end{{{name}}}").chars().collect();
    let mut depth = 0;
    let mut i = from;
    while i < end {
        if starts_with_at(chars, i, &end_marker) {
            if depth == 0 {
                return i;
            }
            depth -= 1;
            i += end_marker.len();
        } else if starts_with_at(chars, i, &begin_marker) {
            depth += 1;
            i += begin_marker.len();
        } else {
            i += 1;
        }
    }
    end
}

fn skip_env_end(chars: &[char], at: usize, end: usize, name: &str) -> usize {
    let end_marker: Vec<char> = format!("\\end{{{name}}}").chars().collect();
    if starts_with_at(chars, at, &end_marker) {
        at + end_marker.len()
    } else {
        at
    }
}

fn starts_with_at(chars: &[char], at: usize, pattern: &[char]) -> bool {
    chars.len() >= at + pattern.len() && chars[at..at + pattern.len()] == *pattern
}

// ---------------------------------------------------------------------------
// Sectioning pass

/// A node list restructured under its sectioning macros
#[derive(Debug, Clone)]
pub enum Element {
    Section(SectionNode),
    Node(TexNode),
}

/// A section heading with the elements that follow it, up to the next
/// heading of the same or lower level
#[derive(Debug, Clone)]
pub struct SectionNode {
    pub level: u8,
    /// Raw title argument; the builder encodes it
    pub title: String,
    pub children: Vec<Element>,
}

fn section_level(name: &str) -> Option<u8> {
    match name {
        "section" => Some(1),
        "subsection" => Some(2),
        "subsubsection" => Some(3),
        _ => None,
    }
}

/// Nest a flat node list under its `*section` macros by level
pub fn sectionize(nodes: Vec<TexNode>) -> Vec<Element> {
    let mut result: Vec<Element> = Vec::new();
    let mut stack: Vec<SectionNode> = Vec::new();

    fn close_to_level(result: &mut Vec<Element>, stack: &mut Vec<SectionNode>, level: u8) {
        while stack.last().is_some_and(|s| s.level >= level) {
            let done = stack.pop().expect("non-empty stack");
            match stack.last_mut() {
                Some(parent) => parent.children.push(Element::Section(done)),
                None => result.push(Element::Section(done)),
            }
        }
    }

    for node in nodes {
        let level = match &node {
            TexNode::Macro(m) => section_level(&m.name),
            _ => None,
        };
        match level {
            Some(level) => {
                close_to_level(&mut result, &mut stack, level);
                let title = match &node {
                    TexNode::Macro(m) => m.main_arg().unwrap_or_default().to_string(),
                    _ => String::new(),
                };
                stack.push(SectionNode {
                    level,
                    title,
                    children: Vec::new(),
                });
            }
            None => match stack.last_mut() {
                Some(top) => top.children.push(Element::Node(node)),
                None => result.push(Element::Node(node)),
            },
        }
    }

    close_to_level(&mut result, &mut stack, 0);
    result
}

/// Find the body of the `document` environment, falling back to the whole
/// node list for fragments without a preamble.
pub fn document_body(nodes: &[TexNode]) -> Vec<TexNode> {
    for node in nodes {
        if let TexNode::Environment(env) = node {
            if env.name == "document" {
                return env.children.clone();
            }
        }
    }
    nodes.to_vec()
}
