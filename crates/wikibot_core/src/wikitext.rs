const URL_SCHEMES: &[&str] = &[
    "http://", "https://", "ftp://", "ftps://", "irc://", "ircs://", "gopher://", "nntp://",
];

const TRAILING_PUNCTUATION: &[char] = &[',', ';', '.', ':', '!', '?'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Template(Template),
    ExtLink(ExtLink),
}

impl Node {
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Template(template) => template.render(),
            Self::ExtLink(link) => link.render(),
        }
    }

    pub fn is_whitespace(&self) -> bool {
        match self {
            Self::Text(text) => !text.is_empty() && text.chars().all(char::is_whitespace),
            _ => false,
        }
    }

    pub fn as_template(&self) -> Option<&Template> {
        match self {
            Self::Template(template) => Some(template),
            _ => None,
        }
    }

    pub fn as_extlink(&self) -> Option<&ExtLink> {
        match self {
            Self::ExtLink(link) => Some(link),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub params: Vec<Param>,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    // Template names compare like page titles: the first letter is
    // case-insensitive, the rest is exact, surrounding whitespace ignored.
    pub fn name_matches(&self, target: &str) -> bool {
        let mut name = self.name.trim().chars();
        let mut target = target.trim().chars();
        match (name.next(), target.next()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b) && name.as_str() == target.as_str(),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn name_starts_with(&self, prefix: &str) -> bool {
        let name = self.name.trim();
        let prefix = prefix.trim();
        let (Some(name_first), Some(prefix_first)) = (name.chars().next(), prefix.chars().next())
        else {
            return prefix.is_empty();
        };
        name_first.eq_ignore_ascii_case(&prefix_first)
            && name[name_first.len_utf8()..].starts_with(&prefix[prefix_first.len_utf8()..])
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn has(&self, key: &str) -> bool {
        self.param_index(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.param_index(key)
            .map(|index| self.params[index].value.trim())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(index) = self.param_index(key) {
            self.params[index].value = value.to_string();
            return;
        }
        if let Ok(ordinal) = key.parse::<usize>()
            && ordinal >= 1
            && self.positional_count() + 1 == ordinal
        {
            self.params.push(Param {
                key: None,
                value: value.to_string(),
            });
            return;
        }
        self.params.push(Param {
            key: Some(key.to_string()),
            value: value.to_string(),
        });
    }

    // Numeric keys address explicit `|1=` params and implicit positional
    // params interchangeably, like MediaWiki itself.
    fn param_index(&self, key: &str) -> Option<usize> {
        if let Some(index) = self
            .params
            .iter()
            .position(|param| param.key.as_deref().map(str::trim) == Some(key))
        {
            return Some(index);
        }
        if let Ok(ordinal) = key.parse::<usize>()
            && ordinal >= 1
        {
            let mut seen = 0usize;
            for (index, param) in self.params.iter().enumerate() {
                if param.key.is_none() {
                    seen += 1;
                    if seen == ordinal {
                        return Some(index);
                    }
                }
            }
        }
        None
    }

    fn positional_count(&self) -> usize {
        self.params
            .iter()
            .filter(|param| param.key.is_none())
            .count()
    }

    pub fn render(&self) -> String {
        let mut output = String::from("{{");
        output.push_str(&self.name);
        for param in &self.params {
            output.push('|');
            if let Some(key) = param.key.as_deref() {
                output.push_str(key);
                output.push('=');
            }
            output.push_str(&param.value);
        }
        output.push_str("}}");
        output
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtLink {
    pub url: String,
    // Raw text between the URL and the closing bracket, separator included.
    pub title: Option<String>,
    pub brackets: bool,
}

impl ExtLink {
    pub fn bare(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            brackets: false,
        }
    }

    pub fn render(&self) -> String {
        if self.brackets {
            let mut output = String::from("[");
            output.push_str(&self.url);
            if let Some(title) = self.title.as_deref() {
                output.push_str(title);
            }
            output.push(']');
            output
        } else {
            self.url.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    Replace { index: usize, nodes: Vec<Node> },
    Remove { index: usize },
}

impl EditOp {
    fn index(&self) -> usize {
        match self {
            Self::Replace { index, .. } => *index,
            Self::Remove { index } => *index,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Wikicode {
    nodes: Vec<Node>,
}

impl Wikicode {
    pub fn parse(content: &str) -> Self {
        Self {
            nodes: parse_nodes(content),
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn template_indices(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node, Node::Template(_)))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn extlink_indices(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node, Node::ExtLink(_)))
            .map(|(index, _)| index)
            .collect()
    }

    // First following node that is not whitespace-only text.
    pub fn adjacent_index(&self, index: usize) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, node)| !node.is_whitespace())
            .map(|(index, _)| index)
    }

    pub fn insert_after(&mut self, index: usize, node: Node) {
        self.nodes.insert(index + 1, node);
    }

    pub fn remove(&mut self, index: usize) {
        self.nodes.remove(index);
    }

    pub fn replace(&mut self, index: usize, node: Node) {
        self.nodes[index] = node;
    }

    // Ops are planned against one immutable snapshot, so they are applied in
    // descending index order to keep earlier indices stable. At most one op
    // may target a given index.
    pub fn apply(&mut self, mut ops: Vec<EditOp>) {
        ops.sort_by(|a, b| b.index().cmp(&a.index()));
        for op in ops {
            match op {
                EditOp::Replace { index, nodes } => {
                    self.nodes.splice(index..=index, nodes);
                }
                EditOp::Remove { index } => {
                    self.nodes.remove(index);
                }
            }
        }
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        for node in &self.nodes {
            output.push_str(&node.render());
        }
        output
    }
}

fn parse_nodes(content: &str) -> Vec<Node> {
    let chars = content.chars().collect::<Vec<_>>();
    let mut nodes = Vec::new();
    let mut text = String::new();
    let mut index = 0usize;

    while index < chars.len() {
        if chars[index] == '{'
            && let Some((template, next)) = parse_template(&chars, index)
        {
            flush_text(&mut nodes, &mut text);
            nodes.push(Node::Template(template));
            index = next;
            continue;
        }
        if chars[index] == '['
            && index + 1 < chars.len()
            && chars[index + 1] == '['
        {
            let next = skip_internal_link(&chars, index);
            text.extend(&chars[index..next]);
            index = next;
            continue;
        }
        if chars[index] == '['
            && let Some((link, next)) = parse_bracket_link(&chars, index)
        {
            flush_text(&mut nodes, &mut text);
            nodes.push(Node::ExtLink(link));
            index = next;
            continue;
        }
        if chars[index] == '<'
            && let Some(next) = skip_opaque_tag(&chars, index)
        {
            text.extend(&chars[index..next]);
            index = next;
            continue;
        }
        if at_bare_link_start(&chars, index)
            && let Some((link, next)) = parse_bare_link(&chars, index)
        {
            flush_text(&mut nodes, &mut text);
            nodes.push(Node::ExtLink(link));
            index = next;
            continue;
        }
        text.push(chars[index]);
        index += 1;
    }

    flush_text(&mut nodes, &mut text);
    nodes
}

fn flush_text(nodes: &mut Vec<Node>, text: &mut String) {
    if !text.is_empty() {
        nodes.push(Node::Text(std::mem::take(text)));
    }
}

fn parse_template(chars: &[char], start: usize) -> Option<(Template, usize)> {
    if start + 1 >= chars.len() || chars[start] != '{' || chars[start + 1] != '{' {
        return None;
    }
    let close = find_template_close(chars, start)?;
    let inner = chars[start + 2..close].iter().collect::<String>();

    let mut name = String::new();
    let mut params = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_name = true;
    let inner_chars = inner.chars().collect::<Vec<_>>();
    let mut index = 0usize;
    while index < inner_chars.len() {
        let ch = inner_chars[index];
        if ch == '{' && index + 1 < inner_chars.len() && inner_chars[index + 1] == '{' {
            depth += 1;
            current.push_str("{{");
            index += 2;
            continue;
        }
        if ch == '}' && index + 1 < inner_chars.len() && inner_chars[index + 1] == '}' && depth > 0 {
            depth -= 1;
            current.push_str("}}");
            index += 2;
            continue;
        }
        if ch == '|' && depth == 0 {
            if in_name {
                name = std::mem::take(&mut current);
                in_name = false;
            } else {
                params.push(split_param(std::mem::take(&mut current)));
            }
            index += 1;
            continue;
        }
        current.push(ch);
        index += 1;
    }
    if in_name {
        name = current;
    } else {
        params.push(split_param(current));
    }
    if name.trim().is_empty() {
        return None;
    }

    Some((Template { name, params }, close + 2))
}

fn find_template_close(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut index = start;
    while index + 1 < chars.len() {
        if chars[index] == '{' && chars[index + 1] == '{' {
            depth += 1;
            index += 2;
            continue;
        }
        if chars[index] == '}' && chars[index + 1] == '}' {
            depth -= 1;
            if depth == 0 {
                return Some(index);
            }
            index += 2;
            continue;
        }
        index += 1;
    }
    None
}

fn split_param(raw: String) -> Param {
    let mut depth = 0usize;
    let raw_chars = raw.chars().collect::<Vec<_>>();
    let mut index = 0usize;
    while index < raw_chars.len() {
        if raw_chars[index] == '{' && index + 1 < raw_chars.len() && raw_chars[index + 1] == '{' {
            depth += 1;
            index += 2;
            continue;
        }
        if raw_chars[index] == '}' && index + 1 < raw_chars.len() && raw_chars[index + 1] == '}' {
            depth = depth.saturating_sub(1);
            index += 2;
            continue;
        }
        if raw_chars[index] == '=' && depth == 0 {
            let key = raw_chars[..index].iter().collect::<String>();
            let value = raw_chars[index + 1..].iter().collect::<String>();
            return Param {
                key: Some(key),
                value,
            };
        }
        index += 1;
    }
    Param {
        key: None,
        value: raw,
    }
}

fn skip_internal_link(chars: &[char], start: usize) -> usize {
    let mut index = start + 2;
    while index + 1 < chars.len() {
        if chars[index] == ']' && chars[index + 1] == ']' {
            return index + 2;
        }
        index += 1;
    }
    start + 2
}

fn skip_opaque_tag(chars: &[char], start: usize) -> Option<usize> {
    for (open, close) in [("<!--", "-->"), ("<nowiki>", "</nowiki>"), ("<pre>", "</pre>")] {
        if starts_with_at(chars, start, open) {
            let mut index = start + open.chars().count();
            while index < chars.len() {
                if starts_with_at(chars, index, close) {
                    return Some(index + close.chars().count());
                }
                index += 1;
            }
            return Some(chars.len());
        }
    }
    None
}

fn starts_with_at(chars: &[char], start: usize, needle: &str) -> bool {
    let needle_chars = needle.chars().collect::<Vec<_>>();
    if start + needle_chars.len() > chars.len() {
        return false;
    }
    chars[start..start + needle_chars.len()]
        .iter()
        .zip(needle_chars.iter())
        .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

fn scheme_length_at(chars: &[char], start: usize) -> Option<usize> {
    URL_SCHEMES
        .iter()
        .find(|scheme| starts_with_at(chars, start, scheme))
        .map(|scheme| scheme.len())
}

fn at_bare_link_start(chars: &[char], index: usize) -> bool {
    if scheme_length_at(chars, index).is_none() {
        return false;
    }
    if index == 0 {
        return true;
    }
    !chars[index - 1].is_ascii_alphanumeric()
}

fn is_url_boundary(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '<' | '>' | '[' | ']' | '"')
}

// A URL scan does not stop at `{{`; a template pasted directly after a free
// link is swallowed into the URL text, matching the upstream wiki parser.
// The link checker is responsible for splitting such URLs back apart.
fn scan_url(chars: &[char], start: usize) -> usize {
    let mut index = start;
    while index < chars.len() {
        if chars[index] == '{' && index + 1 < chars.len() && chars[index + 1] == '{' {
            if let Some(close) = find_template_close(chars, index) {
                index = close + 2;
                continue;
            }
            break;
        }
        if is_url_boundary(chars[index]) {
            break;
        }
        index += 1;
    }
    index
}

fn parse_bare_link(chars: &[char], start: usize) -> Option<(ExtLink, usize)> {
    let scheme_len = scheme_length_at(chars, start)?;
    let mut end = scan_url(chars, start);
    if end <= start + scheme_len {
        return None;
    }

    // Trailing punctuation belongs to the sentence, not the URL. A closing
    // parenthesis only counts when the URL has no opening one.
    loop {
        let last = chars[end - 1];
        let is_trailing = TRAILING_PUNCTUATION.contains(&last)
            || (last == ')' && !chars[start..end - 1].contains(&'('));
        if is_trailing && end > start + scheme_len + 1 {
            end -= 1;
        } else {
            break;
        }
    }

    let url = chars[start..end].iter().collect::<String>();
    Some((ExtLink::bare(url), end))
}

fn parse_bracket_link(chars: &[char], start: usize) -> Option<(ExtLink, usize)> {
    if chars[start] != '[' {
        return None;
    }
    let url_start = start + 1;
    let scheme_len = scheme_length_at(chars, url_start)?;
    let url_end = scan_url(chars, url_start);
    if url_end <= url_start + scheme_len {
        return None;
    }

    let mut index = url_end;
    while index < chars.len() {
        if chars[index] == ']' {
            let url = chars[url_start..url_end].iter().collect::<String>();
            let title = if index > url_end {
                Some(chars[url_end..index].iter().collect::<String>())
            } else {
                None
            };
            return Some((
                ExtLink {
                    url,
                    title,
                    brackets: true,
                },
                index + 1,
            ));
        }
        if chars[index] == '\n' || chars[index] == '[' {
            return None;
        }
        index += 1;
    }
    None
}
