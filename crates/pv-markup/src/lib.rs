//! Markup parsing and serialization boundaries.
//!
//! Proposal templates arrive as word-processor HTML exports: deeply nested
//! formatting spans, quoted attributes, entities, and the occasional
//! unbalanced end tag. The parser is best-effort and never fails; whatever
//! cannot be interpreted as a tag is kept as text.

use pv_dom::DomTree;
use pv_dom::NodeId;
use pv_dom::NodeKind;

#[derive(Debug)]
enum Token {
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    End {
        name: String,
    },
    Text(String),
}

/// Parses template markup into a fresh document tree.
pub fn parse_document(source: &str) -> DomTree {
    let tokens = tokenize(source);
    build_tree(tokens)
}

/// Serializes the annotated tree back to markup for the archival snapshot.
pub fn serialize_document(tree: &DomTree) -> String {
    let mut out = String::new();
    for child in tree.children(tree.root()) {
        serialize_node(tree, *child, &mut out);
    }
    out
}

fn serialize_node(tree: &DomTree, id: NodeId, out: &mut String) {
    match tree.kind(id) {
        NodeKind::Text(text) => out.push_str(&escape_text(text)),
        NodeKind::Element { tag, attrs, children } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                out.push(' ');
                out.push_str(name);
                if !value.is_empty() {
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
            }
            if is_void(tag) {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in children {
                serialize_node(tree, *child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if starts_with(bytes, i, b"<!--") {
            i = skip_comment(bytes, i);
            continue;
        }

        if bytes[i] == b'<' {
            if starts_with(bytes, i, b"</") {
                if let Some((tok, next)) = parse_end_tag(bytes, i) {
                    out.push(tok);
                    i = next;
                    continue;
                }
            } else if starts_with(bytes, i, b"<!") || starts_with(bytes, i, b"<?") {
                i = skip_decl(bytes, i);
                continue;
            } else if let Some((tok, next)) = parse_start_tag(source, i) {
                let mut raw_text_tag: Option<String> = None;
                if let Token::Start {
                    name, self_closing, ..
                } = &tok
                {
                    if !*self_closing && is_raw_text_tag(name) {
                        raw_text_tag = Some(name.clone());
                    }
                }

                out.push(tok);
                i = next;

                if let Some(tag_name) = raw_text_tag {
                    let (raw_text, closing_end) = read_raw_text(bytes, i, &tag_name);
                    if !raw_text.is_empty() {
                        out.push(Token::Text(raw_text));
                    }
                    out.push(Token::End { name: tag_name });
                    i = closing_end.unwrap_or(bytes.len());
                }

                continue;
            }

            // A `<` that opens no recognizable tag is prose (word-processor
            // exports leave comparison signs unescaped). Keep it as text
            // and advance so the scan always makes progress.
            out.push(Token::Text("<".to_owned()));
            i += 1;
            continue;
        }

        let (text, next) = parse_text(bytes, i);
        if !text.is_empty() {
            out.push(Token::Text(text));
        }
        i = next;
    }

    out
}

fn build_tree(tokens: Vec<Token>) -> DomTree {
    let mut tree = DomTree::new();
    let mut stack = vec![tree.root()];

    for token in tokens {
        match token {
            Token::Text(text) => {
                let decoded = decode_entities(&text);
                if decoded.is_empty() {
                    continue;
                }
                let node = tree.create_text(&decoded);
                if let Some(current) = stack.last() {
                    tree.append_child(*current, node);
                }
            }
            Token::Start {
                name,
                attrs,
                self_closing,
            } => {
                let node = tree.create_element_with_attrs(&name, attrs);
                if let Some(current) = stack.last() {
                    tree.append_child(*current, node);
                }
                if !self_closing && !is_void(&name) {
                    stack.push(node);
                }
            }
            Token::End { name } => {
                // Close up to the matching open tag; drop strays.
                let matching = stack
                    .iter()
                    .rposition(|id| tree.tag(*id).is_some_and(|tag| tag == name));
                if let Some(position) = matching {
                    if position > 0 {
                        stack.truncate(position);
                    }
                }
            }
        }
    }

    // Parsing is a build step, not a mutation the reconciler should see.
    tree.take_changes();
    tree
}

fn parse_start_tag(source: &str, start: usize) -> Option<(Token, usize)> {
    let bytes = source.as_bytes();
    let mut i = start + 1;
    let name_start = i;
    while i < bytes.len() && is_tag_name_char(bytes[i]) {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    let name = source[name_start..i].to_ascii_lowercase();

    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        i = skip_spaces(bytes, i);
        match bytes.get(i).copied() {
            None => return None,
            Some(b'>') => {
                return Some((
                    Token::Start {
                        name,
                        attrs,
                        self_closing,
                    },
                    i + 1,
                ));
            }
            Some(b'/') => {
                self_closing = true;
                i += 1;
            }
            Some(_) => {
                let (attr, next) = parse_attribute(source, i)?;
                if let Some(attr) = attr {
                    attrs.push(attr);
                }
                i = next;
            }
        }
    }
}

fn parse_attribute(source: &str, start: usize) -> Option<(Option<(String, String)>, usize)> {
    let bytes = source.as_bytes();
    let mut i = start;
    let name_start = i;
    while i < bytes.len() && is_attr_name_char(bytes[i]) {
        i += 1;
    }
    if i == name_start {
        // Unparseable junk before `>`; skip one byte to make progress.
        return Some((None, i + 1));
    }
    let name = source[name_start..i].to_ascii_lowercase();

    i = skip_spaces(bytes, i);
    if bytes.get(i).copied() != Some(b'=') {
        return Some((Some((name, String::new())), i));
    }
    i = skip_spaces(bytes, i + 1);

    match bytes.get(i).copied() {
        Some(quote @ (b'"' | b'\'')) => {
            let value_start = i + 1;
            let mut j = value_start;
            while j < bytes.len() && bytes[j] != quote {
                j += 1;
            }
            let value = decode_entities(&source[value_start..j]);
            Some((Some((name, value)), (j + 1).min(bytes.len())))
        }
        _ => {
            let value_start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                i += 1;
            }
            let value = decode_entities(&source[value_start..i]);
            Some((Some((name, value)), i))
        }
    }
}

fn parse_end_tag(bytes: &[u8], start: usize) -> Option<(Token, usize)> {
    let mut i = start + 2;
    let name_start = i;
    while i < bytes.len() && is_tag_name_char(bytes[i]) {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    let name = String::from_utf8_lossy(&bytes[name_start..i]).to_ascii_lowercase();
    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    Some((Token::End { name }, (i + 1).min(bytes.len())))
}

fn parse_text(bytes: &[u8], start: usize) -> (String, usize) {
    let mut i = start;
    while i < bytes.len() && bytes[i] != b'<' {
        i += 1;
    }
    (String::from_utf8_lossy(&bytes[start..i]).to_string(), i)
}

fn read_raw_text(bytes: &[u8], start: usize, tag_name: &str) -> (String, Option<usize>) {
    let tag_bytes = tag_name.as_bytes();
    let mut i = start;
    while i + 2 + tag_bytes.len() <= bytes.len() {
        if bytes[i] == b'<'
            && bytes[i + 1] == b'/'
            && bytes[i + 2..i + 2 + tag_bytes.len()].eq_ignore_ascii_case(tag_bytes)
        {
            let mut close = i + 2 + tag_bytes.len();
            while close < bytes.len() && bytes[close] != b'>' {
                close += 1;
            }
            let text = String::from_utf8_lossy(&bytes[start..i]).to_string();
            return (text, Some((close + 1).min(bytes.len())));
        }
        i += 1;
    }
    (
        String::from_utf8_lossy(&bytes[start..]).to_string(),
        None,
    )
}

fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0_usize;

    while let Some(rel_amp) = input[cursor..].find('&') {
        let amp = cursor + rel_amp;
        out.push_str(&input[cursor..amp]);

        let rest = &input[(amp + 1)..];
        let Some(rel_semi) = rest.find(';') else {
            out.push('&');
            cursor = amp + 1;
            continue;
        };

        let semi = amp + 1 + rel_semi;
        let entity = &input[(amp + 1)..semi];
        if let Some(decoded) = decode_entity(entity) {
            out.push_str(&decoded);
            cursor = semi + 1;
        } else {
            out.push('&');
            cursor = amp + 1;
        }
    }

    out.push_str(&input[cursor..]);
    out
}

fn decode_entity(entity: &str) -> Option<String> {
    match entity {
        "nbsp" => Some(" ".to_owned()),
        "amp" => Some("&".to_owned()),
        "lt" => Some("<".to_owned()),
        "gt" => Some(">".to_owned()),
        "quot" => Some("\"".to_owned()),
        "apos" => Some("'".to_owned()),
        "mdash" => Some("\u{2014}".to_owned()),
        "ndash" => Some("\u{2013}".to_owned()),
        "rsquo" => Some("\u{2019}".to_owned()),
        _ => {
            if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                let value = u32::from_str_radix(hex, 16).ok()?;
                char::from_u32(value).map(|ch| ch.to_string())
            } else if let Some(dec) = entity.strip_prefix('#') {
                let value = dec.parse::<u32>().ok()?;
                char::from_u32(value).map(|ch| ch.to_string())
            } else {
                None
            }
        }
    }
}

fn is_void(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "source"
            | "track"
            | "wbr"
    )
}

fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style")
}

fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn is_attr_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn skip_spaces(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn skip_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 4;
    while i + 2 < bytes.len() {
        if bytes[i] == b'-' && bytes[i + 1] == b'-' && bytes[i + 2] == b'>' {
            return i + 3;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_decl(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i < bytes.len() {
        if bytes[i] == b'>' {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn starts_with(bytes: &[u8], i: usize, pat: &[u8]) -> bool {
    let end = i.saturating_add(pat.len());
    end <= bytes.len() && &bytes[i..end] == pat
}
