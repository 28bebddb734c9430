use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag pattern is valid"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("attribute pattern is valid")
});

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").expect("anchor pattern is valid")
});

static IMG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<img\b([^>]*)>").expect("img pattern is valid"));

/// An `<a>` element: raw attribute text plus raw inner markup.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Anchor<'a> {
    pub(crate) attrs: &'a str,
    pub(crate) inner: &'a str,
}

impl<'a> Anchor<'a> {
    pub(crate) fn href(&self) -> Option<String> {
        attr(self.attrs, "href")
    }

    pub(crate) fn has_class(&self, token: &str) -> bool {
        has_class(self.attrs, token)
    }

    pub(crate) fn text(&self) -> String {
        inner_text(self.inner)
    }
}

pub(crate) fn anchors(html: &str) -> impl Iterator<Item = Anchor<'_>> {
    ANCHOR_RE.captures_iter(html).filter_map(|caps| {
        Some(Anchor {
            attrs: caps.get(1)?.as_str(),
            inner: caps.get(2)?.as_str(),
        })
    })
}

pub(crate) fn first_anchor_with_class<'a>(html: &'a str, token: &str) -> Option<Anchor<'a>> {
    anchors(html).find(|anchor| anchor.has_class(token))
}

/// Attribute text of the first `<img>` tag in the fragment.
pub(crate) fn first_img_attrs(html: &str) -> Option<&str> {
    IMG_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Value of a named attribute, regardless of position or quoting style.
pub(crate) fn attr(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        let value = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4))?;
        Some(decode_entities(value.as_str().trim()))
    })
}

pub(crate) fn has_class(attrs: &str, token: &str) -> bool {
    attr(attrs, "class").is_some_and(|class| class.contains(token))
}

/// Splits a document into fragments, each starting at a match of `opener`
/// and running up to the next match (or the end of the document).
pub(crate) fn blocks<'a>(html: &'a str, opener: &Regex) -> Vec<&'a str> {
    let starts: Vec<usize> = opener.find_iter(html).map(|m| m.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(idx, &start)| {
            let end = starts.get(idx + 1).copied().unwrap_or(html.len());
            &html[start..end]
        })
        .collect()
}

/// First capture group of `re`, as cleaned text; `None` when absent or blank.
pub(crate) fn capture_text(re: &Regex, html: &str) -> Option<String> {
    let raw = re.captures(html)?.get(1)?.as_str();
    let text = inner_text(raw);
    (!text.is_empty()).then_some(text)
}

pub(crate) fn inner_text(fragment: &str) -> String {
    collapse_whitespace(&decode_entities(&TAG_RE.replace_all(fragment, " ")))
}

pub(crate) fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn absolutize(base_url: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{rest}");
    }
    let base = base_url.trim_end_matches('/');
    if href.starts_with('/') {
        format!("{base}{href}")
    } else {
        format!("{base}/{href}")
    }
}

pub(crate) fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|&semi| semi > 0 && semi <= 10)
            .and_then(|semi| decode_entity(&after[..semi]).map(|ch| (ch, semi)));
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity.to_ascii_lowercase().as_str() {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "laquo" => Some('«'),
        "raquo" => Some('»'),
        "ndash" => Some('–'),
        "mdash" => Some('—'),
        "hellip" => Some('…'),
        _ => decode_numeric_entity(entity),
    }
}

fn decode_numeric_entity(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let value = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u32>().ok()?,
    };
    char::from_u32(value)
}
