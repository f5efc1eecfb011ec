//! Attribute lists in, escaped elements out.
//!
//! The project file parser lives elsewhere; it hands this crate a tag name and
//! flat attribute list and receives single self-closing elements back.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fmt::{Display, Write};
use std::str::FromStr;

/// Something that consumes project-file elements.
pub trait XmlTagHandler {
    /// Returns `false` if the tag is not one this handler recognises, so the
    /// surrounding parser can decide whether to descend into children.
    fn handle_xml_tag(&mut self, tag: &str, attrs: &Attributes) -> bool;
}

/// Flat, ordered name/value list as it appeared on an element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Display) -> Self {
        self.0.push((name.into(), value.to_string()));
        self
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a required attribute of element `tag`.
    pub fn parse<T: FromStr>(&self, tag: &'static str, attr: &'static str) -> Result<T> {
        let Some(raw) = self.get(attr) else {
            exn::bail!(ErrorKind::InvalidAttribute { tag, attr, value: String::new() });
        };
        match raw.trim().parse() {
            Ok(v) => Ok(v),
            Err(_) => exn::bail!(ErrorKind::InvalidAttribute { tag, attr, value: raw.to_string() }),
        }
    }

    /// Like [`parse`](Self::parse) but `None` when the attribute is absent.
    pub fn parse_opt<T: FromStr>(&self, tag: &'static str, attr: &'static str) -> Result<Option<T>> {
        match self.get(attr) {
            None => Ok(None),
            Some(_) => self.parse(tag, attr).map(Some),
        }
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

/// Writes indented, self-closing elements into any [`fmt::Write`](std::fmt::Write) sink.
pub struct XmlWriter<W: Write> {
    sink: W,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// `depth` tabs, then `<tag a="v" .../>` and a newline.
    pub fn empty_element<'a>(
        &mut self,
        depth: usize,
        tag: &str,
        attrs: impl IntoIterator<Item = (&'a str, String)>,
    ) -> Result<()> {
        self.write_element(depth, tag, attrs).or_raise(|| ErrorKind::Write)
    }

    fn write_element<'a>(
        &mut self,
        depth: usize,
        tag: &str,
        attrs: impl IntoIterator<Item = (&'a str, String)>,
    ) -> std::fmt::Result {
        for _ in 0..depth {
            self.sink.write_char('\t')?;
        }
        write!(self.sink, "<{tag}")?;
        for (name, value) in attrs {
            write!(self.sink, " {name}=\"{}\"", escape(&value))?;
        }
        self.sink.write_str("/>\n")
    }
}

/// Escape text for use inside a double-quoted attribute.
pub fn escape(value: &str) -> std::borrow::Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return value.into();
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out.into()
}
