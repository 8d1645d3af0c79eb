//! Context-sensitive escaping.
//!
//! The escaper tracks where in the document output is being produced and
//! picks the runtime escaping function for that position. It only ever
//! looks at structure (element and attribute names, quoting), never at the
//! expression being printed.

use std::fmt;

use mortar_lexer::{ContentType, Position};
use mortar_parser::CompileError;

/// Attributes whose value is a URL.
const URL_ATTRIBUTES: &[&str] = &["href", "src", "action", "formaction"];

/// Structural position inside a markup document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Text,
    /// Inside a start tag, between attributes.
    Tag,
    Attribute,
    /// Body of `<script>` or `<style>`.
    RawText,
    Comment,
    /// `<!...>` and `<?...>`
    Bogus,
}

/// Language embedded in an attribute value or raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Embedded {
    None,
    Js,
    Css,
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escaper {
    /// `None` when the content type is only known at render time.
    content_type: Option<ContentType>,
    context: Context,
    embedded: Embedded,
    /// Quote of the current attribute value, `None` when unquoted.
    quote: Option<char>,
    element: String,
}

impl Escaper {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type: Some(content_type),
            context: Context::Text,
            embedded: Embedded::None,
            quote: None,
            element: String::new(),
        }
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.content_type
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn embedded(&self) -> Embedded {
        self.embedded
    }

    /// Switch content type, as `{contentType}` does. Resets the position to text.
    pub fn set_content_type(&mut self, content_type: Option<ContentType>) {
        self.content_type = content_type;
        self.enter_text();
    }

    pub fn enter_text(&mut self) {
        self.context = Context::Text;
        self.embedded = Embedded::None;
        self.quote = None;
    }

    /// Enter the body of an element, given its static `type` attribute.
    pub fn enter_content(&mut self, element: &str, type_attr: Option<&str>) {
        self.enter_text();
        self.element = element.to_ascii_lowercase();
        if !self.is_html_like() {
            return;
        }
        let kind = type_attr.map(|t| t.trim().to_ascii_lowercase());
        match self.element.as_str() {
            "script" => match kind.as_deref() {
                None => self.enter_raw(Embedded::Js),
                Some(t) if is_script_type(t) => self.enter_raw(Embedded::Js),
                Some(t) if t.contains("html") => {}
                Some(_) => self.enter_raw(Embedded::None),
            },
            "style" => match kind.as_deref() {
                None => self.enter_raw(Embedded::Css),
                Some(t) if t.is_empty() || t.contains("css") => self.enter_raw(Embedded::Css),
                Some(_) => self.enter_raw(Embedded::None),
            },
            _ => {}
        }
    }

    fn enter_raw(&mut self, embedded: Embedded) {
        self.context = Context::RawText;
        self.embedded = embedded;
    }

    /// Enter a start tag.
    pub fn enter_tag(&mut self, element: &str) {
        self.element = element.to_ascii_lowercase();
        self.context = Context::Tag;
        self.embedded = Embedded::None;
        self.quote = None;
    }

    /// Enter an attribute value of the current start tag.
    pub fn enter_attribute(&mut self, name: &str, quote: Option<char>) {
        self.context = Context::Attribute;
        self.quote = quote;
        self.embedded = Embedded::None;
        if !self.is_html_like() {
            return;
        }
        let name = name.to_ascii_lowercase();
        self.embedded = if name.starts_with("on") {
            Embedded::Js
        } else if name == "style" {
            Embedded::Css
        } else if URL_ATTRIBUTES.contains(&name.as_str())
            || (name == "data" && self.element == "object")
        {
            Embedded::Url
        } else {
            Embedded::None
        };
    }

    /// Back from an attribute value into the start tag.
    pub fn leave_attribute(&mut self) {
        self.context = Context::Tag;
        self.embedded = Embedded::None;
        self.quote = None;
    }

    pub fn enter_comment(&mut self) {
        self.context = Context::Comment;
        self.embedded = Embedded::None;
    }

    pub fn enter_bogus(&mut self) {
        self.context = Context::Bogus;
        self.embedded = Embedded::None;
    }

    /// HTML, or a runtime content type that may turn out to be HTML.
    fn is_html_like(&self) -> bool {
        matches!(self.content_type, None | Some(ContentType::Html))
    }

    /// Whether printed values go through the URL safety check.
    pub fn is_url(&self) -> bool {
        self.context == Context::Attribute && self.embedded == Embedded::Url
    }

    /// Wrap printed PHP code in the escaping call for the current position.
    pub fn escape(&self, code: &str, at: Position) -> Result<String, CompileError> {
        let Some(content_type) = self.content_type else {
            return Ok(format!(
                "MR\\Filters::escapeDynamic({code}, $this->getContentType(), '{}')",
                self.state()
            ));
        };

        let escaped = match (content_type, self.context) {
            (ContentType::Html, Context::Text) => call("escapeHtmlText", code),
            (ContentType::Html, Context::Tag) => call("escapeHtmlTag", code),
            (ContentType::Html, Context::Attribute) => {
                let inner = match self.embedded {
                    Embedded::Js => call("escapeJs", code),
                    Embedded::Css => call("escapeCss", code),
                    Embedded::None | Embedded::Url => code.to_string(),
                };
                self.quoted(call("escapeHtmlAttr", &inner))
            }
            (ContentType::Html, Context::Comment) | (ContentType::Xml, Context::Comment) => {
                call("escapeHtmlComment", code)
            }
            (ContentType::Html, Context::Bogus) => call("escapeHtml", code),
            (ContentType::Html, Context::RawText) => match self.embedded {
                Embedded::Js => call("escapeJs", code),
                Embedded::Css => call("escapeCss", code),
                Embedded::None | Embedded::Url => call("escapeHtmlRawText", code),
            },
            (ContentType::Xml, Context::Text | Context::Bogus) => call("escapeXml", code),
            (ContentType::Xml, Context::Attribute) => self.quoted(call("escapeXml", code)),
            (ContentType::Xml, Context::Tag) => call("escapeXmlTag", code),
            (ContentType::JavaScript, Context::Text) => call("escapeJs", code),
            (ContentType::Css, Context::Text) => call("escapeCss", code),
            (ContentType::ICal, Context::Text) => call("escapeIcal", code),
            (ContentType::Text, Context::Text) => call("escapeText", code),
            _ => {
                return Err(CompileError::syntax(
                    format!("Unknown escaping context {self}"),
                    at,
                ))
            }
        };
        Ok(escaped)
    }

    /// Structural position without the content type: `text`, `attr-url`, `raw-js`.
    fn state(&self) -> String {
        let context = match self.context {
            Context::Text => "text",
            Context::Tag => "tag",
            Context::Attribute => "attr",
            Context::RawText => "raw",
            Context::Comment => "comment",
            Context::Bogus => "bogus",
        };
        match self.embedded {
            Embedded::None => context.to_string(),
            Embedded::Js => format!("{context}-js"),
            Embedded::Css => format!("{context}-css"),
            Embedded::Url => format!("{context}-url"),
        }
    }

    fn quoted(&self, escaped: String) -> String {
        match self.quote {
            Some(_) => escaped,
            None => format!("'\"' . {escaped} . '\"'"),
        }
    }
}

impl fmt::Display for Escaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let content_type = self.content_type.map_or("dynamic", ContentType::as_str);
        write!(f, "{content_type}/{}", self.state())
    }
}

fn call(function: &str, code: &str) -> String {
    format!("MR\\Filters::{function}({code})")
}

fn is_script_type(t: &str) -> bool {
    t.is_empty()
        || t == "module"
        || t == "text/plain"
        || t.ends_with("javascript")
        || t.ends_with("ecmascript")
        || t.contains("json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn html() -> Escaper {
        Escaper::new(ContentType::Html)
    }

    fn escape(escaper: &Escaper) -> String {
        escaper.escape("$x", Position::default()).unwrap()
    }

    #[test]
    fn test_html_text_and_tag() {
        let mut e = html();
        assert_eq!(escape(&e), "MR\\Filters::escapeHtmlText($x)");
        e.enter_tag("div");
        assert_eq!(escape(&e), "MR\\Filters::escapeHtmlTag($x)");
    }

    #[test]
    fn test_attribute_refinement() {
        let mut e = html();
        e.enter_tag("a");
        e.enter_attribute("title", Some('"'));
        assert_eq!(escape(&e), "MR\\Filters::escapeHtmlAttr($x)");
        assert!(!e.is_url());

        e.enter_attribute("onclick", Some('"'));
        assert_eq!(escape(&e), "MR\\Filters::escapeHtmlAttr(MR\\Filters::escapeJs($x))");

        e.enter_attribute("STYLE", Some('\''));
        assert_eq!(escape(&e), "MR\\Filters::escapeHtmlAttr(MR\\Filters::escapeCss($x))");

        e.enter_attribute("href", Some('"'));
        assert!(e.is_url());
        assert_eq!(e.to_string(), "html/attr-url");
    }

    #[test]
    fn test_object_data_is_url() {
        let mut e = html();
        e.enter_tag("object");
        e.enter_attribute("data", Some('"'));
        assert!(e.is_url());

        e.enter_tag("div");
        e.enter_attribute("data", Some('"'));
        assert!(!e.is_url());
    }

    #[test]
    fn test_unquoted_attribute_is_wrapped() {
        let mut e = html();
        e.enter_tag("input");
        e.enter_attribute("value", None);
        assert_eq!(escape(&e), "'\"' . MR\\Filters::escapeHtmlAttr($x) . '\"'");
    }

    #[test]
    fn test_script_and_style_bodies() {
        let mut e = html();
        e.enter_content("script", None);
        assert_eq!(escape(&e), "MR\\Filters::escapeJs($x)");
        e.enter_content("script", Some("application/ld+json"));
        assert_eq!(escape(&e), "MR\\Filters::escapeJs($x)");
        e.enter_content("script", Some("text/html"));
        assert_eq!(escape(&e), "MR\\Filters::escapeHtmlText($x)");
        e.enter_content("script", Some("text/x-template"));
        assert_eq!(escape(&e), "MR\\Filters::escapeHtmlRawText($x)");
        e.enter_content("style", None);
        assert_eq!(escape(&e), "MR\\Filters::escapeCss($x)");
        e.enter_content("textarea", None);
        assert_eq!(escape(&e), "MR\\Filters::escapeHtmlText($x)");
    }

    #[test]
    fn test_comment_and_bogus() {
        let mut e = html();
        e.enter_comment();
        assert_eq!(escape(&e), "MR\\Filters::escapeHtmlComment($x)");
        e.enter_bogus();
        assert_eq!(escape(&e), "MR\\Filters::escapeHtml($x)");
    }

    #[test]
    fn test_xml_table() {
        let mut e = Escaper::new(ContentType::Xml);
        assert_eq!(escape(&e), "MR\\Filters::escapeXml($x)");
        e.enter_tag("item");
        assert_eq!(escape(&e), "MR\\Filters::escapeXmlTag($x)");
        e.enter_attribute("href", Some('"'));
        assert!(!e.is_url());
        assert_eq!(escape(&e), "MR\\Filters::escapeXml($x)");
        e.enter_content("script", None);
        assert_eq!(e.context(), Context::Text);
    }

    #[test]
    fn test_plain_content_types() {
        for (content_type, function) in [
            (ContentType::JavaScript, "escapeJs"),
            (ContentType::Css, "escapeCss"),
            (ContentType::ICal, "escapeIcal"),
            (ContentType::Text, "escapeText"),
        ] {
            let e = Escaper::new(content_type);
            assert_eq!(escape(&e), format!("MR\\Filters::{function}($x)"));
        }
    }

    #[test]
    fn test_unknown_pair_is_an_error() {
        let mut e = Escaper::new(ContentType::JavaScript);
        e.enter_tag("p");
        let err = e.escape("$x", Position::new(0, 3, 4)).unwrap_err();
        assert_eq!(err.message(), "Unknown escaping context js/tag");
        assert_eq!((err.line(), err.column()), (3, 4));
    }

    #[test]
    fn test_dynamic_content_type() {
        let mut e = html();
        e.set_content_type(None);
        assert_eq!(
            escape(&e),
            "MR\\Filters::escapeDynamic($x, $this->getContentType(), 'text')"
        );
    }

    #[test]
    fn test_dynamic_content_type_keeps_position() {
        let mut e = html();
        e.set_content_type(None);
        e.enter_tag("a");
        e.enter_attribute("href", Some('"'));
        assert!(e.is_url());
        assert_eq!(
            escape(&e),
            "MR\\Filters::escapeDynamic($x, $this->getContentType(), 'attr-url')"
        );
        e.enter_attribute("onclick", None);
        assert_eq!(e.to_string(), "dynamic/attr-js");
        e.enter_content("script", None);
        assert_eq!(
            escape(&e),
            "MR\\Filters::escapeDynamic($x, $this->getContentType(), 'raw-js')"
        );
    }

    #[test]
    fn test_selection_ignores_the_value() {
        let mut e = html();
        e.enter_tag("a");
        e.enter_attribute("href", Some('"'));
        let a = e.escape("$a", Position::default()).unwrap();
        let b = e.escape("$b->c()", Position::default()).unwrap();
        assert_eq!(a.replace("$a", "$b->c()"), b);
    }
}
