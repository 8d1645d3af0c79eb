//! WASM bindings for the Mortar compiler.
//!
//! Exposes `compile()` to JavaScript via wasm-bindgen.
//! Returns a JS object `{ code, contentType, blocks }` or throws on error.

use mortar_codegen::{CompilerOutput, Options};
use mortar_lexer::ContentType;
use wasm_bindgen::prelude::*;

/// Compile template source to the PHP class.
///
/// `content_type` is one of `html`, `xml`, `text`, `js`, `css` or `ical` and
/// defaults to `html`. Throws a JS error if the template does not compile.
#[wasm_bindgen]
pub fn compile(source: &str, content_type: Option<String>) -> Result<JsValue, JsError> {
    let output = native_compile(source, content_type.as_deref()).map_err(|e| JsError::new(&e))?;

    let blocks = js_sys::Array::new();
    for name in &output.blocks {
        blocks.push(&JsValue::from_str(name));
    }

    let js_obj = js_sys::Object::new();
    js_sys::Reflect::set(&js_obj, &"code".into(), &output.code.into())
        .map_err(|_| JsError::new("Failed to set code property"))?;
    js_sys::Reflect::set(
        &js_obj,
        &"contentType".into(),
        &output.content_type.as_str().into(),
    )
    .map_err(|_| JsError::new("Failed to set contentType property"))?;
    js_sys::Reflect::set(&js_obj, &"blocks".into(), &blocks)
        .map_err(|_| JsError::new("Failed to set blocks property"))?;

    Ok(js_obj.into())
}

/// Get the compiler version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn native_compile(source: &str, content_type: Option<&str>) -> Result<CompilerOutput, String> {
    let content_type = match content_type {
        Some(name) => name.parse::<ContentType>()?,
        None => ContentType::Html,
    };
    mortar_codegen::compile(source, &Options::new(content_type)).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_static_template() {
        let output = native_compile("<p>Hello</p>", None).unwrap();
        assert!(output.code.contains("echo '<p>Hello</p>';"));
        assert_eq!(output.content_type, ContentType::Html);
        assert!(output.blocks.is_empty());
    }

    #[test]
    fn test_content_type_argument() {
        let output = native_compile("{$a}", Some("js")).unwrap();
        assert!(output.code.contains("public const ContentType = 'js';"));
        assert!(output.code.contains("MR\\Filters::escapeJs($a)"));

        let err = native_compile("", Some("pdf")).unwrap_err();
        assert_eq!(err, "unknown content type 'pdf'");
    }

    #[test]
    fn test_error_message_has_position() {
        let err = native_compile("<p>\n{if $a}</p>", None).unwrap_err();
        assert!(err.contains("on line 2"), "{err}");
    }

    #[test]
    fn test_version() {
        let v = version();
        assert!(!v.is_empty());
        assert!(v.contains('.'));
    }

    #[test]
    fn test_multiple_compiles() {
        let first = native_compile("{block a}x{/block}", None).unwrap();
        let second = native_compile("{block b}y{/block}", None).unwrap();
        assert_eq!(first.blocks, vec!["a"]);
        assert_eq!(second.blocks, vec!["b"]);
    }
}
