//! Mortar Code Generator
//!
//! Compiles a parsed template into the source of one PHP class. The main
//! method renders the template; every `{block}` and `{define}` becomes an
//! auxiliary method. Printed values pass through the escaper selected by
//! their position in the document.
//!
//! ```text
//! source → parse() → Template → compile_template() → CompilerOutput { code, .. }
//! ```

pub mod context;
pub mod escaper;
pub mod html;
pub mod printer;
pub mod tags;

use std::sync::Arc;

use mortar_lexer::ContentType;
use mortar_parser::ast::Template;
use mortar_parser::{parse, CompileError, ParserOptions, StaticPolicy};
use serde::Deserialize;

use crate::context::{php_string, BlockMethod, CompilationContext};

/// The compiled output of one template.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerOutput {
    /// PHP source of the template class.
    pub code: String,
    /// Content type the template declares.
    pub content_type: ContentType,
    /// Names of the declared blocks, in declaration order.
    pub blocks: Vec<String>,
}

/// Compile-time settings.
#[derive(Clone)]
pub struct Options {
    pub parser: ParserOptions,
    /// Name of the generated class.
    pub class_name: String,
}

impl Options {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            parser: ParserOptions::new(content_type),
            ..Self::default()
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            parser: ParserOptions::default(),
            class_name: "Template".into(),
        }
    }
}

/// Settings file read by the command line tool.
///
/// ```json
/// { "content_type": "html", "functions": ["asset"], "sandbox": { "filters": ["upper"] } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub content_type: ContentType,
    pub class_name: Option<String>,
    pub functions: Vec<String>,
    /// Allow-lists for the sandbox. Absent means no sandbox.
    pub sandbox: Option<StaticPolicy>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid class name '{0}'")]
    ClassName(String),
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_options(self) -> Result<Options, ConfigError> {
        let mut parser = ParserOptions::new(self.content_type).with_functions(self.functions);
        if let Some(policy) = self.sandbox {
            parser = parser.with_policy(Arc::new(policy));
        }
        let class_name = self.class_name.unwrap_or_else(|| "Template".into());
        if !is_class_name(&class_name) {
            return Err(ConfigError::ClassName(class_name));
        }
        Ok(Options { parser, class_name })
    }
}

fn is_class_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse and compile template source.
pub fn compile(source: &str, options: &Options) -> Result<CompilerOutput, CompileError> {
    let template = parse(source, &options.parser)?;
    compile_template(&template, options)
}

/// Compile an already parsed template.
pub fn compile_template(
    template: &Template,
    options: &Options,
) -> Result<CompilerOutput, CompileError> {
    let mut ctx = CompilationContext::new(options.parser.content_type);
    html::generate(&template.root, &mut ctx)?;
    let (main, blocks) = ctx.finish();
    log::debug!(
        "generated main body and {} block method(s) for class {}",
        blocks.len(),
        options.class_name
    );

    let code = print_class(&options.class_name, template.content_type, &main, &blocks);
    Ok(CompilerOutput {
        code,
        content_type: template.content_type,
        blocks: blocks.into_iter().map(|b| b.name).collect(),
    })
}

fn print_class(
    name: &str,
    content_type: ContentType,
    main: &str,
    blocks: &[BlockMethod],
) -> String {
    let mut out = String::from("<?php\n\nuse Mortar\\Runtime as MR;\n\n");
    out.push_str(&format!("final class {name} extends Mortar\\Runtime\\Template\n{{\n"));

    let mut constants = Vec::new();
    if content_type != ContentType::Html {
        constants.push(format!(
            "\tpublic const ContentType = {};\n",
            php_string(content_type.as_str())
        ));
    }
    if !blocks.is_empty() {
        let map = blocks
            .iter()
            .map(|b| format!("{} => {}", php_string(&b.name), php_string(&b.method)))
            .collect::<Vec<_>>()
            .join(", ");
        constants.push(format!("\tpublic const Blocks = [{map}];\n"));
    }
    if !constants.is_empty() {
        out.push_str(&constants.concat());
        out.push('\n');
    }

    out.push_str("\tpublic function main(array $__args): void\n\t{\n");
    out.push_str("\t\textract($__args);\n\t\tunset($__args);\n");
    if !main.is_empty() {
        out.push('\n');
        out.push_str(main);
    }
    out.push_str("\t}\n");

    for block in blocks {
        out.push_str(&format!(
            "\n\t/** {{{} {}}} on line {} */\n",
            block.tag, block.name, block.position.line
        ));
        out.push_str(&format!("\tpublic function {}(array $__args): void\n\t{{\n", block.method));
        out.push_str("\t\textract($this->params);\n\t\textract($__args);\n");
        for (i, param) in block.params.iter().enumerate() {
            out.push_str(&format!("\t\t{} = {};\n", param.name, bind_param(i, param)));
        }
        out.push_str("\t\tunset($__args);\n");
        if !block.body.is_empty() {
            out.push('\n');
            out.push_str(&block.body);
        }
        out.push_str("\t}\n");
    }

    out.push_str("}\n");
    out
}

/// `{define}` parameters take a positional argument first, then a named one.
fn bind_param(index: usize, param: &mortar_parser::ast::Param) -> String {
    let key = php_string(param.name.trim_start_matches('$'));
    let default = match &param.default {
        Some(expr) => {
            let code = printer::print_expr(expr);
            match expr.precedence() {
                Some((rank, _)) if rank > 140 => format!("({code})"),
                _ => code,
            }
        }
        None => "null".into(),
    };
    format!("$__args[{index}] ?? $__args[{key}] ?? {default}")
}
