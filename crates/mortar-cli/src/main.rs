use clap::{Parser, Subcommand};
use mortar_codegen::{Config, Options};
use mortar_lexer::{ContentType, Scanner};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mortar")]
#[command(about = "Mortar template compiler")]
#[command(version)]
struct Cli {
    /// Print compiler progress (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct CompileArgs {
    /// Input template file
    path: PathBuf,

    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initial content type, overriding the config file
    #[arg(long)]
    content_type: Option<ContentType>,

    /// Name of the generated class
    #[arg(long = "class")]
    class_name: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a template to a PHP class
    Build {
        #[command(flatten)]
        args: CompileArgs,

        /// Output file, defaults to the template path with a .php extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a template for errors without writing output
    Check {
        #[command(flatten)]
        args: CompileArgs,
    },

    /// Print the tokens of a template
    Tokens {
        /// Input template file
        path: PathBuf,

        #[arg(long, default_value = "html")]
        content_type: ContentType,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match cli.command {
        Command::Build { args, output } => cmd_build(&args, output),
        Command::Check { args } => cmd_check(&args),
        Command::Tokens { path, content_type } => cmd_tokens(&path, content_type),
    }
}

/// `RUST_LOG` wins; otherwise `-v` enables debug and `-vv` trace output.
fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn read_file(path: &Path) -> String {
    if !path.exists() {
        fail(format!("file not found: {}", path.display()));
    }
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| fail(format!("reading {}: {e}", path.display())))
}

fn options(args: &CompileArgs) -> Options {
    let mut config = match &args.config {
        Some(path) => Config::from_json(&read_file(path)).unwrap_or_else(|e| fail(e)),
        None => Config::default(),
    };
    if let Some(content_type) = args.content_type {
        config.content_type = content_type;
    }
    if let Some(class_name) = &args.class_name {
        config.class_name = Some(class_name.clone());
    }
    config.into_options().unwrap_or_else(|e| fail(e))
}

fn compile(args: &CompileArgs) -> mortar_codegen::CompilerOutput {
    let source = read_file(&args.path);
    let options = options(args);
    mortar_codegen::compile(&source, &options)
        .unwrap_or_else(|e| fail(format!("{}: {e}", args.path.display())))
}

fn cmd_build(args: &CompileArgs, output: Option<PathBuf>) {
    let compiled = compile(args);
    let target = output.unwrap_or_else(|| args.path.with_extension("php"));
    if let Err(e) = std::fs::write(&target, &compiled.code) {
        fail(format!("writing {}: {e}", target.display()));
    }
    log::info!("{} block(s): {}", compiled.blocks.len(), compiled.blocks.join(", "));
    eprintln!("Built: {}", target.display());
}

fn cmd_check(args: &CompileArgs) {
    compile(args);
    eprintln!("OK: {}", args.path.display());
}

fn cmd_tokens(path: &Path, content_type: ContentType) {
    let source = read_file(path);
    let tokens = Scanner::tokenize(&source, content_type).unwrap_or_else(|e| fail(e));
    for token in tokens {
        println!("{:>4}:{:<4} {:?} {:?}", token.position.line, token.position.column, token.kind, token.text);
    }
}
