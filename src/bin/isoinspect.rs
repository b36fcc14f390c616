use clap::{ArgAction, Parser};
use isoinspect::{
    BoxCatalog, BoxClassifier, ChunkedFileReader, DecoderRegistry, ParseContext, ParsePipeline,
    ParseTree, ParseTreeBuilder, ParseTreeNode, Severity, StreamError,
};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about = "Streaming MP4/ISOBMFF box inspector and validator")]
struct Args {
    /// MP4/ISOBMFF file path
    path: String,

    /// Only print subtree(s) rooted at boxes of this 4CC (e.g. --filter stbl)
    #[arg(long = "filter")]
    filter: Option<String>,

    /// Limit recursion depth for tree output
    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// Skip payload decoding (headers and structure only)
    #[arg(long, action = ArgAction::SetTrue)]
    no_decode: bool,

    /// Do not probe unknown box types for container structure
    #[arg(long, action = ArgAction::SetTrue)]
    no_probe: bool,

    /// Emit JSON instead of the human-readable tree
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Suppress the issue listing after the tree
    #[arg(long, action = ArgAction::SetTrue)]
    quiet: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let reader = ChunkedFileReader::open(&args.path)?;

    let mut pipeline = ParsePipeline::new(BoxCatalog::bundled());
    if args.no_decode {
        pipeline = pipeline.with_decoders(DecoderRegistry::new());
    }
    if args.no_probe {
        pipeline = pipeline.with_classifier(BoxClassifier::without_probe());
    }

    // Drive the stream manually so a fatal read failure still leaves a
    // partial tree to print.
    let mut builder = ParseTreeBuilder::new();
    let mut fatal = None;
    let mut events = pipeline.events(&reader, ParseContext::new());
    for item in events.by_ref() {
        match item {
            Ok(event) => builder.consume(&event),
            Err(StreamError::Cancelled) => break,
            Err(StreamError::Fatal(e)) => {
                fatal = Some(e);
                break;
            }
        }
    }
    let session_issues = events.session_issues().to_vec();
    let tree = builder.snapshot();
    let roots: Vec<&ParseTreeNode> = match &args.filter {
        Some(sel) => select_subtrees(&tree.roots, sel),
        None => tree.roots.iter().collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&roots)?);
    } else {
        for root in &roots {
            print_node(root, 0, args.max_depth);
        }
        if !args.quiet {
            print_issues(&tree, &session_issues);
        }
    }

    if let Some(e) = fatal {
        eprintln!("error: fatal read failure: {e}");
        return Ok(ExitCode::from(2));
    }
    let failed = session_issues.iter().any(|i| i.severity == Severity::Error)
        || has_error_finding(&tree.roots);
    Ok(if failed { ExitCode::from(1) } else { ExitCode::SUCCESS })
}

fn print_node(node: &ParseTreeNode, depth: usize, max_depth: usize) {
    let indent = "  ".repeat(depth);
    let name = node.metadata.as_ref().map(|m| m.name.as_str()).unwrap_or("?");
    let status = match node.status {
        isoinspect::NodeStatus::Valid => "",
        isoinspect::NodeStatus::Partial => " [partial]",
    };
    println!(
        "{indent}{:>10} {:>10} {} ({name}){status}",
        format!("{:#x}", node.header.start_offset()),
        node.header.total_size(),
        node.header.identifier_string(),
    );
    if let Some(payload) = &node.payload {
        for field in &payload.fields {
            println!("{indent}             -> {}: {}", field.name, field.value);
        }
    }
    if depth + 1 <= max_depth {
        for child in &node.children {
            print_node(child, depth + 1, max_depth);
        }
    }
}

fn print_issues(tree: &ParseTree, session_issues: &[isoinspect::ParseIssue]) {
    let mut any = false;
    visit(&tree.roots, &mut |node| {
        for issue in &node.validation {
            any = true;
            println!(
                "{}: [{}] {} (box `{}`)",
                issue.severity.label(),
                issue.rule_id,
                issue.message,
                node.header.identifier_string()
            );
        }
    });
    for issue in session_issues {
        any = true;
        match &issue.byte_range {
            Some(range) => println!(
                "{}: [{}] {} (bytes {}..{})",
                issue.severity.label(),
                issue.code,
                issue.message,
                range.start,
                range.end
            ),
            None => println!("{}: [{}] {}", issue.severity.label(), issue.code, issue.message),
        }
    }
    if !any {
        println!("No issues found.");
    }
}

fn select_subtrees<'a>(roots: &'a [ParseTreeNode], sel: &str) -> Vec<&'a ParseTreeNode> {
    fn walk<'a>(nodes: &'a [ParseTreeNode], sel: &str, out: &mut Vec<&'a ParseTreeNode>) {
        for node in nodes {
            if node.header.typ.as_str_lossy() == sel {
                out.push(node);
            } else {
                walk(&node.children, sel, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(roots, sel, &mut out);
    out
}

fn has_error_finding(nodes: &[ParseTreeNode]) -> bool {
    let mut found = false;
    visit(nodes, &mut |node| {
        if node.validation.iter().any(|v| v.severity == Severity::Error) {
            found = true;
        }
    });
    found
}

fn visit(nodes: &[ParseTreeNode], f: &mut impl FnMut(&ParseTreeNode)) {
    for node in nodes {
        f(node);
        visit(&node.children, f);
    }
}
