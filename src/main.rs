use std::path::{Path, PathBuf};
use std::rc::Rc;

use atlas_diagrams::diagram::{GRAPH_ATTRIBUTE, SIZING_ATTRIBUTE};
use atlas_diagrams::dom::Document;
use atlas_diagrams::hook::{HOOK_ATTRIBUTE, HookKind};
use atlas_diagrams::tooltip::TRIGGER_ATTRIBUTE;
use atlas_diagrams::{Config, DiagramGrammar, PageBuilder, Theme};
use clap::Parser;
use futures::executor::LocalPool;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Renders a Mermaid or Graphviz description into an interactive SVG surface
#[derive(Parser, Debug)]
#[command(name = "atlas-diagrams")]
#[command(version)]
#[command(about = "Render Mermaid or Graphviz descriptions into pannable, link-aware SVG", long_about = None)]
struct Args {
    /// Input description file (use "-" for stdin)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output SVG path (defaults to stdout)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Grammar of the description (mermaid or graphviz); inferred from the
    /// input extension when omitted
    #[arg(short, long, value_name = "GRAMMAR")]
    grammar: Option<DiagramGrammar>,

    /// Path to a config file (TOML or YAML)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Page theme (light or dark)
    #[arg(short, long, value_name = "THEME")]
    theme: Option<Theme>,

    /// Container width in pixels; sizes the diagram to the container
    #[arg(long, requires = "height")]
    width: Option<f32>,

    /// Container height in pixels
    #[arg(long, requires = "width")]
    height: Option<f32>,

    /// Id of the diagram container
    #[arg(long, default_value = "diagram")]
    id: String,

    /// Print a JSON summary of the render
    #[arg(long)]
    report: bool,
}

#[derive(Serialize)]
struct Report {
    id: String,
    grammar: DiagramGrammar,
    token: Option<u64>,
    links: Vec<String>,
    tooltip_triggers: Vec<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn infer_grammar(input: &Path) -> Result<DiagramGrammar, String> {
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .ok_or("Cannot infer the grammar without an input extension; pass --grammar")?;
    ext.parse()
}

fn main() -> Result<(), String> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path).map_err(|e| e.to_string())?,
        None => Config::default(),
    };

    let grammar = match args.grammar {
        Some(grammar) => grammar,
        None => infer_grammar(&args.input)?,
    };

    let description = if args.input.to_str() == Some("-") {
        let mut buffer = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer)
            .map_err(|e| format!("Failed to read from stdin: {}", e))?;
        buffer
    } else {
        std::fs::read_to_string(&args.input)
            .map_err(|e| format!("Failed to read input file: {}", e))?
    };

    let mut document = Document::new();
    let container = document.create_element("div");
    let hook = match grammar {
        DiagramGrammar::Mermaid => HookKind::Mermaid,
        DiagramGrammar::Graphviz => HookKind::Viz,
    };
    document.set_attribute(container, "id", args.id.as_str());
    document.set_attribute(container, HOOK_ATTRIBUTE, hook.as_str());
    document.set_attribute(container, GRAPH_ATTRIBUTE, description);
    if let (Some(width), Some(height)) = (args.width, args.height) {
        document.set_measured_size(container, width, height);
        document.set_attribute(container, SIZING_ATTRIBUTE, "measured");
    }
    let body = document.body();
    document
        .append_child(body, container)
        .map_err(|e| e.to_string())?;

    let mut pool = LocalPool::new();
    let (mut page, _events) = PageBuilder::new(config)
        .document(document)
        .spawner(Rc::new(pool.spawner()))
        .build()
        .map_err(|e| e.to_string())?;
    if let Some(theme) = args.theme {
        page.bridge().apply_theme(theme);
    }

    let mounted = page.mount(container);
    pool.run_until(mounted).map_err(|e| e.to_string())?;

    let svg = page.document().borrow().inner_xml(container);
    match &args.output {
        Some(path) => {
            std::fs::write(path, &svg).map_err(|e| format!("Failed to write SVG: {}", e))?;
            eprintln!("SVG saved to: {}", path.display());
        }
        None => println!("{svg}"),
    }

    if args.report {
        let diagram = page
            .diagram(container)
            .ok_or("Diagram was not mounted")?;
        let tooltip_triggers: Vec<String> = {
            let doc = page.document().borrow();
            diagram
                .surface()
                .map(|surface| {
                    doc.descendants(surface)
                        .into_iter()
                        .filter_map(|node| doc.attribute(node, TRIGGER_ATTRIBUTE))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        let report = Report {
            id: args.id.clone(),
            grammar,
            token: diagram.committed_token(),
            links: diagram.link_ids(),
            tooltip_triggers,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("Failed to encode report: {}", e))?;
        if args.output.is_some() {
            println!("{json}");
        } else {
            eprintln!("{json}");
        }
    }

    Ok(())
}
