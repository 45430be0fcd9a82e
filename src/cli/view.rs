//! File viewing commands

use std::path::Path;

use anyhow::{Context, Result};

use super::output::Output;
use crate::convert::{read_dump, ToolSet};
use crate::domain::{parse, AttributeNode, RECORD_SEQUENCE};
use crate::session::{PlayStatus, Session};
use crate::storage::Config;

pub fn show(output: &Output, config: &Config, file: &Path, wait: bool) -> Result<()> {
    let mut session = Session::new(config)?;
    session.load(file)?;

    if wait {
        output.verbose_ctx(
            "show",
            &format!("Waiting for {} conversion(s)", session.pending_conversions().len()),
        );
        session.run_until_idle(None);
    }

    let notices = session.take_notices();
    let document = session
        .document()
        .context("No document loaded")?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "source": session.source().map(|path| path.display().to_string()),
            "document": document,
            "ready": document.ready_count(),
            "pending": document.pending_count(),
            "notices": notices,
        }));
        return Ok(());
    }

    print!("{}", document.to_text());
    for notice in &notices {
        println!("({notice})");
    }

    if !document.slots().is_empty() {
        output.blank();
        println!(
            "{} image(s) ready, {} pending",
            document.ready_count(),
            document.pending_count()
        );
    }

    Ok(())
}

pub fn tree(output: &Output, config: &Config, file: &Path) -> Result<()> {
    let dump_tool = ToolSet::discover_dump(&config.tools)?;
    let rules = config.filter.rules()?;

    let dump = read_dump(&dump_tool, file)
        .with_context(|| format!("Failed to read attributes of {}", file.display()))?;
    let tree = parse(&dump, &rules)
        .with_context(|| format!("Failed to parse attributes of {}", file.display()))?;

    output.verbose_ctx(
        "tree",
        &format!(
            "{} attributes, {} records",
            tree.attributes.len(),
            tree.records.len()
        ),
    );

    if output.is_json() {
        output.data(&tree);
        return Ok(());
    }

    print_nodes(&tree.attributes, 0);
    if tree.directory {
        println!("{}:", RECORD_SEQUENCE);
        for (index, record) in tree.records.iter().enumerate() {
            println!("  - Record {}", index + 1);
            print_nodes(record.children(), 2);
        }
    }

    Ok(())
}

fn print_nodes(nodes: &[AttributeNode], depth: usize) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        match node.text() {
            Some(text) => println!("{indent}{}: {}", node.key, text),
            None => {
                println!("{indent}{}:", node.key);
                for (index, item) in node.children().iter().enumerate() {
                    println!("{indent}  - {} {}", item.key, index + 1);
                    print_nodes(item.children(), depth + 2);
                }
            }
        }
    }
}

pub fn play(output: &Output, config: &Config, file: &Path) -> Result<()> {
    let mut session = Session::new(config)?;
    session.load(file)?;

    match session.play()? {
        PlayStatus::Launched { pid } => {
            output.success(&format!("Player started (pid {pid})"));
        }
        PlayStatus::Converting => {
            output.verbose_ctx("play", "Converting preview");
            session.run_until_idle(None);

            let notices = session.take_notices();
            if notices.is_empty() {
                anyhow::bail!("Preview conversion failed for {}", file.display());
            }
            for notice in notices {
                output.success(&notice);
            }
        }
    }

    Ok(())
}
